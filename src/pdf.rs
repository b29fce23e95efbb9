//! Document Output - Single-Page PDF
//!
//! The encoder is a collaborator behind [`DocumentEncoder`]. It is loaded on
//! demand through an [`EncoderSlot`] the first time an export needs it and
//! reused afterwards. A failed load is not memoized.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::compose::RasterImage;
use crate::print::{mm_to_pt, PageDescriptor, PlacementRect};
use crate::retry::OperationTimeout;

pub const FILENAME_PREFIX: &str = "RISE";
const PRODUCER: &str = concat!("certforge-core ", env!("CARGO_PKG_VERSION"));

static SAFE_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+\.pdf$").expect("Invalid filename regex"));

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("PDF encoding library failed to load: {0}")]
    LoadFailed(String),

    #[error("PDF assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF serialization failed: {0}")]
    Write(String),

    #[error("Cannot encode an empty raster")]
    EmptyRaster,

    #[error(transparent)]
    Timeout(#[from] OperationTimeout),
}

/// Raster + page size + placement in, document bytes out.
pub trait DocumentEncoder {
    fn name(&self) -> &'static str;

    fn encode(
        &self,
        raster: &RasterImage,
        page: &PageDescriptor,
        placement: &PlacementRect,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// Writes PDF 1.5 with one page and one Flate-compressed RGB image.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfEncoder;

impl DocumentEncoder for LopdfEncoder {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn encode(
        &self,
        raster: &RasterImage,
        page: &PageDescriptor,
        placement: &PlacementRect,
    ) -> Result<Vec<u8>, EncodeError> {
        let (width_px, height_px) = raster.dimensions();
        if width_px == 0 || height_px == 0 {
            return Err(EncodeError::EmptyRaster);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width_px as i64,
                "Height" => height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            raster.to_rgb_bytes(),
        ));

        // PDF space has its origin at the bottom-left; the placement rect is
        // measured from the top-left.
        let page_height = page.height_pt() as f32;
        let x = mm_to_pt(placement.x_mm) as f32;
        let w = mm_to_pt(placement.width_mm) as f32;
        let h = mm_to_pt(placement.height_mm) as f32;
        let y = page_height - mm_to_pt(placement.y_mm) as f32 - h;

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![w.into(), 0.0f32.into(), 0.0f32.into(), h.into(), x.into(), y.into()],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page.width_pt() as f32),
                Object::Real(page_height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Producer" => Object::string_literal(PRODUCER),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.compress();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).map_err(|e| EncodeError::Write(e.to_string()))?;

        debug!(
            encoder = self.name(),
            width_mm = page.width_mm,
            height_mm = page.height_mm,
            bytes = bytes.len(),
            "Encoded certificate PDF"
        );
        Ok(bytes)
    }
}

type EncoderLoader = Box<dyn Fn() -> Result<Box<dyn DocumentEncoder>, EncodeError>>;

/// Load-once holder for the document encoder.
pub struct EncoderSlot {
    loader: EncoderLoader,
    encoder: OnceCell<Box<dyn DocumentEncoder>>,
}

impl EncoderSlot {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn DocumentEncoder>, EncodeError> + 'static,
    {
        Self {
            loader: Box::new(loader),
            encoder: OnceCell::new(),
        }
    }

    pub fn lopdf() -> Self {
        Self::new(|| Ok(Box::new(LopdfEncoder) as Box<dyn DocumentEncoder>))
    }

    pub fn is_loaded(&self) -> bool {
        self.encoder.get().is_some()
    }

    pub fn get(&self) -> Result<&dyn DocumentEncoder, EncodeError> {
        let encoder = self.encoder.get_or_try_init(|| {
            let encoder = (self.loader)()?;
            info!(encoder = encoder.name(), "Loaded document encoder");
            Ok::<_, EncodeError>(encoder)
        })?;
        Ok(encoder.as_ref())
    }
}

impl Default for EncoderSlot {
    fn default() -> Self {
        Self::lopdf()
    }
}

/// `RISE_<name with underscores>_<YYYY-MM-DD>.pdf`, or
/// `RISE_Certificate_<date>.pdf` when that is not a safe filename.
pub fn derive_filename(sanitized_name: &str, date: NaiveDate) -> String {
    let iso = date.format("%Y-%m-%d");
    let name = sanitized_name.split_whitespace().collect::<Vec<_>>().join("_");
    let candidate = format!("{}_{}_{}.pdf", FILENAME_PREFIX, name, iso);
    if !name.is_empty() && SAFE_FILENAME.is_match(&candidate) {
        candidate
    } else {
        format!("{}_Certificate_{}.pdf", FILENAME_PREFIX, iso)
    }
}

/// A finished document, only ever built from fully encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl CertificateDocument {
    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.bytes)?;
        info!(path = %path.display(), bytes = self.bytes.len(), "Saved certificate");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::SCREEN_DPI;
    use image::{Rgba, RgbaImage};
    use std::cell::Cell;
    use std::rc::Rc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn test_filename_from_name() {
        assert_eq!(derive_filename("Alex  Smith", date()), "RISE_Alex_Smith_2026-10-16.pdf");
    }

    #[test]
    fn test_filename_fallback() {
        assert_eq!(derive_filename("", date()), "RISE_Certificate_2026-10-16.pdf");
        assert_eq!(derive_filename("Zoë", date()), "RISE_Certificate_2026-10-16.pdf");
        assert_eq!(derive_filename("a/b", date()), "RISE_Certificate_2026-10-16.pdf");
    }

    #[test]
    fn test_lopdf_page_matches_descriptor() {
        let raster = RasterImage::new(RgbaImage::from_pixel(120, 80, Rgba([10, 20, 30, 255])));
        let page = PageDescriptor::from_pixels(120, 80, SCREEN_DPI);
        let bytes = LopdfEncoder.encode(&raster, &page, &page.image_placement(0.5)).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();
        let media_box = doc.get_dictionary(page_id).unwrap().get(b"MediaBox").unwrap().as_array().unwrap();
        let width = media_box[2].as_float().unwrap();
        let height = media_box[3].as_float().unwrap();
        assert!((width as f64 - page.width_pt()).abs() < 0.01);
        assert!((height as f64 - page.height_pt()).abs() < 0.01);
    }

    #[test]
    fn test_empty_raster_rejected() {
        let raster = RasterImage::new(RgbaImage::new(0, 10));
        let page = PageDescriptor::from_pixels(0, 10, SCREEN_DPI);
        assert!(matches!(
            LopdfEncoder.encode(&raster, &page, &page.image_placement(0.0)),
            Err(EncodeError::EmptyRaster)
        ));
    }

    #[test]
    fn test_slot_loads_once() {
        let loads = Rc::new(Cell::new(0));
        let counter = loads.clone();
        let slot = EncoderSlot::new(move || {
            counter.set(counter.get() + 1);
            Ok(Box::new(LopdfEncoder) as Box<dyn DocumentEncoder>)
        });
        assert!(!slot.is_loaded());
        slot.get().unwrap();
        slot.get().unwrap();
        assert_eq!(loads.get(), 1);
        assert!(slot.is_loaded());
    }

    #[test]
    fn test_failed_load_is_retried_later() {
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();
        let slot = EncoderSlot::new(move || {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                Err(EncodeError::LoadFailed("network".to_string()))
            } else {
                Ok(Box::new(LopdfEncoder) as Box<dyn DocumentEncoder>)
            }
        });
        assert!(matches!(slot.get(), Err(EncodeError::LoadFailed(_))));
        assert!(slot.get().is_ok());
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_document_save() {
        let dir = tempfile::tempdir().unwrap();
        let doc = CertificateDocument {
            filename: derive_filename("Alex Smith", date()),
            bytes: b"%PDF-1.5".to_vec(),
        };
        let path = doc.save(dir.path()).unwrap();
        assert!(path.ends_with("RISE_Alex_Smith_2026-10-16.pdf"));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.5");
    }
}
