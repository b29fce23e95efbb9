//! Page-Size Mapper
//!
//! A certificate page is exactly as large as its raster at a fixed DPI: no
//! paper sizes, no margins.

use serde::{Deserialize, Serialize};

use crate::compose::RasterImage;

pub const SCREEN_DPI: f64 = 96.0;
pub const MM_PER_INCH: f64 = 25.4;
pub const POINTS_PER_INCH: f64 = 72.0;
/// Symmetric bleed that hides sub-pixel white edges.
pub const DEFAULT_EDGE_OVERFLOW_MM: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub width_mm: f64,
    pub height_mm: f64,
    pub orientation: Orientation,
}

impl PageDescriptor {
    pub fn from_pixels(width_px: u32, height_px: u32, dpi: f64) -> Self {
        let mm_per_px = MM_PER_INCH / dpi;
        let width_mm = width_px as f64 * mm_per_px;
        let height_mm = height_px as f64 * mm_per_px;
        let orientation = if width_mm > height_mm {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        };
        Self { width_mm, height_mm, orientation }
    }

    pub fn width_pt(&self) -> f64 {
        mm_to_pt(self.width_mm)
    }

    pub fn height_pt(&self) -> f64 {
        mm_to_pt(self.height_mm)
    }

    /// Full-page image rectangle grown by `overflow_mm` on every edge.
    pub fn image_placement(&self, overflow_mm: f64) -> PlacementRect {
        PlacementRect {
            x_mm: -overflow_mm,
            y_mm: -overflow_mm,
            width_mm: self.width_mm + 2.0 * overflow_mm,
            height_mm: self.height_mm + 2.0 * overflow_mm,
        }
    }
}

/// Image rectangle in page millimetres, origin at the page's top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRect {
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
}

pub fn mm_to_pt(mm: f64) -> f64 {
    mm * POINTS_PER_INCH / MM_PER_INCH
}

pub fn to_page(raster: &RasterImage, dpi: f64) -> PageDescriptor {
    PageDescriptor::from_pixels(raster.width(), raster.height(), dpi)
}

/// Print specifications for physical output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSpec {
    pub dpi: f64,
    pub edge_overflow_mm: f64,
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            dpi: SCREEN_DPI,
            edge_overflow_mm: DEFAULT_EDGE_OVERFLOW_MM,
        }
    }
}

impl PrintSpec {
    /// Overflow outside 0..=5 mm is rejected.
    pub fn with_edge_overflow(edge_overflow_mm: f64) -> Result<Self, &'static str> {
        if !(0.0..=5.0).contains(&edge_overflow_mm) {
            return Err("Edge overflow must be between 0 and 5 mm");
        }
        Ok(Self { edge_overflow_mm, ..Self::default() })
    }

    pub fn page_for(&self, raster: &RasterImage) -> PageDescriptor {
        to_page(raster, self.dpi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landscape_page() {
        let page = PageDescriptor::from_pixels(1200, 800, SCREEN_DPI);
        assert!((page.width_mm - 317.5).abs() < 1e-9);
        assert!((page.height_mm - 211.666_666).abs() < 1e-3);
        assert_eq!(page.orientation, Orientation::Landscape);
    }

    #[test]
    fn test_square_is_portrait() {
        let page = PageDescriptor::from_pixels(500, 500, SCREEN_DPI);
        assert_eq!(page.orientation, Orientation::Portrait);
    }

    #[test]
    fn test_points_conversion() {
        // 96px at 96 DPI is one inch
        let page = PageDescriptor::from_pixels(96, 192, SCREEN_DPI);
        assert!((page.width_pt() - 72.0).abs() < 1e-9);
        assert!((page.height_pt() - 144.0).abs() < 1e-9);
    }

    #[test]
    fn test_image_placement_overflow() {
        let page = PageDescriptor::from_pixels(800, 600, SCREEN_DPI);
        let rect = page.image_placement(0.5);
        assert_eq!(rect.x_mm, -0.5);
        assert!((rect.width_mm - (page.width_mm + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_print_spec_bounds() {
        assert!(PrintSpec::with_edge_overflow(-1.0).is_err());
        assert!(PrintSpec::with_edge_overflow(f64::NAN).is_err());
        assert_eq!(PrintSpec::with_edge_overflow(0.0).unwrap().dpi, SCREEN_DPI);
    }
}
