//! Compositor - Certificate Rasterization
//!
//! Planning turns the template state and the two fields into a
//! `CompositionSpec`; rendering paints that spec onto a fresh raster.
//!
//! With a Ready template the raster has the template's native size and the
//! font size chosen against the on-screen preview width is scaled by
//! `raster_width / preview_width`. Otherwise an 800x600 certificate is
//! generated and field sizes come from the length heuristic, with greedy
//! word wrapping.

use chrono::NaiveDate;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::fit::{fit_exact, fit_heuristic, FitPolicy, HeuristicProfile};
use crate::input::{FieldRole, TextField};
use crate::retry::{Deadline, OperationTimeout};
use crate::templates::{CertificateLayout, FallbackLayout, TemplateImage};
use crate::typeface::Typeface;

pub const LINE_HEIGHT: f32 = 1.2;

const TITLE_SIZE: f32 = 48.0;
const TITLE_Y: f32 = 120.0;
const TITLE_COLOR: [u8; 3] = [73, 80, 87];
const SUBTITLE_SIZE: f32 = 24.0;
const SUBTITLE_Y: f32 = 180.0;
const MUTED_COLOR: [u8; 3] = [108, 117, 125];
const COMPLETION_SIZE: f32 = 24.0;
const COMPLETION_OFFSET: f32 = 60.0;
const ISSUED_SIZE: f32 = 18.0;
const ISSUED_FROM_BOTTOM: f32 = 80.0;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Composition produced an empty raster ({width}x{height})")]
    EmptyRaster { width: u32, height: u32 },

    #[error(transparent)]
    Timeout(#[from] OperationTimeout),
}

/// Immutable RGBA output of a composition.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pixels: RgbaImage,
}

impl RasterImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Packed RGB, alpha dropped, rows top to bottom.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity((self.width() * self.height() * 3) as usize);
        for pixel in self.pixels.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
        }
        rgb
    }
}

/// Vertical anchoring of a placement; text is always centered horizontally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// `y` is the middle of the line box.
    Middle,
    /// `y` is the alphabetic baseline.
    Baseline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub text: String,
    pub font_size_px: f32,
    pub x_fraction: f32,
    pub y_fraction: f32,
    pub anchor: Anchor,
    pub color: [u8; 3],
    /// Wrap onto several centered lines within this share of the width.
    pub wrap_fraction: Option<f32>,
    pub role: Option<FieldRole>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackDescriptor {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub outer_border: [u8; 3],
    pub inner_border: [u8; 3],
}

impl From<&FallbackLayout> for FallbackDescriptor {
    fn from(layout: &FallbackLayout) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            background: layout.background,
            outer_border: layout.outer_border,
            inner_border: layout.inner_border,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Background<'t> {
    Template(&'t RgbaImage),
    Fallback(FallbackDescriptor),
}

#[derive(Debug, Clone)]
pub struct CompositionSpec<'t> {
    pub background: Background<'t>,
    pub placements: Vec<Placement>,
}

impl CompositionSpec<'_> {
    pub fn uses_template(&self) -> bool {
        matches!(self.background, Background::Template(_))
    }

    pub fn placement_for(&self, role: FieldRole) -> Option<&Placement> {
        self.placements.iter().find(|p| p.role == Some(role))
    }
}

pub struct Compositor<'a> {
    typeface: &'a dyn Typeface,
    layout: &'a CertificateLayout,
    policy: FitPolicy,
    preview_width: f32,
    heuristic: HeuristicProfile,
}

impl<'a> Compositor<'a> {
    pub fn new(
        typeface: &'a dyn Typeface,
        layout: &'a CertificateLayout,
        policy: FitPolicy,
        preview_width: f32,
        heuristic: HeuristicProfile,
    ) -> Self {
        Self { typeface, layout, policy, preview_width, heuristic }
    }

    /// Plans and renders in one step.
    pub fn compose(
        &self,
        template: &TemplateImage,
        fields: &[TextField],
        issued_on: NaiveDate,
        deadline: Option<&Deadline<'_>>,
    ) -> Result<RasterImage, ComposeError> {
        let spec = self.plan(template, fields, issued_on);
        self.render(&spec, deadline)
    }

    /// A template that is still loading composes like a failed one.
    pub fn plan<'t>(
        &self,
        template: &'t TemplateImage,
        fields: &[TextField],
        issued_on: NaiveDate,
    ) -> CompositionSpec<'t> {
        match template.pixels() {
            Some(image) => self.plan_template(image, fields),
            None => self.plan_fallback(fields, issued_on),
        }
    }

    fn plan_template<'t>(&self, image: &'t RgbaImage, fields: &[TextField]) -> CompositionSpec<'t> {
        let scale = image.width() as f32 / self.preview_width;
        let budget = self.policy.width_budget(self.preview_width);

        let placements = fields
            .iter()
            .filter(|f| !f.is_blank())
            .map(|field| {
                let preview_size = fit_exact(&field.sanitized_value, budget, &self.policy, self.typeface);
                let y_fraction = match field.role {
                    FieldRole::Name => self.layout.name_y_fraction,
                    FieldRole::Organization => self.layout.organization_y_fraction,
                };
                Placement {
                    text: field.sanitized_value.clone(),
                    font_size_px: preview_size * scale,
                    x_fraction: 0.5,
                    y_fraction,
                    anchor: Anchor::Middle,
                    color: self.layout.text_color,
                    wrap_fraction: None,
                    role: Some(field.role),
                }
            })
            .collect();

        CompositionSpec { background: Background::Template(image), placements }
    }

    fn plan_fallback<'t>(&self, fields: &[TextField], issued_on: NaiveDate) -> CompositionSpec<'t> {
        let fallback = &self.layout.fallback;
        let width = fallback.width as f32;
        let height = fallback.height as f32;
        let fixed = |text: &str, size: f32, y_px: f32, color: [u8; 3]| Placement {
            text: text.to_string(),
            font_size_px: size,
            x_fraction: 0.5,
            y_fraction: y_px / height,
            anchor: Anchor::Baseline,
            color,
            wrap_fraction: None,
            role: None,
        };

        let mut placements = vec![
            fixed(&fallback.title, TITLE_SIZE, TITLE_Y, TITLE_COLOR),
            fixed(&fallback.subtitle, SUBTITLE_SIZE, SUBTITLE_Y, MUTED_COLOR),
        ];

        let budget = self.policy.width_budget(width);
        for field in fields.iter().filter(|f| !f.is_blank()) {
            let y_fraction = match field.role {
                FieldRole::Name => fallback.name_y_fraction,
                FieldRole::Organization => fallback.organization_y_fraction,
            };
            placements.push(Placement {
                text: field.sanitized_value.clone(),
                font_size_px: fit_heuristic(&field.sanitized_value, budget, &self.policy, &self.heuristic),
                x_fraction: 0.5,
                y_fraction,
                anchor: Anchor::Middle,
                color: self.layout.text_color,
                wrap_fraction: Some(fallback.wrap_fraction),
                role: Some(field.role),
            });
        }

        placements.push(fixed(
            &fallback.completion_line,
            COMPLETION_SIZE,
            height / 2.0 + COMPLETION_OFFSET,
            MUTED_COLOR,
        ));
        if fallback.show_issue_date {
            let issued = format!("Issued on: {}", issued_on.format("%-m/%-d/%Y"));
            placements.push(fixed(&issued, ISSUED_SIZE, height - ISSUED_FROM_BOTTOM, MUTED_COLOR));
        }

        CompositionSpec {
            background: Background::Fallback(FallbackDescriptor::from(fallback)),
            placements,
        }
    }

    pub fn render(
        &self,
        spec: &CompositionSpec<'_>,
        deadline: Option<&Deadline<'_>>,
    ) -> Result<RasterImage, ComposeError> {
        let mut canvas = match &spec.background {
            Background::Template(image) => flatten_onto_white(image),
            Background::Fallback(descriptor) => paint_fallback(descriptor),
        };

        if canvas.width() == 0 || canvas.height() == 0 {
            return Err(ComposeError::EmptyRaster {
                width: canvas.width(),
                height: canvas.height(),
            });
        }

        for placement in &spec.placements {
            if let Some(deadline) = deadline {
                deadline.check()?;
            }
            self.draw_placement(&mut canvas, placement);
        }

        debug!(
            width = canvas.width(),
            height = canvas.height(),
            placements = spec.placements.len(),
            "Composed certificate raster"
        );
        Ok(RasterImage::new(canvas))
    }

    fn draw_placement(&self, canvas: &mut RgbaImage, placement: &Placement) {
        let size = placement.font_size_px;
        let canvas_width = canvas.width() as f32;
        let lines = match placement.wrap_fraction {
            Some(fraction) => wrap_lines(self.typeface, &placement.text, size, canvas_width * fraction),
            None => vec![placement.text.clone()],
        };
        if lines.is_empty() {
            return;
        }

        let metrics = self.typeface.line_metrics(size);
        let line_height = size * LINE_HEIGHT;
        let center_x = placement.x_fraction * canvas_width;
        let center_y = placement.y_fraction * canvas.height() as f32;
        let first_y = center_y - (lines.len() as f32 * line_height) / 2.0 + line_height / 2.0;
        let [r, g, b] = placement.color;
        let color = Rgba([r, g, b, 255]);

        for (i, line) in lines.iter().enumerate() {
            let y = first_y + i as f32 * line_height;
            let top = match placement.anchor {
                Anchor::Middle => y - metrics.height() / 2.0,
                Anchor::Baseline => y - metrics.ascent,
            };
            let left = center_x - self.typeface.measure(line, size) / 2.0;
            self.typeface.draw_line(canvas, line, left, top, size, color);
        }
    }
}

/// Greedy line breaking: a word joins the current line while the joined
/// line measures under `max_width`.
pub fn wrap_lines(typeface: &dyn Typeface, text: &str, size_px: f32, max_width: f32) -> Vec<String> {
    let mut words = text.split_whitespace();
    let mut current = match words.next() {
        Some(first) => first.to_string(),
        None => return vec![],
    };

    let mut lines = vec![];
    for word in words {
        let candidate = format!("{} {}", current, word);
        if typeface.measure(&candidate, size_px) < max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    lines.push(current);
    lines
}

/// The page behind the artwork is white; transparent pixels must not reach
/// the encoder, which drops alpha.
fn flatten_onto_white(template: &RgbaImage) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(template.width(), template.height(), Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, template, 0, 0);
    canvas
}

fn paint_fallback(descriptor: &FallbackDescriptor) -> RgbaImage {
    let [r, g, b] = descriptor.background;
    let mut canvas = RgbaImage::from_pixel(descriptor.width, descriptor.height, Rgba([r, g, b, 255]));

    // 20px outer frame flush with the edge, 2px inner rule straddling inset 30.
    stroke_frame(&mut canvas, 0, 20, descriptor.outer_border);
    stroke_frame(&mut canvas, 29, 2, descriptor.inner_border);
    canvas
}

fn stroke_frame(canvas: &mut RgbaImage, inset: u32, thickness: u32, color: [u8; 3]) {
    let [r, g, b] = color;
    let color = Rgba([r, g, b, 255]);
    let (width, height) = canvas.dimensions();

    for t in 0..thickness {
        let offset = inset + t;
        let w = width.saturating_sub(2 * offset);
        let h = height.saturating_sub(2 * offset);
        if w > 0 && h > 0 {
            let rect = Rect::at(offset as i32, offset as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Sanitizer;
    use crate::templates::TemplateFailure;
    use crate::fit::TextMeasure;
    use crate::typeface::MetricTypeface;

    fn fields(name: &str, org: &str) -> Vec<TextField> {
        let sanitizer = Sanitizer::default();
        vec![
            TextField::new(FieldRole::Name, name, &sanitizer),
            TextField::new(FieldRole::Organization, org, &sanitizer),
        ]
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn white(w: u32, h: u32) -> TemplateImage {
        TemplateImage::ready(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])))
    }

    #[test]
    fn test_template_plan_scales_preview_size() {
        let face = MetricTypeface::sans();
        let layout = CertificateLayout::default();
        let compositor = Compositor::new(&face, &layout, FitPolicy::default(), 600.0, HeuristicProfile::COMPACT);
        let template = white(1200, 800);

        let spec = compositor.plan(&template, &fields("Alex Smith", "Rotaract Club of Testville"), date());
        assert!(spec.uses_template());
        assert_eq!(spec.placements.len(), 2);

        let name = spec.placement_for(FieldRole::Name).unwrap();
        let preview = fit_exact("Alex Smith", 450.0, &FitPolicy::default(), &face);
        assert_eq!(name.font_size_px, preview * 2.0);
        assert_eq!(name.y_fraction, 0.484);
        assert_eq!(spec.placement_for(FieldRole::Organization).unwrap().y_fraction, 0.555);
    }

    #[test]
    fn test_template_transparency_flattens_to_white() {
        let face = MetricTypeface::sans();
        let layout = CertificateLayout::default();
        let compositor = Compositor::new(&face, &layout, FitPolicy::default(), 800.0, HeuristicProfile::COMPACT);
        let mut artwork = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 0]));
        artwork.put_pixel(199, 99, Rgba([10, 20, 30, 255]));
        let template = TemplateImage::ready(artwork);

        let raster = compositor.compose(&template, &fields("Alex", "Club"), date(), None).unwrap();
        assert_eq!(raster.pixels().get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(raster.pixels().get_pixel(199, 99).0, [10, 20, 30, 255]);
        assert_eq!(&raster.to_rgb_bytes()[..3], &[255, 255, 255]);
    }

    #[test]
    fn test_blank_fields_are_skipped() {
        let face = MetricTypeface::sans();
        let layout = CertificateLayout::default();
        let compositor = Compositor::new(&face, &layout, FitPolicy::default(), 800.0, HeuristicProfile::COMPACT);
        let template = white(100, 100);
        let spec = compositor.plan(&template, &fields("Alex", "   "), date());
        assert_eq!(spec.placements.len(), 1);
        assert!(spec.placement_for(FieldRole::Organization).is_none());
    }

    #[test]
    fn test_fallback_raster_has_frame_and_text() {
        let face = MetricTypeface::sans();
        let layout = CertificateLayout::default();
        let compositor = Compositor::new(&face, &layout, FitPolicy::default(), 800.0, HeuristicProfile::COMPACT);
        let template = TemplateImage::failed(TemplateFailure::TimedOut);

        let spec = compositor.plan(&template, &fields("Alex Smith", "Testville"), date());
        assert!(!spec.uses_template());
        let texts: Vec<_> = spec.placements.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Certificate of Completion",
                "This is to certify that",
                "Alex Smith",
                "Testville",
                "has successfully completed the course",
                "Issued on: 10/16/2026",
            ]
        );

        let raster = compositor.render(&spec, None).unwrap();
        assert_eq!(raster.dimensions(), (800, 600));
        assert_eq!(raster.pixels().get_pixel(5, 5).0, [222, 226, 230, 255]);
        assert_eq!(raster.pixels().get_pixel(29, 300).0, [108, 117, 125, 255]);
        assert_eq!(raster.pixels().get_pixel(100, 560).0, [248, 249, 250, 255]);
    }

    #[test]
    fn test_loading_template_uses_fallback() {
        let face = MetricTypeface::sans();
        let layout = CertificateLayout::default();
        let compositor = Compositor::new(&face, &layout, FitPolicy::default(), 800.0, HeuristicProfile::COMPACT);
        let template = TemplateImage::loading(std::time::Duration::ZERO, std::time::Duration::from_secs(1));
        let raster = compositor.compose(&template, &fields("Alex", "Club"), date(), None).unwrap();
        assert_eq!(raster.dimensions(), (800, 600));
    }

    #[test]
    fn test_empty_fallback_raster_fails() {
        let face = MetricTypeface::sans();
        let mut layout = CertificateLayout::default();
        layout.fallback.width = 0;
        let compositor = Compositor::new(&face, &layout, FitPolicy::default(), 800.0, HeuristicProfile::COMPACT);
        let err = compositor
            .compose(&TemplateImage::failed(TemplateFailure::ZeroDimensions), &fields("Alex", "Club"), date(), None)
            .unwrap_err();
        assert!(matches!(err, ComposeError::EmptyRaster { width: 0, .. }));
    }

    #[test]
    fn test_wrap_lines_greedy() {
        let face = MetricTypeface::sans();
        let width_of = |s: &str| face.measure(s, 10.0);
        let budget = width_of("gamma delta") + 0.5;

        let lines = wrap_lines(&face, "alpha beta gamma delta", 10.0, budget);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        assert!(wrap_lines(&face, "   ", 10.0, budget).is_empty());
        assert_eq!(wrap_lines(&face, "supercalifragilistic", 10.0, 1.0), vec!["supercalifragilistic"]);
    }

    #[test]
    fn test_to_rgb_bytes_drops_alpha() {
        let raster = RasterImage::new(RgbaImage::from_pixel(2, 1, Rgba([1, 2, 3, 4])));
        assert_eq!(raster.to_rgb_bytes(), vec![1, 2, 3, 1, 2, 3]);
    }
}
