//! Typefaces - Text Measurement and Drawing
//!
//! A [`Typeface`] is the measurable rendering context the compositor needs:
//! single-line widths for the fit engine, vertical metrics for anchoring,
//! and a way to put a line of text onto a raster.

use std::fs;
use std::path::Path;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::fit::TextMeasure;

#[derive(Debug, Error)]
pub enum TypefaceError {
    #[error("Failed to read font file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Font data is not a usable TrueType/OpenType face")]
    InvalidFont,
}

/// Vertical metrics at a given size, in pixels. `descent` is positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    pub ascent: f32,
    pub descent: f32,
}

impl LineMetrics {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }
}

pub trait Typeface: TextMeasure {
    fn family(&self) -> &str;

    fn line_metrics(&self, size_px: f32) -> LineMetrics;

    /// Draws `text` with its line box's top-left corner at (`left`, `top`).
    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        left: f32,
        top: f32,
        size_px: f32,
        color: Rgba<u8>,
    );
}

/// A font file rasterized through `ab_glyph`.
pub struct GlyphTypeface {
    family: String,
    font: FontVec,
}

impl GlyphTypeface {
    pub fn from_bytes(family: impl Into<String>, data: Vec<u8>) -> Result<Self, TypefaceError> {
        let font = FontVec::try_from_vec(data).map_err(|_| TypefaceError::InvalidFont)?;
        Ok(Self { family: family.into(), font })
    }

    pub fn from_path(path: &Path) -> Result<Self, TypefaceError> {
        let data = fs::read(path)?;
        let family = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "font".to_string());
        Self::from_bytes(family, data)
    }
}

impl TextMeasure for GlyphTypeface {
    fn measure(&self, text: &str, size_px: f32) -> f32 {
        let font = &self.font;
        let scaled = font.as_scaled(PxScale::from(size_px));

        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }
        width
    }
}

impl Typeface for GlyphTypeface {
    fn family(&self) -> &str {
        &self.family
    }

    fn line_metrics(&self, size_px: f32) -> LineMetrics {
        let font = &self.font;
        let scaled = font.as_scaled(PxScale::from(size_px));
        LineMetrics {
            ascent: scaled.ascent(),
            descent: -scaled.descent(),
        }
    }

    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        left: f32,
        top: f32,
        size_px: f32,
        color: Rgba<u8>,
    ) {
        draw_text_mut(
            canvas,
            color,
            left.round() as i32,
            top.round() as i32,
            PxScale::from(size_px),
            &self.font,
            text,
        );
    }
}

/// Built-in proportional sans metrics. Glyphs render as solid boxes.
///
/// Widths are em units for ASCII 0x20..=0x7E; index = `(c as usize) - 32`.
/// Anything else measures as `average_char_width`.
pub struct MetricTypeface {
    widths: &'static [f32; 95],
    average_char_width: f32,
    ascent_em: f32,
    descent_em: f32,
    x_height_em: f32,
}

#[rustfmt::skip]
static SANS_WIDTHS: [f32; 95] = [
    // sp    !     "     #     $     %     &     '     (     )     *     +     ,     -     .     /
    0.26, 0.29, 0.40, 0.60, 0.57, 0.80, 0.70, 0.22, 0.32, 0.32, 0.45, 0.58, 0.25, 0.37, 0.25, 0.36,
    // 0     1     2     3     4     5     6     7     8     9
    0.57, 0.57, 0.57, 0.57, 0.57, 0.57, 0.57, 0.57, 0.57, 0.57,
    // :     ;     <     =     >     ?     @
    0.25, 0.25, 0.58, 0.58, 0.58, 0.48, 0.93,
    // A     B     C     D     E     F     G     H     I     J     K     L     M
    0.62, 0.63, 0.60, 0.68, 0.55, 0.52, 0.66, 0.69, 0.27, 0.30, 0.60, 0.50, 0.84,
    // N     O     P     Q     R     S     T     U     V     W     X     Y     Z
    0.69, 0.70, 0.59, 0.70, 0.61, 0.55, 0.54, 0.67, 0.59, 0.89, 0.58, 0.55, 0.55,
    // [     \     ]     ^     _     `
    0.31, 0.36, 0.31, 0.58, 0.45, 0.30,
    // a     b     c     d     e     f     g     h     i     j     k     l     m
    0.52, 0.56, 0.46, 0.56, 0.53, 0.31, 0.51, 0.56, 0.25, 0.25, 0.50, 0.27, 0.85,
    // n     o     p     q     r     s     t     u     v     w     x     y     z
    0.56, 0.55, 0.56, 0.56, 0.36, 0.44, 0.34, 0.56, 0.48, 0.75, 0.47, 0.48, 0.44,
    // {     |     }     ~
    0.32, 0.26, 0.32, 0.58,
];

impl MetricTypeface {
    pub fn sans() -> Self {
        Self {
            widths: &SANS_WIDTHS,
            average_char_width: 0.52,
            ascent_em: 0.8,
            descent_em: 0.2,
            x_height_em: 0.7,
        }
    }

    fn char_width(&self, c: char) -> f32 {
        let code = c as usize;
        if (32..=126).contains(&code) {
            self.widths[code - 32]
        } else {
            self.average_char_width
        }
    }
}

impl Default for MetricTypeface {
    fn default() -> Self {
        Self::sans()
    }
}

impl TextMeasure for MetricTypeface {
    fn measure(&self, text: &str, size_px: f32) -> f32 {
        text.chars().map(|c| self.char_width(c)).sum::<f32>() * size_px
    }
}

impl Typeface for MetricTypeface {
    fn family(&self) -> &str {
        "builtin-sans"
    }

    fn line_metrics(&self, size_px: f32) -> LineMetrics {
        LineMetrics {
            ascent: self.ascent_em * size_px,
            descent: self.descent_em * size_px,
        }
    }

    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        left: f32,
        top: f32,
        size_px: f32,
        color: Rgba<u8>,
    ) {
        let glyph_height = (self.x_height_em * size_px).round().max(1.0) as u32;
        let glyph_top = (top + (self.ascent_em - self.x_height_em) * size_px).round() as i32;

        let mut pen = left;
        for c in text.chars() {
            let advance = self.char_width(c) * size_px;
            if !c.is_whitespace() {
                let glyph_width = (advance * 0.8).round().max(1.0) as u32;
                let rect = Rect::at(pen.round() as i32, glyph_top).of_size(glyph_width, glyph_height);
                draw_filled_rect_mut(canvas, rect, color);
            }
            pen += advance;
        }
    }
}
