//! Font registry and text measurement
//!
//! Watermark text is measured here and rendered by the PDF viewer; this module
//! never rasterizes glyphs. Fonts registered from TrueType files are measured
//! by shaping with rustybuzz. When a requested font was never registered, the
//! standard Helvetica base font is used with its AFM widths table, so a usable
//! default always exists.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Name of the built-in fallback font (one of the 14 standard PDF fonts).
pub const FALLBACK_FONT: &str = "Helvetica";

/// Helvetica AFM advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, // space ! " # $ % & ' ( )
    389, 584, 278, 333, 278, 278, 556, 556, 556, 556, // * + , - . / 0 1 2 3
    556, 556, 556, 556, 556, 556, 278, 278, 584, 584, // 4 5 6 7 8 9 : ; < =
    584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, // > ? @ A B C D E F G
    722, 278, 500, 667, 556, 833, 722, 778, 667, 778, // H I J K L M N O P Q
    722, 667, 611, 722, 667, 944, 667, 667, 611, 278, // R S T U V W X Y Z [
    278, 278, 469, 556, 333, 556, 556, 500, 556, 556, // \ ] ^ _ ` a b c d e
    278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // f g h i j k l m n o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, // p q r s t u v w x y
    500, 334, 260, 334, 584, // z { | } ~
];

/// Width used for characters without a known metric, in 1/1000 em.
const DEFAULT_GLYPH_WIDTH: u16 = 500;

/// A font resolved by the registry: either a registered TrueType face or the
/// built-in fallback.
pub enum ResolvedFont<'a> {
    /// A face registered from a TrueType file; `data` is the raw font program.
    Registered { name: &'a str, data: &'a [u8] },
    /// The standard Helvetica base font.
    Fallback,
}

impl ResolvedFont<'_> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedFont::Fallback)
    }
}

/// Process-wide font registry.
///
/// Built once at startup, then shared by reference and treated as read-only.
/// Registration after processing has begun is not supported.
#[derive(Default)]
pub struct FontRegistry {
    faces: HashMap<String, Vec<u8>>,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a TrueType font under `name`.
    ///
    /// The file is read eagerly and validated by parsing; a file that is not a
    /// usable font is rejected here rather than surfacing mid-pipeline.
    pub fn register(&mut self, name: &str, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::AssetNotFound(path.to_path_buf()));
        }
        let data = std::fs::read(path)?;
        if rustybuzz::Face::from_slice(&data, 0).is_none() {
            return Err(Error::Font(format!(
                "not a parseable TrueType font: {}",
                path.display()
            )));
        }
        self.faces.insert(name.to_string(), data);
        Ok(())
    }

    /// Resolve a font by name, degrading to the fallback when unregistered.
    pub fn resolve(&self, name: &str) -> ResolvedFont<'_> {
        match self.faces.get_key_value(name) {
            Some((name, data)) => ResolvedFont::Registered {
                name: name.as_str(),
                data: data.as_slice(),
            },
            None => ResolvedFont::Fallback,
        }
    }

    /// Measure the rendered width of `text` at `font_size` points.
    pub fn text_width(&self, font_name: &str, text: &str, font_size: f64) -> f64 {
        match self.resolve(font_name) {
            ResolvedFont::Registered { data, .. } => {
                shaped_width(data, text).map(|em| em * font_size).unwrap_or_else(|| {
                    tracing::warn!(font = font_name, "shaping failed, using fallback metrics");
                    fallback_width(text) * font_size
                })
            }
            ResolvedFont::Fallback => fallback_width(text) * font_size,
        }
    }
}

/// Shape `text` with the given font program and return its advance in em units.
fn shaped_width(data: &[u8], text: &str) -> Option<f64> {
    let face = rustybuzz::Face::from_slice(data, 0)?;
    let mut buffer = rustybuzz::UnicodeBuffer::new();
    buffer.push_str(text);
    let glyphs = rustybuzz::shape(&face, &[], buffer);
    let advance: i64 = glyphs
        .glyph_positions()
        .iter()
        .map(|pos| i64::from(pos.x_advance))
        .sum();
    Some(advance as f64 / f64::from(face.units_per_em()))
}

/// Width of `text` in em units using the Helvetica table.
///
/// Characters beyond ASCII are counted as one full em each, which matches how
/// CJK glyphs lay out and errs wide for everything else.
fn fallback_width(text: &str) -> f64 {
    let millis: u32 = text
        .chars()
        .map(|c| match u32::from(c) {
            code @ 32..=126 => u32::from(HELVETICA_WIDTHS[(code - 32) as usize]),
            0..=31 => 0,
            code if code > 0xFF => 1000,
            _ => u32::from(DEFAULT_GLYPH_WIDTH),
        })
        .sum();
    f64::from(millis) / 1000.0
}

/// Metrics needed to build a FontDescriptor for an embedded TrueType face,
/// all scaled to the PDF's 1/1000 em glyph space.
pub(crate) struct FaceMetrics {
    pub ascent: i64,
    pub descent: i64,
    pub cap_height: i64,
    pub bbox: [i64; 4],
    /// Advance widths for character codes 32..=255 (Latin-1 mapping).
    pub widths: Vec<i64>,
}

pub(crate) fn face_metrics(data: &[u8]) -> Result<FaceMetrics> {
    let face = rustybuzz::Face::from_slice(data, 0)
        .ok_or_else(|| Error::Font("unparseable font program".to_string()))?;
    let upem = f64::from(face.units_per_em());
    let scale = |v: f64| -> i64 { (v * 1000.0 / upem).round() as i64 };

    let ascent = scale(f64::from(face.ascender()));
    let descent = scale(f64::from(face.descender()));
    let cap_height = face
        .capital_height()
        .map(|h| scale(f64::from(h)))
        .unwrap_or(ascent);
    let rect = face.global_bounding_box();
    let bbox = [
        scale(f64::from(rect.x_min)),
        scale(f64::from(rect.y_min)),
        scale(f64::from(rect.x_max)),
        scale(f64::from(rect.y_max)),
    ];

    let widths = (32u32..=255)
        .map(|code| {
            char::from_u32(code)
                .and_then(|c| face.glyph_index(c))
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| scale(f64::from(adv)))
                .unwrap_or(i64::from(DEFAULT_GLYPH_WIDTH))
        })
        .collect();

    Ok(FaceMetrics {
        ascent,
        descent,
        cap_height,
        bbox,
        widths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_measures_ascii() {
        let registry = FontRegistry::new();
        // "00" at 10pt: two digits at 556/1000 em
        let w = registry.text_width("NoSuchFont", "00", 10.0);
        assert!((w - 11.12).abs() < 1e-9);
    }

    #[test]
    fn fallback_counts_cjk_as_full_em() {
        let registry = FontRegistry::new();
        let w = registry.text_width(FALLBACK_FONT, "水印", 24.0);
        assert!((w - 48.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_has_zero_width() {
        let registry = FontRegistry::new();
        assert_eq!(registry.text_width(FALLBACK_FONT, "", 36.0), 0.0);
    }

    #[test]
    fn unregistered_name_resolves_to_fallback() {
        let registry = FontRegistry::new();
        assert!(registry.resolve("SimSun").is_fallback());
    }

    #[test]
    fn register_missing_file_fails() {
        let mut registry = FontRegistry::new();
        let result = registry.register("Missing", Path::new("no/such/font.ttf"));
        assert!(matches!(result, Err(crate::Error::AssetNotFound(_))));
    }
}
