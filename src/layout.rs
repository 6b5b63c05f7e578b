//! Watermark layout engine
//!
//! Computes where every watermark element lands on a page: the centered image,
//! a randomly placed secondary logo, a brick-pattern grid of rotated text, and
//! small "marquee" text lines scattered at random. The output is a list of
//! [`DrawCommand`]s in draw order; rendering them is the compositor's job.
//!
//! Placement of the randomized elements draws from an injected [`Rng`], so a
//! seeded generator reproduces a layout exactly.

use std::path::PathBuf;

use rand::Rng;

use crate::error::{Error, Result};
use crate::fonts::FontRegistry;

/// Fixed size of the marquee text, in points.
pub const MARQUEE_FONT_SIZE: f64 = 7.0;

/// The secondary logo is scaled down to a fifth of the primary image scale.
const LOGO_SCALE_RATIO: f64 = 0.2;

/// Safety margin applied to the rotated text footprint when spacing columns.
const SPACING_MARGIN: f64 = 1.5;

/// How many marquee lines of each color are placed per page.
const MARQUEE_COPIES: usize = 3;

/// Watermark parameters for one document.
///
/// Opacity and scale values are expected to be clamped to valid ranges by the
/// caller; the engine fails fast on values it cannot do geometry with
/// (non-positive font size or page dimensions) instead of producing NaNs.
#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    /// Primary watermark image, drawn centered on every page. Required.
    pub image_path: PathBuf,
    /// Optional secondary logo, drawn once per page at a random position.
    pub logo_path: Option<PathBuf>,
    /// Watermark text, repeated in the grid and the marquee lines.
    pub text: String,
    /// Font for all text elements; falls back to Helvetica when unregistered.
    pub font_name: String,
    /// Grid text size in points.
    pub font_size: f64,
    /// Scale applied to the primary image's pixel dimensions, in (0, 1].
    pub image_scale: f64,
    /// Opacity of both image elements, in [0, 1].
    pub image_opacity: f64,
    /// Opacity of the grid text, in [0, 1].
    pub text_opacity: f64,
    /// Grid text rotation in degrees, counter-clockwise.
    pub rotation_angle: f64,
    /// Grid rows per page.
    pub rows: usize,
    /// Requested grid columns per page; reduced automatically when they would
    /// collide.
    pub cols: usize,
    /// Draw the overlay above the page content, or underneath it.
    pub on_top: bool,
    /// Whether to scatter the marquee text lines.
    pub marquee: bool,
}

impl WatermarkConfig {
    pub fn new(image_path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            logo_path: None,
            text: text.into(),
            font_name: crate::fonts::FALLBACK_FONT.to_string(),
            font_size: 24.0,
            image_scale: 0.5,
            image_opacity: 0.3,
            text_opacity: 0.2,
            rotation_angle: 45.0,
            rows: 5,
            cols: 3,
            on_top: true,
            marquee: true,
        }
    }
}

/// One watermark element with resolved page coordinates, ready to render.
///
/// Coordinates use the PDF convention: origin at the bottom-left of the page,
/// units in points. Image positions are the lower-left corner of the placed
/// image; grid text positions are the rotation center of the cell; marquee
/// positions are the text baseline origin.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    CenteredImage {
        path: PathBuf,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        opacity: f64,
    },
    RandomImage {
        path: PathBuf,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        opacity: f64,
    },
    GridText {
        text: String,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        font_size: f64,
        angle: f64,
        opacity: f64,
    },
    MarqueeText {
        text: String,
        x: f64,
        y: f64,
        font_size: f64,
        white: bool,
    },
}

/// Horizontal extent of a `width` x `height` box rotated by `angle_deg`.
pub fn rotated_footprint(width: f64, height: f64, angle_deg: f64) -> f64 {
    let rad = angle_deg.to_radians();
    (width * rad.cos()).abs() + (height * rad.sin()).abs()
}

/// Reduce the requested column count so each cell gets `required_spacing` of
/// horizontal room. Density only ever shrinks, never grows, and at least one
/// column always survives.
pub(crate) fn effective_columns(
    page_width: f64,
    required_spacing: f64,
    requested: usize,
) -> usize {
    if required_spacing <= 0.0 {
        return requested.max(1);
    }
    let fit = (page_width / required_spacing).floor() as usize;
    requested.max(1).min(fit.max(1))
}

/// Compute the watermark layout for one page.
///
/// Deterministic for the centered image and the text grid; the secondary logo
/// and marquee positions come from `rng`. A missing primary image is fatal; a
/// missing or unplaceable logo is skipped silently.
pub fn compute_layout<R: Rng>(
    page_width: f64,
    page_height: f64,
    config: &WatermarkConfig,
    fonts: &FontRegistry,
    rng: &mut R,
) -> Result<Vec<DrawCommand>> {
    if !(page_width.is_finite() && page_width > 0.0)
        || !(page_height.is_finite() && page_height > 0.0)
    {
        return Err(Error::DegenerateLayout(format!(
            "page dimensions {page_width} x {page_height}"
        )));
    }
    if !(config.font_size.is_finite() && config.font_size > 0.0) {
        return Err(Error::DegenerateLayout(format!(
            "font size {}",
            config.font_size
        )));
    }
    if config.rows == 0 || config.cols == 0 {
        return Err(Error::DegenerateLayout("grid with zero rows or columns".to_string()));
    }

    let mut commands = Vec::new();

    // 1. Centered primary image.
    if !config.image_path.exists() {
        return Err(Error::AssetNotFound(config.image_path.clone()));
    }
    let (img_w, img_h) = image::image_dimensions(&config.image_path)?;
    let width = f64::from(img_w) * config.image_scale;
    let height = f64::from(img_h) * config.image_scale;
    commands.push(DrawCommand::CenteredImage {
        path: config.image_path.clone(),
        x: (page_width - width) / 2.0,
        y: (page_height - height) / 2.0,
        width,
        height,
        opacity: config.image_opacity,
    });

    // 2. Secondary logo at a random position, fully inside the page.
    if let Some(logo_path) = &config.logo_path {
        if logo_path.exists() {
            let (logo_w, logo_h) = image::image_dimensions(logo_path)?;
            let scale = config.image_scale * LOGO_SCALE_RATIO;
            let width = f64::from(logo_w) * scale;
            let height = f64::from(logo_h) * scale;
            if width > 0.0
                && height > 0.0
                && page_width - width >= width / 2.0
                && page_height - height >= height / 2.0
            {
                commands.push(DrawCommand::RandomImage {
                    path: logo_path.clone(),
                    x: sample(rng, width / 2.0, page_width - width),
                    y: sample(rng, height / 2.0, page_height - height),
                    width,
                    height,
                    opacity: config.image_opacity,
                });
            } else {
                tracing::debug!(logo = %logo_path.display(), "logo larger than page, skipped");
            }
        }
    }

    // 3. Text grid, brick pattern.
    let text_width = fonts.text_width(&config.font_name, &config.text, config.font_size);
    // Nominal glyph-box height; real ascent+descent is deliberately not used,
    // the spacing margin below was tuned against this value.
    let text_height = config.font_size;
    let footprint = rotated_footprint(text_width, text_height, config.rotation_angle);
    let required_spacing = footprint * SPACING_MARGIN;
    let actual_cols = effective_columns(page_width, required_spacing, config.cols);
    let row_spacing = page_height / (config.rows + 1) as f64;
    let col_spacing = page_width / (actual_cols + 1) as f64;
    if actual_cols < config.cols {
        tracing::debug!(
            requested = config.cols,
            actual = actual_cols,
            "grid columns reduced to avoid text collision"
        );
    }

    for row in 0..config.rows {
        let y = (row + 1) as f64 * row_spacing;
        // Odd rows shift half a column so the grid is harder to crop out.
        let offset = if row % 2 == 1 { col_spacing / 2.0 } else { 0.0 };
        for col in 0..actual_cols {
            let x = offset + (col + 1) as f64 * col_spacing;
            commands.push(DrawCommand::GridText {
                text: config.text.clone(),
                x,
                y,
                width: text_width,
                height: text_height,
                font_size: config.font_size,
                angle: config.rotation_angle,
                opacity: config.text_opacity,
            });
        }
    }

    // 4. Marquee lines: small, full-opacity, black then white.
    if config.marquee {
        let marquee_width =
            fonts.text_width(&config.font_name, &config.text, MARQUEE_FONT_SIZE);
        let y_min = MARQUEE_FONT_SIZE * 2.0;
        let y_max = page_height - MARQUEE_FONT_SIZE * 2.0;
        if marquee_width > 0.0 && marquee_width <= page_width && y_max > y_min {
            for white in [false, true] {
                for _ in 0..MARQUEE_COPIES {
                    let center_x =
                        sample(rng, marquee_width / 2.0, page_width - marquee_width / 2.0);
                    commands.push(DrawCommand::MarqueeText {
                        text: config.text.clone(),
                        x: center_x - marquee_width / 2.0,
                        y: sample(rng, y_min, y_max),
                        font_size: MARQUEE_FONT_SIZE,
                        white,
                    });
                }
            }
        }
    }

    Ok(commands)
}

/// Uniform sample from [low, high), tolerating an empty range.
fn sample<R: Rng>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::Path;

    fn write_test_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([20, 40, 160, 128]));
        img.save(path).unwrap();
    }

    fn test_config(dir: &Path) -> WatermarkConfig {
        let image_path = dir.join("stamp.png");
        write_test_png(&image_path, 200, 100);
        let mut config = WatermarkConfig::new(image_path, "sample watermark");
        config.font_size = 24.0;
        config
    }

    #[test]
    fn footprint_at_axis_angles() {
        let w = 120.0;
        let h = 24.0;
        assert!((rotated_footprint(w, h, 0.0) - w).abs() < 1e-9);
        assert!((rotated_footprint(w, h, 90.0) - h).abs() < 1e-6);
    }

    #[test]
    fn effective_columns_bounds_and_spacing() {
        for &page_width in &[100.0, 300.0, 612.0, 841.9, 2000.0] {
            for &footprint in &[10.0, 55.0, 130.0, 400.0] {
                for requested in 1..=8 {
                    let required = footprint * SPACING_MARGIN;
                    let cols = effective_columns(page_width, required, requested);
                    assert!(cols >= 1);
                    assert!(cols <= requested);
                    // Adjacent columns never sit closer than one footprint.
                    if cols >= 2 {
                        let col_spacing = page_width / (cols + 1) as f64;
                        assert!(
                            col_spacing + 1e-9 >= footprint,
                            "page {page_width} footprint {footprint} cols {cols}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn grid_cells_keep_row_axis_separation() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(7);

        let commands = compute_layout(612.0, 792.0, &config, &fonts, &mut rng).unwrap();
        let text_width = fonts.text_width(&config.font_name, &config.text, config.font_size);
        let footprint = rotated_footprint(text_width, config.font_size, config.rotation_angle);

        let mut rows: std::collections::BTreeMap<i64, Vec<f64>> = Default::default();
        for cmd in &commands {
            if let DrawCommand::GridText { x, y, .. } = cmd {
                rows.entry((y * 100.0) as i64).or_default().push(*x);
            }
        }
        assert_eq!(rows.len(), config.rows);
        for xs in rows.values() {
            assert!(xs.len() <= config.cols);
            for pair in xs.windows(2) {
                assert!((pair[1] - pair[0]).abs() + 1e-9 >= footprint);
            }
        }
    }

    #[test]
    fn center_image_is_centered() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(1);

        let commands = compute_layout(612.0, 792.0, &config, &fonts, &mut rng).unwrap();
        match &commands[0] {
            DrawCommand::CenteredImage { x, y, width, height, .. } => {
                assert!((x + width / 2.0 - 306.0).abs() < 1e-9);
                assert!((y + height / 2.0 - 396.0).abs() < 1e-9);
                assert!((width - 100.0).abs() < 1e-9); // 200px * 0.5 scale
            }
            other => panic!("expected CenteredImage first, got {other:?}"),
        }
    }

    #[test]
    fn random_elements_stay_inside_page_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let logo_path = dir.path().join("logo.png");
        write_test_png(&logo_path, 300, 120);
        config.logo_path = Some(logo_path);

        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(42);

        for &(page_w, page_h) in &[(612.0, 792.0), (595.0, 841.9), (300.0, 500.0), (1200.0, 400.0)]
        {
            for _ in 0..2500 {
                let commands =
                    compute_layout(page_w, page_h, &config, &fonts, &mut rng).unwrap();
                for cmd in &commands {
                    match cmd {
                        DrawCommand::RandomImage { x, y, width, height, .. } => {
                            assert!(*x >= 0.0 && x + width <= page_w);
                            assert!(*y >= 0.0 && y + height <= page_h);
                        }
                        DrawCommand::MarqueeText { x, y, .. } => {
                            let width = fonts.text_width(
                                &config.font_name,
                                &config.text,
                                MARQUEE_FONT_SIZE,
                            );
                            assert!(*x >= 0.0 && x + width <= page_w);
                            assert!(*y >= 0.0 && *y <= page_h);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    #[test]
    fn seeded_rng_reproduces_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fonts = FontRegistry::new();

        let a = compute_layout(612.0, 792.0, &config, &fonts, &mut StdRng::seed_from_u64(99))
            .unwrap();
        let b = compute_layout(612.0, 792.0, &config, &fonts, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }

    #[test]
    fn zero_font_size_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.font_size = 0.0;
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let result = compute_layout(612.0, 792.0, &config, &fonts, &mut rng);
        assert!(matches!(result, Err(crate::Error::DegenerateLayout(_))));
    }

    #[test]
    fn negative_page_dimension_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let result = compute_layout(-10.0, 792.0, &config, &fonts, &mut rng);
        assert!(matches!(result, Err(crate::Error::DegenerateLayout(_))));
    }

    #[test]
    fn missing_primary_image_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.image_path = dir.path().join("gone.png");
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let result = compute_layout(612.0, 792.0, &config, &fonts, &mut rng);
        assert!(matches!(result, Err(crate::Error::AssetNotFound(_))));
    }

    #[test]
    fn missing_logo_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.logo_path = Some(dir.path().join("no-logo.png"));
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let commands = compute_layout(612.0, 792.0, &config, &fonts, &mut rng).unwrap();
        assert!(!commands
            .iter()
            .any(|c| matches!(c, DrawCommand::RandomImage { .. })));
    }

    #[test]
    fn empty_text_produces_no_marquee() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.text = String::new();
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let commands = compute_layout(612.0, 792.0, &config, &fonts, &mut rng).unwrap();
        assert!(!commands
            .iter()
            .any(|c| matches!(c, DrawCommand::MarqueeText { .. })));
    }
}
