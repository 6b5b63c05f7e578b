//! Whole-document watermarking
//!
//! Applies the layout engine and compositor to every page of a document, then
//! writes the result atomically. Page count and page dimensions are preserved
//! exactly; a failure on any page aborts the document with the failing page
//! index attached, leaving nothing behind at the output path.

use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use rand::Rng;

use crate::error::{Error, Result};
use crate::fonts::FontRegistry;
use crate::layout::{compute_layout, WatermarkConfig};
use crate::overlay::{composite_page, OverlayAssets};

/// Page size assumed when no MediaBox exists anywhere in the page tree.
const LETTER: (f64, f64) = (612.0, 792.0);

/// Watermark every page of `input` and write the result to `output`.
pub fn watermark_document<R: Rng>(
    input: &Path,
    output: &Path,
    config: &WatermarkConfig,
    fonts: &FontRegistry,
    rng: &mut R,
) -> Result<()> {
    if !input.exists() {
        return Err(Error::AssetNotFound(input.to_path_buf()));
    }
    let mut doc = Document::load(input).map_err(|source| Error::InvalidDocument {
        path: input.to_path_buf(),
        source,
    })?;
    doc.decompress();

    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(Error::EmptyPdf(input.to_path_buf()));
    }
    tracing::info!(input = %input.display(), pages = pages.len(), "watermarking document");

    let mut assets = OverlayAssets::prepare(&mut doc, fonts, &config.font_name)?;
    for (index, page_id) in pages.iter().enumerate() {
        watermark_page(&mut doc, *page_id, config, fonts, &mut assets, rng)
            .map_err(|err| err.on_page(index))?;
    }

    doc.compress();
    save_atomically(&mut doc, output)
}

fn watermark_page<R: Rng>(
    doc: &mut Document,
    page_id: ObjectId,
    config: &WatermarkConfig,
    fonts: &FontRegistry,
    assets: &mut OverlayAssets,
    rng: &mut R,
) -> Result<()> {
    let (width, height) = page_size(doc, page_id)?;
    let commands = compute_layout(width, height, config, fonts, rng)?;
    composite_page(doc, page_id, width, height, &commands, assets, config.on_top)
}

/// Width and height of a page in points, honoring MediaBox inheritance.
///
/// The MediaBox may live on the page itself or on any ancestor Pages node;
/// the first one found walking up the tree wins.
pub(crate) fn page_size(doc: &Document, page_id: ObjectId) -> Result<(f64, f64)> {
    let mut current = Some(page_id);
    let mut depth = 0;
    while let Some(id) = current {
        depth += 1;
        if depth > 64 {
            break;
        }
        let dict = match doc.get_object(id)? {
            Object::Dictionary(dict) => dict,
            _ => break,
        };
        if let Ok(media_box) = dict.get(b"MediaBox") {
            let media_box = match media_box {
                Object::Reference(ref_id) => doc.get_object(*ref_id)?,
                direct => direct,
            };
            if let Object::Array(values) = media_box {
                if let Some(size) = media_box_size(values) {
                    return Ok(size);
                }
            }
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => Some(*parent_id),
            _ => None,
        };
    }
    Ok(LETTER)
}

fn media_box_size(values: &[Object]) -> Option<(f64, f64)> {
    if values.len() != 4 {
        return None;
    }
    let coords: Vec<f64> = values.iter().filter_map(as_number).collect();
    if coords.len() != 4 {
        return None;
    }
    let width = coords[2] - coords[0];
    let height = coords[3] - coords[1];
    (width > 0.0 && height > 0.0).then_some((width, height))
}

fn as_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

/// Summary of a document for the `inspect` command.
#[derive(Debug)]
pub struct DocumentInfo {
    pub page_count: usize,
    /// Width and height of each page, in points.
    pub page_sizes: Vec<(f64, f64)>,
}

/// Page count and page dimensions of a document.
pub fn inspect(path: &Path) -> Result<DocumentInfo> {
    if !path.exists() {
        return Err(Error::AssetNotFound(path.to_path_buf()));
    }
    let doc = Document::load(path).map_err(|source| Error::InvalidDocument {
        path: path.to_path_buf(),
        source,
    })?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(Error::EmptyPdf(path.to_path_buf()));
    }
    let page_sizes = pages
        .values()
        .map(|id| page_size(&doc, *id))
        .collect::<Result<Vec<_>>>()?;
    Ok(DocumentInfo {
        page_count: page_sizes.len(),
        page_sizes,
    })
}

/// Write a document to `output` via a sibling temp file and rename, so a
/// failure mid-write never leaves a partial file at the destination.
pub(crate) fn save_atomically(doc: &mut Document, output: &Path) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".pdf-protect-")
        .suffix(".pdf")
        .tempfile_in(dir)?;
    doc.save(temp.path())?;
    temp.persist(output).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Dictionary, Stream};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Build a PDF whose pages have the given sizes. A `None` size omits the
    /// page's MediaBox so it inherits the one on the Pages node.
    fn build_fixture(path: &Path, sizes: &[Option<(f64, f64)>]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for size in sizes {
            let content_id = doc.add_object(Stream::new(
                Dictionary::new(),
                b"q\n0 g\nQ\n".to_vec(),
            ));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(pages_id));
            page.set("Contents", Object::Reference(content_id));
            if let Some((w, h)) = size {
                page.set("MediaBox", media_box(*w, *h));
            }
            kids.push(Object::Reference(doc.add_object(Object::Dictionary(page))));
        }

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(kids.len() as i64));
        pages.set("Kids", Object::Array(kids));
        pages.set("MediaBox", media_box(612.0, 792.0));
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = doc.add_object(Object::Dictionary(catalog));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        doc.save(path).unwrap();
    }

    fn media_box(w: f64, h: f64) -> Object {
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(w as f32),
            Object::Real(h as f32),
        ])
    }

    fn test_config(dir: &Path) -> WatermarkConfig {
        let image_path = dir.join("stamp.png");
        let img = image::RgbaImage::from_pixel(64, 32, image::Rgba([10, 30, 120, 200]));
        img.save(&image_path).unwrap();
        WatermarkConfig::new(image_path, "property of nobody")
    }

    #[test]
    fn roundtrip_preserves_page_count_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.pdf");
        let output = dir.path().join("output.pdf");
        let sizes = [
            Some((612.0, 792.0)),
            Some((595.0, 842.0)),
            None, // inherited Letter from the Pages node
        ];
        build_fixture(&input, &sizes);

        let config = test_config(dir.path());
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(5);
        watermark_document(&input, &output, &config, &fonts, &mut rng).unwrap();

        let before = inspect(&input).unwrap();
        let after = inspect(&output).unwrap();
        assert_eq!(after.page_count, 3);
        for (a, b) in before.page_sizes.iter().zip(after.page_sizes.iter()) {
            assert!((a.0 - b.0).abs() < 0.01);
            assert!((a.1 - b.1).abs() < 0.01);
        }
    }

    #[test]
    fn underlay_mode_also_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.pdf");
        let output = dir.path().join("output.pdf");
        build_fixture(&input, &[Some((612.0, 792.0))]);

        let mut config = test_config(dir.path());
        config.on_top = false;
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(6);
        watermark_document(&input, &output, &config, &fonts, &mut rng).unwrap();

        assert_eq!(inspect(&output).unwrap().page_count, 1);
    }

    #[test]
    fn missing_input_reports_asset_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let result = watermark_document(
            &dir.path().join("absent.pdf"),
            &dir.path().join("out.pdf"),
            &config,
            &fonts,
            &mut rng,
        );
        assert!(matches!(result, Err(Error::AssetNotFound(_))));
    }

    #[test]
    fn garbage_input_reports_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("garbage.pdf");
        std::fs::write(&input, b"this is not a pdf").unwrap();
        let config = test_config(dir.path());
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let result = watermark_document(
            &input,
            &dir.path().join("out.pdf"),
            &config,
            &fonts,
            &mut rng,
        );
        assert!(matches!(result, Err(Error::InvalidDocument { .. })));
    }

    #[test]
    fn page_failure_carries_page_index_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.pdf");
        let output = dir.path().join("out.pdf");
        build_fixture(&input, &[Some((612.0, 792.0))]);

        let mut config = test_config(dir.path());
        config.image_path = dir.path().join("vanished.png");
        let fonts = FontRegistry::new();
        let mut rng = StdRng::seed_from_u64(0);

        let result = watermark_document(&input, &output, &config, &fonts, &mut rng);
        match result {
            Err(Error::Page { page: 0, source }) => {
                assert!(matches!(*source, Error::AssetNotFound(_)));
            }
            other => panic!("expected page error, got {other:?}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn inspect_reads_inherited_media_box() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.pdf");
        build_fixture(&input, &[None, Some((400.0, 400.0))]);

        let info = inspect(&input).unwrap();
        assert_eq!(info.page_count, 2);
        assert!((info.page_sizes[0].0 - 612.0).abs() < 0.01);
        assert!((info.page_sizes[0].1 - 792.0).abs() < 0.01);
        assert!((info.page_sizes[1].0 - 400.0).abs() < 0.01);
    }
}
