//! Anti-tamper page flattening
//!
//! Renders every page of a document to a raster image and rebuilds the
//! document from those images alone. This is lossy on purpose: text, vector
//! art and object structure are destroyed, so nothing is left to extract or
//! edit. Output pages are sized to the raster's pixel dimensions, i.e.
//! `round(original_dimension * dpi / 72)` points.
//!
//! The pdfium library is bound at runtime, first from next to the executable
//! and then from the system. Any failure here is reported as a single
//! [`Error::Rasterization`] so the caller can fall back to the un-flattened
//! file.

use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use pdfium_render::prelude::*;

use crate::error::{Error, Result};
use crate::watermark::save_atomically;

/// Rendering resolution used by the protection pipeline.
pub const DEFAULT_DPI: f32 = 150.0;

const JPEG_QUALITY: u8 = 85;

/// Pixel dimensions of a page rendered at `dpi`, relative to the 72-DPI page
/// coordinate space.
pub(crate) fn raster_pixel_size(width_pt: f64, height_pt: f64, dpi: f32) -> (i32, i32) {
    let scale = f64::from(dpi) / 72.0;
    (
        ((width_pt * scale).round() as i32).max(1),
        ((height_pt * scale).round() as i32).max(1),
    )
}

/// Flatten `input` into an image-only document at `output`.
pub fn rasterize_document(input: &Path, output: &Path, dpi: f32) -> Result<()> {
    if !(dpi.is_finite() && dpi > 0.0) {
        return Err(Error::Rasterization(format!("invalid dpi {dpi}")));
    }

    let pdfium = bind_pdfium()?;
    let source = pdfium
        .load_pdf_from_file(input, None)
        .map_err(|err| Error::Rasterization(format!("loading {}: {err}", input.display())))?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for (index, page) in source.pages().iter().enumerate() {
        let (pixel_w, pixel_h) = raster_pixel_size(
            f64::from(page.width().value),
            f64::from(page.height().value),
            dpi,
        );
        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(pixel_w)
                    .set_target_height(pixel_h),
            )
            .map_err(|err| Error::Rasterization(format!("rendering page {}: {err}", index + 1)))?;
        let raster = bitmap.as_image().to_rgb8();

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&raster)
            .map_err(|err| Error::Rasterization(format!("encoding page {}: {err}", index + 1)))?;

        let page_id = append_image_page(&mut doc, pages_id, raster.width(), raster.height(), jpeg);
        kids.push(Object::Reference(page_id));
        tracing::debug!(page = index + 1, pixel_w, pixel_h, "page flattened");
    }

    if kids.is_empty() {
        return Err(Error::Rasterization(format!(
            "{} has no pages",
            input.display()
        )));
    }
    let page_count = kids.len();

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(page_count as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();
    save_atomically(&mut doc, output)?;
    tracing::info!(output = %output.display(), pages = page_count, dpi, "document flattened");
    Ok(())
}

/// Add one page whose sole content is the given JPEG, drawn edge to edge.
fn append_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
) -> ObjectId {
    let mut image_dict = Dictionary::new();
    image_dict.set("Type", Object::Name(b"XObject".to_vec()));
    image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    image_dict.set("Width", Object::Integer(i64::from(width)));
    image_dict.set("Height", Object::Integer(i64::from(height)));
    image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    image_dict.set("BitsPerComponent", Object::Integer(8));
    image_dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    // Already JPEG; a second deflate pass would only waste space.
    let image_id = doc.add_object(Object::Stream(Stream {
        dict: image_dict,
        content: jpeg,
        allows_compression: false,
        start_position: None,
    }));

    let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    let mut xobjects = Dictionary::new();
    xobjects.set("Im0", Object::Reference(image_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(i64::from(width)),
            Object::Integer(i64::from(height)),
        ]),
    );
    page.set("Contents", Object::Reference(content_id));
    page.set("Resources", Object::Dictionary(resources));
    doc.add_object(Object::Dictionary(page))
}

fn bind_pdfium() -> Result<Pdfium> {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|err| Error::Rasterization(format!("binding pdfium library: {err}")))
}
