//! Page overlay compositing
//!
//! Renders a page's [`DrawCommand`]s into a Form XObject the exact size of the
//! page, then merges it into the page's content stream chain. The form carries
//! its own Resources (font, image XObjects, opacity graphics states), so
//! nothing we add can collide with names the page already uses.
//!
//! Z-order is decided by where the invocation stream lands: appended after the
//! original content the overlay sits on top; prepended before it the overlay
//! becomes the background layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};
use crate::fonts::{self, FontRegistry, ResolvedFont};
use crate::layout::DrawCommand;

/// Resource name under which the overlay form is registered on each page.
const OVERLAY_NAME: &str = "WmOverlay";

/// Overlay assets embedded once per document and shared by every page.
pub struct OverlayAssets {
    font_id: ObjectId,
    images: HashMap<PathBuf, ObjectId>,
}

impl OverlayAssets {
    /// Embed the text font for this document's overlays.
    ///
    /// A registered face is embedded as a TrueType program with metrics read
    /// from the face itself; otherwise the standard Helvetica base font is
    /// referenced without embedding.
    pub fn prepare(doc: &mut Document, fonts: &FontRegistry, font_name: &str) -> Result<Self> {
        let font_id = match fonts.resolve(font_name) {
            ResolvedFont::Registered { name, data } => embed_truetype_font(doc, name, data)?,
            ResolvedFont::Fallback => embed_standard_font(doc),
        };
        Ok(Self {
            font_id,
            images: HashMap::new(),
        })
    }

    /// Decode and embed an image once, returning the shared XObject id.
    fn image_id(&mut self, doc: &mut Document, path: &Path) -> Result<ObjectId> {
        if let Some(id) = self.images.get(path) {
            return Ok(*id);
        }
        let id = embed_image_xobject(doc, path)?;
        self.images.insert(path.to_path_buf(), id);
        Ok(id)
    }
}

/// Render `commands` into an overlay and merge it with the page.
///
/// Command order is preserved; opacity blending makes it significant. The
/// original page content is never rewritten, only wrapped and extended.
pub fn composite_page(
    doc: &mut Document,
    page_id: ObjectId,
    page_width: f64,
    page_height: f64,
    commands: &[DrawCommand],
    assets: &mut OverlayAssets,
    on_top: bool,
) -> Result<()> {
    let mut builder = OverlayBuilder::new();
    for command in commands {
        match command {
            DrawCommand::CenteredImage { path, x, y, width, height, opacity }
            | DrawCommand::RandomImage { path, x, y, width, height, opacity } => {
                let id = assets.image_id(doc, path)?;
                builder.draw_image(id, *x, *y, *width, *height, *opacity);
            }
            DrawCommand::GridText { text, x, y, width, height, font_size, angle, opacity } => {
                builder.draw_rotated_text(text, *x, *y, *width, *height, *font_size, *angle, *opacity);
            }
            DrawCommand::MarqueeText { text, x, y, font_size, white } => {
                builder.draw_plain_text(text, *x, *y, *font_size, *white);
            }
        }
    }

    let form_id = builder.into_form_xobject(doc, assets.font_id, page_width, page_height);
    add_overlay_to_page_resources(doc, page_id, form_id)?;

    let invoke = doc.add_object(Stream::new(
        Dictionary::new(),
        format!("q\n/{OVERLAY_NAME} Do\nQ\n").into_bytes(),
    ));

    if on_top {
        // Isolate whatever graphics state the original content leaves behind,
        // so the overlay draws in untransformed page coordinates.
        wrap_page_content(doc, page_id)?;
        append_content_to_page(doc, page_id, invoke)
    } else {
        prepend_content_to_page(doc, page_id, invoke)
    }
}

/// Accumulates overlay content-stream operators and the resources they need.
struct OverlayBuilder {
    content: String,
    xobjects: Dictionary,
    gstates: Dictionary,
    gs_names: Vec<(u32, String)>,
    image_names: Vec<(ObjectId, String)>,
}

impl OverlayBuilder {
    fn new() -> Self {
        Self {
            content: String::new(),
            xobjects: Dictionary::new(),
            gstates: Dictionary::new(),
            gs_names: Vec::new(),
            image_names: Vec::new(),
        }
    }

    /// Graphics-state name for an opacity value, deduplicated per overlay.
    fn gs_name(&mut self, opacity: f64) -> String {
        let key = (opacity.clamp(0.0, 1.0) * 1000.0).round() as u32;
        if let Some((_, name)) = self.gs_names.iter().find(|(k, _)| *k == key) {
            return name.clone();
        }
        let name = format!("Ga{}", self.gs_names.len());
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"ExtGState".to_vec()));
        dict.set("ca", Object::Real(opacity as f32));
        dict.set("CA", Object::Real(opacity as f32));
        self.gstates.set(name.as_bytes().to_vec(), Object::Dictionary(dict));
        self.gs_names.push((key, name.clone()));
        name
    }

    fn image_name(&mut self, id: ObjectId) -> String {
        if let Some((_, name)) = self.image_names.iter().find(|(known, _)| *known == id) {
            return name.clone();
        }
        let name = format!("Wm{}", self.image_names.len());
        self.xobjects.set(name.as_bytes().to_vec(), Object::Reference(id));
        self.image_names.push((id, name.clone()));
        name
    }

    fn draw_image(&mut self, id: ObjectId, x: f64, y: f64, width: f64, height: f64, opacity: f64) {
        let gs = self.gs_name(opacity);
        let name = self.image_name(id);
        self.content.push_str(&format!(
            "q\n/{gs} gs\n{} 0 0 {} {} {} cm\n/{name} Do\nQ\n",
            num(width),
            num(height),
            num(x),
            num(y),
        ));
    }

    /// Text rotated about (x, y); the glyph box is re-centered on that point.
    #[allow(clippy::too_many_arguments)]
    fn draw_rotated_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        font_size: f64,
        angle: f64,
        opacity: f64,
    ) {
        let gs = self.gs_name(opacity);
        let rad = angle.to_radians();
        let (sin, cos) = rad.sin_cos();
        self.content.push_str(&format!(
            "q\n/{gs} gs\nBT\n/Fw {} Tf\n0 g\n{} {} {} {} {} {} Tm\n{} {} Td\n({}) Tj\nET\nQ\n",
            num(font_size),
            num(cos),
            num(sin),
            num(-sin),
            num(cos),
            num(x),
            num(y),
            num(-width / 2.0),
            num(-height / 2.0),
            escape_pdf_string(text),
        ));
    }

    fn draw_plain_text(&mut self, text: &str, x: f64, y: f64, font_size: f64, white: bool) {
        let fill = if white { "1 g" } else { "0 g" };
        self.content.push_str(&format!(
            "q\nBT\n/Fw {} Tf\n{fill}\n1 0 0 1 {} {} Tm\n({}) Tj\nET\nQ\n",
            num(font_size),
            num(x),
            num(y),
            escape_pdf_string(text),
        ));
    }

    /// Finish the overlay as a Form XObject sized to the page.
    fn into_form_xobject(
        self,
        doc: &mut Document,
        font_id: ObjectId,
        page_width: f64,
        page_height: f64,
    ) -> ObjectId {
        let mut font_dict = Dictionary::new();
        font_dict.set("Fw", Object::Reference(font_id));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(font_dict));
        if !self.xobjects.is_empty() {
            resources.set("XObject", Object::Dictionary(self.xobjects));
        }
        if !self.gstates.is_empty() {
            resources.set("ExtGState", Object::Dictionary(self.gstates));
        }

        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Form".to_vec()));
        dict.set("FormType", Object::Integer(1));
        dict.set(
            "BBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_width as f32),
                Object::Real(page_height as f32),
            ]),
        );
        dict.set(
            "Matrix",
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
            ]),
        );
        dict.set("Resources", Object::Dictionary(resources));

        doc.add_object(Object::Stream(Stream {
            dict,
            content: self.content.into_bytes(),
            allows_compression: true,
            start_position: None,
        }))
    }
}

/// Format a coordinate for a content stream: four decimals, trailing zeros
/// trimmed.
fn num(value: f64) -> String {
    let mut s = format!("{value:.4}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

/// Escape special characters in PDF literal strings
pub(crate) fn escape_pdf_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

/// Embed a PNG (or similar) as an RGB image XObject with its alpha channel as
/// a DeviceGray soft mask.
fn embed_image_xobject(doc: &mut Document, path: &Path) -> Result<ObjectId> {
    if !path.exists() {
        return Err(Error::AssetNotFound(path.to_path_buf()));
    }
    let img = image::open(path)?.to_rgba8();
    let (width, height) = img.dimensions();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in img.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut smask_dict = Dictionary::new();
    smask_dict.set("Type", Object::Name(b"XObject".to_vec()));
    smask_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    smask_dict.set("Width", Object::Integer(i64::from(width)));
    smask_dict.set("Height", Object::Integer(i64::from(height)));
    smask_dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
    smask_dict.set("BitsPerComponent", Object::Integer(8));
    let smask_id = doc.add_object(Object::Stream(Stream {
        dict: smask_dict,
        content: alpha,
        allows_compression: true,
        start_position: None,
    }));

    let mut image_dict = Dictionary::new();
    image_dict.set("Type", Object::Name(b"XObject".to_vec()));
    image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    image_dict.set("Width", Object::Integer(i64::from(width)));
    image_dict.set("Height", Object::Integer(i64::from(height)));
    image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    image_dict.set("BitsPerComponent", Object::Integer(8));
    image_dict.set("SMask", Object::Reference(smask_id));
    Ok(doc.add_object(Object::Stream(Stream {
        dict: image_dict,
        content: rgb,
        allows_compression: true,
        start_position: None,
    })))
}

/// Embed a registered TrueType face with WinAnsiEncoding, descriptor metrics
/// and widths computed from the font program itself.
fn embed_truetype_font(doc: &mut Document, name: &str, data: &[u8]) -> Result<ObjectId> {
    let metrics = fonts::face_metrics(data)?;
    let pdf_name: String = name.chars().filter(|c| !c.is_whitespace()).collect();

    let mut stream_dict = Dictionary::new();
    stream_dict.set("Length1", Object::Integer(data.len() as i64));
    let font_stream_id = doc.add_object(Object::Stream(Stream {
        dict: stream_dict,
        content: data.to_vec(),
        allows_compression: true,
        start_position: None,
    }));

    let mut descriptor = Dictionary::new();
    descriptor.set("Type", Object::Name(b"FontDescriptor".to_vec()));
    descriptor.set("FontName", Object::Name(pdf_name.as_bytes().to_vec()));
    descriptor.set("Flags", Object::Integer(32)); // Nonsymbolic
    descriptor.set(
        "FontBBox",
        Object::Array(metrics.bbox.iter().map(|&v| Object::Integer(v)).collect()),
    );
    descriptor.set("ItalicAngle", Object::Integer(0));
    descriptor.set("Ascent", Object::Integer(metrics.ascent));
    descriptor.set("Descent", Object::Integer(metrics.descent));
    descriptor.set("CapHeight", Object::Integer(metrics.cap_height));
    descriptor.set("StemV", Object::Integer(80));
    descriptor.set("FontFile2", Object::Reference(font_stream_id));
    let descriptor_id = doc.add_object(Object::Dictionary(descriptor));

    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"TrueType".to_vec()));
    font.set("BaseFont", Object::Name(pdf_name.into_bytes()));
    font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
    font.set("FontDescriptor", Object::Reference(descriptor_id));
    font.set("FirstChar", Object::Integer(32));
    font.set("LastChar", Object::Integer(255));
    font.set(
        "Widths",
        Object::Array(metrics.widths.iter().map(|&w| Object::Integer(w)).collect()),
    );
    Ok(doc.add_object(Object::Dictionary(font)))
}

/// Reference the standard Helvetica base font (no embedding needed).
fn embed_standard_font(doc: &mut Document) -> ObjectId {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
    doc.add_object(Object::Dictionary(font))
}

/// Add the overlay form to the page's Resources XObject subdictionary.
///
/// The resources dictionary is copied onto the page itself first, so pages
/// sharing an inherited Resources object don't see each other's overlays.
fn add_overlay_to_page_resources(
    doc: &mut Document,
    page_id: ObjectId,
    form_id: ObjectId,
) -> Result<()> {
    let resources_dict = {
        let page_obj = doc.get_object(page_id)?;
        if let Object::Dictionary(page_dict) = page_obj {
            match page_dict.get(b"Resources") {
                Ok(Object::Dictionary(dict)) => dict.clone(),
                Ok(Object::Reference(res_id)) => {
                    if let Ok(Object::Dictionary(dict)) = doc.get_object(*res_id) {
                        dict.clone()
                    } else {
                        Dictionary::new()
                    }
                }
                _ => Dictionary::new(),
            }
        } else {
            Dictionary::new()
        }
    };

    let page_obj = doc.get_object_mut(page_id)?;
    if let Object::Dictionary(ref mut page_dict) = page_obj {
        let mut resources = resources_dict;
        let mut xobjects = match resources.get(b"XObject") {
            Ok(Object::Dictionary(xo)) => xo.clone(),
            _ => Dictionary::new(),
        };
        xobjects.set(OVERLAY_NAME, Object::Reference(form_id));
        resources.set("XObject", Object::Dictionary(xobjects));
        page_dict.set("Resources", Object::Dictionary(resources));
    }
    Ok(())
}

/// Wrap the page's existing content streams in a single q/Q pair so stray
/// transforms or unbalanced state don't leak into streams appended later.
fn wrap_page_content(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let content_ids: Vec<ObjectId> = {
        let page_obj = doc.get_object(page_id)?;
        if let Object::Dictionary(page_dict) = page_obj {
            match page_dict.get(b"Contents") {
                Ok(Object::Reference(id)) => vec![*id],
                Ok(Object::Array(arr)) => arr
                    .iter()
                    .filter_map(|obj| match obj {
                        Object::Reference(id) => Some(*id),
                        _ => None,
                    })
                    .collect(),
                _ => return Ok(()),
            }
        } else {
            return Ok(());
        }
    };

    let mut combined: Vec<u8> = b"q\n".to_vec();
    for content_id in content_ids {
        if let Ok(Object::Stream(stream)) = doc.get_object(content_id) {
            combined.extend_from_slice(&stream.content);
            combined.push(b'\n');
        }
    }
    combined.extend_from_slice(b"Q\n");

    let wrapped_id = doc.add_object(Stream::new(Dictionary::new(), combined));
    let page_obj = doc.get_object_mut(page_id)?;
    if let Object::Dictionary(ref mut page_dict) = page_obj {
        page_dict.set("Contents", Object::Reference(wrapped_id));
    }
    Ok(())
}

/// Append a content stream to a page's Contents, converting a single
/// reference into an array as needed.
fn append_content_to_page(doc: &mut Document, page_id: ObjectId, new_id: ObjectId) -> Result<()> {
    let page_obj = doc.get_object_mut(page_id)?;
    if let Object::Dictionary(ref mut page_dict) = page_obj {
        let existing = page_dict.get(b"Contents").ok().cloned();
        match existing {
            Some(Object::Reference(content_id)) => {
                page_dict.set(
                    "Contents",
                    Object::Array(vec![
                        Object::Reference(content_id),
                        Object::Reference(new_id),
                    ]),
                );
            }
            Some(Object::Array(mut arr)) => {
                arr.push(Object::Reference(new_id));
                page_dict.set("Contents", Object::Array(arr));
            }
            _ => {
                page_dict.set("Contents", Object::Array(vec![Object::Reference(new_id)]));
            }
        }
    }
    Ok(())
}

/// Prepend a content stream, so it draws underneath everything that follows.
fn prepend_content_to_page(doc: &mut Document, page_id: ObjectId, new_id: ObjectId) -> Result<()> {
    let page_obj = doc.get_object_mut(page_id)?;
    if let Object::Dictionary(ref mut page_dict) = page_obj {
        let existing = page_dict.get(b"Contents").ok().cloned();
        match existing {
            Some(Object::Reference(content_id)) => {
                page_dict.set(
                    "Contents",
                    Object::Array(vec![
                        Object::Reference(new_id),
                        Object::Reference(content_id),
                    ]),
                );
            }
            Some(Object::Array(mut arr)) => {
                arr.insert(0, Object::Reference(new_id));
                page_dict.set("Contents", Object::Array(arr));
            }
            _ => {
                page_dict.set("Contents", Object::Array(vec![Object::Reference(new_id)]));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_pdf_special_characters() {
        assert_eq!(escape_pdf_string("a(b)c"), "a\\(b\\)c");
        assert_eq!(escape_pdf_string("back\\slash"), "back\\\\slash");
        assert_eq!(escape_pdf_string("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn num_trims_trailing_zeros() {
        assert_eq!(num(24.0), "24");
        assert_eq!(num(0.7071), "0.7071");
        assert_eq!(num(-12.5), "-12.5");
    }

    #[test]
    fn rotated_text_emits_rotation_matrix() {
        let mut builder = OverlayBuilder::new();
        builder.draw_rotated_text("mark", 100.0, 200.0, 50.0, 24.0, 24.0, 0.0, 0.2);
        assert!(builder.content.contains("/Fw 24 Tf"));
        assert!(builder.content.contains("1 0 -0 1 100 200 Tm"));
        assert!(builder.content.contains("-25 -12 Td"));
        assert!(builder.content.contains("(mark) Tj"));
        assert!(builder.content.contains("/Ga0 gs"));
    }

    #[test]
    fn marquee_text_sets_fill_color() {
        let mut builder = OverlayBuilder::new();
        builder.draw_plain_text("mark", 10.0, 20.0, 7.0, false);
        builder.draw_plain_text("mark", 30.0, 40.0, 7.0, true);
        assert!(builder.content.contains("0 g"));
        assert!(builder.content.contains("1 g"));
        assert!(builder.content.contains("/Fw 7 Tf"));
    }

    #[test]
    fn equal_opacities_share_one_graphics_state() {
        let mut builder = OverlayBuilder::new();
        builder.draw_rotated_text("a", 0.0, 0.0, 10.0, 10.0, 10.0, 45.0, 0.3);
        builder.draw_rotated_text("b", 5.0, 5.0, 10.0, 10.0, 10.0, 45.0, 0.3);
        builder.draw_rotated_text("c", 9.0, 9.0, 10.0, 10.0, 10.0, 45.0, 0.8);
        assert_eq!(builder.gs_names.len(), 2);
    }

    #[test]
    fn append_converts_single_reference_to_array() {
        let mut doc = Document::with_version("1.5");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), b"0 g\n".to_vec()));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Contents", Object::Reference(content_id));
        let page_id = doc.add_object(Object::Dictionary(page));
        let extra_id = doc.add_object(Stream::new(Dictionary::new(), b"Q\n".to_vec()));

        append_content_to_page(&mut doc, page_id, extra_id).unwrap();

        let page_obj = doc.get_object(page_id).unwrap();
        if let Object::Dictionary(dict) = page_obj {
            match dict.get(b"Contents").unwrap() {
                Object::Array(arr) => {
                    assert_eq!(arr.len(), 2);
                    assert_eq!(arr[1], Object::Reference(extra_id));
                }
                other => panic!("expected Contents array, got {other:?}"),
            }
        }
    }

    #[test]
    fn prepend_puts_overlay_first() {
        let mut doc = Document::with_version("1.5");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), b"0 g\n".to_vec()));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Contents", Object::Reference(content_id));
        let page_id = doc.add_object(Object::Dictionary(page));
        let under_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

        prepend_content_to_page(&mut doc, page_id, under_id).unwrap();

        let page_obj = doc.get_object(page_id).unwrap();
        if let Object::Dictionary(dict) = page_obj {
            match dict.get(b"Contents").unwrap() {
                Object::Array(arr) => assert_eq!(arr[0], Object::Reference(under_id)),
                other => panic!("expected Contents array, got {other:?}"),
            }
        }
    }
}
