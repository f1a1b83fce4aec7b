//! Inline pictures: image probing, extents, and the package plumbing
//! (media part, relationship, content type) behind a `w:drawing` run.

use std::io::Cursor;

use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};

use super::document::Document;
use super::package::{rels_path_for, resolve_target};
use super::tree::Run;
use super::xml::{escape_attr, find_attr, parse_xml_part, XmlEvent};

const EMU_PER_INCH: f64 = 914_400.0;
const EMU_PER_MM: f64 = 36_000.0;
const DEFAULT_DPI: f64 = 72.0;

const IMAGE_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width_px: u32,
    pub height_px: u32,
    pub dpi_x: f64,
    pub dpi_y: f64,
}

/// Size of a placed picture in EMU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub cx: u64,
    pub cy: u64,
}

impl ImageInfo {
    /// Extent at a fixed width, height following the aspect ratio.
    pub fn scaled_to_width(&self, width_mm: f64) -> anyhow::Result<Extent> {
        if !(width_mm.is_finite() && width_mm > 0.0) {
            return Err(anyhow!("invalid picture width: {width_mm} mm"));
        }
        if self.width_px == 0 || self.height_px == 0 {
            return Err(anyhow!("image has no pixels"));
        }
        let cx = (width_mm * EMU_PER_MM).round();
        let cy = (cx * f64::from(self.height_px) / f64::from(self.width_px)).round();
        if cx < 1.0 || cy < 1.0 {
            return Err(anyhow!("picture extent rounds to zero"));
        }
        Ok(Extent {
            cx: cx as u64,
            cy: cy as u64,
        })
    }

    /// Extent from pixel size and the resolution recorded in the file.
    pub fn natural(&self) -> Extent {
        let dpi = |d: f64| if d.is_finite() && d > 0.0 { d } else { DEFAULT_DPI };
        let emu = |px: u32, d: f64| ((f64::from(px) / dpi(d)) * EMU_PER_INCH).round().max(1.0) as u64;
        Extent {
            cx: emu(self.width_px, self.dpi_x),
            cy: emu(self.height_px, self.dpi_y),
        }
    }
}

pub fn probe_image(bytes: &[u8]) -> anyhow::Result<ImageInfo> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        probe_png(bytes)
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        probe_jpeg(bytes)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        probe_gif(bytes)
    } else {
        Err(anyhow!("unrecognized image format (expected PNG, JPEG or GIF)"))
    }
}

fn probe_png(bytes: &[u8]) -> anyhow::Result<ImageInfo> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let reader = decoder.read_info().context("decode PNG header")?;
    let info = reader.info();
    let (dpi_x, dpi_y) = match info.pixel_dims {
        Some(dims) if dims.unit == png::Unit::Meter => (
            f64::from(dims.xppu) * 0.0254,
            f64::from(dims.yppu) * 0.0254,
        ),
        _ => (DEFAULT_DPI, DEFAULT_DPI),
    };
    Ok(ImageInfo {
        format: ImageFormat::Png,
        width_px: info.width,
        height_px: info.height,
        dpi_x,
        dpi_y,
    })
}

fn probe_jpeg(bytes: &[u8]) -> anyhow::Result<ImageInfo> {
    let be16 = |i: usize| -> anyhow::Result<u16> {
        bytes
            .get(i..i + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| anyhow!("truncated JPEG"))
    };
    let mut dpi = (DEFAULT_DPI, DEFAULT_DPI);
    let mut i = 2usize;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return Err(anyhow!("corrupt JPEG marker at byte {i}"));
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        let len = usize::from(be16(i + 2)?);
        let seg = i + 4;
        match marker {
            0xE0 if bytes.get(seg..seg + 5) == Some(b"JFIF\0") => {
                let units = bytes.get(seg + 7).copied().unwrap_or(0);
                let (x, y) = (f64::from(be16(seg + 8)?), f64::from(be16(seg + 10)?));
                dpi = match units {
                    1 => (x, y),
                    2 => (x * 2.54, y * 2.54),
                    _ => dpi,
                };
            }
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let height = u32::from(be16(seg + 1)?);
                let width = u32::from(be16(seg + 3)?);
                return Ok(ImageInfo {
                    format: ImageFormat::Jpeg,
                    width_px: width,
                    height_px: height,
                    dpi_x: dpi.0,
                    dpi_y: dpi.1,
                });
            }
            _ => {}
        }
        i += 2 + len;
    }
    Err(anyhow!("JPEG without a frame header"))
}

fn probe_gif(bytes: &[u8]) -> anyhow::Result<ImageInfo> {
    let dims = bytes.get(6..10).ok_or_else(|| anyhow!("truncated GIF"))?;
    Ok(ImageInfo {
        format: ImageFormat::Gif,
        width_px: u32::from(u16::from_le_bytes([dims[0], dims[1]])),
        height_px: u32::from(u16::from_le_bytes([dims[2], dims[3]])),
        dpi_x: DEFAULT_DPI,
        dpi_y: DEFAULT_DPI,
    })
}

impl Document {
    /// Registers `image` for `story_part` and returns a run that displays it.
    pub fn picture_run(
        &mut self,
        story_part: &str,
        image: &[u8],
        file_name: &str,
        info: &ImageInfo,
        extent: Extent,
    ) -> anyhow::Result<Run> {
        let digest = hex::encode(Sha256::digest(image));
        let ext = info.format.extension();
        let media = format!("word/media/logo-{}.{ext}", &digest[..12]);
        if !self.package.contains(&media) {
            self.package.put(&media, image.to_vec());
        }
        self.ensure_default_content_type(ext, info.format.content_type())?;
        let rid = self.ensure_image_relationship(story_part, &media)?;
        self.ensure_drawing_namespaces(story_part)?;
        let doc_pr_id = self.next_drawing_id();

        let xml = format!(
            concat!(
                r#"<w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0">"#,
                r#"<wp:extent cx="{cx}" cy="{cy}"/><wp:docPr id="{id}" name="Picture {id}"/>"#,
                r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
                r#"<a:graphic xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">"#,
                r#"<a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
                r#"<pic:pic xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
                r#"<pic:nvPicPr><pic:cNvPr id="0" name="{name}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
                r#"<pic:blipFill><a:blip r:embed="{rid}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
                r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
                r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
                r#"</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing>"#
            ),
            cx = extent.cx,
            cy = extent.cy,
            id = doc_pr_id,
            name = escape_attr(file_name),
            rid = rid,
        );
        let part = parse_xml_part("drawing", xml.as_bytes()).context("build drawing markup")?;
        Ok(Run::with_markup(part.events))
    }

    fn ensure_default_content_type(&mut self, ext: &str, content_type: &str) -> anyhow::Result<()> {
        let part = self.aux_part_mut("[Content_Types].xml", || {
            vec![
                XmlEvent::start(
                    "Types",
                    &[("xmlns", "http://schemas.openxmlformats.org/package/2006/content-types")],
                ),
                XmlEvent::end("Types"),
            ]
        })?;
        let present = part.events.iter().any(|e| {
            e.element_name() == Some("Default")
                && find_attr(e.attrs(), "Extension").is_some_and(|x| x.eq_ignore_ascii_case(ext))
        });
        if present {
            return Ok(());
        }
        let close = closing_index(&part.events, "Types")?;
        part.events.insert(
            close,
            XmlEvent::empty("Default", &[("Extension", ext), ("ContentType", content_type)]),
        );
        Ok(())
    }

    fn ensure_image_relationship(&mut self, story_part: &str, media: &str) -> anyhow::Result<String> {
        let rels_name = rels_path_for(story_part);
        let part = self.aux_part_mut(&rels_name, || {
            vec![
                XmlEvent::Decl {
                    version: "1.0".to_string(),
                    encoding: Some("UTF-8".to_string()),
                    standalone: Some("yes".to_string()),
                },
                XmlEvent::start("Relationships", &[("xmlns", RELS_NS)]),
                XmlEvent::end("Relationships"),
            ]
        })?;

        let mut max_id = 0u64;
        for ev in &part.events {
            if ev.element_name() != Some("Relationship") {
                continue;
            }
            let attrs = ev.attrs();
            let id = find_attr(attrs, "Id").unwrap_or("");
            let target = find_attr(attrs, "Target").unwrap_or("");
            if find_attr(attrs, "Type") == Some(IMAGE_REL)
                && find_attr(attrs, "TargetMode") != Some("External")
                && resolve_target(story_part, target) == media
            {
                return Ok(id.to_string());
            }
            if let Some(n) = id.strip_prefix("rId").and_then(|n| n.parse::<u64>().ok()) {
                max_id = max_id.max(n);
            }
        }

        let rid = format!("rId{}", max_id + 1);
        let target = relative_target(story_part, media);
        let close = closing_index(&part.events, "Relationships")?;
        part.events.insert(
            close,
            XmlEvent::empty(
                "Relationship",
                &[("Id", rid.as_str()), ("Type", IMAGE_REL), ("Target", target.as_str())],
            ),
        );
        Ok(rid)
    }

    fn ensure_drawing_namespaces(&mut self, story_part: &str) -> anyhow::Result<()> {
        let story = self
            .story_mut(story_part)
            .ok_or_else(|| anyhow!("unknown story part: {story_part}"))?;
        let attrs = story
            .root_attrs_mut()
            .ok_or_else(|| anyhow!("{story_part}: no root element"))?;
        for (key, ns) in [("xmlns:wp", WP_NS), ("xmlns:r", R_NS)] {
            if find_attr(attrs, key).is_none() {
                attrs.push((key.to_string(), ns.to_string()));
            }
        }
        Ok(())
    }

    /// One more than the largest `wp:docPr` id anywhere in the loaded stories.
    fn next_drawing_id(&self) -> u64 {
        let mut max_id = 0u64;
        let mut scan = |ev: &XmlEvent| {
            if ev.element_name() == Some("wp:docPr") {
                if let Some(n) = find_attr(ev.attrs(), "id").and_then(|v| v.parse::<u64>().ok()) {
                    max_id = max_id.max(n);
                }
            }
        };
        self.body.for_each_event(&mut scan);
        for story in self.stories.values() {
            story.for_each_event(&mut scan);
        }
        max_id + 1
    }
}

fn closing_index(events: &[XmlEvent], root: &str) -> anyhow::Result<usize> {
    events
        .iter()
        .rposition(|e| matches!(e, XmlEvent::End { name } if name == root))
        .ok_or_else(|| anyhow!("no closing </{root}>"))
}

/// Relationship target for `target_part` as seen from `source_part`.
fn relative_target(source_part: &str, target_part: &str) -> String {
    let dir = source_part.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    match target_part.strip_prefix(dir).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) if !dir.is_empty() => rest.to_string(),
        _ => format!("/{target_part}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{tiny_png, DocxBuilder};

    #[test]
    fn png_dimensions_are_read() {
        let info = probe_image(&tiny_png(40, 20)).expect("probe");
        assert_eq!(info.format, ImageFormat::Png);
        assert_eq!((info.width_px, info.height_px), (40, 20));
        assert_eq!(info.dpi_x, DEFAULT_DPI);
    }

    #[test]
    fn jpeg_frame_header_is_found() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[1, 1, 1, 0x00, 0x96, 0x00, 0x96, 0, 0]);
        jpeg.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 8, 0x00, 0x64, 0x00, 0xC8, 3]);
        jpeg.extend_from_slice(&[0; 9]);
        let info = probe_image(&jpeg).expect("probe");
        assert_eq!(info.format, ImageFormat::Jpeg);
        assert_eq!((info.width_px, info.height_px), (200, 100));
        assert_eq!(info.dpi_x, 150.0);
    }

    #[test]
    fn gif_and_garbage() {
        let mut gif = b"GIF89a".to_vec();
        gif.extend_from_slice(&[10, 0, 5, 0]);
        let info = probe_image(&gif).expect("probe");
        assert_eq!((info.width_px, info.height_px), (10, 5));
        assert!(probe_image(b"BM....").is_err());
        assert!(probe_image(b"\x89PNG\r\n\x1a\nbroken").is_err());
    }

    #[test]
    fn scaled_extent_keeps_aspect_ratio() {
        let info = probe_image(&tiny_png(200, 100)).expect("probe");
        let ext = info.scaled_to_width(40.0).expect("scaled");
        assert_eq!(ext, Extent { cx: 1_440_000, cy: 720_000 });
        assert!(info.scaled_to_width(0.0).is_err());
        assert!(info.scaled_to_width(f64::NAN).is_err());
    }

    #[test]
    fn natural_extent_uses_resolution() {
        let info = ImageInfo {
            format: ImageFormat::Png,
            width_px: 72,
            height_px: 144,
            dpi_x: 72.0,
            dpi_y: 0.0,
        };
        assert_eq!(info.natural(), Extent { cx: 914_400, cy: 1_828_800 });
    }

    #[test]
    fn relative_targets() {
        assert_eq!(relative_target("word/document.xml", "word/media/a.png"), "media/a.png");
        assert_eq!(relative_target("word/header2.xml", "word/media/a.png"), "media/a.png");
        assert_eq!(relative_target("other/doc.xml", "word/media/a.png"), "/word/media/a.png");
    }

    #[test]
    fn picture_run_registers_media_rels_and_content_type() {
        let bytes = DocxBuilder::new("<w:p/>").build();
        let mut doc = Document::open(&bytes).expect("open");
        let png = tiny_png(4, 2);
        let info = probe_image(&png).expect("probe");
        let run = doc
            .picture_run("word/document.xml", &png, "logo.png", &info, info.natural())
            .expect("run");
        assert_eq!(run.text(), "");

        let rels = doc.aux_parts.get("word/_rels/document.xml.rels").expect("rels");
        let rel = rels
            .events
            .iter()
            .find(|e| find_attr(e.attrs(), "Type") == Some(IMAGE_REL))
            .expect("image relationship");
        let target = find_attr(rel.attrs(), "Target").expect("target");
        assert!(target.starts_with("media/logo-") && target.ends_with(".png"));
        assert!(doc.package.contains(&format!("word/{target}")));

        let types = doc.aux_parts.get("[Content_Types].xml").expect("types");
        assert!(types
            .events
            .iter()
            .any(|e| find_attr(e.attrs(), "Extension") == Some("png")));

        let root = doc.body.root_attrs_mut().expect("root");
        assert!(find_attr(root, "xmlns:wp").is_some());

        // Same image again reuses the relationship.
        let before = rels.events.len();
        doc.picture_run("word/document.xml", &png, "logo.png", &info, info.natural())
            .expect("run");
        let rels = doc.aux_parts.get("word/_rels/document.xml.rels").expect("rels");
        assert_eq!(rels.events.len(), before);
    }
}
