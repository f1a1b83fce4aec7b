//! In-memory `.docx` fixtures for unit tests.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::docx::document::{Document, Scope};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const HEADER_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/header";
const FOOTER_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer";

pub struct DocxBuilder {
    body: String,
    headers: Vec<(String, String)>,
    footers: Vec<(String, String)>,
    with_document: bool,
}

impl DocxBuilder {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            headers: Vec::new(),
            footers: Vec::new(),
            with_document: true,
        }
    }

    /// Adds `word/<file>` as header `rIdH<n>`; the first one is referenced by the final section.
    pub fn header(mut self, file: &str, xml: &str) -> Self {
        self.headers.push((file.to_string(), xml.to_string()));
        self
    }

    pub fn footer(mut self, file: &str, xml: &str) -> Self {
        self.footers.push((file.to_string(), xml.to_string()));
        self
    }

    pub fn without_document(mut self) -> Self {
        self.with_document = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut overrides = String::new();
        if self.with_document {
            overrides.push_str(r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#);
        }
        for (file, _) in &self.headers {
            overrides.push_str(&format!(r#"<Override PartName="/word/{file}" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.header+xml"/>"#));
        }
        for (file, _) in &self.footers {
            overrides.push_str(&format!(r#"<Override PartName="/word/{file}" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml"/>"#));
        }
        let content_types = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{overrides}</Types>"#
        );
        let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

        let mut rels = String::new();
        let mut sect = String::from("<w:sectPr>");
        for (i, (file, _)) in self.headers.iter().enumerate() {
            rels.push_str(&format!(
                r#"<Relationship Id="rIdH{}" Type="{HEADER_REL}" Target="{file}"/>"#,
                i + 1
            ));
        }
        for (i, (file, _)) in self.footers.iter().enumerate() {
            rels.push_str(&format!(
                r#"<Relationship Id="rIdF{}" Type="{FOOTER_REL}" Target="{file}"/>"#,
                i + 1
            ));
        }
        if !self.headers.is_empty() {
            sect.push_str(r#"<w:headerReference w:type="default" r:id="rIdH1"/>"#);
        }
        if !self.footers.is_empty() {
            sect.push_str(r#"<w:footerReference w:type="default" r:id="rIdF1"/>"#);
        }
        sect.push_str(r#"<w:pgSz w:w="11906" w:h="16838"/></w:sectPr>"#);
        let doc_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
        );
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{W_NS}" xmlns:r="{R_NS}"><w:body>{}{sect}</w:body></w:document>"#,
            self.body
        );

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        let mut add = |name: &str, data: &str| {
            zip.start_file(name, opts).expect("start file");
            zip.write_all(data.as_bytes()).expect("write file");
        };
        add("[Content_Types].xml", &content_types);
        add("_rels/.rels", root_rels);
        if self.with_document {
            add("word/document.xml", &document);
        }
        add("word/_rels/document.xml.rels", &doc_rels);
        for (file, xml) in &self.headers {
            add(
                &format!("word/{file}"),
                &format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:hdr xmlns:w="{W_NS}" xmlns:r="{R_NS}">{xml}</w:hdr>"#),
            );
        }
        for (file, xml) in &self.footers {
            add(
                &format!("word/{file}"),
                &format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:ftr xmlns:w="{W_NS}" xmlns:r="{R_NS}">{xml}</w:ftr>"#),
            );
        }
        zip.finish().expect("finish zip").into_inner()
    }
}

/// `<w:p>` with one plain run per text.
pub fn para(texts: &[&str]) -> String {
    let mut s = String::from("<w:p>");
    for t in texts {
        s.push_str(&format!(r#"<w:r><w:t xml:space="preserve">{t}</w:t></w:r>"#));
    }
    s.push_str("</w:p>");
    s
}

/// `<w:p>` with a single highlighted run.
pub fn highlighted(text: &str, color: &str) -> String {
    format!(
        r#"<w:p><w:r><w:rPr><w:b/><w:highlight w:val="{color}"/></w:rPr><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#
    )
}

/// One-row table whose cells hold the given block markup.
pub fn table(cells: &[&str]) -> String {
    let mut s = String::from(r#"<w:tbl><w:tblPr/><w:tblGrid/><w:tr>"#);
    for c in cells {
        s.push_str("<w:tc><w:tcPr/>");
        s.push_str(c);
        s.push_str("</w:tc>");
    }
    s.push_str("</w:tr></w:tbl>");
    s
}

pub fn paragraph_texts(bytes: &[u8], scope: Scope) -> Vec<String> {
    let doc = Document::open(bytes).expect("open filled document");
    doc.paragraphs(scope).map(|p| p.text()).collect()
}

/// Text of every run, paragraph by paragraph.
pub fn run_texts(bytes: &[u8], scope: Scope) -> Vec<Vec<String>> {
    let doc = Document::open(bytes).expect("open filled document");
    doc.paragraphs(scope)
        .map(|p| p.runs().map(|r| r.text()).collect())
        .collect()
}

pub fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().expect("png header");
        let pixels = vec![200u8; (width * height * 3) as usize];
        writer.write_image_data(&pixels).expect("png data");
    }
    out
}
