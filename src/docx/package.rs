use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// The zip container of a `.docx`, held fully in memory.
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::read_from(Cursor::new(bytes))
    }

    fn read_from<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).context("read zip")?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {}", file.name()))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| !e.is_dir && e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a new part at the end of the archive, or overwrites an existing one.
    pub fn put(&mut self, name: &str, data: Vec<u8>) {
        if let Some(ent) = self.entries.iter_mut().find(|e| e.name == name) {
            ent.data = data;
            return;
        }
        let compression = if name.starts_with("word/media/") {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        self.entries.push(DocxEntry {
            name: name.to_string(),
            data,
            compression,
            last_modified: zip::DateTime::default(),
            unix_mode: None,
            is_dir: false,
        });
    }

    /// Re-zips every entry in original order, substituting `replacements` by part name.
    pub fn to_bytes_with_replacements(
        &self,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for ent in &self.entries {
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                writer
                    .add_directory(ent.name.as_str(), opts)
                    .with_context(|| format!("add directory {}", ent.name))?;
                continue;
            }
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            writer
                .start_file(ent.name.as_str(), opts)
                .and_then(|_| writer.write_all(data).map_err(Into::into))
                .with_context(|| format!("write part {}", ent.name))?;
        }
        Ok(writer.finish().context("finish zip")?.into_inner())
    }
}

/// Path of the relationships part that belongs to `part_name`
/// (`word/document.xml` -> `word/_rels/document.xml.rels`).
pub fn rels_path_for(part_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

/// Resolves a relationship target relative to the directory of `source_part`.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    let t = target.replace('\\', "/");
    if let Some(abs) = t.strip_prefix('/') {
        return abs.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    };
    for seg in t.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_path_follows_part_directory() {
        assert_eq!(rels_path_for("word/document.xml"), "word/_rels/document.xml.rels");
        assert_eq!(rels_path_for("word/header1.xml"), "word/_rels/header1.xml.rels");
        assert_eq!(rels_path_for("[Content_Types].xml"), "_rels/[Content_Types].xml.rels");
    }

    #[test]
    fn targets_resolve_relative_to_source() {
        assert_eq!(resolve_target("word/document.xml", "header1.xml"), "word/header1.xml");
        assert_eq!(resolve_target("word/document.xml", "media/a.png"), "word/media/a.png");
        assert_eq!(resolve_target("word/document.xml", "../customXml/x.xml"), "customXml/x.xml");
        assert_eq!(resolve_target("", "word/document.xml"), "word/document.xml");
        assert_eq!(resolve_target("word/document.xml", "/word/footer2.xml"), "word/footer2.xml");
    }

    #[test]
    fn garbage_is_not_a_package() {
        assert!(DocxPackage::from_bytes(b"definitely not a zip").is_err());
    }

    #[test]
    fn put_then_write_round_trips() {
        let mut pkg = DocxPackage { entries: Vec::new() };
        pkg.put("word/document.xml", b"<a/>".to_vec());
        pkg.put("word/media/logo.png", vec![1, 2, 3]);
        pkg.put("word/document.xml", b"<b/>".to_vec());
        let bytes = pkg.to_bytes_with_replacements(&HashMap::new()).expect("write");
        let back = DocxPackage::from_bytes(&bytes).expect("read");
        assert_eq!(back.entries.len(), 2);
        assert_eq!(back.get("word/document.xml"), Some(&b"<b/>"[..]));
        assert_eq!(back.get("word/media/logo.png"), Some(&[1u8, 2, 3][..]));
    }
}
