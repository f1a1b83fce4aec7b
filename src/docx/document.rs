use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Context};
use tracing::{debug, warn};

use super::package::{rels_path_for, resolve_target, DocxPackage};
use super::tree::{Paragraph, Story};
use super::xml::{content_hash, find_attr, parse_xml_part, write_events, write_xml_part, XmlEvent, XmlPart};
use crate::error::{FillError, Result};

const OFFICE_DOCUMENT_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const DEFAULT_MAIN_PART: &str = "word/document.xml";

/// Which stories a traversal covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Body paragraphs and body tables.
    Body,
    /// Body, then each section's header and footer.
    WithHeadersFooters,
}

/// Default header/footer parts in effect for one section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    pub header: Option<String>,
    pub footer: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

/// An opened `.docx`: the package plus parsed body, header and footer stories.
pub struct Document {
    pub(crate) package: DocxPackage,
    pub(crate) body: Story,
    pub(crate) sections: Vec<Section>,
    pub(crate) stories: BTreeMap<String, Story>,
    /// Auxiliary XML parts (relationships, content types) edited in place.
    pub(crate) aux_parts: BTreeMap<String, XmlPart>,
    baselines: HashMap<String, String>,
}

impl Document {
    /// Parses a `.docx` from memory. Any structural problem is a `DocumentFormat` error.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        Self::open_inner(bytes).map_err(FillError::format)
    }

    fn open_inner(bytes: &[u8]) -> anyhow::Result<Self> {
        let package = DocxPackage::from_bytes(bytes).context("open docx package")?;
        let main_name = main_part_name(&package)?;
        let main_bytes = package
            .get(&main_name)
            .ok_or_else(|| anyhow!("missing main document part {main_name}"))?;
        let main = parse_xml_part(&main_name, main_bytes)
            .with_context(|| format!("parse {main_name}"))?;
        let body = Story::from_part(&main, "w:body")?;

        let mut baselines = HashMap::new();
        baselines.insert(main_name.clone(), main.baseline_hash.clone());

        let rels = match package.get(&rels_path_for(&main_name)) {
            Some(b) => {
                let part = parse_xml_part(&rels_path_for(&main_name), b)
                    .with_context(|| format!("parse relationships of {main_name}"))?;
                relationships(&part, &main_name)
            }
            None => Vec::new(),
        };
        let by_id: HashMap<&str, &Relationship> =
            rels.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut sections = Vec::new();
        let mut previous = Section::default();
        for refs in section_refs(&main.events) {
            let resolve = |rid: Option<String>| -> Option<String> {
                let rid = rid?;
                match by_id.get(rid.as_str()) {
                    Some(rel) if !rel.external => Some(rel.target.clone()),
                    _ => {
                        warn!(rid = %rid, "section references an unknown relationship");
                        None
                    }
                }
            };
            // A section without its own reference inherits the previous one.
            let section = Section {
                header: resolve(refs.header_rid).or_else(|| previous.header.clone()),
                footer: resolve(refs.footer_rid).or_else(|| previous.footer.clone()),
            };
            previous = section.clone();
            sections.push(section);
        }

        let mut stories = BTreeMap::new();
        for section in &sections {
            for (name, container) in [(&section.header, "w:hdr"), (&section.footer, "w:ftr")] {
                let Some(name) = name else { continue };
                if stories.contains_key(name) {
                    continue;
                }
                let Some(bytes) = package.get(name) else {
                    warn!(part = %name, "header/footer part missing from package");
                    continue;
                };
                let part = parse_xml_part(name, bytes).with_context(|| format!("parse {name}"))?;
                let story = Story::from_part(&part, container)?;
                baselines.insert(name.clone(), part.baseline_hash.clone());
                stories.insert(name.clone(), story);
            }
        }

        debug!(
            main = %main_name,
            sections = sections.len(),
            header_footer_parts = stories.len(),
            "opened document"
        );

        Ok(Self {
            package,
            body,
            sections,
            stories,
            aux_parts: BTreeMap::new(),
            baselines,
        })
    }

    pub fn body(&self) -> &Story {
        &self.body
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Part names of the stories covered by `scope`, in traversal order.
    ///
    /// A header shared by several sections is listed once per section.
    pub fn story_order(&self, scope: Scope) -> Vec<String> {
        let mut order = vec![self.body.part_name.clone()];
        if scope == Scope::WithHeadersFooters {
            for section in &self.sections {
                for name in [&section.header, &section.footer].into_iter().flatten() {
                    if self.stories.contains_key(name) {
                        order.push(name.clone());
                    }
                }
            }
        }
        order
    }

    pub fn story(&self, part_name: &str) -> Option<&Story> {
        if part_name == self.body.part_name {
            return Some(&self.body);
        }
        self.stories.get(part_name)
    }

    pub fn story_mut(&mut self, part_name: &str) -> Option<&mut Story> {
        if part_name == self.body.part_name {
            return Some(&mut self.body);
        }
        self.stories.get_mut(part_name)
    }

    /// Lazy walk over every paragraph in `scope`.
    pub fn paragraphs(&self, scope: Scope) -> impl Iterator<Item = &Paragraph> + '_ {
        self.story_order(scope)
            .into_iter()
            .filter_map(move |name| self.story(&name))
            .flat_map(|story| story.paragraphs())
    }

    /// Loads (or creates) an auxiliary XML part for editing.
    pub(crate) fn aux_part_mut(
        &mut self,
        name: &str,
        create: impl FnOnce() -> Vec<XmlEvent>,
    ) -> anyhow::Result<&mut XmlPart> {
        if !self.aux_parts.contains_key(name) {
            let part = match self.package.get(name) {
                Some(bytes) => parse_xml_part(name, bytes).with_context(|| format!("parse {name}"))?,
                None => {
                    self.package.put(name, Vec::new());
                    XmlPart {
                        name: name.to_string(),
                        events: create(),
                        baseline_hash: String::new(),
                    }
                }
            };
            self.aux_parts.insert(name.to_string(), part);
        }
        self.aux_parts
            .get_mut(name)
            .ok_or_else(|| anyhow!("aux part vanished: {name}"))
    }

    /// Serializes the package; parts that were not changed keep their original bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        let stories = std::iter::once(&self.body).chain(self.stories.values());
        for story in stories {
            let events = story.to_events();
            let unchanged = self
                .baselines
                .get(&story.part_name)
                .is_some_and(|h| *h == content_hash(&events));
            if unchanged {
                continue;
            }
            let bytes = write_events(&events)
                .with_context(|| format!("serialize {}", story.part_name))
                .map_err(FillError::write)?;
            replacements.insert(story.part_name.clone(), bytes);
        }
        for part in self.aux_parts.values() {
            if !part.is_modified() {
                continue;
            }
            let bytes = write_xml_part(part)
                .with_context(|| format!("serialize {}", part.name))
                .map_err(FillError::write)?;
            replacements.insert(part.name.clone(), bytes);
        }
        debug!(rewritten = replacements.len(), "writing package");
        self.package
            .to_bytes_with_replacements(&replacements)
            .map_err(FillError::write)
    }
}

fn main_part_name(package: &DocxPackage) -> anyhow::Result<String> {
    let Some(bytes) = package.get("_rels/.rels") else {
        return Ok(DEFAULT_MAIN_PART.to_string());
    };
    let part = parse_xml_part("_rels/.rels", bytes).context("parse _rels/.rels")?;
    Ok(relationships(&part, "")
        .into_iter()
        .find(|r| r.rel_type == OFFICE_DOCUMENT_REL && !r.external)
        .map(|r| r.target)
        .unwrap_or_else(|| DEFAULT_MAIN_PART.to_string()))
}

/// Relationships declared in a `.rels` part, targets resolved against `source_part`.
pub fn relationships(rels: &XmlPart, source_part: &str) -> Vec<Relationship> {
    let mut out = Vec::new();
    for ev in &rels.events {
        if ev.element_name() != Some("Relationship") {
            continue;
        }
        let attrs = ev.attrs();
        let id = find_attr(attrs, "Id").unwrap_or("").trim();
        let target = find_attr(attrs, "Target").unwrap_or("").trim();
        if id.is_empty() || target.is_empty() {
            continue;
        }
        let external = find_attr(attrs, "TargetMode") == Some("External");
        out.push(Relationship {
            id: id.to_string(),
            rel_type: find_attr(attrs, "Type").unwrap_or("").to_string(),
            target: if external {
                target.to_string()
            } else {
                resolve_target(source_part, target)
            },
            external,
        });
    }
    out
}

#[derive(Default)]
struct SectionRefs {
    header_rid: Option<String>,
    footer_rid: Option<String>,
}

/// Default header/footer references per `w:sectPr`, in document order.
fn section_refs(events: &[XmlEvent]) -> Vec<SectionRefs> {
    let mut sections = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut current: Option<SectionRefs> = None;

    for ev in events {
        match ev {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } => {
                let is_start = matches!(ev, XmlEvent::Start { .. });
                if name == "w:sectPr" && is_section_parent(&stack) {
                    if is_start {
                        current = Some(SectionRefs::default());
                    } else {
                        sections.push(SectionRefs::default());
                    }
                } else if let Some(sect) = current.as_mut() {
                    let is_header = name == "w:headerReference";
                    if is_header || name == "w:footerReference" {
                        let attrs = ev.attrs();
                        let typ = find_attr(attrs, "w:type").unwrap_or("default");
                        let rid = find_attr(attrs, "r:id").map(str::trim).unwrap_or("");
                        if typ == "default" && !rid.is_empty() {
                            let slot = if is_header {
                                &mut sect.header_rid
                            } else {
                                &mut sect.footer_rid
                            };
                            *slot = Some(rid.to_string());
                        }
                    }
                }
                if is_start {
                    stack.push(name.as_str());
                }
            }
            XmlEvent::End { name } => {
                stack.pop();
                if name == "w:sectPr" && is_section_parent(&stack) {
                    if let Some(sect) = current.take() {
                        sections.push(sect);
                    }
                }
            }
            _ => {}
        }
    }
    sections
}

/// `w:sectPr` counts when it sits directly in the body or in a body paragraph's `w:pPr`.
fn is_section_parent(stack: &[&str]) -> bool {
    match stack {
        [.., "w:body"] => true,
        [.., "w:body", "w:p", "w:pPr"] => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::DocxBuilder;

    #[test]
    fn garbage_bytes_are_a_format_error() {
        let err = Document::open(b"PK\x03\x04 nope").err().expect("should fail");
        assert!(matches!(err, FillError::DocumentFormat(_)));
    }

    #[test]
    fn zip_without_document_is_a_format_error() {
        let bytes = DocxBuilder::new("").without_document().build();
        let err = Document::open(&bytes).err().expect("should fail");
        assert!(matches!(err, FillError::DocumentFormat(msg) if msg.contains("word/document.xml")));
    }

    #[test]
    fn untouched_document_is_byte_identical_per_part() {
        let bytes = DocxBuilder::new("<w:p><w:r><w:t>hello</w:t></w:r></w:p>")
            .header("header1.xml", "<w:p><w:r><w:t>top</w:t></w:r></w:p>")
            .build();
        let doc = Document::open(&bytes).expect("open");
        let out = doc.to_bytes().expect("write");
        let before = DocxPackage::from_bytes(&bytes).expect("pkg");
        let after = DocxPackage::from_bytes(&out).expect("pkg");
        assert_eq!(before.entries.len(), after.entries.len());
        for ent in &before.entries {
            assert_eq!(after.get(&ent.name), Some(ent.data.as_slice()), "{}", ent.name);
        }
    }

    #[test]
    fn headers_and_footers_follow_the_body() {
        let bytes = DocxBuilder::new("<w:p><w:r><w:t>body</w:t></w:r></w:p>")
            .header("header1.xml", "<w:p><w:r><w:t>head</w:t></w:r></w:p>")
            .footer("footer1.xml", "<w:p><w:r><w:t>foot</w:t></w:r></w:p>")
            .build();
        let doc = Document::open(&bytes).expect("open");
        let body_only: Vec<String> = doc.paragraphs(Scope::Body).map(|p| p.text()).collect();
        assert_eq!(body_only, vec!["body"]);
        let all: Vec<String> = doc
            .paragraphs(Scope::WithHeadersFooters)
            .map(|p| p.text())
            .collect();
        assert_eq!(all, vec!["body", "head", "foot"]);
    }

    #[test]
    fn section_refs_keep_default_references_only() {
        let events = parse_xml_part(
            "word/document.xml",
            concat!(
                r#"<w:document><w:body>"#,
                r#"<w:p><w:pPr><w:sectPr><w:headerReference w:type="default" r:id="rId1"/>"#,
                r#"<w:headerReference w:type="first" r:id="rId9"/></w:sectPr></w:pPr></w:p>"#,
                r#"<w:p/><w:sectPr><w:footerReference r:id="rId2"/></w:sectPr>"#,
                r#"</w:body></w:document>"#
            )
            .as_bytes(),
        )
        .expect("parse")
        .events;
        let refs = section_refs(&events);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].header_rid.as_deref(), Some("rId1"));
        assert_eq!(refs[0].footer_rid, None);
        assert_eq!(refs[1].header_rid, None);
        assert_eq!(refs[1].footer_rid.as_deref(), Some("rId2"));
    }

    #[test]
    fn shared_header_is_walked_per_section() {
        let bytes = DocxBuilder::new(concat!(
            r#"<w:p><w:pPr><w:sectPr><w:headerReference w:type="default" r:id="rIdH1"/></w:sectPr></w:pPr></w:p>"#,
        ))
        .header("header1.xml", "<w:p><w:r><w:t>head</w:t></w:r></w:p>")
        .build();
        let doc = Document::open(&bytes).expect("open");
        assert_eq!(doc.sections().len(), 2);
        assert_eq!(doc.sections()[0], doc.sections()[1]);
        let order = doc.story_order(Scope::WithHeadersFooters);
        assert_eq!(order, vec!["word/document.xml", "word/header1.xml", "word/header1.xml"]);
    }

    #[test]
    fn relationships_resolve_targets() {
        let part = parse_xml_part(
            "word/_rels/document.xml.rels",
            br#"<Relationships><Relationship Id="rId1" Type="t/header" Target="header1.xml"/><Relationship Id="rId2" Type="t/hyperlink" Target="http://x" TargetMode="External"/></Relationships>"#,
        )
        .expect("parse");
        let rels = relationships(&part, "word/document.xml");
        assert_eq!(rels[0].target, "word/header1.xml");
        assert!(!rels[0].external);
        assert_eq!(rels[1].target, "http://x");
        assert!(rels[1].external);
    }
}
