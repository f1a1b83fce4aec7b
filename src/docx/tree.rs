//! Typed view over the WordprocessingML of a body, header or footer part.
//!
//! Only the structure the filler reasons about is modelled (paragraphs, runs,
//! tables, rows, cells); everything else is carried as opaque event lists so
//! serializing an untouched story reproduces the parsed events exactly.

use std::ops::Range;

use anyhow::{anyhow, Context};

use super::xml::{find_attr, subtree_end, XmlEvent, XmlPart};

/// Tables nested deeper than this are rejected as malformed input.
pub const MAX_TABLE_DEPTH: usize = 64;

/// A block container backed by one XML part: the document body, a header or a footer.
#[derive(Clone, Debug)]
pub struct Story {
    pub part_name: String,
    prefix: Vec<XmlEvent>,
    pub blocks: Vec<Block>,
    suffix: Vec<XmlEvent>,
}

#[derive(Clone, Debug)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
    Other(Vec<XmlEvent>),
}

#[derive(Clone, Debug)]
pub struct Table {
    attrs: Vec<(String, String)>,
    pub children: Vec<TableChild>,
}

#[derive(Clone, Debug)]
pub enum TableChild {
    Row(Row),
    Other(Vec<XmlEvent>),
}

#[derive(Clone, Debug)]
pub struct Row {
    attrs: Vec<(String, String)>,
    pub children: Vec<RowChild>,
}

#[derive(Clone, Debug)]
pub enum RowChild {
    Cell(Cell),
    Other(Vec<XmlEvent>),
}

/// A table cell; `w:tcPr` is kept as an opaque block.
#[derive(Clone, Debug)]
pub struct Cell {
    attrs: Vec<(String, String)>,
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug)]
pub struct Paragraph {
    attrs: Vec<(String, String)>,
    content: Vec<Inline>,
}

#[derive(Clone, Debug)]
pub enum Inline {
    Run(Run),
    Other(Vec<XmlEvent>),
}

#[derive(Clone, Debug, Default)]
pub struct Run {
    attrs: Vec<(String, String)>,
    pub props: Option<RunProps>,
    content: Vec<RunItem>,
}

/// Direct run formatting (`w:rPr`).
#[derive(Clone, Debug, Default)]
pub struct RunProps {
    attrs: Vec<(String, String)>,
    children: Vec<XmlEvent>,
    pub highlight: Option<Highlight>,
}

/// A `w:highlight` value plus where it sat among the other run properties.
#[derive(Clone, Debug)]
pub struct Highlight {
    pub color: String,
    slot: usize,
    events: Vec<XmlEvent>,
}

#[derive(Clone, Debug)]
enum RunItem {
    Text {
        attrs: Vec<(String, String)>,
        text: String,
        events: Vec<XmlEvent>,
    },
    Tab(Vec<XmlEvent>),
    Break(Vec<XmlEvent>),
    Other(Vec<XmlEvent>),
}

impl Story {
    /// Builds the story rooted at `container` (`w:body`, `w:hdr` or `w:ftr`).
    pub fn from_part(part: &XmlPart, container: &str) -> anyhow::Result<Self> {
        let events = &part.events;
        let start = events
            .iter()
            .position(|e| e.element_name() == Some(container))
            .ok_or_else(|| anyhow!("{}: missing <{}>", part.name, container))?;

        if let XmlEvent::Empty { name, attrs } = &events[start] {
            let mut prefix = events[..start].to_vec();
            prefix.push(XmlEvent::Start {
                name: name.clone(),
                attrs: attrs.clone(),
            });
            let mut suffix = vec![XmlEvent::End { name: name.clone() }];
            suffix.extend_from_slice(&events[start + 1..]);
            return Ok(Self {
                part_name: part.name.clone(),
                prefix,
                blocks: Vec::new(),
                suffix,
            });
        }

        let end = subtree_end(events, start)?;
        let blocks = parse_blocks(&events[start + 1..end - 1], 0)
            .with_context(|| format!("parse <{}> in {}", container, part.name))?;
        Ok(Self {
            part_name: part.name.clone(),
            prefix: events[..=start].to_vec(),
            blocks,
            suffix: events[end - 1..].to_vec(),
        })
    }

    pub fn to_events(&self) -> Vec<XmlEvent> {
        let mut out = self.prefix.clone();
        write_blocks(&self.blocks, &mut out);
        out.extend(self.suffix.iter().cloned());
        out
    }

    /// Attributes of the part's root element (namespace declarations live here).
    pub fn root_attrs_mut(&mut self) -> Option<&mut Vec<(String, String)>> {
        self.prefix.iter_mut().find_map(|e| match e {
            XmlEvent::Start { attrs, .. } => Some(attrs),
            _ => None,
        })
    }

    /// Every opaque event list in the story, used to scan for drawing ids.
    pub fn for_each_event(&self, f: &mut impl FnMut(&XmlEvent)) {
        for ev in self.to_events() {
            f(&ev);
        }
    }
}

impl Table {
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.children.iter().filter_map(|c| match c {
            TableChild::Row(r) => Some(r),
            TableChild::Other(_) => None,
        })
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.children.iter_mut().filter_map(|c| match c {
            TableChild::Row(r) => Some(r),
            TableChild::Other(_) => None,
        })
    }
}

impl Row {
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.children.iter().filter_map(|c| match c {
            RowChild::Cell(cell) => Some(cell),
            RowChild::Other(_) => None,
        })
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.children.iter_mut().filter_map(|c| match c {
            RowChild::Cell(cell) => Some(cell),
            RowChild::Other(_) => None,
        })
    }
}

impl Paragraph {
    pub fn new() -> Self {
        Self {
            attrs: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.content.iter().filter_map(|i| match i {
            Inline::Run(r) => Some(r),
            Inline::Other(_) => None,
        })
    }

    /// Concatenated text of the paragraph's runs.
    pub fn text(&self) -> String {
        self.runs().map(|r| r.text()).collect()
    }

    pub fn content(&self) -> &[Inline] {
        &self.content
    }

    /// Swaps the whole inline content in one step.
    pub fn replace_content(&mut self, content: Vec<Inline>) -> Vec<Inline> {
        std::mem::replace(&mut self.content, content)
    }

    /// Drops every run, keeps paragraph properties and non-run content, then appends `runs`.
    pub fn replace_runs(&mut self, runs: Vec<Run>) {
        let mut content: Vec<Inline> = self
            .content
            .iter()
            .filter(|i| matches!(i, Inline::Other(_)))
            .cloned()
            .collect();
        content.extend(runs.into_iter().map(Inline::Run));
        self.replace_content(content);
    }

    pub fn push_run(&mut self, run: Run) {
        self.content.push(Inline::Run(run));
    }
}

impl Default for Paragraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Run {
    pub fn new(text: &str) -> Self {
        let mut run = Self::default();
        run.set_text(text);
        run
    }

    /// A run holding raw inline markup such as a `w:drawing`.
    pub fn with_markup(events: Vec<XmlEvent>) -> Self {
        Self {
            attrs: Vec::new(),
            props: None,
            content: vec![RunItem::Other(events)],
        }
    }

    /// Text as Word displays it: tabs as `\t`, line breaks as `\n`.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            match item {
                RunItem::Text { text, .. } => out.push_str(text),
                RunItem::Tab(_) => out.push('\t'),
                RunItem::Break(_) => out.push('\n'),
                RunItem::Other(_) => {}
            }
        }
        out
    }

    /// Replaces all run content (not its formatting) with `text`.
    pub fn set_text(&mut self, text: &str) {
        let mut content = Vec::new();
        let mut pending = String::new();
        for ch in text.chars() {
            match ch {
                '\t' | '\n' | '\r' => {
                    if !pending.is_empty() {
                        content.push(RunItem::text(std::mem::take(&mut pending)));
                    }
                    content.push(if ch == '\t' {
                        RunItem::Tab(vec![XmlEvent::empty("w:tab", &[])])
                    } else {
                        RunItem::Break(vec![XmlEvent::empty("w:br", &[])])
                    });
                }
                _ => pending.push(ch),
            }
        }
        if !pending.is_empty() {
            content.push(RunItem::text(pending));
        }
        self.content = content;
    }

    pub fn highlight(&self) -> Option<&str> {
        self.props
            .as_ref()
            .and_then(|p| p.highlight.as_ref())
            .map(|h| h.color.as_str())
    }

    pub fn clear_highlight(&mut self) {
        if let Some(props) = self.props.as_mut() {
            props.highlight = None;
        }
    }

    fn write_events(&self, out: &mut Vec<XmlEvent>) {
        out.push(XmlEvent::Start {
            name: "w:r".to_string(),
            attrs: self.attrs.clone(),
        });
        if let Some(props) = &self.props {
            props.write_events(out);
        }
        for item in &self.content {
            item.write_events(out);
        }
        out.push(XmlEvent::end("w:r"));
    }
}

impl RunProps {
    fn write_events(&self, out: &mut Vec<XmlEvent>) {
        if self.children.is_empty() && self.highlight.is_none() {
            out.push(XmlEvent::Empty {
                name: "w:rPr".to_string(),
                attrs: self.attrs.clone(),
            });
            return;
        }
        out.push(XmlEvent::Start {
            name: "w:rPr".to_string(),
            attrs: self.attrs.clone(),
        });
        match &self.highlight {
            Some(h) => {
                let slot = h.slot.min(self.children.len());
                out.extend(self.children[..slot].iter().cloned());
                out.extend(h.events.iter().cloned());
                out.extend(self.children[slot..].iter().cloned());
            }
            None => out.extend(self.children.iter().cloned()),
        }
        out.push(XmlEvent::end("w:rPr"));
    }
}

impl RunItem {
    fn text(text: String) -> Self {
        let mut attrs = Vec::new();
        if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
            attrs.push(("xml:space".to_string(), "preserve".to_string()));
        }
        Self::Text {
            attrs,
            text,
            events: Vec::new(),
        }
    }

    fn write_events(&self, out: &mut Vec<XmlEvent>) {
        match self {
            RunItem::Text {
                attrs,
                text,
                events,
            } => {
                if !events.is_empty() {
                    out.extend(events.iter().cloned());
                    return;
                }
                out.push(XmlEvent::Start {
                    name: "w:t".to_string(),
                    attrs: attrs.clone(),
                });
                if !text.is_empty() {
                    out.push(XmlEvent::text(text.clone()));
                }
                out.push(XmlEvent::end("w:t"));
            }
            RunItem::Tab(events) | RunItem::Break(events) | RunItem::Other(events) => {
                out.extend(events.iter().cloned())
            }
        }
    }
}

// ─── Parsing ────────────────────────────────────────────────────────────────

/// Ranges of the direct children of an element, given the events strictly inside it.
fn child_spans(inner: &[XmlEvent]) -> anyhow::Result<Vec<Range<usize>>> {
    let mut spans = Vec::new();
    let mut i = 0usize;
    while i < inner.len() {
        if let XmlEvent::End { name } = &inner[i] {
            return Err(anyhow!("unexpected </{name}>"));
        }
        let end = subtree_end(inner, i)?;
        spans.push(i..end);
        i = end;
    }
    Ok(spans)
}

/// Events strictly inside a `Start ... End` subtree; empty for an `Empty` element.
fn inner(events: &[XmlEvent]) -> &[XmlEvent] {
    match events.first() {
        Some(XmlEvent::Start { .. }) if events.len() >= 2 => &events[1..events.len() - 1],
        _ => &[],
    }
}

fn parse_blocks(inner_events: &[XmlEvent], table_depth: usize) -> anyhow::Result<Vec<Block>> {
    let mut blocks = Vec::new();
    for span in child_spans(inner_events)? {
        let events = &inner_events[span];
        let block = match events[0].element_name() {
            Some("w:p") => Block::Paragraph(parse_paragraph(events)?),
            Some("w:tbl") => Block::Table(parse_table(events, table_depth + 1)?),
            _ => Block::Other(events.to_vec()),
        };
        blocks.push(block);
    }
    Ok(blocks)
}

fn parse_table(events: &[XmlEvent], depth: usize) -> anyhow::Result<Table> {
    if depth > MAX_TABLE_DEPTH {
        return Err(anyhow!("tables nested deeper than {MAX_TABLE_DEPTH} levels"));
    }
    let body = inner(events);
    let mut children = Vec::new();
    for span in child_spans(body)? {
        let child = &body[span];
        if child[0].element_name() == Some("w:tr") {
            children.push(TableChild::Row(parse_row(child, depth)?));
        } else {
            children.push(TableChild::Other(child.to_vec()));
        }
    }
    Ok(Table {
        attrs: events[0].attrs().to_vec(),
        children,
    })
}

fn parse_row(events: &[XmlEvent], depth: usize) -> anyhow::Result<Row> {
    let body = inner(events);
    let mut children = Vec::new();
    for span in child_spans(body)? {
        let child = &body[span];
        if child[0].element_name() == Some("w:tc") {
            children.push(RowChild::Cell(Cell {
                attrs: child[0].attrs().to_vec(),
                blocks: parse_blocks(inner(child), depth)?,
            }));
        } else {
            children.push(RowChild::Other(child.to_vec()));
        }
    }
    Ok(Row {
        attrs: events[0].attrs().to_vec(),
        children,
    })
}

fn parse_paragraph(events: &[XmlEvent]) -> anyhow::Result<Paragraph> {
    let body = inner(events);
    let mut content = Vec::new();
    for span in child_spans(body)? {
        let child = &body[span];
        if child[0].element_name() == Some("w:r") {
            content.push(Inline::Run(parse_run(child)?));
        } else {
            content.push(Inline::Other(child.to_vec()));
        }
    }
    Ok(Paragraph {
        attrs: events[0].attrs().to_vec(),
        content,
    })
}

fn parse_run(events: &[XmlEvent]) -> anyhow::Result<Run> {
    let body = inner(events);
    let mut props = None;
    let mut content = Vec::new();
    for span in child_spans(body)? {
        let child = &body[span];
        match child[0].element_name() {
            Some("w:rPr") => props = Some(parse_run_props(child)?),
            Some("w:t") => {
                let mut text = String::new();
                for ev in inner(child) {
                    match ev {
                        XmlEvent::Text { text: t } | XmlEvent::CData { text: t } => {
                            text.push_str(t)
                        }
                        _ => {}
                    }
                }
                content.push(RunItem::Text {
                    attrs: child[0].attrs().to_vec(),
                    text,
                    events: child.to_vec(),
                });
            }
            Some("w:tab") => content.push(RunItem::Tab(child.to_vec())),
            Some("w:cr") => content.push(RunItem::Break(child.to_vec())),
            Some("w:br") => {
                let kind = find_attr(child[0].attrs(), "w:type").unwrap_or("textWrapping");
                if kind == "textWrapping" {
                    content.push(RunItem::Break(child.to_vec()));
                } else {
                    content.push(RunItem::Other(child.to_vec()));
                }
            }
            _ => content.push(RunItem::Other(child.to_vec())),
        }
    }
    Ok(Run {
        attrs: events[0].attrs().to_vec(),
        props,
        content,
    })
}

fn parse_run_props(events: &[XmlEvent]) -> anyhow::Result<RunProps> {
    let body = inner(events);
    let mut children = Vec::new();
    let mut highlight = None;
    for span in child_spans(body)? {
        let child = &body[span];
        if child[0].element_name() == Some("w:highlight") && highlight.is_none() {
            let color = find_attr(child[0].attrs(), "w:val").unwrap_or("").trim().to_string();
            // `none` (or a missing value) means explicitly not highlighted.
            if !color.is_empty() && color != "none" {
                highlight = Some(Highlight {
                    color,
                    slot: children.len(),
                    events: child.to_vec(),
                });
                continue;
            }
        }
        children.extend(child.iter().cloned());
    }
    Ok(RunProps {
        attrs: events[0].attrs().to_vec(),
        children,
        highlight,
    })
}

// ─── Serialization ──────────────────────────────────────────────────────────

fn write_blocks(blocks: &[Block], out: &mut Vec<XmlEvent>) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => write_paragraph(p, out),
            Block::Table(t) => write_table(t, out),
            Block::Other(events) => out.extend(events.iter().cloned()),
        }
    }
}

fn write_paragraph(p: &Paragraph, out: &mut Vec<XmlEvent>) {
    if p.content.is_empty() {
        out.push(XmlEvent::Empty {
            name: "w:p".to_string(),
            attrs: p.attrs.clone(),
        });
        return;
    }
    out.push(XmlEvent::Start {
        name: "w:p".to_string(),
        attrs: p.attrs.clone(),
    });
    for inline in &p.content {
        match inline {
            Inline::Run(r) => r.write_events(out),
            Inline::Other(events) => out.extend(events.iter().cloned()),
        }
    }
    out.push(XmlEvent::end("w:p"));
}

fn write_table(t: &Table, out: &mut Vec<XmlEvent>) {
    out.push(XmlEvent::Start {
        name: "w:tbl".to_string(),
        attrs: t.attrs.clone(),
    });
    for child in &t.children {
        match child {
            TableChild::Row(row) => {
                out.push(XmlEvent::Start {
                    name: "w:tr".to_string(),
                    attrs: row.attrs.clone(),
                });
                for rc in &row.children {
                    match rc {
                        RowChild::Cell(cell) => {
                            out.push(XmlEvent::Start {
                                name: "w:tc".to_string(),
                                attrs: cell.attrs.clone(),
                            });
                            write_blocks(&cell.blocks, out);
                            out.push(XmlEvent::end("w:tc"));
                        }
                        RowChild::Other(events) => out.extend(events.iter().cloned()),
                    }
                }
                out.push(XmlEvent::end("w:tr"));
            }
            TableChild::Other(events) => out.extend(events.iter().cloned()),
        }
    }
    out.push(XmlEvent::end("w:tbl"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::xml::{content_hash, parse_xml_part, write_events};

    const W_NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn story(body: &str) -> (XmlPart, Story) {
        let xml = format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {W_NS}><w:body>{body}</w:body></w:document>"#);
        let part = parse_xml_part("word/document.xml", xml.as_bytes()).expect("parse");
        let story = Story::from_part(&part, "w:body").expect("story");
        (part, story)
    }

    fn first_paragraph(story: &Story) -> &Paragraph {
        story
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::Paragraph(p) => Some(p),
                _ => None,
            })
            .expect("paragraph")
    }

    #[test]
    fn untouched_story_round_trips_exactly() {
        let (part, story) = story(concat!(
            r#"<w:p w:rsidR="00AB"><w:pPr><w:pStyle w:val="Title"/></w:pPr>"#,
            r#"<w:r><w:rPr><w:b/><w:highlight w:val="yellow"/><w:sz w:val="24"/></w:rPr><w:t xml:space="preserve">[CLIENTE] </w:t></w:r>"#,
            r#"<w:bookmarkStart w:id="0" w:name="x"/><w:r><w:t>a</w:t><w:tab/><w:br/><w:t/></w:r></w:p>"#,
            r#"<w:tbl><w:tblPr/><w:tr><w:tc><w:tcPr/><w:p/></w:tc></w:tr></w:tbl>"#,
            r#"<w:sectPr/>"#
        ));
        let events = story.to_events();
        assert_eq!(content_hash(&events), part.baseline_hash);
        assert_eq!(
            write_events(&events).expect("write"),
            write_events(&part.events).expect("write")
        );
    }

    #[test]
    fn run_text_includes_tabs_and_breaks() {
        let (_, story) = story(r#"<w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:br w:type="page"/><w:t>c</w:t></w:r></w:p>"#);
        assert_eq!(first_paragraph(&story).text(), "a\tb\nc");
    }

    #[test]
    fn highlight_is_read_and_cleared_in_place() {
        let (_, mut story) = story(r#"<w:p><w:r><w:rPr><w:b/><w:highlight w:val="yellow"/><w:sz w:val="24"/></w:rPr><w:t>X</w:t></w:r></w:p>"#);
        let Block::Paragraph(p) = &mut story.blocks[0] else {
            panic!("paragraph expected");
        };
        let mut content = p.content().to_vec();
        let Inline::Run(run) = &mut content[0] else {
            panic!("run expected");
        };
        assert_eq!(run.highlight(), Some("yellow"));
        run.clear_highlight();
        run.set_text("ACME");
        p.replace_content(content);

        let xml = String::from_utf8(write_events(&story.to_events()).expect("write")).expect("utf8");
        assert!(xml.contains(r#"<w:rPr><w:b/><w:sz w:val="24"/></w:rPr><w:t>ACME</w:t>"#));
        assert!(!xml.contains("w:highlight"));
    }

    #[test]
    fn highlight_none_is_not_a_highlight() {
        let (_, story) = story(r#"<w:p><w:r><w:rPr><w:highlight w:val="none"/></w:rPr><w:t>X</w:t></w:r><w:r><w:t>Y</w:t></w:r></w:p>"#);
        let p = first_paragraph(&story);
        assert!(p.runs().all(|r| r.highlight().is_none()));
    }

    #[test]
    fn set_text_splits_control_characters() {
        let mut run = Run::new(" lead\tmid\nend");
        assert_eq!(run.text(), " lead\tmid\nend");
        let mut out = Vec::new();
        run.write_events(&mut out);
        let xml = String::from_utf8(write_events(&out).expect("write")).expect("utf8");
        assert_eq!(
            xml,
            r#"<w:r><w:t xml:space="preserve"> lead</w:t><w:tab/><w:t>mid</w:t><w:br/><w:t>end</w:t></w:r>"#
        );
        run.set_text("");
        assert_eq!(run.text(), "");
    }

    #[test]
    fn empty_body_has_no_blocks() {
        let xml = format!(r#"<w:document {W_NS}><w:body/></w:document>"#);
        let part = parse_xml_part("word/document.xml", xml.as_bytes()).expect("parse");
        let story = Story::from_part(&part, "w:body").expect("story");
        assert!(story.blocks.is_empty());
        let out = String::from_utf8(write_events(&story.to_events()).expect("write")).expect("utf8");
        assert!(out.contains("<w:body></w:body>"));
    }

    #[test]
    fn missing_container_is_an_error() {
        let xml = format!(r#"<w:document {W_NS}></w:document>"#);
        let part = parse_xml_part("word/document.xml", xml.as_bytes()).expect("parse");
        assert!(Story::from_part(&part, "w:body").is_err());
    }

    #[test]
    fn absurd_table_nesting_is_rejected() {
        let depth = MAX_TABLE_DEPTH + 1;
        let mut body = String::new();
        for _ in 0..depth {
            body.push_str("<w:tbl><w:tr><w:tc>");
        }
        body.push_str("<w:p/>");
        for _ in 0..depth {
            body.push_str("</w:tc></w:tr></w:tbl>");
        }
        let xml = format!(r#"<w:document {W_NS}><w:body>{body}</w:body></w:document>"#);
        let part = parse_xml_part("word/document.xml", xml.as_bytes()).expect("parse");
        assert!(Story::from_part(&part, "w:body").is_err());
    }
}
