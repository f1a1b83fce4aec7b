//! Lossless XML event model for package parts.

use std::io::Write;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

impl XmlEvent {
    pub fn start(name: &str, attrs: &[(&str, &str)]) -> Self {
        Self::Start {
            name: name.to_string(),
            attrs: owned_attrs(attrs),
        }
    }

    pub fn empty(name: &str, attrs: &[(&str, &str)]) -> Self {
        Self::Empty {
            name: name.to_string(),
            attrs: owned_attrs(attrs),
        }
    }

    pub fn end(name: &str) -> Self {
        Self::End {
            name: name.to_string(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Element name for `Start` and `Empty` events.
    pub fn element_name(&self) -> Option<&str> {
        match self {
            Self::Start { name, .. } | Self::Empty { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn attrs(&self) -> &[(String, String)] {
        match self {
            Self::Start { attrs, .. } | Self::Empty { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// Appends the event's markup. Attribute values are stored escaped and
    /// written verbatim; text is escaped here.
    fn write_into(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            Self::Decl {
                version,
                encoding,
                standalone,
            } => {
                write!(out, "<?xml version=\"{version}\"")?;
                if let Some(e) = encoding {
                    write!(out, " encoding=\"{e}\"")?;
                }
                if let Some(s) = standalone {
                    write!(out, " standalone=\"{s}\"")?;
                }
                out.extend_from_slice(b"?>");
            }
            Self::Start { name, attrs } | Self::Empty { name, attrs } => {
                write!(out, "<{name}")?;
                for (k, v) in attrs {
                    write!(out, " {k}=\"{v}\"")?;
                }
                if matches!(self, Self::Empty { .. }) {
                    out.extend_from_slice(b"/>");
                } else {
                    out.push(b'>');
                }
            }
            Self::End { name } => write!(out, "</{name}>")?,
            Self::Text { text } => {
                for ch in text.chars() {
                    match ch {
                        '&' => out.extend_from_slice(b"&amp;"),
                        '<' => out.extend_from_slice(b"&lt;"),
                        '>' => out.extend_from_slice(b"&gt;"),
                        _ => write!(out, "{ch}")?,
                    }
                }
            }
            Self::CData { text } => write!(out, "<![CDATA[{text}]]>")?,
            Self::Comment { text } => write!(out, "<!--{text}-->")?,
            Self::PI { content } => write!(out, "<?{content}?>")?,
            Self::DocType { text } => write!(out, "<!DOCTYPE{text}>")?,
        }
        Ok(())
    }
}

fn owned_attrs(attrs: &[(&str, &str)]) -> Vec<(String, String)> {
    attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One parsed XML part of the package.
#[derive(Clone)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
    /// Hash of the events as parsed; a part whose hash is unchanged is written back as-is.
    pub baseline_hash: String,
}

impl XmlPart {
    pub fn is_modified(&self) -> bool {
        content_hash(&self.events) != self.baseline_hash
    }
}

/// Parses `xml_bytes` into events, rejecting unbalanced markup and parts without a root element.
pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> anyhow::Result<XmlPart> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);

    let mut events = Vec::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let ev = reader
            .read_event_into(&mut buf)
            .with_context(|| format!("{name}: malformed XML near byte {}", reader.buffer_position()))?;
        let ev = match ev {
            Event::Eof => break,
            Event::Decl(d) => XmlEvent::Decl {
                version: lossy(d.version().context("xml declaration version")?),
                encoding: d.encoding().and_then(|r| r.ok()).map(lossy),
                standalone: d.standalone().and_then(|r| r.ok()).map(lossy),
            },
            Event::Start(s) => {
                depth += 1;
                XmlEvent::Start {
                    name: lossy(s.name().as_ref()),
                    attrs: raw_attrs(&s)?,
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                XmlEvent::End {
                    name: lossy(e.name().as_ref()),
                }
            }
            Event::Empty(s) => XmlEvent::Empty {
                name: lossy(s.name().as_ref()),
                attrs: raw_attrs(&s)?,
            },
            Event::Text(t) => XmlEvent::Text {
                text: t.unescape().context("unescape text")?.into_owned(),
            },
            Event::CData(t) => XmlEvent::CData {
                text: lossy(t.into_inner()),
            },
            Event::Comment(t) => XmlEvent::Comment {
                text: lossy(t.into_inner()),
            },
            Event::PI(t) => XmlEvent::PI {
                content: format!("{}{}", lossy(t.target()), lossy(t.content())),
            },
            Event::DocType(t) => XmlEvent::DocType {
                text: lossy(t.into_inner()),
            },
        };
        events.push(ev);
    }
    if depth > 0 {
        return Err(anyhow!("{name}: {depth} element(s) left unclosed"));
    }
    if !events.iter().any(|e| e.element_name().is_some()) {
        return Err(anyhow!("{name}: no root element"));
    }

    let baseline_hash = content_hash(&events);
    Ok(XmlPart {
        name: name.to_string(),
        events,
        baseline_hash,
    })
}

/// Attribute values stay escaped so character references survive a round-trip.
fn raw_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    s.attributes()
        .map(|a| {
            let a = a.context("malformed attribute")?;
            Ok((lossy(a.key.as_ref()), lossy(a.value.as_ref())))
        })
        .collect()
}

fn lossy(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

pub fn write_xml_part(part: &XmlPart) -> anyhow::Result<Vec<u8>> {
    write_events(&part.events)
}

pub fn write_events(events: &[XmlEvent]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    for ev in events {
        ev.write_into(&mut out).context("serialize xml event")?;
    }
    Ok(out)
}

/// Hash over the serialized events with each element's attributes sorted,
/// so reordering attributes alone does not count as a change.
pub fn content_hash(events: &[XmlEvent]) -> String {
    let mut hasher = Sha256::new();
    let mut scratch = Vec::new();
    for ev in events {
        scratch.clear();
        let sorted;
        let ev = match ev {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } if attrs.len() > 1 => {
                let mut attrs = attrs.clone();
                attrs.sort();
                sorted = if matches!(ev, XmlEvent::Start { .. }) {
                    XmlEvent::Start { name: name.clone(), attrs }
                } else {
                    XmlEvent::Empty { name: name.clone(), attrs }
                };
                &sorted
            }
            other => other,
        };
        // Writing into a Vec cannot fail.
        let _ = ev.write_into(&mut scratch);
        hasher.update((scratch.len() as u64).to_le_bytes());
        hasher.update(&scratch);
    }
    hex::encode(hasher.finalize())
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Escapes a string for use inside a double-quoted attribute value.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Index one past the event that closes the element opened at `start`.
///
/// Non-`Start` events are their own subtree.
pub fn subtree_end(events: &[XmlEvent], start: usize) -> anyhow::Result<usize> {
    if !matches!(events.get(start), Some(XmlEvent::Start { .. })) {
        return Ok(start + 1);
    }
    let mut depth = 0usize;
    for (i, ev) in events.iter().enumerate().skip(start) {
        match ev {
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
    }
    Err(anyhow!(
        "element <{}> at event {} is never closed",
        events[start].element_name().unwrap_or("?"),
        start
    ))
}
