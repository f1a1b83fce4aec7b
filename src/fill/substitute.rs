use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::logo::{insert_logo, LogoImage, LogoOptions};
use super::mapping::{discover_labels, FieldData, Mapping};
use super::placeholder::{normalize_key, token_forms};
use crate::docx::document::{Document, Scope};
use crate::docx::tree::{Inline, Paragraph};
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct FillOptions {
    /// Placed at the first logo marker before any text is replaced.
    pub logo: Option<LogoImage>,
    pub logo_options: LogoOptions,
}

/// Outcome of one fill.
#[derive(Clone, Debug)]
pub struct FillReport {
    pub bytes: Vec<u8>,
    /// Highlighted runs rewritten plus runs changed by token replacement.
    pub replacements: usize,
    /// Highlighted labels found in the body, as written.
    pub labels: Vec<String>,
    /// Normalized keys of labels that had data.
    pub confirmed_labels: Vec<String>,
    pub unmatched_labels: Vec<String>,
    pub logo_inserted: bool,
}

/// Fills `template` with `data` and returns the new package bytes.
pub fn fill_document_bytes(template: &[u8], data: &FieldData) -> Result<Vec<u8>> {
    Ok(fill_document_with(template, data, &FillOptions::default())?.bytes)
}

pub fn fill_document_with(template: &[u8], data: &FieldData, opts: &FillOptions) -> Result<FillReport> {
    let mut doc = Document::open(template)?;

    let logo_inserted = match &opts.logo {
        Some(image) => insert_logo(&mut doc, image, &opts.logo_options)?,
        None => false,
    };

    let labels = discover_labels(&doc);
    let mapping = Mapping::from_data(data);
    let (confirmed_labels, unmatched) = mapping.confirm_labels(&labels);
    let unmatched_labels: Vec<String> = unmatched.into_iter().map(str::to_string).collect();
    debug!(
        keys = mapping.len(),
        confirmed = confirmed_labels.len(),
        unmatched = unmatched_labels.len(),
        "built mapping"
    );

    let replacements = fill_document(&mut doc, &mapping);
    let bytes = doc.to_bytes()?;
    info!(replacements, logo = logo_inserted, "filled document");

    Ok(FillReport {
        bytes,
        replacements,
        labels,
        confirmed_labels,
        unmatched_labels,
        logo_inserted,
    })
}

/// Applies `mapping` to the body, tables, headers and footers of `doc`.
///
/// Each story is rewritten once even when several sections share it.
/// Returns the number of runs changed.
pub fn fill_document(doc: &mut Document, mapping: &Mapping) -> usize {
    let tokens = TokenTable::new(mapping);
    let mut done = HashSet::new();
    let mut replacements = 0;
    for name in doc.story_order(Scope::WithHeadersFooters) {
        if !done.insert(name.clone()) {
            continue;
        }
        let Some(story) = doc.story_mut(&name) else {
            continue;
        };
        let mut changed = 0;
        for para in story.paragraphs_mut() {
            changed += fill_paragraph(para, mapping, &tokens);
        }
        if changed > 0 {
            debug!(part = %name, runs = changed, "replaced placeholders");
        }
        replacements += changed;
    }
    replacements
}

/// Runs both passes on a copy of the paragraph content and swaps it in when
/// anything changed.
fn fill_paragraph(para: &mut Paragraph, mapping: &Mapping, tokens: &TokenTable) -> usize {
    let mut content = para.content().to_vec();
    let mut replacements = 0;

    for item in content.iter_mut() {
        let Inline::Run(run) = item else { continue };
        if run.highlight().is_none() {
            continue;
        }
        let text = run.text();
        let key = normalize_key(&text);
        if key.is_empty() {
            continue;
        }
        if let Some(value) = mapping.get(&key) {
            if text != value {
                run.set_text(value);
                run.clear_highlight();
                replacements += 1;
            }
        }
    }

    for item in content.iter_mut() {
        let Inline::Run(run) = item else { continue };
        if let Some(replaced) = tokens.replace(&run.text()) {
            run.set_text(&replaced);
            replacements += 1;
        }
    }

    if replacements > 0 {
        para.replace_content(content);
    }
    replacements
}

/// Every token spelling of every mapped key, longest first.
///
/// At each position the longest token wins, so `[CNPJ]` is consumed whole
/// rather than leaving the brackets around a replaced bare `CNPJ`.
/// Replacement text is never scanned again.
struct TokenTable {
    tokens: Vec<(String, String)>,
    first_chars: HashSet<char>,
}

impl TokenTable {
    fn new(mapping: &Mapping) -> Self {
        let mut values: HashMap<String, String> = HashMap::new();
        let mut order = Vec::new();
        for (key, value) in mapping.iter() {
            if key.is_empty() {
                continue;
            }
            for token in token_forms(key) {
                if !values.contains_key(&token) {
                    values.insert(token.clone(), value.to_string());
                    order.push(token);
                }
            }
        }
        // Stable: equal lengths keep mapping order.
        order.sort_by(|a, b| b.len().cmp(&a.len()));
        let tokens: Vec<(String, String)> = order
            .into_iter()
            .map(|t| {
                let v = values.remove(&t).unwrap_or_default();
                (t, v)
            })
            .collect();
        let first_chars = tokens.iter().filter_map(|(t, _)| t.chars().next()).collect();
        Self {
            tokens,
            first_chars,
        }
    }

    fn replace(&self, text: &str) -> Option<String> {
        if self.tokens.is_empty() || text.is_empty() {
            return None;
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut changed = false;
        for (i, c) in text.char_indices() {
            if i < last || !self.first_chars.contains(&c) {
                continue;
            }
            let rest = &text[i..];
            if let Some((token, value)) = self.tokens.iter().find(|(t, _)| rest.starts_with(t.as_str())) {
                out.push_str(&text[last..i]);
                out.push_str(value);
                last = i + token.len();
                changed = true;
            }
        }
        if !changed {
            return None;
        }
        out.push_str(&text[last..]);
        Some(out)
    }
}
