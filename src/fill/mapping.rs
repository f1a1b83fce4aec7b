use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use super::placeholder::normalize_key;
use crate::docx::document::{Document, Scope};
use crate::error::{FillError, Result};

/// Caller-supplied field values, in insertion order.
///
/// Keys are kept as given; a value of `None` stands for a null and fills as
/// the empty string. Inserting an existing key replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldData {
    entries: Vec<(String, Option<String>)>,
}

impl FieldData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, Some(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Merges every member of a JSON object, coercing values to strings.
    pub fn extend_json_object(&mut self, obj: &serde_json::Map<String, Value>) {
        for (key, value) in obj {
            self.insert(key.clone(), json_to_field(value));
        }
    }

    /// Parses `text` as a JSON object and merges it.
    ///
    /// Anything other than an object is `InvalidAuxiliaryData` and leaves
    /// `self` untouched.
    pub fn merge_json_str(&mut self, text: &str) -> Result<usize> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FillError::InvalidAuxiliaryData(format!("invalid JSON: {e}")))?;
        let Value::Object(obj) = value else {
            return Err(FillError::InvalidAuxiliaryData(format!(
                "expected a JSON object such as {{\"KEY\": \"value\"}}, got {}",
                json_kind(&value)
            )));
        };
        self.extend_json_object(&obj);
        Ok(obj.len())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = Self::new();
        for (k, v) in iter {
            data.set(k, v);
        }
        data
    }
}

fn json_to_field(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Normalized key to replacement text, unique by key, in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Mapping {
    /// Normalizes every key; nulls become empty strings, and a later key that
    /// normalizes like an earlier one overwrites its value.
    pub fn from_data(data: &FieldData) -> Self {
        let mut mapping = Self::default();
        for (key, value) in data.iter() {
            mapping.insert(normalize_key(key), value.unwrap_or("").to_string());
        }
        mapping
    }

    fn insert(&mut self, key: String, value: String) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&i| self.entries[i].1.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Splits discovered labels into those backed by data and those without.
    ///
    /// Labels only confirm keys already in the mapping; they never add one.
    pub fn confirm_labels<'a>(&self, labels: &'a [String]) -> (Vec<String>, Vec<&'a str>) {
        let mut confirmed = Vec::new();
        let mut unmatched = Vec::new();
        for label in labels {
            let key = normalize_key(label);
            if self.contains_key(&key) {
                confirmed.push(key);
            } else {
                unmatched.push(label.as_str());
            }
        }
        (confirmed, unmatched)
    }
}

/// Raw text of highlighted runs in the body (tables included, headers and
/// footers not), first occurrence per normalized key.
pub fn discover_labels(doc: &Document) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for para in doc.paragraphs(Scope::Body) {
        for run in para.runs().filter(|r| r.highlight().is_some()) {
            let text = run.text();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let key = normalize_key(text);
            if !key.is_empty() && seen.insert(key) {
                labels.push(text.to_string());
            }
        }
    }
    debug!(labels = labels.len(), "discovered highlighted labels");
    labels
}
