//! Everything around a fill that a front-end has to decide: which values
//! go in, which template is used, and what the result is called.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, TimeZone};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{FillError, Result};
use crate::fill::FieldData;

const MAX_CLIENT_CHARS: usize = 40;

/// Field sources, applied in order: data file, `KEY=VALUE` pairs, extra JSON.
/// A later source overwrites an earlier value for the same key.
#[derive(Clone, Debug, Default)]
pub struct FormInput {
    pub data_file: Option<PathBuf>,
    pub assignments: Vec<String>,
    /// Optional extra fields as a JSON object; anything else is ignored with a warning.
    pub extra_json: Option<String>,
    /// Give every configured form field a value, empty when not supplied.
    pub blank_missing: bool,
}

#[derive(Debug, Default)]
pub struct CollectedFields {
    pub data: FieldData,
    /// Recoverable problems, e.g. extra JSON that was not an object.
    pub warnings: Vec<FillError>,
}

impl FormInput {
    pub fn collect(&self, settings: &Settings) -> anyhow::Result<CollectedFields> {
        let mut data = FieldData::new();
        if self.blank_missing {
            for field in &settings.form_fields {
                data.set(field.clone(), "");
            }
        }

        if let Some(path) = &self.data_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read data file: {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parse data file: {}", path.display()))?;
            let obj = value
                .as_object()
                .ok_or_else(|| anyhow!("data file must hold a JSON object: {}", path.display()))?;
            data.extend_json_object(obj);
        }

        for raw in &self.assignments {
            let (key, value) = parse_assignment(raw)?;
            data.set(key, value);
        }

        let mut warnings = Vec::new();
        if let Some(extra) = self.extra_json.as_deref().filter(|s| !s.trim().is_empty()) {
            match data.merge_json_str(extra) {
                Ok(n) => debug!(fields = n, "merged extra fields"),
                Err(err) => {
                    warn!(error = %err, "ignoring extra fields");
                    warnings.push(err);
                }
            }
        }
        Ok(CollectedFields { data, warnings })
    }
}

/// Splits `KEY=VALUE` at the first `=`; the value may be empty.
pub fn parse_assignment(raw: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// The template to fill: the explicit one, else the configured default.
pub fn resolve_template(explicit: Option<&Path>, settings: &Settings) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    match &settings.default_template {
        Some(path) if path.is_file() => Ok(path.clone()),
        other => Err(FillError::MissingTemplate {
            searched: other.clone(),
        }),
    }
}

/// Client name reduced to a file-name-safe ASCII fragment.
pub fn sanitize_client(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_');
    let cut: String = out.chars().take(MAX_CLIENT_CHARS).collect();
    cut.trim_end_matches('_').to_string()
}

/// `<prefix>_<client>_<YYYYMMDD_HHMMSS>.docx`; the client part is dropped when empty.
pub fn output_file_name<Tz: TimeZone>(prefix: &str, client: Option<&str>, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let stamp = now.format("%Y%m%d_%H%M%S");
    let client = client.map(sanitize_client).unwrap_or_default();
    if client.is_empty() {
        format!("{prefix}_{stamp}.docx")
    } else {
        format!("{prefix}_{client}_{stamp}.docx")
    }
}
