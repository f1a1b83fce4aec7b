use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::fill::logo::{DEFAULT_LOGO_MARKER, DEFAULT_LOGO_WIDTH_MM};

pub const CONFIG_FILENAME: &str = "docfill.toml";
pub const CONFIG_ENV: &str = "DOCFILL_CONFIG";

pub const DEFAULT_FORM_FIELDS: [&str; 9] = [
    "CLIENTE",
    "CNPJ",
    "ENDERECO",
    "CONTRATO_TIPO",
    "CONTRATO_OBJETIVO",
    "FORO_CIDADE",
    "DATA_DIA",
    "DATA_MES",
    "DATA_ANO",
];

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub template: TemplateSection,
    #[serde(default)]
    pub logo: LogoSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub form: FormSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TemplateSection {
    /// Used when no template is given on the command line.
    /// Relative paths resolve against the config file directory.
    #[serde(default)]
    pub default_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LogoSection {
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub width_mm: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct OutputSection {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub filename_prefix: Option<String>,
    /// Field whose value goes into the output file name.
    #[serde(default)]
    pub client_field: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct FormSection {
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// Config values with defaults applied; relative paths anchored at the config directory.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub default_template: Option<PathBuf>,
    pub logo_marker: String,
    pub logo_width_mm: f64,
    pub output_dir: PathBuf,
    pub filename_prefix: String,
    pub client_field: String,
    pub form_fields: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(&AppConfig::default(), None)
    }
}

impl Settings {
    pub fn resolve(cfg: &AppConfig, config_path: Option<&Path>) -> Self {
        let base = config_path
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let anchor = |p: &Path| -> PathBuf {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        let non_empty = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            config_path: config_path.map(Path::to_path_buf),
            default_template: cfg.template.default_path.as_deref().map(&anchor),
            logo_marker: non_empty(&cfg.logo.marker).unwrap_or_else(|| DEFAULT_LOGO_MARKER.to_string()),
            logo_width_mm: cfg.logo.width_mm.unwrap_or(DEFAULT_LOGO_WIDTH_MM),
            output_dir: cfg
                .output
                .dir
                .as_deref()
                .map(&anchor)
                .unwrap_or_else(|| PathBuf::from(".")),
            filename_prefix: non_empty(&cfg.output.filename_prefix)
                .unwrap_or_else(|| "documento_preenchido".to_string()),
            client_field: non_empty(&cfg.output.client_field).unwrap_or_else(|| "CLIENTE".to_string()),
            form_fields: cfg
                .form
                .fields
                .clone()
                .unwrap_or_else(|| DEFAULT_FORM_FIELDS.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Loads the explicit config, else the `DOCFILL_CONFIG` one, else the
    /// first `docfill.toml` found upwards; no file at all means defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) if !p.is_empty() => Some(PathBuf::from(p)),
                _ => find_default_config(CONFIG_FILENAME),
            },
        };
        match path {
            Some(path) => {
                let cfg = load_config(&path)?;
                tracing::debug!(config = %path.display(), "loaded config");
                Ok(Self::resolve(&cfg, Some(&path)))
            }
            None => Ok(Self::default()),
        }
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 8) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

const DEFAULT_CONFIG_TOML: &str = r#"[template]
# Template used when none is given on the command line (relative to this file).
# default_path = "modelo.docx"

[logo]
marker = "[LOGO]"
width_mm = 40.0

[output]
dir = "."
filename_prefix = "documento_preenchido"
client_field = "CLIENTE"

[form]
fields = [
  "CLIENTE",
  "CNPJ",
  "ENDERECO",
  "CONTRATO_TIPO",
  "CONTRATO_OBJETIVO",
  "FORO_CIDADE",
  "DATA_DIA",
  "DATA_MES",
  "DATA_ANO",
]
"#;

/// Writes `docfill.toml` into `dir`; an existing file is kept unless `force`.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
