use std::path::PathBuf;

/// Failures surfaced by the document filler.
#[derive(Debug, thiserror::Error)]
pub enum FillError {
    /// The input bytes are not a readable DOCX package.
    #[error("not a valid document package: {0}")]
    DocumentFormat(String),

    /// Auxiliary key/value data was not a flat string-keyed object.
    #[error("invalid auxiliary data: {0}")]
    InvalidAuxiliaryData(String),

    #[error("no template supplied and no default template available{}; pass a .docx template or set [template] default_path in docfill.toml", .searched.as_ref().map(|p| format!(" (looked for {})", p.display())).unwrap_or_default())]
    MissingTemplate { searched: Option<PathBuf> },

    #[error("unsupported logo image: {0}")]
    Image(String),

    #[error("failed to write document package: {0}")]
    Write(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FillError {
    pub(crate) fn format(err: anyhow::Error) -> Self {
        Self::DocumentFormat(format!("{err:#}"))
    }

    pub(crate) fn write(err: anyhow::Error) -> Self {
        Self::Write(format!("{err:#}"))
    }
}

pub type Result<T, E = FillError> = std::result::Result<T, E>;
