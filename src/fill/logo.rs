use std::path::Path;

use tracing::{debug, info, warn};

use crate::docx::document::{Document, Scope};
use crate::docx::media::{probe_image, ImageInfo};
use crate::error::{FillError, Result};

pub const DEFAULT_LOGO_MARKER: &str = "[LOGO]";
pub const DEFAULT_LOGO_WIDTH_MM: f64 = 40.0;

#[derive(Clone, Debug)]
pub struct LogoOptions {
    pub marker: String,
    /// Target width; height follows the image's aspect ratio.
    pub width_mm: f64,
}

impl Default for LogoOptions {
    fn default() -> Self {
        Self {
            marker: DEFAULT_LOGO_MARKER.to_string(),
            width_mm: DEFAULT_LOGO_WIDTH_MM,
        }
    }
}

/// An image ready to be placed: raw bytes plus probed format and size.
#[derive(Clone, Debug)]
pub struct LogoImage {
    file_name: String,
    bytes: Vec<u8>,
    info: ImageInfo,
}

impl LogoImage {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "logo".to_string());
        Self::from_bytes(name, bytes)
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let file_name = file_name.into();
        let info = probe_image(&bytes)
            .map_err(|e| FillError::Image(format!("{file_name}: {e:#}")))?;
        Ok(Self {
            file_name,
            bytes,
            info,
        })
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }
}

/// Replaces the first paragraph whose text contains the marker with a single
/// picture run.
///
/// Paragraphs are searched body first (direct paragraphs, then tables), then
/// each section's header and footer. Returns `false` when no paragraph holds
/// the marker; only one paragraph is ever replaced.
pub fn insert_logo(doc: &mut Document, image: &LogoImage, opts: &LogoOptions) -> Result<bool> {
    if opts.marker.is_empty() {
        return Ok(false);
    }
    let Some((part, ordinal)) = find_marker(doc, &opts.marker) else {
        debug!(marker = %opts.marker, "logo marker not found");
        return Ok(false);
    };

    let extent = match image.info.scaled_to_width(opts.width_mm) {
        Ok(extent) => extent,
        Err(err) => {
            warn!(error = %err, "scaled logo size unusable, using natural size");
            image.info.natural()
        }
    };
    let run = doc
        .picture_run(&part, &image.bytes, &image.file_name, &image.info, extent)
        .map_err(FillError::format)?;

    let para = doc
        .story_mut(&part)
        .and_then(|story| story.paragraphs_mut().nth(ordinal));
    match para {
        Some(para) => para.replace_runs(vec![run]),
        None => return Ok(false),
    }
    info!(part = %part, cx = extent.cx, cy = extent.cy, "inserted logo");
    Ok(true)
}

/// Story part and walk position of the first paragraph containing `marker`.
fn find_marker(doc: &Document, marker: &str) -> Option<(String, usize)> {
    doc.story_order(Scope::WithHeadersFooters)
        .into_iter()
        .find_map(|name| {
            let story = doc.story(&name)?;
            let ordinal = story.paragraphs().position(|p| p.text().contains(marker))?;
            Some((name, ordinal))
        })
}
