//! Model File Validation
//!
//! Rejects model files that are missing, truncated, or not GGUF at all
//! (typically an HTML error page saved by a failed download).

use std::io::Read;
use std::path::{Path, PathBuf};

use advisor_core::{AdvisorError, Result};

/// Smallest plausible size for a quantized 8B model
pub const MIN_MODEL_BYTES: u64 = 1024 * 1024 * 1024;

/// GGUF file magic
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

const HEADER_PROBE_BYTES: usize = 1024;

/// What validation learned about the file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelFileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub gguf_version: u32,
}

/// Validate a model file with the default size floor
pub fn validate_model_file(path: &Path) -> Result<ModelFileInfo> {
    validate_model_file_with_min(path, MIN_MODEL_BYTES)
}

/// Validate a model file against a custom size floor
pub fn validate_model_file_with_min(path: &Path, min_bytes: u64) -> Result<ModelFileInfo> {
    if !path.is_file() {
        return Err(invalid(format!("Model file not found at: {}", path.display())));
    }

    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Err(invalid(format!("Model file is empty: {}", path.display())));
    }
    if size < min_bytes {
        return Err(invalid(format!(
            "Model file appears to be too small ({:.2} GB, expected at least {:.2} GB). File may be corrupted or incomplete: {}",
            gib(size),
            gib(min_bytes),
            path.display()
        )));
    }

    let mut header = Vec::with_capacity(HEADER_PROBE_BYTES);
    std::fs::File::open(path)?
        .take(HEADER_PROBE_BYTES as u64)
        .read_to_end(&mut header)?;

    if looks_like_markup(&header) {
        return Err(invalid(format!(
            "The file appears to be an HTML/XML page, not a GGUF model. The download URL is probably wrong: {}",
            path.display()
        )));
    }

    let gguf_version = gguf_version(&header).ok_or_else(|| {
        invalid(format!(
            "File does not appear to be a valid GGUF file (header: {}): {}",
            hex_prefix(&header),
            path.display()
        ))
    })?;

    Ok(ModelFileInfo {
        path: path.to_path_buf(),
        size,
        gguf_version,
    })
}

/// Version field following the GGUF magic, if present
pub fn gguf_version(header: &[u8]) -> Option<u32> {
    let rest = header.strip_prefix(GGUF_MAGIC.as_slice())?;
    let bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn looks_like_markup(header: &[u8]) -> bool {
    let text = String::from_utf8_lossy(header);
    let start = text.trim_start().to_ascii_lowercase();
    start.starts_with("<!doctype")
        || start.starts_with("<html")
        || (header.get(..4) != Some(GGUF_MAGIC.as_slice()) && text.contains('<') && text.contains('>'))
}

fn hex_prefix(header: &[u8]) -> String {
    header
        .iter()
        .take(16)
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[allow(clippy::cast_precision_loss)]
fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn invalid(message: String) -> AdvisorError {
    AdvisorError::Initialization(message)
}
