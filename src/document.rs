use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::{ContextError, Result};
use crate::types::ContextDocument;

/// Compute SHA-256 content hash of a serialized document.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Reads and parses a context document, returning it together with the
/// content hash of the bytes that were read.
pub fn load_document(path: &Path) -> Result<(ContextDocument, String)> {
    let contents = fs::read_to_string(path).map_err(|e| ContextError::Document {
        message: format!("failed to read document: {}", e),
        path: path.to_path_buf(),
    })?;

    let document: ContextDocument =
        serde_json::from_str(&contents).map_err(|e| ContextError::Document {
            message: format!("failed to parse document: {}", e),
            path: path.to_path_buf(),
        })?;

    Ok((document, content_hash(&contents)))
}

/// Writes a context document, replacing whatever was at `path`.
///
/// The document is written to a temporary sibling first and then renamed
/// into place, so a reader sees either the previous file or the complete new
/// one.
pub fn write_document(path: &Path, document: &ContextDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ContextError::Document {
                message: format!("failed to create output directory: {}", e),
                path: path.to_path_buf(),
            })?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(document)?;

    fs::write(&tmp_path, json).map_err(|e| ContextError::Document {
        message: format!(
            "failed to write temporary document '{}': {}",
            tmp_path.display(),
            e
        ),
        path: path.to_path_buf(),
    })?;

    fs::rename(&tmp_path, path).map_err(|e| ContextError::Document {
        message: format!(
            "failed to rename temporary document '{}': {}",
            tmp_path.display(),
            e
        ),
        path: path.to_path_buf(),
    })?;

    Ok(())
}
