//! Upload intake: validate incoming files and persist them into a scope.
//!
//! Uploads arrive fully buffered as [`Bytes`], so measuring a payload never
//! consumes it; every check can look at the same bytes the writer later
//! stores. The caller-supplied filename is used for exactly two things: the
//! extension check and the extension of the stored file. It never becomes
//! part of a storage path.

use crate::error::ToolError;
use crate::session::SessionScope;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Longest extension carried over to the stored name.
const MAX_EXTENSION_LEN: usize = 10;

/// One file received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Filename as sent by the client, if any.
    pub filename: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: Some(filename.into()),
            data: data.into(),
        }
    }

    /// Filename for messages; `"upload"` when the client sent none.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("upload")
    }
}

/// An upload written into a scope under a generated name.
#[derive(Debug, Clone)]
pub struct StoredInput {
    pub path: PathBuf,
    pub original_name: String,
}

/// Case-insensitive suffix match against an allow-list of extensions.
///
/// Allow-list entries are expected lowercase with a leading dot (the config
/// builder normalises them); entries without the dot are tolerated.
pub fn validate_extension(filename: &str, allow_list: &[String]) -> bool {
    let lower = filename.to_ascii_lowercase();
    allow_list.iter().any(|ext| {
        let ext = ext.to_ascii_lowercase();
        if ext.starts_with('.') {
            lower.ends_with(&ext)
        } else {
            lower.ends_with(&format!(".{ext}"))
        }
    })
}

/// Whether the payload fits within `max_bytes`.
pub fn validate_size(upload: &UploadedFile, max_bytes: u64) -> bool {
    upload.data.len() as u64 <= max_bytes
}

/// Run both checks, producing the client-facing error on failure.
pub fn check_upload(
    upload: &UploadedFile,
    allow_list: &[String],
    max_bytes: u64,
) -> Result<(), ToolError> {
    let name = upload.display_name();
    if !validate_extension(name, allow_list) {
        return Err(ToolError::InvalidExtension {
            filename: name.to_string(),
            allowed: allow_list.join(", "),
        });
    }
    if !validate_size(upload, max_bytes) {
        return Err(ToolError::FileTooLarge {
            filename: name.to_string(),
            limit_mb: (max_bytes / (1024 * 1024)).max(1),
        });
    }
    Ok(())
}

/// Write the payload under a fresh unique name inside `scope`.
pub async fn persist(upload: &UploadedFile, scope: &SessionScope) -> Result<StoredInput, ToolError> {
    let name = format!(
        "{}{}",
        Uuid::new_v4().simple(),
        extension_hint(upload.display_name())
    );
    let path = scope.resolve(&name)?;
    tokio::fs::write(&path, &upload.data)
        .await
        .map_err(|e| ToolError::io(&path, e))?;
    debug!(
        "Stored '{}' ({} bytes) as {}",
        upload.display_name(),
        upload.data.len(),
        name
    );
    Ok(StoredInput {
        path,
        original_name: upload.display_name().to_string(),
    })
}

/// Lowercased `.ext` of the client filename, or `""` if it has none usable.
fn extension_hint(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
