//! Unlock: remove password protection.
//!
//! The source is opened with the supplied password and its pages are copied
//! into a freshly created document, which carries no encryption dictionary.

use super::pdfium;
use crate::error::ToolError;
use crate::intake::StoredInput;
use std::path::{Path, PathBuf};
use tracing::info;

pub const OUTPUT_NAME: &str = "unlocked.pdf";

/// Treat a blank password as "no password" (owner-password-only files).
pub fn normalise_password(password: Option<&str>) -> Option<&str> {
    password.filter(|p| !p.is_empty())
}

/// Unlock `input` into `<work_dir>/unlocked.pdf`.
pub fn unlock(
    input: &StoredInput,
    password: Option<&str>,
    work_dir: &Path,
) -> Result<PathBuf, ToolError> {
    let pdfium = pdfium::bind()?;
    let source = pdfium::open(&pdfium, input, normalise_password(password)).map_err(|e| match e {
        ToolError::PasswordProtected { .. } => ToolError::IncorrectPassword,
        other => other,
    })?;

    let mut unlocked = pdfium
        .create_new_pdf()
        .map_err(|e| ToolError::Internal(format!("could not create document: {e:?}")))?;
    unlocked
        .pages_mut()
        .append(&source)
        .map_err(|e| ToolError::Internal(format!("page copy failed: {e:?}")))?;

    let out = work_dir.join(OUTPUT_NAME);
    unlocked
        .save_to_file(&out)
        .map_err(|e| ToolError::Internal(format!("failed to write {}: {e:?}", out.display())))?;

    info!(
        "Unlocked '{}' ({} pages)",
        input.original_name,
        unlocked.pages().len()
    );
    Ok(out)
}
