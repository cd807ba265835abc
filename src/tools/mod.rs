//! Conversion tools.
//!
//! Each submodule is one stateless conversion: saved input path(s) plus a
//! work directory in, one output file path out. The tools do not know about
//! HTTP, scopes or analytics; the dispatcher wires them up.
//!
//! | Tool                 | Engine                     | Blocking |
//! |----------------------|----------------------------|----------|
//! | `image-to-pdf`       | `image` + `lopdf`          | yes      |
//! | `merge-pdf`          | `lopdf`                    | yes      |
//! | `split-pdf`          | `lopdf` + `zip`            | yes      |
//! | `compress-pdf`       | `lopdf` + `image`          | yes      |
//! | `unlock-pdf`         | pdfium                     | yes      |
//! | `pdf-to-word`        | pdfium + `docx-rs`         | yes      |
//! | `pdf-to-excel`       | pdfium + `rust_xlsxwriter` | yes      |
//! | `pdf-to-ppt`         | pdfium + `zip`             | yes      |
//! | `handwriting-to-pdf` | pdfium + vision LLM + LaTeX| async    |
//!
//! Tools that walk pages or inputs take a [`CancellationToken`] and call
//! [`checkpoint`] between items, so a timed-out request stops writing into
//! its work directory at the next page boundary.

pub mod compress;
pub mod excel;
pub mod handwriting;
pub mod images;
pub mod latex;
pub mod merge;
pub mod pdfium;
pub mod slides;
pub mod split;
pub mod tables;
pub mod unlock;
pub mod word;

use crate::error::ToolError;
use crate::intake::StoredInput;
use lopdf::Document;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tokio_util::sync::CancellationToken;

// ── Content types ────────────────────────────────────────────────────────────

pub const PDF_MIME: &str = "application/pdf";
pub const ZIP_MIME: &str = "application/zip";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// The nine conversion endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    ImageToPdf,
    MergePdf,
    SplitPdf,
    CompressPdf,
    UnlockPdf,
    PdfToWord,
    PdfToExcel,
    PdfToPpt,
    HandwritingToPdf,
}

impl Tool {
    pub const ALL: [Tool; 9] = [
        Tool::ImageToPdf,
        Tool::MergePdf,
        Tool::SplitPdf,
        Tool::CompressPdf,
        Tool::UnlockPdf,
        Tool::PdfToWord,
        Tool::PdfToExcel,
        Tool::PdfToPpt,
        Tool::HandwritingToPdf,
    ];

    /// Name recorded in analytics.
    pub fn name(self) -> &'static str {
        match self {
            Tool::ImageToPdf => "image-to-pdf",
            Tool::MergePdf => "merge-pdf",
            Tool::SplitPdf => "split-pdf",
            Tool::CompressPdf => "compress-pdf",
            Tool::UnlockPdf => "unlock-pdf",
            Tool::PdfToWord => "pdf-to-word",
            Tool::PdfToExcel => "pdf-to-excel",
            Tool::PdfToPpt => "pdf-to-ppt",
            Tool::HandwritingToPdf => "handwriting-to-pdf",
        }
    }

    /// HTTP route serving this tool.
    pub fn route(self) -> &'static str {
        match self {
            Tool::ImageToPdf => "/api/convert",
            Tool::MergePdf => "/api/merge",
            Tool::SplitPdf => "/api/split",
            Tool::CompressPdf => "/api/compress",
            Tool::UnlockPdf => "/api/unlock",
            Tool::PdfToWord => "/api/pdf-to-word",
            Tool::PdfToExcel => "/api/pdf-to-excel",
            Tool::PdfToPpt => "/api/pdf-to-ppt",
            Tool::HandwritingToPdf => "/api/handwriting",
        }
    }

    pub fn from_route(path: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.route() == path)
    }

    /// Minimum and maximum number of input files.
    pub fn input_bounds(self) -> (usize, Option<usize>) {
        match self {
            Tool::ImageToPdf => (1, None),
            Tool::MergePdf => (2, None),
            _ => (1, Some(1)),
        }
    }

    /// Whether inputs are images (all other tools take PDFs).
    pub fn takes_images(self) -> bool {
        matches!(self, Tool::ImageToPdf)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stop with [`ToolError::Cancelled`] once `cancel` has fired.
pub fn checkpoint(cancel: &CancellationToken) -> Result<(), ToolError> {
    if cancel.is_cancelled() {
        Err(ToolError::Cancelled)
    } else {
        Ok(())
    }
}

// ── lopdf helpers ────────────────────────────────────────────────────────────

/// Load an uploaded PDF for object-level editing.
///
/// Encrypted documents are refused: object-level edits on them would write
/// out streams that no longer match the encryption dictionary.
pub(crate) fn load_structural(input: &StoredInput) -> Result<Document, ToolError> {
    let doc = Document::load(&input.path).map_err(|e| {
        let detail = e.to_string();
        if detail.to_ascii_lowercase().contains("crypt") {
            ToolError::PasswordProtected {
                name: input.original_name.clone(),
            }
        } else {
            ToolError::CorruptPdf {
                name: input.original_name.clone(),
                detail,
            }
        }
    })?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(ToolError::PasswordProtected {
            name: input.original_name.clone(),
        });
    }
    if doc.get_pages().is_empty() {
        return Err(ToolError::EmptyDocument {
            name: input.original_name.clone(),
        });
    }
    Ok(doc)
}

/// Save a document, mapping failures to an I/O error on `path`.
pub(crate) fn save_structural(doc: &mut Document, path: &Path) -> Result<(), ToolError> {
    doc.save(path).map(|_| ()).map_err(|e| ToolError::io(path, e))
}
