//! PDF → Word: extracted text, one paragraph per line.
//!
//! Layout is not reconstructed. Each PDF page becomes a run of paragraphs
//! followed by a hard page break; blank pages keep their break so page
//! numbering in the DOCX matches the source.

use super::{checkpoint, pdfium};
use crate::error::ToolError;
use crate::intake::StoredInput;
use docx_rs::{BreakType, Docx, Paragraph, Run};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const OUTPUT_NAME: &str = "converted.docx";

/// Convert `input` into `<work_dir>/converted.docx`.
pub fn pdf_to_word(
    input: &StoredInput,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    let pdfium = pdfium::bind()?;
    let document = pdfium::open(&pdfium, input, None)?;
    let pages = pdfium::page_texts(&document, cancel)?;

    checkpoint(cancel)?;
    let out = work_dir.join(OUTPUT_NAME);
    write_docx(&pages, &out)?;
    info!(
        "DOCX created from '{}' ({} pages)",
        input.original_name,
        pages.len()
    );
    Ok(out)
}

/// Write `pages` (plain text each) as a DOCX file.
pub fn write_docx(pages: &[String], out: &Path) -> Result<(), ToolError> {
    let mut docx = Docx::new();
    for (idx, text) in pages.iter().enumerate() {
        let mut lines = text.lines().map(str::trim_end).peekable();
        if lines.peek().is_none() {
            docx = docx.add_paragraph(Paragraph::new());
        }
        for line in lines {
            docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line)));
        }
        if idx + 1 < pages.len() {
            docx = docx
                .add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)));
        }
    }

    let file = File::create(out).map_err(|e| ToolError::io(out, e))?;
    docx.build()
        .pack(file)
        .map_err(|e| ToolError::Internal(format!("DOCX pack failed: {e}")))?;
    Ok(())
}
