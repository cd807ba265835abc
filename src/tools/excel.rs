//! PDF → Excel: detected tables, one worksheet each.

use super::{checkpoint, pdfium};
use super::tables::{detect_tables, Table};
use crate::error::ToolError;
use crate::intake::StoredInput;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const OUTPUT_NAME: &str = "extracted.xlsx";

/// Excel's limit on worksheet name length.
const MAX_SHEET_NAME: usize = 31;

/// Worksheet grid limits.
const MAX_ROWS: u32 = 1_048_576;
const MAX_COLS: u16 = 16_384;

const INFO_SHEET: &str = "Info";
const NO_TABLES_ROWS: [&str; 2] = [
    "No tables were found in the PDF.",
    "Try a PDF that contains tabular data.",
];

/// Extract tables from `input` into `<work_dir>/extracted.xlsx`.
pub fn pdf_to_excel(
    input: &StoredInput,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    let pdfium = pdfium::bind()?;
    let document = pdfium::open(&pdfium, input, None)?;
    let pages: Vec<Vec<Table>> = pdfium::page_fragments(&document, cancel)?
        .into_iter()
        .map(detect_tables)
        .collect();

    checkpoint(cancel)?;
    let out = work_dir.join(OUTPUT_NAME);
    let tables = write_workbook(&pages, &out)?;
    info!("XLSX created with {} tables from '{}'", tables, input.original_name);
    Ok(out)
}

/// Sheet name for table `table_idx` (0-based) of page `page_no` (1-based).
pub fn sheet_name(page_no: usize, table_idx: usize) -> String {
    let mut name = format!("Page{page_no}");
    if table_idx > 0 {
        name.push_str(&format!("_T{}", table_idx + 1));
    }
    name.chars().take(MAX_SHEET_NAME).collect()
}

/// Write one sheet per table; an `Info` sheet when there are none.
/// Returns the number of tables written.
pub fn write_workbook(pages: &[Vec<Table>], out: &Path) -> Result<usize, ToolError> {
    write_workbook_inner(pages, out).map_err(|e| match e {
        XlsxError::IoError(io) => ToolError::io(out, io),
        other => ToolError::Internal(format!("XLSX write failed: {other}")),
    })
}

fn write_workbook_inner(pages: &[Vec<Table>], out: &Path) -> Result<usize, XlsxError> {
    let mut workbook = Workbook::new();
    let mut written = 0;

    for (page_idx, tables) in pages.iter().enumerate() {
        for (table_idx, table) in tables.iter().enumerate() {
            let sheet = workbook.add_worksheet();
            sheet.set_name(sheet_name(page_idx + 1, table_idx))?;
            write_rows(sheet, table)?;
            written += 1;
        }
    }

    if written == 0 {
        warn!("No tables found in the uploaded PDF");
        let sheet = workbook.add_worksheet();
        sheet.set_name(INFO_SHEET)?;
        for (row, text) in NO_TABLES_ROWS.iter().enumerate() {
            sheet.write_string(row as u32, 0, *text)?;
        }
    }

    workbook.save(out)?;
    Ok(written)
}

fn write_rows(sheet: &mut Worksheet, table: &Table) -> Result<(), XlsxError> {
    let widest = table.iter().map(Vec::len).max().unwrap_or(0);
    if table.len() > MAX_ROWS as usize || widest > MAX_COLS as usize {
        warn!(
            "Table of {}x{} cells clipped to {}x{}",
            table.len(),
            widest,
            MAX_ROWS,
            MAX_COLS
        );
    }
    for (r, row) in (0..MAX_ROWS).zip(table) {
        for (c, cell) in (0..MAX_COLS).zip(row) {
            match as_number(cell) {
                Some(n) => sheet.write_number(r, c, n)?,
                None => sheet.write_string(r, c, cell)?,
            };
        }
    }
    Ok(())
}

/// Numeric cells become numbers. Codes with a leading zero (`007`) stay text.
fn as_number(cell: &str) -> Option<f64> {
    let plain = cell.replace(',', "");
    let digits = plain.trim_start_matches('-');
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return None;
    }
    plain.parse::<f64>().ok().filter(|n| n.is_finite())
}
