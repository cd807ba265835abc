//! Split: cut one PDF into page groups.
//!
//! A range spec is a comma-separated list of 1-indexed, inclusive items:
//! `N` or `A-B`. Whitespace around items and dashes is ignored.
//!
//! Parsing is syntactic and happens before any scope exists; resolving the
//! groups against the real page count happens after the document is loaded:
//!
//! * range starts are raised to 1, range ends are lowered to the page count
//! * single pages beyond the document are dropped
//! * groups left empty are dropped, and if none remain the ranges are rejected
//!
//! One resulting group is returned as a PDF; several are bundled into a ZIP
//! whose entries are named `page_N.pdf` / `pages_A-B.pdf`.

use super::{checkpoint, load_structural, save_structural, PDF_MIME, ZIP_MIME};
use crate::error::ToolError;
use crate::intake::StoredInput;
use std::fs::File;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SINGLE_OUTPUT_NAME: &str = "split.pdf";
pub const ZIP_OUTPUT_NAME: &str = "split_pages.zip";

// ── Range spec ───────────────────────────────────────────────────────────────

/// One item of a range spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeItem {
    Page(u32),
    Span(u32, u32),
}

/// A parsed range spec, not yet checked against a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    raw: String,
    items: Vec<RangeItem>,
}

impl RangeSpec {
    /// Parse `"1-3,5,7-9"`.
    ///
    /// Empty specs, non-numeric items, page `0`, and reversed spans are
    /// client errors.
    pub fn parse(spec: &str) -> Result<Self, ToolError> {
        let invalid = |reason: String| ToolError::InvalidRanges {
            spec: spec.to_string(),
            reason,
        };

        if spec.trim().is_empty() {
            return Err(invalid("the range list is empty".into()));
        }

        let mut items = Vec::new();
        for raw in spec.split(',') {
            let part = raw.trim();
            if part.is_empty() {
                return Err(invalid("empty item between commas".into()));
            }
            let item = match part.split_once('-') {
                Some((a, b)) => {
                    let start = parse_page(a.trim()).map_err(&invalid)?;
                    let end = parse_page(b.trim()).map_err(&invalid)?;
                    if start > end {
                        return Err(invalid(format!("range {start}-{end} is reversed")));
                    }
                    RangeItem::Span(start, end)
                }
                None => RangeItem::Page(parse_page(part).map_err(&invalid)?),
            };
            items.push(item);
        }
        Ok(Self {
            raw: spec.trim().to_string(),
            items,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn items(&self) -> &[RangeItem] {
        &self.items
    }

    /// Resolve against a document with `page_count` pages.
    ///
    /// Repeated groups are kept once, in first-seen order.
    pub fn resolve(&self, page_count: u32) -> Vec<RangeInclusive<u32>> {
        let mut groups: Vec<RangeInclusive<u32>> = Vec::new();
        for item in &self.items {
            let (start, end) = match *item {
                RangeItem::Page(p) => (p, p),
                RangeItem::Span(a, b) => (a.max(1), b.min(page_count)),
            };
            if start > end || end > page_count {
                continue;
            }
            let group = start..=end;
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups
    }
}

fn parse_page(s: &str) -> Result<u32, String> {
    let n: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a page number"))?;
    if n == 0 {
        return Err("page numbers start at 1".into());
    }
    Ok(n)
}

/// Group name used inside the ZIP.
pub fn group_file_name(group: &RangeInclusive<u32>) -> String {
    if group.start() == group.end() {
        format!("page_{}.pdf", group.start())
    } else {
        format!("pages_{}-{}.pdf", group.start(), group.end())
    }
}

// ── Split ────────────────────────────────────────────────────────────────────

/// Result of a split: the file to send and its content type.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub download_name: &'static str,
    pub groups: usize,
}

/// Split `input` by `spec` (or one page per file when `None`).
pub fn split(
    input: &StoredInput,
    spec: Option<&RangeSpec>,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<SplitOutput, ToolError> {
    let source = load_structural(input)?;
    let page_count = source.get_pages().len() as u32;

    let groups: Vec<RangeInclusive<u32>> = match spec {
        Some(spec) => spec.resolve(page_count),
        None => (1..=page_count).map(|p| p..=p).collect(),
    };
    if groups.is_empty() {
        return Err(ToolError::InvalidRanges {
            spec: spec.map(|s| s.as_str().to_string()).unwrap_or_default(),
            reason: format!("no page in range for a {page_count}-page document"),
        });
    }
    debug!("Splitting {} pages into {} groups", page_count, groups.len());

    let parts_dir = work_dir.join("parts");
    std::fs::create_dir(&parts_dir).map_err(|e| ToolError::io(&parts_dir, e))?;

    let mut parts = Vec::with_capacity(groups.len());
    for group in &groups {
        checkpoint(cancel)?;
        let mut doc = source.clone();
        let unwanted: Vec<u32> = (1..=page_count).filter(|p| !group.contains(p)).collect();
        doc.delete_pages(&unwanted);
        doc.prune_objects();
        doc.renumber_objects();
        doc.compress();

        let path = parts_dir.join(group_file_name(group));
        save_structural(&mut doc, &path)?;
        parts.push(path);
    }

    if parts.len() == 1 {
        let out = work_dir.join(SINGLE_OUTPUT_NAME);
        std::fs::rename(&parts[0], &out).map_err(|e| ToolError::io(&out, e))?;
        info!("Split produced a single PDF");
        return Ok(SplitOutput {
            path: out,
            content_type: PDF_MIME,
            download_name: SINGLE_OUTPUT_NAME,
            groups: 1,
        });
    }

    checkpoint(cancel)?;
    let out = work_dir.join(ZIP_OUTPUT_NAME);
    write_zip(&parts, &out)?;
    info!("Split produced {} PDFs", parts.len());
    Ok(SplitOutput {
        path: out,
        content_type: ZIP_MIME,
        download_name: ZIP_OUTPUT_NAME,
        groups: parts.len(),
    })
}

fn write_zip(parts: &[PathBuf], out: &Path) -> Result<(), ToolError> {
    let file = File::create(out).map_err(|e| ToolError::io(out, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for part in parts {
        let name = part
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ToolError::Internal(format!("bad part name {}", part.display())))?;
        let bytes = std::fs::read(part).map_err(|e| ToolError::io(part, e))?;
        zip.start_file(name, options)
            .map_err(|e| ToolError::Internal(format!("zip entry {name}: {e}")))?;
        zip.write_all(&bytes).map_err(|e| ToolError::io(out, e))?;
    }
    zip.finish()
        .map_err(|e| ToolError::Internal(format!("zip finalise: {e}")))?;
    Ok(())
}
