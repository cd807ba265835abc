//! pdfium access: binding, opening, rasterising, and text extraction.
//!
//! ## Threading
//!
//! pdfium keeps thread-local state and must not be driven from async tasks.
//! Tools that touch it run on the blocking pool; the one async caller
//! (handwriting) goes through [`render_file`], which does the hop.
//!
//! ## Render size
//!
//! `max_pixels` bounds the longest edge of every rendered page, whatever its
//! physical size. An A0 poster at 300 DPI would otherwise come out at
//! 9,900 × 14,000 px.

use super::checkpoint;
use crate::error::ToolError;
use crate::intake::StoredInput;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::tables::TextFragment;

/// Bind to the pdfium library, downloading it on first use.
pub fn bind() -> Result<Pdfium, ToolError> {
    pdfium_auto::bind_pdfium_silent().map_err(|e| ToolError::PdfiumUnavailable(e.to_string()))
}

/// Open an uploaded PDF.
///
/// Password failures are reported as [`ToolError::IncorrectPassword`] when a
/// password was supplied and as [`ToolError::PasswordProtected`] otherwise.
pub fn open<'a>(
    pdfium: &'a Pdfium,
    input: &StoredInput,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ToolError> {
    let document = pdfium
        .load_pdf_from_file(&input.path, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    ToolError::IncorrectPassword
                } else {
                    ToolError::PasswordProtected {
                        name: input.original_name.clone(),
                    }
                }
            } else {
                ToolError::CorruptPdf {
                    name: input.original_name.clone(),
                    detail: err_str,
                }
            }
        })?;

    if document.pages().len() == 0 {
        return Err(ToolError::EmptyDocument {
            name: input.original_name.clone(),
        });
    }
    info!(
        "PDF '{}' loaded: {} pages",
        input.original_name,
        document.pages().len()
    );
    Ok(document)
}

/// Rasterise every page at `dpi`, capped at `max_pixels` on either edge.
pub fn render_all(
    document: &PdfDocument,
    dpi: u32,
    max_pixels: u32,
    cancel: &CancellationToken,
) -> Result<Vec<DynamicImage>, ToolError> {
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        checkpoint(cancel)?;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ToolError::Internal(format!("rasterisation failed for page {}: {:?}", idx + 1, e))
        })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }
    Ok(images)
}

/// Bind, open and rasterise on the blocking pool.
pub async fn render_file(
    input: StoredInput,
    dpi: u32,
    max_pixels: u32,
    cancel: CancellationToken,
) -> Result<Vec<DynamicImage>, ToolError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = bind()?;
        let document = open(&pdfium, &input, None)?;
        render_all(&document, dpi, max_pixels, &cancel)
    })
    .await
    .map_err(|e| ToolError::Internal(format!("Render task panicked: {}", e)))?
}

/// Plain text of each page, in page order.
pub fn page_texts(
    document: &PdfDocument,
    cancel: &CancellationToken,
) -> Result<Vec<String>, ToolError> {
    document
        .pages()
        .iter()
        .enumerate()
        .map(|(idx, page)| {
            checkpoint(cancel)?;
            page.text().map(|t| t.all()).map_err(|e| {
                ToolError::Internal(format!("text extraction failed on page {}: {:?}", idx + 1, e))
            })
        })
        .collect()
}

/// Positioned text runs of each page, in page order.
#[allow(deprecated)]
pub fn page_fragments(
    document: &PdfDocument,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<TextFragment>>, ToolError> {
    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        checkpoint(cancel)?;
        let text = page.text().map_err(|e| {
            ToolError::Internal(format!("text extraction failed on page {}: {:?}", idx + 1, e))
        })?;
        let fragments = text
            .segments()
            .iter()
            .filter_map(|segment| {
                let content = segment.text();
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let bounds = segment.bounds();
                Some(TextFragment {
                    text: trimmed.to_string(),
                    left: bounds.left.value,
                    right: bounds.right.value,
                    top: bounds.top.value,
                    bottom: bounds.bottom.value,
                })
            })
            .collect();
        pages.push(fragments);
    }
    Ok(pages)
}
