//! Route handlers.
//!
//! Every tool endpoint follows the same shape: read the multipart form, build
//! a [`ToolRequest`] from the tool and its text fields, hand it to the
//! dispatcher, stream the artifact back.

use super::response::{artifact_response, ApiError, ErrorBody};
use super::AppState;
use crate::dispatch::ToolRequest;
use crate::error::ToolError;
use crate::intake::UploadedFile;
use crate::tools::Tool;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// Part names carrying uploads. Batch tools send `files`, single-file tools `file`.
const FILE_FIELDS: &[&str] = &["files", "file"];

/// Parsed multipart form.
#[derive(Debug, Default)]
pub struct ToolForm {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl ToolForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ToolError> {
        let mut form = ToolForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ToolError::MalformedUpload(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if FILE_FIELDS.contains(&name.as_str()) {
                let filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ToolError::MalformedUpload(e.body_text()))?;
                // Browsers send an empty, unnamed part when nothing was picked.
                if data.is_empty() && filename.as_deref().map_or(true, str::is_empty) {
                    continue;
                }
                form.files.push(UploadedFile { filename, data });
            } else if !name.is_empty() {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ToolError::MalformedUpload(e.body_text()))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn take(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    /// Pair the form's text fields with `tool`.
    pub fn request_for(&mut self, tool: Tool) -> ToolRequest {
        match tool {
            Tool::ImageToPdf => ToolRequest::ImageToPdf {
                page_size: self.take("page_size"),
            },
            Tool::MergePdf => ToolRequest::MergePdf,
            Tool::SplitPdf => ToolRequest::SplitPdf {
                ranges: self.take("ranges"),
            },
            Tool::CompressPdf => ToolRequest::CompressPdf {
                quality: self.take("quality"),
            },
            Tool::UnlockPdf => ToolRequest::UnlockPdf {
                password: self.take("password"),
            },
            Tool::PdfToWord => ToolRequest::PdfToWord,
            Tool::PdfToExcel => ToolRequest::PdfToExcel,
            Tool::PdfToPpt => ToolRequest::PdfToPpt,
            Tool::HandwritingToPdf => ToolRequest::HandwritingToPdf,
        }
    }
}

async fn run_tool(
    state: &AppState,
    tool: Tool,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => {
            return ApiError::new(ToolError::MalformedUpload(rejection.body_text()), tool.name())
                .into_response()
        }
    };
    let mut form = match ToolForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => return ApiError::new(e, tool.name()).into_response(),
    };
    let files = form.files.len();
    let request = form.request_for(tool);
    debug!("{}: {} file(s), request {:?}", tool, files, request);

    let artifact = match state.dispatcher.run(request, form.files).await {
        Ok(artifact) => artifact,
        Err(e) => return ApiError::new(e, tool.name()).with_files(files).into_response(),
    };
    match artifact_response(artifact, files).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

macro_rules! tool_handler {
    ($name:ident, $tool:expr) => {
        pub async fn $name(
            State(state): State<AppState>,
            multipart: Result<Multipart, MultipartRejection>,
        ) -> Response {
            run_tool(&state, $tool, multipart).await
        }
    };
}

tool_handler!(image_to_pdf, Tool::ImageToPdf);
tool_handler!(merge_pdf, Tool::MergePdf);
tool_handler!(split_pdf, Tool::SplitPdf);
tool_handler!(compress_pdf, Tool::CompressPdf);
tool_handler!(unlock_pdf, Tool::UnlockPdf);
tool_handler!(pdf_to_word, Tool::PdfToWord);
tool_handler!(pdf_to_excel, Tool::PdfToExcel);
tool_handler!(pdf_to_ppt, Tool::PdfToPpt);
tool_handler!(handwriting_to_pdf, Tool::HandwritingToPdf);

/// Liveness.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "edgequake-pdftools",
    }))
}

pub async fn not_found() -> Response {
    let body = ErrorBody {
        detail: "Not Found".to_string(),
        code: "not_found",
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Aggregate usage snapshot.
pub async fn analytics(State(state): State<AppState>) -> Response {
    match state.tracker.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => ApiError::new(e, "analytics").into_response(),
    }
}
