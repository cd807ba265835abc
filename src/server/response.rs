//! Response rendering: JSON error payloads and scope-owning file bodies.

use crate::analytics::FileCount;
use crate::dispatch::Artifact;
use crate::error::{ErrorClass, ToolError};
use crate::session::SessionScope;
use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::error;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    pub code: &'static str,
}

/// A [`ToolError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError {
    error: ToolError,
    context: &'static str,
    files: usize,
}

impl ApiError {
    /// `context` names the operation in the generic message for unexpected errors.
    pub fn new(error: ToolError, context: &'static str) -> Self {
        Self {
            error,
            context,
            files: 0,
        }
    }

    pub fn with_files(mut self, files: usize) -> Self {
        self.files = files;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let detail = match self.error.class() {
            ErrorClass::Unexpected => {
                error!("{} failed: {}", self.context, self.error);
                format!("Internal server error during {}.", self.context)
            }
            _ => self.error.to_string(),
        };
        let body = ErrorBody {
            detail,
            code: self.error.code(),
        };
        (status, Extension(FileCount(self.files)), Json(body)).into_response()
    }
}

/// File stream that keeps its session scope alive.
///
/// The scope is dropped with the stream: after the last chunk, on a transport
/// error, or when the client goes away mid-download.
struct ScopedFileStream {
    inner: ReaderStream<File>,
    _scope: SessionScope,
}

impl Stream for ScopedFileStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// `200 OK` streaming the artifact as an attachment.
pub async fn artifact_response(artifact: Artifact, files: usize) -> Result<Response, ApiError> {
    let Artifact {
        scope,
        path,
        content_type,
        download_name,
    } = artifact;

    let context = "download";
    let file = File::open(&path)
        .await
        .map_err(|e| ApiError::new(ToolError::io(&path, e), context).with_files(files))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::new(ToolError::io(&path, e), context).with_files(files))?
        .len();

    let body = Body::from_stream(ScopedFileStream {
        inner: ReaderStream::new(file),
        _scope: scope,
    });

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
            (CONTENT_LENGTH, len.to_string()),
        ],
        Extension(FileCount(files)),
        body,
    )
        .into_response())
}
