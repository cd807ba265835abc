//! Error types for the edgequake-pdftools service.
//!
//! Every failure a conversion can hit is a variant of [`ToolError`]. Each
//! variant belongs to exactly one [`ErrorClass`], and the class alone decides
//! the HTTP status:
//!
//! | Class            | Status | Meaning                                          |
//! |------------------|--------|--------------------------------------------------|
//! | `ClientInput`    | 400    | the request itself is malformed                  |
//! | `Unprocessable`  | 422    | the document was recognised but cannot be used   |
//! | `Configuration`  | 500    | a required engine, key, or compiler is missing   |
//! | `Unexpected`     | 500    | anything else; detail is logged, never returned  |
//!
//! The transport layer picks the status code and the user-visible message
//! from the error alone, without knowing which tool ran.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classification driving the HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientInput,
    Unprocessable,
    Configuration,
    Unexpected,
}

impl ErrorClass {
    /// HTTP status code for this class.
    pub fn status(self) -> u16 {
        match self {
            ErrorClass::ClientInput => 400,
            ErrorClass::Unprocessable => 422,
            ErrorClass::Configuration | ErrorClass::Unexpected => 500,
        }
    }
}

/// All errors returned by the conversion service.
#[derive(Debug, Error)]
pub enum ToolError {
    // ── Client input ──────────────────────────────────────────────────────
    /// The request carried no file at all.
    #[error("No files provided.")]
    NoFiles,

    /// The tool needs more inputs than were supplied (merge needs two).
    #[error("Please upload at least {min} files (got {got}).")]
    TooFewFiles { min: usize, got: usize },

    /// The tool takes a single input but several were supplied.
    #[error("This tool accepts exactly {max} file (got {got}).")]
    TooManyFiles { max: usize, got: usize },

    /// Upload filename does not end with an allowed extension.
    #[error("Invalid file type: '{filename}'. Allowed: {allowed}")]
    InvalidExtension { filename: String, allowed: String },

    /// Upload exceeds the configured size limit.
    #[error("File '{filename}' exceeds the {limit_mb} MB size limit.")]
    FileTooLarge { filename: String, limit_mb: u64 },

    /// Split range specification could not be parsed or selects nothing.
    #[error("Invalid page ranges '{spec}': {reason}\nUse a form like: 1-3,5,7-9")]
    InvalidRanges { spec: String, reason: String },

    /// A name resolved inside a session scope tried to escape it.
    #[error("Invalid file name '{name}': path components are not allowed.")]
    PathTraversal { name: String },

    /// The multipart body could not be parsed.
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    // ── Unprocessable document ────────────────────────────────────────────
    /// PDF structure could not be parsed.
    #[error("Could not read PDF '{name}'. The file may be corrupted or not a valid PDF.")]
    CorruptPdf { name: String, detail: String },

    /// Image payload could not be decoded.
    #[error("Could not read image '{name}'. The file may be corrupted or in an unsupported format.")]
    UnreadableImage { name: String, detail: String },

    /// The supplied password does not open the document.
    #[error("Incorrect password. Please provide the correct password to unlock this PDF.")]
    IncorrectPassword,

    /// The document is encrypted and this tool cannot work on it.
    #[error("PDF '{name}' is password protected.\nRemove the password with the unlock tool first.")]
    PasswordProtected { name: String },

    /// The document has no pages to work on.
    #[error("PDF '{name}' contains no pages.")]
    EmptyDocument { name: String },

    /// The LaTeX compiler ran but produced no PDF.
    #[error("LaTeX compilation failed. The extracted content may contain invalid LaTeX.\n{log_tail}")]
    CompileFailed { log_tail: String },

    // ── Configuration ─────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and restart the service.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumUnavailable(String),

    /// The vision provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LaTeX compiler binary is not on PATH.
    #[error(
        "LaTeX compiler '{compiler}' is not installed.\n\
Install a TeX distribution (e.g. texlive-latex-base) or set PDFTOOLS_LATEX_COMPILER."
    )]
    CompilerMissing { compiler: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Unexpected ────────────────────────────────────────────────────────
    /// Filesystem failure (unwritable root, disk full, ...).
    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The conversion step exceeded its deadline.
    #[error("Conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A tool stopped at a checkpoint because its request was abandoned.
    #[error("Conversion cancelled")]
    Cancelled,

    /// Analytics storage failure. Never surfaces from a conversion endpoint.
    #[error("Analytics store error: {0}")]
    Analytics(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Classification used for status mapping and message redaction.
    pub fn class(&self) -> ErrorClass {
        match self {
            ToolError::NoFiles
            | ToolError::TooFewFiles { .. }
            | ToolError::TooManyFiles { .. }
            | ToolError::InvalidExtension { .. }
            | ToolError::FileTooLarge { .. }
            | ToolError::InvalidRanges { .. }
            | ToolError::PathTraversal { .. }
            | ToolError::MalformedUpload(_) => ErrorClass::ClientInput,

            ToolError::CorruptPdf { .. }
            | ToolError::UnreadableImage { .. }
            | ToolError::IncorrectPassword
            | ToolError::PasswordProtected { .. }
            | ToolError::EmptyDocument { .. }
            | ToolError::CompileFailed { .. } => ErrorClass::Unprocessable,

            ToolError::PdfiumUnavailable(_)
            | ToolError::ProviderNotConfigured { .. }
            | ToolError::CompilerMissing { .. }
            | ToolError::InvalidConfig(_) => ErrorClass::Configuration,

            ToolError::Io { .. }
            | ToolError::Timeout { .. }
            | ToolError::Cancelled
            | ToolError::Analytics(_)
            | ToolError::Internal(_) => ErrorClass::Unexpected,
        }
    }

    /// Stable machine-readable code for the error payload.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NoFiles => "no_files",
            ToolError::TooFewFiles { .. } => "too_few_files",
            ToolError::TooManyFiles { .. } => "too_many_files",
            ToolError::InvalidExtension { .. } => "invalid_extension",
            ToolError::FileTooLarge { .. } => "file_too_large",
            ToolError::InvalidRanges { .. } => "invalid_ranges",
            ToolError::PathTraversal { .. } => "path_traversal",
            ToolError::MalformedUpload(_) => "malformed_upload",
            ToolError::CorruptPdf { .. } => "corrupt_pdf",
            ToolError::UnreadableImage { .. } => "unreadable_image",
            ToolError::IncorrectPassword => "incorrect_password",
            ToolError::PasswordProtected { .. } => "password_protected",
            ToolError::EmptyDocument { .. } => "empty_document",
            ToolError::CompileFailed { .. } => "compile_failed",
            ToolError::PdfiumUnavailable(_) => "pdfium_unavailable",
            ToolError::ProviderNotConfigured { .. } => "provider_not_configured",
            ToolError::CompilerMissing { .. } => "compiler_missing",
            ToolError::InvalidConfig(_) => "invalid_config",
            ToolError::Io { .. } => "io_failure",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Cancelled => "cancelled",
            ToolError::Analytics(_) => "analytics",
            ToolError::Internal(_) => "internal",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        self.class().status()
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolError::Io {
            path: path.into(),
            source,
        }
    }
}
