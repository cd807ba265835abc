//! Service configuration.
//!
//! Every knob the service reads lives in [`ServiceConfig`], built once at
//! startup via [`ServiceConfigBuilder`] and then shared read-only (behind an
//! `Arc`) with the session manager, the intake checks, the dispatcher and the
//! analytics tracker. Nothing reads the process environment after startup;
//! the binary maps flags and env vars onto the builder.
//!
//! # Design choice: builder over constructor
//! The service has close to twenty settings and most deployments change two
//! or three of them. The builder lets callers set only those and rely on the
//! documented defaults for the rest.

use crate::error::ToolError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default image extensions accepted by the image→PDF tool.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] =
    &[".jpg", ".jpeg", ".png", ".bmp", ".gif", ".webp", ".tiff"];

/// Immutable configuration for the whole service.
///
/// # Example
/// ```rust
/// use edgequake_pdftools::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .temp_root("/var/tmp/pdftools")
///     .max_file_size_mb(25)
///     .allowed_origins(["https://tools.example.com"])
///     .build()
///     .unwrap();
/// assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Process-wide directory holding every session scope. Default: `temp_files`.
    pub temp_root: PathBuf,

    /// Per-file upload limit in bytes. Default: 10 MB.
    pub max_upload_bytes: u64,

    /// Maximum number of files in one request. Default: 20.
    ///
    /// Together with `max_upload_bytes` this bounds the request body size.
    pub max_files_per_request: usize,

    /// Extensions accepted by the image→PDF tool, lowercase with a leading dot.
    pub allowed_image_extensions: Vec<String>,

    /// CORS origins allowed to call the API. Default: `http://localhost:5173`.
    pub allowed_origins: Vec<String>,

    /// SQLite file for request analytics. Default: `analytics.db`.
    pub analytics_db_path: PathBuf,

    /// Salt mixed into the client-address hash before storage.
    pub analytics_salt: String,

    /// Deadline for the converting step of one request, in seconds. Default: 300.
    pub conversion_timeout_secs: u64,

    /// Resolution used to size image pages. Default: 150.
    pub image_dpi: u32,

    /// Resolution used to rasterise pages for slides. Default: 200.
    pub slides_dpi: u32,

    /// Resolution used to rasterise handwritten pages. Default: 300.
    ///
    /// Pen strokes and sub/superscripts need more pixels than print does;
    /// below ~200 DPI the vision model starts misreading indices.
    pub handwriting_dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 4000.
    ///
    /// A 300-DPI render of an A4 page is 2480 × 3508 px. The cap only bites
    /// on oversized pages, where it keeps pdfium allocations bounded.
    pub max_rendered_pixels: u32,

    /// Vision model identifier. Default: `gpt-4o`.
    pub vision_model: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for transcription. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Concurrent vision calls within one handwriting request. Default: 4.
    pub page_concurrency: usize,

    /// LaTeX compiler executable. Default: `pdflatex`.
    pub latex_compiler: String,

    /// Per-run LaTeX compile timeout in seconds. Default: 60.
    pub latex_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("temp_files"),
            max_upload_bytes: 10 * 1024 * 1024,
            max_files_per_request: 20,
            allowed_image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
            analytics_db_path: PathBuf::from("analytics.db"),
            analytics_salt: "edgequake-pdftools".to_string(),
            conversion_timeout_secs: 300,
            image_dpi: 150,
            slides_dpi: 200,
            handwriting_dpi: 300,
            max_rendered_pixels: 4000,
            vision_model: "gpt-4o".to_string(),
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            page_concurrency: 4,
            latex_compiler: "pdflatex".to_string(),
            latex_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("temp_root", &self.temp_root)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("max_files_per_request", &self.max_files_per_request)
            .field("allowed_image_extensions", &self.allowed_image_extensions)
            .field("allowed_origins", &self.allowed_origins)
            .field("analytics_db_path", &self.analytics_db_path)
            .field("analytics_salt", &"<redacted>")
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("vision_model", &self.vision_model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("latex_compiler", &self.latex_compiler)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Upload limit rounded to whole megabytes, for messages.
    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_bytes / (1024 * 1024)
    }

    /// Upper bound on one request body.
    ///
    /// Multipart framing adds a little per part, so the limit leaves 1 MB of
    /// headroom over the raw file budget.
    pub fn request_body_limit(&self) -> usize {
        let per_file = usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX);
        let files = per_file.saturating_mul(self.max_files_per_request);
        files.saturating_add(1024 * 1024)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn temp_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.temp_root = path.into();
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_upload_bytes = mb.max(1).saturating_mul(1024 * 1024);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_files_per_request(mut self, n: usize) -> Self {
        self.config.max_files_per_request = n.max(2);
        self
    }

    /// Set the image allow-list. Entries are normalised to lowercase with a
    /// leading dot, so `"PNG"` and `".png"` are equivalent.
    pub fn allowed_image_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_image_extensions = exts
            .into_iter()
            .map(|e| normalise_extension(e.as_ref()))
            .filter(|e| e.len() > 1)
            .collect();
        self
    }

    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_origins = origins
            .into_iter()
            .map(|o| o.as_ref().trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        self
    }

    pub fn analytics_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.analytics_db_path = path.into();
        self
    }

    pub fn analytics_salt(mut self, salt: impl Into<String>) -> Self {
        self.config.analytics_salt = salt.into();
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs.max(1);
        self
    }

    pub fn image_dpi(mut self, dpi: u32) -> Self {
        self.config.image_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn slides_dpi(mut self, dpi: u32) -> Self {
        self.config.slides_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn handwriting_dpi(mut self, dpi: u32) -> Self {
        self.config.handwriting_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn latex_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.config.latex_compiler = compiler.into();
        self
    }

    pub fn latex_timeout_secs(mut self, secs: u64) -> Self {
        self.config.latex_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ToolError> {
        let c = &self.config;
        if c.temp_root.as_os_str().is_empty() {
            return Err(ToolError::InvalidConfig("temp root must not be empty".into()));
        }
        if c.max_upload_bytes == 0 {
            return Err(ToolError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        if c.allowed_image_extensions.is_empty() {
            return Err(ToolError::InvalidConfig(
                "at least one image extension must be allowed".into(),
            ));
        }
        if c.latex_compiler.trim().is_empty() {
            return Err(ToolError::InvalidConfig(
                "LaTeX compiler name must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ToolError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

fn normalise_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Page geometry for the image→PDF tool.
///
/// `A4` and `Letter` are landscape canvases; a portrait image flips the
/// canvas so the image is never shrunk against its long side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    /// Page is exactly the image bounds. (default)
    #[default]
    Fit,
    /// 297 × 210 mm.
    A4,
    /// 279.4 × 215.9 mm.
    Letter,
}

impl PageSize {
    /// Parse a form value. Unknown values fall back to [`PageSize::Fit`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "a4" => PageSize::A4,
            "letter" => PageSize::Letter,
            _ => PageSize::Fit,
        }
    }

    /// Landscape canvas in millimetres, or `None` for [`PageSize::Fit`].
    pub fn landscape_mm(self) -> Option<(f64, f64)> {
        match self {
            PageSize::Fit => None,
            PageSize::A4 => Some((297.0, 210.0)),
            PageSize::Letter => Some((279.4, 215.9)),
        }
    }
}

/// Compression aggressiveness for the compress tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionQuality {
    /// Strongest image re-encode, metadata stripped.
    Low,
    /// Moderate image re-encode. (default)
    #[default]
    Medium,
    /// Structural optimisation only; images untouched.
    High,
}

impl CompressionQuality {
    /// Parse a form value. Unknown values fall back to [`CompressionQuality::Medium`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => CompressionQuality::Low,
            "high" => CompressionQuality::High,
            _ => CompressionQuality::Medium,
        }
    }

    /// JPEG quality used to re-encode embedded images, if any.
    pub fn jpeg_quality(self) -> Option<u8> {
        match self {
            CompressionQuality::Low => Some(40),
            CompressionQuality::Medium => Some(65),
            CompressionQuality::High => None,
        }
    }

    /// Whether document metadata is dropped.
    pub fn strips_metadata(self) -> bool {
        matches!(self, CompressionQuality::Low)
    }
}
