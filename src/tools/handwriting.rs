//! Handwritten notes → typeset PDF.
//!
//! ```text
//!  PDF ──render (300 DPI)──► page images ──vision model──► LaTeX bodies
//!                                                             │
//!            typeset_notes.pdf ◄──pdflatex ×2── document ◄────┘
//! ```
//!
//! Pages are transcribed concurrently (bounded by `page_concurrency`) and
//! reassembled in page order. A page whose transcription fails does not fail
//! the request: it is replaced by a short bold notice carrying the escaped
//! error, so the user still gets every page that did work.
//!
//! Both external collaborators are checked before any page is sent: a
//! missing LaTeX compiler or an unconfigured vision provider is reported as a
//! configuration error without spending a single model call.

use super::{checkpoint, latex, pdfium};
use crate::config::ServiceConfig;
use crate::error::ToolError;
use crate::intake::StoredInput;
use crate::prompts::LATEX_EXTRACTION_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const OUTPUT_NAME: &str = "typeset_notes.pdf";

/// Longest error excerpt embedded in a failed page's notice.
const FAILURE_DETAIL_CHARS: usize = 100;

/// Error type returned by a [`PageTranscriber`].
pub type TranscribeError = Box<dyn std::error::Error + Send + Sync>;

/// Turns one page image into LaTeX body content.
#[async_trait]
pub trait PageTranscriber: Send + Sync {
    async fn transcribe(&self, page_no: usize, image: &DynamicImage)
        -> Result<String, TranscribeError>;
}

// ── Vision model transcriber ─────────────────────────────────────────────────

/// [`PageTranscriber`] backed by an `edgequake-llm` vision provider.
pub struct LlmTranscriber {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmTranscriber {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, ToolError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config.temperature, config.max_tokens))
    }
}

#[async_trait]
impl PageTranscriber for LlmTranscriber {
    async fn transcribe(
        &self,
        page_no: usize,
        image: &DynamicImage,
    ) -> Result<String, TranscribeError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::user_with_images(
            LATEX_EXTRACTION_PROMPT,
            vec![encode_page(image)?],
        )];
        let response = self.provider.chat(&messages, Some(&self.options)).await?;
        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_no,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Provider name override read by [`resolve_provider`].
pub const PROVIDER_ENV: &str = "EDGEQUAKE_LLM_PROVIDER";
/// Model override paired with [`PROVIDER_ENV`].
pub const MODEL_ENV: &str = "EDGEQUAKE_MODEL";

/// Resolve the vision provider, most specific first:
///
/// 1. a pre-built provider on the config
/// 2. `provider_name` with `vision_model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` (+ `EDGEQUAKE_MODEL`, else `vision_model`)
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. `ProviderFactory::from_env()` auto-detection
pub fn resolve_provider(config: &ServiceConfig) -> Result<Arc<dyn LLMProvider>, ToolError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, &config.vision_model);
    }

    if let Some(provider) = non_empty_env(PROVIDER_ENV) {
        let model = non_empty_env(MODEL_ENV).unwrap_or_else(|| config.vision_model.clone());
        return create_vision_provider(&provider, &model);
    }

    if non_empty_env("OPENAI_API_KEY").is_some() {
        return create_vision_provider("openai", &config.vision_model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ToolError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY or pass --vision-provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

fn create_vision_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ToolError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ToolError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Encode a page as a base64 PNG attachment with `detail: high`.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Fail with `CompilerMissing` unless the configured compiler is installed.
pub fn check_compiler(config: &ServiceConfig) -> Result<(), ToolError> {
    match latex::find_compiler(&config.latex_compiler) {
        Some(_) => Ok(()),
        None => Err(ToolError::CompilerMissing {
            compiler: config.latex_compiler.clone(),
        }),
    }
}

/// Convert handwritten `input` into `<work_dir>/typeset_notes.pdf`.
///
/// When `cancel` fires, pending vision calls are dropped and no further
/// compiler pass starts.
pub async fn handwriting_to_pdf(
    input: StoredInput,
    config: &ServiceConfig,
    transcriber: Arc<dyn PageTranscriber>,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    check_compiler(config)?;

    let name = input.original_name.clone();
    let pages = pdfium::render_file(
        input,
        config.handwriting_dpi,
        config.max_rendered_pixels,
        cancel.clone(),
    )
    .await?;
    info!("Rendered {} page(s) of '{}'", pages.len(), name);

    let sections = tokio::select! {
        sections = transcribe_pages(transcriber, pages, config.page_concurrency) => sections,
        _ = cancel.cancelled() => return Err(ToolError::Cancelled),
    };
    checkpoint(cancel)?;
    let tex = latex::assemble_document(&sections);
    let pdf = latex::compile(
        &tex,
        work_dir,
        &config.latex_compiler,
        config.latex_timeout_secs,
        cancel,
    )
    .await?;
    info!("Typeset notes created for '{}' ({} pages)", name, sections.len());
    Ok(pdf)
}

/// Transcribe every page, at most `concurrency` at a time, in page order.
pub async fn transcribe_pages(
    transcriber: Arc<dyn PageTranscriber>,
    pages: Vec<DynamicImage>,
    concurrency: usize,
) -> Vec<String> {
    let total = pages.len();
    stream::iter(pages.into_iter().enumerate().map(|(idx, image)| {
        let transcriber = Arc::clone(&transcriber);
        let page_no = idx + 1;
        async move {
            match transcriber.transcribe(page_no, &image).await {
                Ok(raw) => {
                    debug!("Page {}/{} transcribed", page_no, total);
                    strip_code_fences(&raw)
                }
                Err(e) => {
                    warn!("Page {}/{}: transcription failed: {}", page_no, total, e);
                    failure_notice(page_no, &e.to_string())
                }
            }
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

/// Remove code fences the model may wrap its answer in.
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        return caps[1].trim().to_string();
    }
    if trimmed.starts_with("```") {
        return trimmed
            .lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
    }
    trimmed.to_string()
}

/// LaTeX placed in a page's slot when its transcription failed.
pub fn failure_notice(page_no: usize, error: &str) -> String {
    let excerpt: String = error.chars().take(FAILURE_DETAIL_CHARS).collect();
    format!(
        "\\textbf{{Page {}: Could not extract content.}} \\textit{{{}}}",
        page_no,
        latex::escape_text(&excerpt)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers `page N` after a delay that shrinks with N, so later pages
    /// finish first; fails on the pages listed in `fail`.
    struct ScriptedTranscriber {
        fail: Vec<usize>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedTranscriber {
        fn new(fail: Vec<usize>) -> Self {
            Self {
                fail,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageTranscriber for ScriptedTranscriber {
        async fn transcribe(
            &self,
            page_no: usize,
            _image: &DynamicImage,
        ) -> Result<String, TranscribeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40 / page_no as u64)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(&page_no) {
                return Err("rate limited: 429 Too Many Requests".into());
            }
            Ok(format!("```latex\npage {page_no}\n```"))
        }
    }

    fn blank_pages(n: usize) -> Vec<DynamicImage> {
        (0..n)
            .map(|_| DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))))
            .collect()
    }

    #[tokio::test]
    async fn pages_stay_in_order_and_failures_are_marked() {
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![2]));

        let sections = transcribe_pages(transcriber.clone(), blank_pages(4), 2).await;

        assert_eq!(sections.len(), 4);
        assert_eq!(sections[0], "page 1");
        assert!(sections[1].starts_with(r"\textbf{Page 2: Could not extract content.}"));
        assert!(sections[1].contains("rate limited"));
        assert_eq!(sections[2], "page 3");
        assert_eq!(sections[3], "page 4");
        assert!(transcriber.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```latex\n\\section{A}\n```"), "\\section{A}");
        assert_eq!(strip_code_fences("```\nx = 1\n```\n"), "x = 1");
        assert_eq!(strip_code_fences("plain $x$"), "plain $x$");
        assert_eq!(
            strip_code_fences("```latex\nbody\n```\ntrailing note"),
            "body\ntrailing note"
        );
    }

    #[test]
    fn failure_notice_is_escaped_and_bounded() {
        let long = format!("50% failed_{}", "x".repeat(300));
        let notice = failure_notice(3, &long);
        assert!(notice.starts_with(r"\textbf{Page 3: Could not extract content.} \textit{"));
        assert!(notice.contains(r"50\% failed\_"));
        assert!(notice.len() < 200);
    }

    #[test]
    fn encode_page_is_png_base64() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
        let data = encode_page(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let bytes = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn missing_compiler_fails_preflight() {
        let config = ServiceConfig::builder()
            .latex_compiler("definitely-not-a-latex-compiler")
            .build()
            .unwrap();
        let err = check_compiler(&config).unwrap_err();
        assert_eq!(err.code(), "compiler_missing");
    }
}
