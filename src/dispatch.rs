//! Conversion dispatcher: one request, one scope, one tool call.
//!
//! ## Stages
//!
//! ```text
//!  Validating ──► Scoped ──► Saving ──► Converting ──► Artifact
//!      │            │          │            │
//!      └─ 4xx/5xx   └──────────┴────────────┴─ scope destroyed, error returned
//! ```
//!
//! Everything that can be decided from the request alone (file count,
//! extensions, sizes, range syntax, handwriting prerequisites) is decided
//! before a directory exists. From allocation on, every failure destroys the
//! scope before the error leaves this module; on success the scope moves into
//! the [`Artifact`] and lives exactly as long as it does.
//!
//! ## Deadline
//!
//! Conversion runs on its own task. When the deadline passes the request
//! fails with [`ToolError::Timeout`] at once, the task's
//! [`CancellationToken`] fires, and the scope goes to a reaper that removes
//! it only after the task has returned. A directory is never deleted while a
//! tool may still be writing into it.

use crate::config::{CompressionQuality, PageSize, ServiceConfig};
use crate::error::ToolError;
use crate::intake::{self, StoredInput, UploadedFile};
use crate::session::{SessionManager, SessionScope};
use crate::tools::handwriting::{self, LlmTranscriber, PageTranscriber};
use crate::tools::split::RangeSpec;
use crate::tools::{
    checkpoint, compress, excel, images, merge, slides, split, unlock, word, Tool, DOCX_MIME,
    PDF_MIME, PPTX_MIME, XLSX_MIME,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extension allow-list for every PDF-input tool.
const PDF_EXTENSIONS: &[&str] = &[".pdf"];

/// A tool invocation with its form parameters, as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    ImageToPdf { page_size: Option<String> },
    MergePdf,
    SplitPdf { ranges: Option<String> },
    CompressPdf { quality: Option<String> },
    UnlockPdf { password: Option<String> },
    PdfToWord,
    PdfToExcel,
    PdfToPpt,
    HandwritingToPdf,
}

impl ToolRequest {
    pub fn tool(&self) -> Tool {
        match self {
            ToolRequest::ImageToPdf { .. } => Tool::ImageToPdf,
            ToolRequest::MergePdf => Tool::MergePdf,
            ToolRequest::SplitPdf { .. } => Tool::SplitPdf,
            ToolRequest::CompressPdf { .. } => Tool::CompressPdf,
            ToolRequest::UnlockPdf { .. } => Tool::UnlockPdf,
            ToolRequest::PdfToWord => Tool::PdfToWord,
            ToolRequest::PdfToExcel => Tool::PdfToExcel,
            ToolRequest::PdfToPpt => Tool::PdfToPpt,
            ToolRequest::HandwritingToPdf => Tool::HandwritingToPdf,
        }
    }
}

/// The single output of a successful conversion.
///
/// Owns the scope its file lives in: dropping the artifact removes the file.
#[derive(Debug)]
pub struct Artifact {
    pub scope: SessionScope,
    pub path: PathBuf,
    pub content_type: &'static str,
    pub download_name: &'static str,
}

/// Request parameters after validation.
enum Plan {
    Images(PageSize),
    Merge,
    Split(Option<RangeSpec>),
    Compress(CompressionQuality),
    Unlock(Option<String>),
    Word,
    Excel,
    Slides,
    Handwriting(Arc<dyn PageTranscriber>),
}

struct Output {
    path: PathBuf,
    content_type: &'static str,
    download_name: &'static str,
}

impl Output {
    fn pdf(path: PathBuf, download_name: &'static str) -> Self {
        Self {
            path,
            content_type: PDF_MIME,
            download_name,
        }
    }
}

/// Runs tool requests. Cheap to clone; shared by every handler.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ServiceConfig>,
    sessions: SessionManager,
    transcriber: Option<Arc<dyn PageTranscriber>>,
}

impl Dispatcher {
    pub fn new(config: Arc<ServiceConfig>, sessions: SessionManager) -> Self {
        Self {
            config,
            sessions,
            transcriber: None,
        }
    }

    /// Use `transcriber` for handwriting instead of resolving a vision provider.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn PageTranscriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Validate, allocate, persist, convert.
    pub async fn run(
        &self,
        request: ToolRequest,
        uploads: Vec<UploadedFile>,
    ) -> Result<Artifact, ToolError> {
        let tool = request.tool();
        let plan = self.validate(request, &uploads)?;

        let scope = self.sessions.allocate()?;
        debug!("{}: scope {} allocated", tool, scope.id());

        let inputs = match save(&uploads, &scope).await {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!("{}: saving uploads failed: {}", tool, e);
                scope.destroy();
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let work = {
            let this = self.clone();
            let work_dir = scope.path().to_path_buf();
            let cancel = cancel.clone();
            async move { this.execute(plan, inputs, work_dir, cancel).await }
        };
        let deadline = Duration::from_secs(self.config.conversion_timeout_secs);
        let (scope, output) = supervise(tool, scope, deadline, cancel, work).await?;

        info!(
            "{}: {} input(s) → {}",
            tool,
            uploads.len(),
            output.download_name
        );
        Ok(Artifact {
            scope,
            path: output.path,
            content_type: output.content_type,
            download_name: output.download_name,
        })
    }

    // ── Validating ───────────────────────────────────────────────────────

    fn validate(&self, request: ToolRequest, uploads: &[UploadedFile]) -> Result<Plan, ToolError> {
        let tool = request.tool();
        check_count(tool, uploads.len())?;

        let pdf_extensions: Vec<String> = PDF_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        let allow_list = if tool.takes_images() {
            &self.config.allowed_image_extensions
        } else {
            &pdf_extensions
        };
        for upload in uploads {
            intake::check_upload(upload, allow_list, self.config.max_upload_bytes)?;
        }

        Ok(match request {
            ToolRequest::ImageToPdf { page_size } => Plan::Images(
                page_size
                    .as_deref()
                    .map(PageSize::parse_lenient)
                    .unwrap_or_default(),
            ),
            ToolRequest::MergePdf => Plan::Merge,
            ToolRequest::SplitPdf { ranges } => {
                Plan::Split(ranges.as_deref().map(RangeSpec::parse).transpose()?)
            }
            ToolRequest::CompressPdf { quality } => Plan::Compress(
                quality
                    .as_deref()
                    .map(CompressionQuality::parse_lenient)
                    .unwrap_or_default(),
            ),
            ToolRequest::UnlockPdf { password } => Plan::Unlock(password),
            ToolRequest::PdfToWord => Plan::Word,
            ToolRequest::PdfToExcel => Plan::Excel,
            ToolRequest::PdfToPpt => Plan::Slides,
            ToolRequest::HandwritingToPdf => {
                handwriting::check_compiler(&self.config)?;
                Plan::Handwriting(self.resolve_transcriber()?)
            }
        })
    }

    fn resolve_transcriber(&self) -> Result<Arc<dyn PageTranscriber>, ToolError> {
        match &self.transcriber {
            Some(t) => Ok(Arc::clone(t)),
            None => Ok(Arc::new(LlmTranscriber::from_config(&self.config)?)),
        }
    }

    // ── Converting ───────────────────────────────────────────────────────

    async fn execute(
        &self,
        plan: Plan,
        inputs: Vec<StoredInput>,
        work_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Output, ToolError> {
        let config = Arc::clone(&self.config);
        match plan {
            Plan::Images(page_size) => {
                blocking(cancel, move |cancel| {
                    let path = images::images_to_pdf(
                        &inputs,
                        page_size,
                        config.image_dpi,
                        &work_dir,
                        cancel,
                    )?;
                    Ok(Output::pdf(path, images::OUTPUT_NAME))
                })
                .await
            }
            Plan::Merge => {
                blocking(cancel, move |cancel| {
                    let path = merge::merge(&inputs, &work_dir, cancel)?;
                    Ok(Output::pdf(path, merge::OUTPUT_NAME))
                })
                .await
            }
            Plan::Split(spec) => {
                blocking(cancel, move |cancel| {
                    let out = split::split(first(&inputs)?, spec.as_ref(), &work_dir, cancel)?;
                    Ok(Output {
                        path: out.path,
                        content_type: out.content_type,
                        download_name: out.download_name,
                    })
                })
                .await
            }
            Plan::Compress(quality) => {
                blocking(cancel, move |_| {
                    let (path, _report) = compress::compress(first(&inputs)?, quality, &work_dir)?;
                    Ok(Output::pdf(path, compress::OUTPUT_NAME))
                })
                .await
            }
            Plan::Unlock(password) => {
                blocking(cancel, move |_| {
                    let path = unlock::unlock(first(&inputs)?, password.as_deref(), &work_dir)?;
                    Ok(Output::pdf(path, unlock::OUTPUT_NAME))
                })
                .await
            }
            Plan::Word => {
                blocking(cancel, move |cancel| {
                    Ok(Output {
                        path: word::pdf_to_word(first(&inputs)?, &work_dir, cancel)?,
                        content_type: DOCX_MIME,
                        download_name: word::OUTPUT_NAME,
                    })
                })
                .await
            }
            Plan::Excel => {
                blocking(cancel, move |cancel| {
                    Ok(Output {
                        path: excel::pdf_to_excel(first(&inputs)?, &work_dir, cancel)?,
                        content_type: XLSX_MIME,
                        download_name: excel::OUTPUT_NAME,
                    })
                })
                .await
            }
            Plan::Slides => {
                blocking(cancel, move |cancel| {
                    Ok(Output {
                        path: slides::pdf_to_ppt(
                            first(&inputs)?,
                            config.slides_dpi,
                            config.max_rendered_pixels,
                            &work_dir,
                            cancel,
                        )?,
                        content_type: PPTX_MIME,
                        download_name: slides::OUTPUT_NAME,
                    })
                })
                .await
            }
            Plan::Handwriting(transcriber) => {
                let input = first(&inputs)?.clone();
                let path = handwriting::handwriting_to_pdf(
                    input,
                    &config,
                    transcriber,
                    &work_dir,
                    &cancel,
                )
                .await?;
                Ok(Output::pdf(path, handwriting::OUTPUT_NAME))
            }
        }
    }
}

fn check_count(tool: Tool, got: usize) -> Result<(), ToolError> {
    if got == 0 {
        return Err(ToolError::NoFiles);
    }
    let (min, max) = tool.input_bounds();
    if got < min {
        return Err(ToolError::TooFewFiles { min, got });
    }
    if let Some(max) = max {
        if got > max {
            return Err(ToolError::TooManyFiles { max, got });
        }
    }
    Ok(())
}

fn first(inputs: &[StoredInput]) -> Result<&StoredInput, ToolError> {
    inputs
        .first()
        .ok_or_else(|| ToolError::Internal("no stored input".into()))
}

async fn save(
    uploads: &[UploadedFile],
    scope: &SessionScope,
) -> Result<Vec<StoredInput>, ToolError> {
    let mut inputs = Vec::with_capacity(uploads.len());
    for upload in uploads {
        inputs.push(intake::persist(upload, scope).await?);
    }
    Ok(inputs)
}

/// Run `work` on its own task, bounded by `deadline`.
///
/// Success hands the scope back with the output. Failure destroys it. On
/// timeout `cancel` fires and a reaper task takes the scope, destroying it
/// once `work` has returned.
async fn supervise<T, F>(
    tool: Tool,
    scope: SessionScope,
    deadline: Duration,
    cancel: CancellationToken,
    work: F,
) -> Result<(SessionScope, T), ToolError>
where
    F: Future<Output = Result<T, ToolError>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(work);
    match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => {
            let result = joined
                .map_err(|e| ToolError::Internal(format!("conversion task failed: {e}")))
                .and_then(|r| r);
            match result {
                Ok(output) => Ok((scope, output)),
                Err(e) => {
                    warn!("{}: conversion failed: {}", tool, e);
                    scope.destroy();
                    Err(e)
                }
            }
        }
        Err(_) => {
            let secs = deadline.as_secs();
            warn!(
                "{}: deadline of {}s exceeded, scope {} kept until the tool stops",
                tool,
                secs,
                scope.id()
            );
            cancel.cancel();
            tokio::spawn(async move {
                let _ = task.await;
                debug!("{}: abandoned conversion stopped", tool);
                scope.destroy();
            });
            Err(ToolError::Timeout { secs })
        }
    }
}

/// Run a library call on the blocking pool, unless already cancelled.
async fn blocking<T, F>(cancel: CancellationToken, f: F) -> Result<T, ToolError>
where
    F: FnOnce(&CancellationToken) -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        checkpoint(&cancel)?;
        f(&cancel)
    })
    .await
    .map_err(|e| ToolError::Internal(format!("conversion task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRoot;
    use crate::tools::testutil::{page_widths, write_pdf};

    struct Harness {
        _dir: tempfile::TempDir,
        root: SessionRoot,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = SessionRoot::prepare(dir.path().join("sessions")).unwrap();
        let config = ServiceConfig::builder()
            .temp_root(root.path())
            .max_upload_bytes(64 * 1024)
            .latex_compiler("definitely-not-a-latex-compiler")
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(config), SessionManager::new(&root));
        Harness {
            _dir: dir,
            root,
            dispatcher,
        }
    }

    impl Harness {
        fn scope_dirs(&self) -> usize {
            std::fs::read_dir(self.root.path()).unwrap().count()
        }
    }

    fn pdf_upload(name: &str, pages: usize, base: i64) -> UploadedFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.pdf");
        write_pdf(&path, pages, base);
        UploadedFile::new(name, std::fs::read(&path).unwrap())
    }

    #[tokio::test]
    async fn merge_returns_artifact_owning_its_scope() {
        let h = harness();
        let uploads = vec![pdf_upload("a.pdf", 2, 100), pdf_upload("b.pdf", 1, 200)];

        let artifact = h.dispatcher.run(ToolRequest::MergePdf, uploads).await.unwrap();

        assert_eq!(artifact.content_type, PDF_MIME);
        assert_eq!(artifact.download_name, "merged.pdf");
        assert_eq!(page_widths(&artifact.path), vec![101, 102, 201]);
        assert_eq!(h.dispatcher.sessions().live_scopes(), 1);

        let scope_dir = artifact.scope.path().to_path_buf();
        drop(artifact);
        assert!(!scope_dir.exists());
        assert_eq!(h.dispatcher.sessions().live_scopes(), 0);
        assert_eq!(h.scope_dirs(), 0);
    }

    #[tokio::test]
    async fn validation_failures_allocate_nothing() {
        let h = harness();
        let cases: Vec<(ToolRequest, Vec<UploadedFile>, &str)> = vec![
            (ToolRequest::MergePdf, vec![], "no_files"),
            (ToolRequest::MergePdf, vec![pdf_upload("a.pdf", 1, 0)], "too_few_files"),
            (
                ToolRequest::PdfToWord,
                vec![pdf_upload("a.pdf", 1, 0), pdf_upload("b.pdf", 1, 0)],
                "too_many_files",
            ),
            (
                ToolRequest::CompressPdf { quality: None },
                vec![UploadedFile::new("notes.txt", "hello")],
                "invalid_extension",
            ),
            (
                ToolRequest::ImageToPdf { page_size: None },
                vec![UploadedFile::new("scan.pdf", "x")],
                "invalid_extension",
            ),
            (
                ToolRequest::CompressPdf { quality: None },
                vec![UploadedFile::new("big.pdf", vec![0u8; 64 * 1024 + 1])],
                "file_too_large",
            ),
            (
                ToolRequest::SplitPdf {
                    ranges: Some("3-1".into()),
                },
                vec![pdf_upload("a.pdf", 3, 0)],
                "invalid_ranges",
            ),
            (ToolRequest::HandwritingToPdf, vec![pdf_upload("n.pdf", 1, 0)], "compiler_missing"),
        ];

        for (request, uploads, code) in cases {
            let err = h.dispatcher.run(request.clone(), uploads).await.unwrap_err();
            assert_eq!(err.code(), code, "{request:?}");
        }
        assert_eq!(h.scope_dirs(), 0);
        assert_eq!(h.dispatcher.sessions().live_scopes(), 0);
    }

    #[tokio::test]
    async fn conversion_failure_destroys_scope() {
        let h = harness();
        let uploads = vec![
            pdf_upload("good.pdf", 1, 0),
            UploadedFile::new("broken.pdf", "%PDF-1.4 not really"),
        ];

        let err = h.dispatcher.run(ToolRequest::MergePdf, uploads).await.unwrap_err();

        assert_eq!(err.status(), 422);
        assert!(err.to_string().contains("broken.pdf"));
        assert_eq!(h.scope_dirs(), 0);
        assert_eq!(h.dispatcher.sessions().live_scopes(), 0);
    }

    #[tokio::test]
    async fn split_single_group_is_pdf_multiple_is_zip() {
        let h = harness();

        let one = h
            .dispatcher
            .run(
                ToolRequest::SplitPdf {
                    ranges: Some("2-3".into()),
                },
                vec![pdf_upload("doc.pdf", 4, 10)],
            )
            .await
            .unwrap();
        assert_eq!(one.content_type, PDF_MIME);
        assert_eq!(page_widths(&one.path), vec![12, 13]);

        let many = h
            .dispatcher
            .run(
                ToolRequest::SplitPdf { ranges: None },
                vec![pdf_upload("doc.pdf", 3, 10)],
            )
            .await
            .unwrap();
        assert_eq!(many.content_type, crate::tools::ZIP_MIME);
        assert_eq!(many.download_name, "split_pages.zip");
    }

    #[tokio::test]
    async fn images_become_pdf() {
        let h = harness();
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::new(30, 20))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let uploads = vec![
            UploadedFile::new("a.PNG", png.clone()),
            UploadedFile::new("b.png", png),
        ];

        let artifact = h
            .dispatcher
            .run(
                ToolRequest::ImageToPdf {
                    page_size: Some("A4".into()),
                },
                uploads,
            )
            .await
            .unwrap();

        assert_eq!(artifact.download_name, "converted.pdf");
        assert_eq!(page_widths(&artifact.path).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_scopes() {
        let h = harness();
        let mut handles = Vec::new();
        for i in 0..8 {
            let dispatcher = h.dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .run(
                        ToolRequest::CompressPdf {
                            quality: Some("high".into()),
                        },
                        vec![pdf_upload("doc.pdf", 1, i)],
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut artifacts = Vec::new();
        for handle in handles {
            artifacts.push(handle.await.unwrap());
        }

        let mut ids: Vec<String> = artifacts
            .iter()
            .map(|a| a.scope.id().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(h.scope_dirs(), 8);

        drop(artifacts);
        assert_eq!(h.scope_dirs(), 0);
    }

    #[tokio::test]
    async fn timed_out_tool_keeps_its_scope_until_it_stops() {
        let h = harness();
        let scope = h.dispatcher.sessions().allocate().unwrap();
        let dir = scope.path().to_path_buf();
        let cancel = CancellationToken::new();
        let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel();

        // A slow tool: writes a page every few ms until cancelled, then one
        // last file after a pause, as a renderer finishing its current page.
        let work = {
            let dir = dir.clone();
            blocking(cancel.clone(), move |cancel| {
                let mut page = 0;
                while checkpoint(cancel).is_ok() {
                    std::fs::write(dir.join(format!("page_{page}.bin")), [0u8; 64])
                        .map_err(|e| ToolError::io(&dir, e))?;
                    page += 1;
                    std::thread::sleep(Duration::from_millis(5));
                }
                std::thread::sleep(Duration::from_millis(100));
                std::fs::write(dir.join("last_page.bin"), [0u8; 64])
                    .map_err(|e| ToolError::io(&dir, e))?;
                let _ = stopped_tx.send(());
                Ok(())
            })
        };

        let err = supervise(
            Tool::PdfToPpt,
            scope,
            Duration::from_millis(50),
            cancel.clone(),
            work,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(cancel.is_cancelled());
        assert!(dir.exists(), "scope removed under a running tool");
        assert_eq!(h.dispatcher.sessions().live_scopes(), 1);

        stopped_rx.await.expect("tool failed to write after cancellation");
        for _ in 0..200 {
            if h.dispatcher.sessions().live_scopes() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.dispatcher.sessions().live_scopes(), 0);
        assert!(!dir.exists());
        assert_eq!(h.scope_dirs(), 0);
    }

    #[tokio::test]
    async fn failed_work_destroys_scope_immediately() {
        let h = harness();
        let scope = h.dispatcher.sessions().allocate().unwrap();
        let dir = scope.path().to_path_buf();

        let err = supervise(
            Tool::MergePdf,
            scope,
            Duration::from_secs(5),
            CancellationToken::new(),
            async { Err::<(), _>(ToolError::Internal("boom".into())) },
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), "internal");
        assert!(!dir.exists());
        assert_eq!(h.dispatcher.sessions().live_scopes(), 0);
    }
}
