//! HTTP server binary for edgequake-pdftools.
//!
//! Maps CLI flags (with env-var fallbacks) onto `ServiceConfig`, provisions
//! pdfium, and runs the server until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdftools::{
    serve, AnalyticsStore, AppState, Dispatcher, RequestTracker, ServiceConfig, SessionManager,
    SessionRoot,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"ENDPOINTS:
  POST /api/convert         images        → PDF      (page_size: fit | a4 | letter)
  POST /api/merge           ≥2 PDFs       → PDF
  POST /api/split           PDF           → PDF/ZIP  (ranges: e.g. 1-3,5)
  POST /api/compress        PDF           → PDF      (quality: low | medium | high)
  POST /api/unlock          PDF           → PDF      (password)
  POST /api/pdf-to-word     PDF           → DOCX
  POST /api/pdf-to-excel    PDF           → XLSX
  POST /api/pdf-to-ppt      PDF           → PPTX
  POST /api/handwriting     PDF           → PDF      (vision LLM + LaTeX)
  GET  /api/analytics       usage snapshot (JSON)
  GET  /                    liveness

HANDWRITING:
  Needs a vision provider and a LaTeX compiler. The provider is picked from
  --vision-provider, else EDGEQUAKE_LLM_PROVIDER, else OPENAI_API_KEY.

PDF ENGINE:
  PDFium is downloaded on first run to ~/.cache/. To use an existing copy:
  PDFIUM_LIB_PATH=/path/to/libpdfium pdftools
"#;

/// Serve the document conversion API.
#[derive(Parser, Debug)]
#[command(
    name = "pdftools",
    version,
    about = "Stateless HTTP document-conversion service",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "PDFTOOLS_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Directory holding per-request session scopes. Wiped on shutdown.
    #[arg(long, env = "TEMP_DIR", default_value = "temp_files")]
    temp_dir: PathBuf,

    /// Per-file upload limit in megabytes.
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 10)]
    max_file_size_mb: u64,

    /// Image extensions accepted by /api/convert, comma separated.
    #[arg(
        long,
        env = "ALLOWED_EXTENSIONS",
        value_delimiter = ',',
        default_value = ".jpg,.jpeg,.png,.bmp,.gif,.webp,.tiff"
    )]
    allowed_extensions: Vec<String>,

    /// Browser origins allowed by CORS, comma separated (`*` for any).
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5173"
    )]
    allowed_origins: Vec<String>,

    /// SQLite file for request analytics.
    #[arg(long, env = "ANALYTICS_DB_PATH", default_value = "analytics.db")]
    analytics_db: PathBuf,

    /// Salt mixed into client address hashes.
    #[arg(
        long,
        env = "ANALYTICS_SALT",
        default_value = "edgequake-pdftools",
        hide_env_values = true
    )]
    analytics_salt: String,

    /// Deadline for one conversion, in seconds.
    #[arg(long, env = "PDFTOOLS_CONVERSION_TIMEOUT", default_value_t = 300)]
    conversion_timeout: u64,

    /// LaTeX compiler used by the handwriting tool.
    #[arg(long, env = "PDFTOOLS_LATEX_COMPILER", default_value = "pdflatex")]
    latex_compiler: String,

    /// Vision provider (openai, anthropic, gemini, ollama, ...). Auto-detected if unset.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    vision_provider: Option<String>,

    /// Vision model for the handwriting tool.
    #[arg(long, env = "EDGEQUAKE_MODEL", default_value = "gpt-4o")]
    vision_model: String,

    /// Debug logging.
    #[arg(short, long, env = "PDFTOOLS_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, env = "PDFTOOLS_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .temp_root(&self.temp_dir)
            .max_file_size_mb(self.max_file_size_mb)
            .allowed_image_extensions(&self.allowed_extensions)
            .allowed_origins(&self.allowed_origins)
            .analytics_db_path(&self.analytics_db)
            .analytics_salt(&self.analytics_salt)
            .conversion_timeout_secs(self.conversion_timeout)
            .latex_compiler(&self.latex_compiler)
            .vision_model(&self.vision_model);
        if let Some(provider) = &self.vision_provider {
            builder = builder.provider_name(provider);
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; values already in the environment win.
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = Arc::new(cli.to_config()?);
    info!("Starting with {:?}", config);

    // ── Ensure PDFium engine is available ───────────────────────────────────
    // Structural tools work without it, so a failed download is not fatal.
    if !pdfium_auto::is_pdfium_cached() {
        info!("Downloading PDFium engine (first run)");
    }
    if let Err(e) = tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None)) {
        warn!(
            "PDFium unavailable ({}); unlock and PDF→Office tools will fail until it is installed",
            e
        );
    }

    // ── Storage ─────────────────────────────────────────────────────────────
    let root = SessionRoot::prepare(&config.temp_root).context("Failed to prepare temp root")?;
    let store = AnalyticsStore::open(&config.analytics_db_path)
        .context("Failed to open analytics database")?;
    let tracker = RequestTracker::new(store, config.analytics_salt.as_str());
    let sessions = SessionManager::new(&root);
    let dispatcher = Dispatcher::new(Arc::clone(&config), sessions.clone());

    // ── Serve ───────────────────────────────────────────────────────────────
    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;

    serve(listener, AppState::new(dispatcher, tracker), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("HTTP server error")?;

    // ── Teardown ────────────────────────────────────────────────────────────
    let live = sessions.live_scopes();
    if live > 0 {
        warn!("{} session scope(s) still alive at shutdown", live);
    }
    root.reset().context("Failed to reset temp root")?;
    info!("Shut down cleanly");
    Ok(())
}
