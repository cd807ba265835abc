//! # edgequake-pdftools
//!
//! A stateless HTTP backend for everyday document conversions.
//!
//! ## Tools
//!
//! | Tool                 | Route                   | Engine                    |
//! |----------------------|-------------------------|---------------------------|
//! | `image-to-pdf`       | `POST /api/convert`     | image + lopdf             |
//! | `merge-pdf`          | `POST /api/merge`       | lopdf                     |
//! | `split-pdf`          | `POST /api/split`       | lopdf (+ zip)             |
//! | `compress-pdf`       | `POST /api/compress`    | lopdf + image             |
//! | `unlock-pdf`         | `POST /api/unlock`      | pdfium                    |
//! | `pdf-to-word`        | `POST /api/pdf-to-word` | pdfium + docx-rs          |
//! | `pdf-to-excel`       | `POST /api/pdf-to-excel`| pdfium + rust_xlsxwriter  |
//! | `pdf-to-ppt`         | `POST /api/pdf-to-ppt`  | pdfium + zip              |
//! | `handwriting-to-pdf` | `POST /api/handwriting` | pdfium + vision LLM + TeX |
//!
//! ## Request lifecycle
//!
//! ```text
//! multipart form
//!  │
//!  ├─ 1. Validate  count, extension, size, parameters (nothing on disk yet)
//!  ├─ 2. Scope     private directory under the session root
//!  ├─ 3. Save      uploads written under generated names
//!  ├─ 4. Convert   one tool, blocking work off the async runtime, deadline
//!  ├─ 5. Stream    the response body owns the scope
//!  └─ 6. Clean     scope removed when the body is dropped
//! ```
//!
//! Every `/api/*` call except `/api/analytics` is recorded in a SQLite store;
//! `GET /api/analytics` returns the aggregates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdftools::{
//!     serve, AnalyticsStore, AppState, Dispatcher, RequestTracker, ServiceConfig,
//!     SessionManager, SessionRoot,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServiceConfig::builder().temp_root("temp_files").build()?);
//!     let root = SessionRoot::prepare(&config.temp_root)?;
//!     let store = AnalyticsStore::open(&config.analytics_db_path)?;
//!     let tracker = RequestTracker::new(store, config.analytics_salt.as_str());
//!     let dispatcher = Dispatcher::new(config, SessionManager::new(&root));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     serve(listener, AppState::new(dispatcher, tracker), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     root.reset()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdftools` binary (clap + anyhow + tracing-subscriber + dotenv) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analytics;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod prompts;
pub mod server;
pub mod session;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analytics::{AnalyticsStore, RequestEvent, RequestTracker, Snapshot};
pub use config::{CompressionQuality, PageSize, ServiceConfig, ServiceConfigBuilder};
pub use dispatch::{Artifact, Dispatcher, ToolRequest};
pub use error::{ErrorClass, ToolError};
pub use intake::UploadedFile;
pub use server::{create_router, serve, AppState};
pub use session::{SessionManager, SessionRoot, SessionScope};
pub use tools::handwriting::{LlmTranscriber, PageTranscriber};
pub use tools::Tool;
