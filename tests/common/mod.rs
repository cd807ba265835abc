//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use axum::Router;
use edgequake_pdftools::{
    create_router, AnalyticsStore, AppState, Dispatcher, RequestTracker, ServiceConfig,
    SessionManager, SessionRoot, Snapshot,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "pdftools-test-boundary";

/// One service instance on private temp storage.
pub struct TestApp {
    _dir: tempfile::TempDir,
    pub root: SessionRoot,
    pub sessions: SessionManager,
    pub tracker: RequestTracker,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = SessionRoot::prepare(dir.path().join("temp_files")).unwrap();
        let config = ServiceConfig::builder()
            .temp_root(root.path())
            .max_upload_bytes(256 * 1024)
            .analytics_db_path(dir.path().join("analytics.db"))
            .analytics_salt("test-salt")
            .allowed_origins(["http://localhost:5173"])
            .latex_compiler("definitely-not-a-latex-compiler")
            .build()
            .unwrap();
        let store = AnalyticsStore::open(&config.analytics_db_path).unwrap();
        let tracker = RequestTracker::new(store, config.analytics_salt.as_str());
        let sessions = SessionManager::new(&root);
        let dispatcher = Dispatcher::new(Arc::new(config), sessions.clone());
        let state = AppState::new(dispatcher, tracker.clone());
        Self {
            _dir: dir,
            root,
            sessions,
            tracker,
            state,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn root_path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// Scope directories currently under the root.
    pub fn scope_dirs(&self) -> usize {
        std::fs::read_dir(self.root.path()).unwrap().count()
    }

    /// Poll until `total_requests` reaches `expected`; recording is asynchronous.
    pub async fn wait_for_requests(&self, expected: i64) -> Snapshot {
        for _ in 0..100 {
            let snapshot = self.tracker.snapshot().await.unwrap();
            if snapshot.overview.total_requests >= expected {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("analytics never reached {expected} requests");
    }

    /// Poll until every scope has been destroyed.
    pub async fn wait_for_cleanup(&self) {
        for _ in 0..100 {
            if self.sessions.live_scopes() == 0 && self.scope_dirs() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "{} scope(s) still alive, {} dir(s) on disk",
            self.sessions.live_scopes(),
            self.scope_dirs()
        );
    }
}

/// A minimal PDF with `pages` pages, each `base + n` points wide.
pub fn pdf_bytes(pages: usize, base: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {n}"))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![0.into(), 0.into(), (base + n as i64).into(), 792.into()],
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Page count of a PDF held in memory.
pub fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes).unwrap().get_pages().len()
}

/// A small solid-colour PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// One multipart part.
pub enum Part<'a> {
    File {
        field: &'a str,
        filename: &'a str,
        data: Vec<u8>,
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

/// Encode `parts` as a `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                field,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
