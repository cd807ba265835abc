//! HTTP surface: axum router, layers, and the serve loop.

pub mod handlers;
pub mod response;

use crate::analytics::middleware::ANALYTICS_PATH;
use crate::analytics::{track_requests, RequestTracker};
use crate::dispatch::Dispatcher;
use crate::tools::Tool;
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use response::{ApiError, ErrorBody};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub tracker: RequestTracker,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, tracker: RequestTracker) -> Self {
        Self {
            dispatcher,
            tracker,
        }
    }
}

/// CORS for the configured browser origins; `*` allows any.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let config = state.dispatcher.config();
    let body_limit = config.request_body_limit();
    let cors = cors_layer(&config.allowed_origins);
    let tracker = state.tracker.clone();

    Router::new()
        .route("/", get(handlers::health))
        .route(ANALYTICS_PATH, get(handlers::analytics))
        .route(Tool::ImageToPdf.route(), post(handlers::image_to_pdf))
        .route(Tool::MergePdf.route(), post(handlers::merge_pdf))
        .route(Tool::SplitPdf.route(), post(handlers::split_pdf))
        .route(Tool::CompressPdf.route(), post(handlers::compress_pdf))
        .route(Tool::UnlockPdf.route(), post(handlers::unlock_pdf))
        .route(Tool::PdfToWord.route(), post(handlers::pdf_to_word))
        .route(Tool::PdfToExcel.route(), post(handlers::pdf_to_excel))
        .route(Tool::PdfToPpt.route(), post(handlers::pdf_to_ppt))
        .route(Tool::HandwritingToPdf.route(), post(handlers::handwriting_to_pdf))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(tracker, track_requests))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
///
/// Connection info is attached so analytics can see the peer address.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    let app = create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Shutdown requested, draining in-flight requests");
    })
    .await
}
