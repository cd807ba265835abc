//! axum middleware that records every `/api/*` request except the analytics
//! endpoint itself.

use super::RequestTracker;
use crate::tools::Tool;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Path prefix of tracked routes.
const API_PREFIX: &str = "/api/";
/// Never tracked, so dashboard polling does not count as usage.
pub const ANALYTICS_PATH: &str = "/api/analytics";

/// Number of uploaded files, attached to a response by the handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCount(pub usize);

/// Analytics name for a request path, or `None` if the path is not tracked.
pub fn tool_name(path: &str) -> Option<String> {
    if !path.starts_with(API_PREFIX) || path == ANALYTICS_PATH {
        return None;
    }
    Some(match Tool::from_route(path) {
        Some(tool) => tool.name().to_string(),
        None => path.trim_start_matches(API_PREFIX).to_string(),
    })
}

/// Install with `middleware::from_fn_with_state(tracker, track_requests)`.
pub async fn track_requests(
    State(tracker): State<RequestTracker>,
    request: Request,
    next: Next,
) -> Response {
    let Some(tool) = tool_name(request.uri().path()) else {
        return next.run(request).await;
    };

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status().as_u16();
    let files = response
        .extensions()
        .get::<FileCount>()
        .copied()
        .unwrap_or_default()
        .0;

    let event = tracker.event(
        &tool,
        status,
        elapsed_ms,
        u32::try_from(files).unwrap_or(u32::MAX),
        client.as_deref(),
        user_agent.as_deref(),
    );
    tracker.record(event);

    info!("Analytics: {} | {} | {:.0}ms", tool, status, elapsed_ms);
    response
}
