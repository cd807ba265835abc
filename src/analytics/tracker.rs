use super::{hash_client, truncate_user_agent, AnalyticsStore, RequestEvent, Snapshot};
use crate::error::ToolError;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Records request events without ever failing the request that produced them.
#[derive(Clone, Debug)]
pub struct RequestTracker {
    store: AnalyticsStore,
    salt: Arc<str>,
}

impl RequestTracker {
    pub fn new(store: AnalyticsStore, salt: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            salt: salt.into(),
        }
    }

    pub fn store(&self) -> &AnalyticsStore {
        &self.store
    }

    /// Build an event stamped now, hashing the client address.
    pub fn event(
        &self,
        tool: &str,
        status_code: u16,
        processing_ms: f64,
        file_count: u32,
        client_addr: Option<&str>,
        user_agent: Option<&str>,
    ) -> RequestEvent {
        RequestEvent {
            timestamp: Utc::now(),
            tool: tool.to_string(),
            status_code,
            processing_ms: (processing_ms * 10.0).round() / 10.0,
            file_count,
            client_hash: client_addr.map(|addr| hash_client(&self.salt, addr)),
            user_agent: user_agent.map(truncate_user_agent),
        }
    }

    /// Insert `event` on the blocking pool. Failures are logged and dropped.
    ///
    /// The handle is only for callers that want to wait (tests, shutdown).
    pub fn record(&self, event: RequestEvent) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.insert(&event) {
                warn!("Analytics: failed to record {} request: {}", event.tool, e);
            }
        })
    }

    pub async fn snapshot(&self) -> Result<Snapshot, ToolError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.snapshot())
            .await
            .map_err(|e| ToolError::Internal(format!("analytics task failed: {e}")))?
    }
}
