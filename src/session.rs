//! Per-request session directories.
//!
//! Two owners with two lifetimes:
//!
//! * [`SessionRoot`] owns the process-wide directory that contains every
//!   scope. It is created at startup and wiped-and-recreated at shutdown,
//!   after the server has drained in-flight requests.
//! * [`SessionManager`] hands out [`SessionScope`]s, one private directory per
//!   request, named with 128 bits of OS randomness.
//!
//! ## Removal
//!
//! A scope is removed exactly once, by whoever owns it last: the dispatcher
//! on failure, the streaming response body on success, or after a timeout a
//! reaper task that waits for the abandoned tool to return. The body is
//! dropped after the last chunk, on a transport error, or when the client
//! goes away. `destroy(self)` consumes the guard.

use crate::error::ToolError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts before giving up on finding an unused token.
const ALLOCATE_ATTEMPTS: usize = 3;

/// Random, collision-resistant scope token: 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn random() -> Self {
        SessionId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Process-wide root ────────────────────────────────────────────────────────

/// Owner of the directory that holds every session scope.
#[derive(Debug, Clone)]
pub struct SessionRoot {
    path: PathBuf,
}

impl SessionRoot {
    /// Create the root directory (and parents) if it does not exist yet.
    pub fn prepare(path: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|e| ToolError::io(&path, e))?;
        info!("Session root ready at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wipe the root and recreate it empty.
    ///
    /// Call only after in-flight requests have drained; scopes still alive at
    /// this point lose their files.
    pub fn reset(&self) -> Result<(), ToolError> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ToolError::io(&self.path, e)),
        }
        std::fs::create_dir_all(&self.path).map_err(|e| ToolError::io(&self.path, e))?;
        info!("Session root reset at {}", self.path.display());
        Ok(())
    }
}

// ── Scope allocation ─────────────────────────────────────────────────────────

/// Allocates per-request scopes under a [`SessionRoot`].
///
/// Cheap to clone; clones share the live-scope counter.
#[derive(Debug, Clone)]
pub struct SessionManager {
    root: Arc<PathBuf>,
    live: Arc<AtomicUsize>,
}

impl SessionManager {
    pub fn new(root: &SessionRoot) -> Self {
        Self {
            root: Arc::new(root.path().to_path_buf()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, empty, private scope directory.
    ///
    /// Fails with [`ToolError::Io`] when the root is missing or unwritable.
    pub fn allocate(&self) -> Result<SessionScope, ToolError> {
        for _ in 0..ALLOCATE_ATTEMPTS {
            let id = SessionId::random();
            let path = self.root.join(id.as_str());
            match create_private_dir(&path) {
                Ok(()) => {
                    self.live.fetch_add(1, Ordering::SeqCst);
                    debug!("Allocated session scope {}", id);
                    return Ok(SessionScope {
                        id,
                        path,
                        created_at: Utc::now(),
                        live: Arc::clone(&self.live),
                        destroyed: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!("Session token collision on {}, drawing a new one", id);
                }
                Err(e) => return Err(ToolError::io(path, e)),
            }
        }
        Err(ToolError::Internal(format!(
            "could not allocate a unique session scope in {} attempts",
            ALLOCATE_ATTEMPTS
        )))
    }

    /// Number of scopes allocated and not yet destroyed.
    pub fn live_scopes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().create(path)
}

// ── Scope guard ──────────────────────────────────────────────────────────────

/// One request's private directory. Removed when dropped.
pub struct SessionScope {
    id: SessionId,
    path: PathBuf,
    created_at: DateTime<Utc>,
    live: Arc<AtomicUsize>,
    destroyed: bool,
}

impl SessionScope {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Build a path inside this scope from a relative name.
    ///
    /// Only plain components are accepted: no `..`, no `.`, no root or
    /// drive prefix. Attacker-controlled names therefore cannot escape.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ToolError> {
        let rel = Path::new(name);
        let mut components = 0usize;
        for c in rel.components() {
            match c {
                Component::Normal(_) => components += 1,
                _ => {
                    return Err(ToolError::PathTraversal {
                        name: name.to_string(),
                    })
                }
            }
        }
        if components == 0 {
            return Err(ToolError::PathTraversal {
                name: name.to_string(),
            });
        }
        Ok(self.path.join(rel))
    }

    /// Remove the directory now instead of at drop.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.live.fetch_sub(1, Ordering::SeqCst);

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(
                "Destroyed session scope {} after {} ms",
                self.id,
                (Utc::now() - self.created_at).num_milliseconds()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Session scope {} was already gone", self.id)
            }
            Err(e) => warn!("Failed to remove session scope {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("created_at", &self.created_at)
            .finish()
    }
}
