//! Persistence contracts consumed by the cache core.
//!
//! The host owns storage; the core only needs a place to keep the policy tree
//! and a per-actor scratch slot for the flushed-keys queue.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Identity of the user a flush is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent home of the policy configuration tree.
#[async_trait]
pub trait OptionStore: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Value>, StoreError>;

    async fn save(&self, tree: &Value) -> Result<(), StoreError>;
}

/// Per-actor scratch storage surviving across requests.
///
/// Values are opaque JSON: older writers may have left shapes the current
/// code does not produce, and readers must tolerate that.
#[async_trait]
pub trait ScratchStore: Send + Sync {
    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError>;

    async fn store(&self, actor: &ActorId, value: &Value) -> Result<(), StoreError>;

    async fn clear(&self, actor: &ActorId) -> Result<(), StoreError>;
}
