//! Policy configuration.
//!
//! The policy is a nested tree addressed by dotted paths (`general.expire`,
//! `options.cookies`, `post.purge.global.front`, ...). A missing segment
//! anywhere along the path yields the caller's default. [`PolicyStore`] loads
//! the tree lazily from an [`OptionStore`] once and caches it for the life of
//! the process.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tracing::{info, warn};

use super::lock::{rw_read, rw_write};
use super::persist::{OptionStore, StoreError};
use super::snapshot::SnapshotWriter;

const SOURCE: &str = "cache::policy";

/// Max-age used when `general.expire` is unset or zero (30 days).
pub const DEFAULT_EXPIRATION_SECS: u64 = 2_592_000;
const DEFAULT_FEED: &str = "rss2";

/// Read-only view over a policy tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    tree: Value,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new(default_tree())
    }
}

impl PolicyConfig {
    pub fn new(tree: Value) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Resolve a dotted path. Non-object intermediates resolve to `None`.
    pub fn value(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.tree);
        }
        path.split('.')
            .try_fold(&self.tree, |node, segment| node.as_object()?.get(segment))
            .filter(|value| !value.is_null())
    }

    /// Typed lookup; absent or mistyped values yield `default`.
    pub fn get<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.value(path)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    pub fn flag(&self, path: &str) -> bool {
        self.value(path).is_some_and(truthy)
    }

    /// Fold `https` into `http` before keys reach a driver. Defaults to on.
    pub fn https_indifferent(&self) -> bool {
        self.value("general.https_indifferent").is_none_or(truthy)
    }

    /// Configured max-age in seconds; zero counts as unset.
    pub fn expire(&self) -> Option<u64> {
        Some(self.get("general.expire", 0_u64)).filter(|secs| *secs > 0)
    }

    pub fn ttl(&self) -> u64 {
        self.expire().unwrap_or(DEFAULT_EXPIRATION_SECS)
    }

    pub fn always_revalidate(&self) -> bool {
        self.flag("options.revalidate")
    }

    pub fn excluded_cookies(&self) -> Vec<String> {
        self.string_list("options.cookies")
    }

    pub fn excluded_paths(&self) -> Vec<String> {
        self.string_list("options.exclude")
    }

    pub fn additional_urls(&self) -> Vec<String> {
        self.string_list("options.additional")
    }

    /// Status codes a response must carry to be cacheable; empty allows all.
    pub fn allowed_status_codes(&self) -> Vec<u16> {
        match self.value("options.statuscode") {
            Some(Value::Array(items)) => items.iter().filter_map(status_code).collect(),
            Some(other) => status_code(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Identifier of the driver selected by configuration.
    pub fn engine_type(&self) -> Option<&str> {
        self.value("engine.type")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn etag(&self) -> Option<i64> {
        self.value("etag").and_then(Value::as_i64)
    }

    /// Whether invalidation for `object` (post, term, user, comment) is on.
    pub fn object_enabled(&self, object: &str) -> bool {
        self.flag(&format!("{object}.enabled"))
    }

    /// A single purge-table switch, e.g. `purge_flag("post", "global.front")`.
    pub fn purge_flag(&self, object: &str, path: &str) -> bool {
        self.flag(&format!("{object}.purge.{path}"))
    }

    pub fn feeds(&self, object: &str) -> Vec<String> {
        self.string_list(&format!("{object}.feed"))
    }

    fn string_list(&self, path: &str) -> Vec<String> {
        match self.value(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(item)) if !item.trim().is_empty() => vec![item.trim().to_string()],
            _ => Vec::new(),
        }
    }
}

/// Loose truthiness of stored and submitted values.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn status_code(value: &Value) -> Option<u16> {
    let code = match value {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    u16::try_from(code).ok().filter(|code| *code > 0)
}

/// Tree used when nothing has been persisted yet.
pub fn default_tree() -> Value {
    json!({
        "general": {
            "pagination": 10,
            "flushing": 50
        },
        "options": {
            "statuscode": 200,
            "revalidate": true,
            "compress-html": true
        },
        "post": {
            "enabled": true,
            "feed": [DEFAULT_FEED],
            "purge": {
                "post": { "term": true, "archive": true },
                "global": { "front": true, "posts": true }
            }
        },
        "term": {
            "enabled": true,
            "feed": [DEFAULT_FEED],
            "purge": {
                "post": { "archive": true },
                "global": { "front": true, "posts": true },
                "term": { "ancestors": true }
            }
        },
        "comment": {
            "enabled": false,
            "type": ["comment"]
        }
    })
}

/// Lazily loaded, process-wide policy cache.
pub struct PolicyStore {
    source: Arc<dyn OptionStore>,
    snapshot: Option<SnapshotWriter>,
    cached: RwLock<Option<Arc<PolicyConfig>>>,
}

impl PolicyStore {
    pub fn new(source: Arc<dyn OptionStore>) -> Self {
        Self {
            source,
            snapshot: None,
            cached: RwLock::new(None),
        }
    }

    pub fn with_snapshot(mut self, writer: SnapshotWriter) -> Self {
        self.snapshot = Some(writer);
        self
    }

    /// Current policy; the first caller loads it, later callers reuse it.
    ///
    /// Storage failures fall back to the default tree for this process.
    pub async fn current(&self) -> Arc<PolicyConfig> {
        let cached = rw_read(&self.cached, SOURCE, "current").clone();
        if let Some(config) = cached {
            return config;
        }

        let config = match self.source.load().await {
            Ok(Some(tree)) => PolicyConfig::new(tree),
            Ok(None) => {
                let tree = default_tree();
                if let Err(err) = self.persist(&tree).await {
                    warn!(error = %err, "Failed to persist default cache policy");
                }
                PolicyConfig::new(tree)
            }
            Err(err) => {
                warn!(error = %err, "Failed to load cache policy, using defaults");
                PolicyConfig::default()
            }
        };

        let mut cached = rw_write(&self.cached, SOURCE, "current.populate");
        cached.get_or_insert_with(|| Arc::new(config)).clone()
    }

    /// Replace the cached tree without touching storage.
    pub fn import(&self, tree: Value) {
        *rw_write(&self.cached, SOURCE, "import") = Some(Arc::new(PolicyConfig::new(tree)));
    }

    /// Drop the cached tree so the next reader reloads from storage.
    pub fn invalidate(&self) {
        *rw_write(&self.cached, SOURCE, "invalidate") = None;
    }

    /// Persist a new tree, refresh the cache and rewrite the snapshot.
    pub async fn update(&self, tree: Value) -> Result<Arc<PolicyConfig>, StoreError> {
        self.persist(&tree).await?;
        let config = Arc::new(PolicyConfig::new(tree));
        *rw_write(&self.cached, SOURCE, "update") = Some(config.clone());
        info!("Cache policy updated");
        Ok(config)
    }

    /// Stamp the tree with a fresh etag so downstream validators change.
    pub async fn bump_etag(&self) -> Result<i64, StoreError> {
        let stamp = OffsetDateTime::now_utc().unix_timestamp();
        let mut tree = self.current().await.tree().clone();
        match tree.as_object_mut() {
            Some(map) => {
                map.insert("etag".to_string(), Value::from(stamp));
            }
            None => {
                let mut map = Map::new();
                map.insert("etag".to_string(), Value::from(stamp));
                tree = Value::Object(map);
            }
        }
        self.update(tree).await?;
        Ok(stamp)
    }

    /// Write the snapshot with the current tree and `enabled = true`.
    pub async fn enable(&self) {
        let tree = self.current().await.tree().clone();
        self.write_snapshot(true, &tree).await;
    }

    /// Write a disabled snapshot carrying an empty tree.
    pub async fn disable(&self) {
        self.write_snapshot(false, &Value::Object(Map::new())).await;
    }

    async fn persist(&self, tree: &Value) -> Result<(), StoreError> {
        self.source.save(tree).await?;
        self.write_snapshot(true, tree).await;
        Ok(())
    }

    async fn write_snapshot(&self, enabled: bool, tree: &Value) {
        let Some(writer) = &self.snapshot else {
            return;
        };
        if let Err(err) = writer.write(enabled, tree).await {
            warn!(
                error = %err,
                path = %writer.path().display(),
                "Failed to write configuration snapshot"
            );
        }
    }
}
