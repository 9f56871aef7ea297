//! Recently-flushed keys, per actor.
//!
//! During a request, purges are recorded into a task-local [`FlushLog`] (a
//! no-op outside [`with_flush_log`]). When the request ends, the host calls
//! [`FlushQueue::finalize`], which merges the log into the actor's persisted
//! queue. The next time that actor looks, [`FlushQueue::take`] hands the queue
//! over and clears it.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::persist::{ActorId, ScratchStore, StoreError};

const SOURCE: &str = "cache::flush_queue";
const LABEL_LIMIT: usize = 40;
const LABEL_KEEP: usize = 37;

tokio::task_local! {
    static FLUSH_LOG: Arc<Mutex<FlushLog>>;
}

/// Everything flushed within one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushLog {
    keys: BTreeSet<String>,
    all: bool,
}

impl FlushLog {
    pub fn is_empty(&self) -> bool {
        !self.all && self.keys.is_empty()
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    pub fn flushed_all(&self) -> bool {
        self.all
    }

    /// `None` when nothing was flushed.
    pub fn flushed(&self) -> Option<Flushed> {
        if self.all {
            Some(Flushed::All)
        } else if self.keys.is_empty() {
            None
        } else {
            Some(Flushed::Keys(self.keys.clone()))
        }
    }
}

/// Record purged keys in the current request's log.
pub fn record<'a>(keys: impl IntoIterator<Item = &'a CacheKey>) {
    let _ = FLUSH_LOG.try_with(|log| {
        let mut log = mutex_lock(log, SOURCE, "record");
        log.keys
            .extend(keys.into_iter().map(|key| key.as_str().to_string()));
    });
}

/// Record that the whole namespace was flushed.
pub fn record_all() {
    let _ = FLUSH_LOG.try_with(|log| {
        mutex_lock(log, SOURCE, "record_all").all = true;
    });
}

/// Snapshot of the current request's log; empty outside a scope.
pub fn current() -> FlushLog {
    FLUSH_LOG
        .try_with(|log| mutex_lock(log, SOURCE, "current").clone())
        .unwrap_or_default()
}

/// Run `future` with a fresh flush log and return what it recorded.
pub async fn with_flush_log<F, R>(future: F) -> (R, FlushLog)
where
    F: Future<Output = R>,
{
    let log = Arc::new(Mutex::new(FlushLog::default()));
    let result = FLUSH_LOG.scope(log.clone(), future).await;
    let collected = std::mem::take(&mut *mutex_lock(&log, SOURCE, "with_flush_log"));
    (result, collected)
}

/// What a request flushed, ready to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flushed {
    Keys(BTreeSet<String>),
    All,
}

/// Merge a request's flushes into the previously persisted queue.
///
/// A full flush always wins. Key lists are unioned and sorted; a previous
/// value that is not a list is discarded.
pub fn merge(previous: Option<&Value>, flushed: Flushed) -> Value {
    let keys = match flushed {
        Flushed::All => return Value::Bool(true),
        Flushed::Keys(keys) => keys,
    };

    let mut merged: BTreeSet<String> = match previous {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    };
    merged.extend(keys);
    Value::Array(merged.into_iter().map(Value::String).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushedEntry {
    pub label: String,
    pub href: String,
}

/// What an actor is shown about recent flushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum FlushReport {
    Keys(Vec<FlushedEntry>),
    All,
    Nothing,
}

/// Short display label for a flushed key.
pub fn flushed_label(home: &str, key: &str) -> String {
    let home = home.trim_end_matches('/');
    let label = if home.is_empty() {
        key
    } else {
        key.strip_prefix(home).unwrap_or(key)
    };
    if label.is_empty() || label == "/" {
        return "Home".to_string();
    }
    if label.chars().count() > LABEL_LIMIT {
        let kept: String = label.chars().take(LABEL_KEEP).collect();
        return format!("{kept}...");
    }
    label.to_string()
}

/// Persisted per-actor queues on top of a [`ScratchStore`].
pub struct FlushQueue {
    scratch: Arc<dyn ScratchStore>,
    home: String,
}

impl FlushQueue {
    pub fn new(scratch: Arc<dyn ScratchStore>, home: impl Into<String>) -> Self {
        Self {
            scratch,
            home: home.into(),
        }
    }

    /// Merge `log` into the actor's queue. Returns whether anything was written.
    pub async fn finalize(&self, actor: Option<&ActorId>, log: &FlushLog) -> Result<bool, StoreError> {
        let (Some(actor), Some(flushed)) = (actor, log.flushed()) else {
            return Ok(false);
        };

        let previous = self.scratch.load(actor).await?;
        let merged = merge(previous.as_ref(), flushed);
        self.scratch.store(actor, &merged).await?;
        debug!(actor = %actor, "Flush queue persisted");
        Ok(true)
    }

    /// Report for `actor`, preferring what `pending` recorded in this request.
    ///
    /// The persisted queue is cleared once it has been shown.
    pub async fn take(&self, actor: &ActorId, pending: &FlushLog) -> Result<FlushReport, StoreError> {
        let persisted = self.scratch.load(actor).await?;
        let report = match pending.flushed() {
            Some(Flushed::All) => FlushReport::All,
            Some(Flushed::Keys(keys)) => self.entries(keys),
            None => self.report_from(persisted.as_ref()),
        };

        if persisted.is_some() {
            self.scratch.clear(actor).await?;
        }
        Ok(report)
    }

    fn report_from(&self, persisted: Option<&Value>) -> FlushReport {
        match persisted {
            Some(Value::Array(items)) => {
                let keys: BTreeSet<String> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                if keys.is_empty() {
                    FlushReport::Nothing
                } else {
                    self.entries(keys)
                }
            }
            Some(Value::Null) | Some(Value::Bool(false)) | None => FlushReport::Nothing,
            Some(_) => FlushReport::All,
        }
    }

    fn entries(&self, keys: BTreeSet<String>) -> FlushReport {
        FlushReport::Keys(
            keys.into_iter()
                .map(|key| FlushedEntry {
                    label: flushed_label(&self.home, &key),
                    href: key,
                })
                .collect(),
        )
    }
}
