//! Configuration snapshot for early bootstrap.
//!
//! Mirrors the policy tree into a TOML file that can be read before the
//! option store is reachable (for example by an edge worker deciding whether
//! the cache layer is active at all).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::policy::PolicyConfig;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access snapshot `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    enabled: bool,
    config: &'a Value,
}

#[derive(Deserialize)]
struct SnapshotIn {
    enabled: bool,
    #[serde(default)]
    config: Option<Value>,
}

/// Snapshot contents as read back at bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapSnapshot {
    pub enabled: bool,
    pub config: PolicyConfig,
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the snapshot document without touching the filesystem.
    ///
    /// TOML has no null, so null entries are left out; readers fall back to
    /// their defaults for them exactly as for absent keys.
    pub fn render(enabled: bool, tree: &Value) -> Result<String, SnapshotError> {
        let config = match tree {
            Value::Object(_) => without_nulls(tree),
            _ => Value::Object(Default::default()),
        };
        Ok(toml::to_string(&SnapshotOut {
            enabled,
            config: &config,
        })?)
    }

    pub async fn write(&self, enabled: bool, tree: &Value) -> Result<(), SnapshotError> {
        let contents = Self::render(enabled, tree)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), enabled, "Configuration snapshot written");
        Ok(())
    }

    /// Read a snapshot back; `None` when the file does not exist.
    pub async fn load(&self) -> Result<Option<BootstrapSnapshot>, SnapshotError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };

        let parsed: SnapshotIn = toml::from_str(&contents)?;
        Ok(Some(BootstrapSnapshot {
            enabled: parsed.enabled,
            config: PolicyConfig::new(parsed.config.unwrap_or(Value::Null)),
        }))
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, item)| !item.is_null())
                .map(|(key, item)| (key.clone(), without_nulls(item)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| !item.is_null())
                .map(without_nulls)
                .collect(),
        ),
        other => other.clone(),
    }
}
