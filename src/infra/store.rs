//! Storage backends for the cache policy and the per-actor flush queues.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::{fs, sync::RwLock};
use tracing::debug;

use crate::cache::{ActorId, OptionStore, ScratchStore, StoreError};

/// Policy tree persisted as a single JSON document.
#[derive(Debug, Clone)]
pub struct FileOptionStore {
    path: PathBuf,
}

impl FileOptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OptionStore for FileOptionStore {
    async fn load(&self) -> Result<Option<Value>, StoreError> {
        read_json(&self.path).await
    }

    async fn save(&self, tree: &Value) -> Result<(), StoreError> {
        write_json(&self.path, tree).await?;
        debug!(path = %self.path.display(), "Cache policy saved");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryOptionStore {
    tree: RwLock<Option<Value>>,
}

impl MemoryOptionStore {
    pub fn with_tree(tree: Value) -> Self {
        Self {
            tree: RwLock::new(Some(tree)),
        }
    }
}

#[async_trait]
impl OptionStore for MemoryOptionStore {
    async fn load(&self) -> Result<Option<Value>, StoreError> {
        Ok(self.tree.read().await.clone())
    }

    async fn save(&self, tree: &Value) -> Result<(), StoreError> {
        *self.tree.write().await = Some(tree.clone());
        Ok(())
    }
}

/// One JSON file per actor under a directory.
///
/// File names are the hex encoding of the actor id, so any id maps to a
/// single safe path component.
#[derive(Debug, Clone)]
pub struct FileScratchStore {
    root: PathBuf,
}

impl FileScratchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn slot(&self, actor: &ActorId) -> PathBuf {
        self.root
            .join(format!("{}.json", hex::encode(actor.as_str().as_bytes())))
    }
}

#[async_trait]
impl ScratchStore for FileScratchStore {
    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError> {
        read_json(&self.slot(actor)).await
    }

    async fn store(&self, actor: &ActorId, value: &Value) -> Result<(), StoreError> {
        write_json(&self.slot(actor), value).await
    }

    async fn clear(&self, actor: &ActorId) -> Result<(), StoreError> {
        match fs::remove_file(self.slot(actor)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryScratchStore {
    slots: DashMap<ActorId, Value>,
}

#[async_trait]
impl ScratchStore for MemoryScratchStore {
    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError> {
        Ok(self.slots.get(actor).map(|entry| entry.value().clone()))
    }

    async fn store(&self, actor: &ActorId, value: &Value) -> Result<(), StoreError> {
        self.slots.insert(actor.clone(), value.clone());
        Ok(())
    }

    async fn clear(&self, actor: &ActorId) -> Result<(), StoreError> {
        self.slots.remove(actor);
        Ok(())
    }
}

async fn read_json(path: &Path) -> Result<Option<Value>, StoreError> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&contents)?))
}

/// Each write stages into its own temp file, so concurrent writers to one slot
/// never share a staging path; the last rename wins.
async fn write_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let contents = serde_json::to_vec_pretty(value)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .suffix(".json")
        .tempfile_in(parent)?
        .into_temp_path();
    fs::write(&staging, contents).await?;
    staging.persist(path).map_err(|err| err.error)?;
    Ok(())
}
