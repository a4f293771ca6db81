// src/store/memory.rs
//! In-memory document store, optionally backed by a JSON snapshot file.
//!
//! Snapshot format: `{ "<collection path>": { "<doc id>": { ...fields } } }`.
//! When opened with a snapshot path, every write re-persists the whole snapshot
//! (temp file + rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::fs;

use super::{apply_query, Document, DocumentStore, Query, StoreError};

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    snapshot: Option<PathBuf>,
    // Serializes snapshot writes so the last writer always flushes the latest state.
    flush: tokio::sync::Mutex<()>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists (empty store otherwise) and persist every write back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let collections = match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str::<Collections>(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            path = %path.display(),
            collections = collections.len(),
            "memory store opened from snapshot"
        );
        Ok(Self {
            collections: RwLock::new(collections),
            snapshot: Some(path),
            ..Self::default()
        })
    }

    /// Builder-style seeding for fixtures. Invalid paths are ignored.
    pub fn with_document(self, path: &str, doc: Document) -> Self {
        self.insert(path, doc);
        self
    }

    /// Synchronous insert used for seeding; does not count as a pipeline write.
    pub fn insert(&self, path: &str, doc: Document) {
        let Ok((collection, id)) = split_doc_path(path) else {
            tracing::warn!(path, "ignoring seed document with invalid path");
            return;
        };
        let mut g = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        g.entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }

    /// Number of `set` calls served so far. Appends and deletes are not counted.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    async fn flush_snapshot(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let _flush = self.flush.lock().await;
        let bytes = {
            let g = self.read()?;
            serde_json::to_vec_pretty(&*g)?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

fn split_doc_path(path: &str) -> Result<(&str, &str), StoreError> {
    let invalid = || StoreError::InvalidPath(path.to_string());
    let (collection, id) = path.rsplit_once('/').ok_or_else(invalid)?;
    let segments = collection.split('/').count() + 1;
    if id.is_empty() || collection.split('/').any(str::is_empty) || segments % 2 != 0 {
        return Err(invalid());
    }
    Ok((collection, id))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let (collection, id) = split_doc_path(path)?;
        let g = self.read()?;
        Ok(g.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, path: &str, doc: Document) -> Result<(), StoreError> {
        let (collection, id) = split_doc_path(path)?;
        {
            let mut g = self.write()?;
            g.entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.flush_snapshot().await
    }

    async fn add(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        // validates the collection half of the path
        split_doc_path(&format!("{collection}/_"))?;
        let path = {
            let mut g = self.write()?;
            let docs = g.entry(collection.to_string()).or_default();
            let mut n = docs.len() + 1;
            while docs.contains_key(&format!("{n:08}")) {
                n += 1;
            }
            let id = format!("{n:08}");
            docs.insert(id.clone(), doc);
            format!("{collection}/{id}")
        };
        self.flush_snapshot().await?;
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let (collection, id) = split_doc_path(path)?;
        let removed = {
            let mut g = self.write()?;
            let removed = g.get_mut(collection).and_then(|c| c.remove(id)).is_some();
            if g.get(collection).is_some_and(BTreeMap::is_empty) {
                g.remove(collection);
            }
            removed
        };
        if removed {
            self.flush_snapshot().await?;
        }
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let docs = {
            let g = self.read()?;
            g.get(collection)
                .map(|c| c.values().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        Ok(apply_query(docs, query))
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let g = self.read()?;
        Ok(g.get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
