//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It keeps everything in memory with no
//! persistence, and can be told to fail so error paths can be exercised.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use ktn_core::{Folder, Note, Notebook};

use crate::error::{Result, StoreError};
use crate::traits::{EntityStore, SettingsStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    folders: BTreeMap<String, Folder>,
    notebooks: BTreeMap<String, Notebook>,
    notes: BTreeMap<String, Note>,
    settings: HashMap<String, String>,

    /// When set, every call fails with `Unavailable`.
    unavailable: bool,
    /// Entity ids whose upserts fail.
    rejected_ids: HashSet<String>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Make every subsequent call fail, as if the backend went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write_unchecked().unavailable = unavailable;
    }

    /// Make upserts of the entity with `id` fail.
    pub fn reject_writes_for(&self, id: impl Into<String>) {
        self.write_unchecked().rejected_ids.insert(id.into());
    }

    /// Total number of stored entities across all collections.
    pub fn entity_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.folders.len() + inner.notebooks.len() + inner.notes.len()
    }

    fn write_unchecked(&self) -> std::sync::RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(inner)
    }

    fn write(&self, id: Option<&str>) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        let inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        if let Some(id) = id {
            if inner.rejected_ids.contains(id) {
                return Err(StoreError::InvalidData(format!("write rejected for {id}")));
            }
        }
        Ok(inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_all_folders(&self) -> Result<Vec<Folder>> {
        Ok(self.read()?.folders.values().cloned().collect())
    }

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        Ok(self.read()?.folders.get(id).cloned())
    }

    async fn upsert_folder(&self, folder: &Folder) -> Result<()> {
        self.write(Some(&folder.id))?
            .folders
            .insert(folder.id.clone(), folder.clone());
        Ok(())
    }

    async fn get_folder_children(&self, parent_id: &str) -> Result<Vec<Folder>> {
        Ok(self
            .read()?
            .folders
            .values()
            .filter(|f| f.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn get_all_notebooks(&self) -> Result<Vec<Notebook>> {
        Ok(self.read()?.notebooks.values().cloned().collect())
    }

    async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>> {
        Ok(self.read()?.notebooks.get(id).cloned())
    }

    async fn upsert_notebook(&self, notebook: &Notebook) -> Result<()> {
        self.write(Some(&notebook.id))?
            .notebooks
            .insert(notebook.id.clone(), notebook.clone());
        Ok(())
    }

    async fn get_notebooks_in_folder(&self, folder_id: &str) -> Result<Vec<Notebook>> {
        Ok(self
            .read()?
            .notebooks
            .values()
            .filter(|n| n.folder_id.as_deref() == Some(folder_id))
            .cloned()
            .collect())
    }

    async fn get_all_notes(&self) -> Result<Vec<Note>> {
        Ok(self.read()?.notes.values().cloned().collect())
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        Ok(self.read()?.notes.get(id).cloned())
    }

    async fn upsert_note(&self, note: &Note) -> Result<()> {
        self.write(Some(&note.id))?
            .notes
            .insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn get_notes_in_notebook(&self, notebook_id: &str) -> Result<Vec<Note>> {
        Ok(self
            .read()?
            .notes
            .values()
            .filter(|n| n.notebook_id.as_deref() == Some(notebook_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write(None)?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        self.write(None)?.settings.remove(key);
        Ok(())
    }
}
