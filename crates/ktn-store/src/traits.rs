//! Store traits: the interfaces the sync engine consumes.
//!
//! The document store itself belongs to the host application. The engine
//! only needs whole-collection reads, point lookups by id and upserts, plus a
//! small key-value settings area for the device identity.

use async_trait::async_trait;
use ktn_core::{Entity, Folder, Note, Notebook};

use crate::error::Result;

/// Access to the three replicated collections.
///
/// `upsert_*` stores the entity exactly as given, including its
/// `updated_at`; the sync engine relies on that to keep the remote timestamp
/// when it overwrites a local record.
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Folders
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_all_folders(&self) -> Result<Vec<Folder>>;

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>>;

    async fn upsert_folder(&self, folder: &Folder) -> Result<()>;

    /// Folders whose `parent_id` is `parent_id`.
    async fn get_folder_children(&self, parent_id: &str) -> Result<Vec<Folder>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Notebooks
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_all_notebooks(&self) -> Result<Vec<Notebook>>;

    async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>>;

    async fn upsert_notebook(&self, notebook: &Notebook) -> Result<()>;

    async fn get_notebooks_in_folder(&self, folder_id: &str) -> Result<Vec<Notebook>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Notes
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_all_notes(&self) -> Result<Vec<Note>>;

    async fn get_note(&self, id: &str) -> Result<Option<Note>>;

    async fn upsert_note(&self, note: &Note) -> Result<()>;

    async fn get_notes_in_notebook(&self, notebook_id: &str) -> Result<Vec<Note>>;
}

/// Key-value settings persisted by the host.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn delete_setting(&self, key: &str) -> Result<()>;
}

/// Uniform access to one collection, so merge logic can be written once.
///
/// Implemented for every [`EntityStore`] and each entity type.
#[async_trait]
pub trait EntityAccess<E: Entity>: Send + Sync {
    async fn load_all(&self) -> Result<Vec<E>>;

    async fn load(&self, id: &str) -> Result<Option<E>>;

    async fn save(&self, entity: &E) -> Result<()>;
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityAccess<Folder> for S {
    async fn load_all(&self) -> Result<Vec<Folder>> {
        self.get_all_folders().await
    }

    async fn load(&self, id: &str) -> Result<Option<Folder>> {
        self.get_folder(id).await
    }

    async fn save(&self, entity: &Folder) -> Result<()> {
        self.upsert_folder(entity).await
    }
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityAccess<Notebook> for S {
    async fn load_all(&self) -> Result<Vec<Notebook>> {
        self.get_all_notebooks().await
    }

    async fn load(&self, id: &str) -> Result<Option<Notebook>> {
        self.get_notebook(id).await
    }

    async fn save(&self, entity: &Notebook) -> Result<()> {
        self.upsert_notebook(entity).await
    }
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityAccess<Note> for S {
    async fn load_all(&self) -> Result<Vec<Note>> {
        self.get_all_notes().await
    }

    async fn load(&self, id: &str) -> Result<Option<Note>> {
        self.get_note(id).await
    }

    async fn save(&self, entity: &Note) -> Result<()> {
        self.upsert_note(entity).await
    }
}
