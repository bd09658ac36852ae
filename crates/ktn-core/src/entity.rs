//! Replicated entities: folders, notebooks and notes.
//!
//! An entity's `id` is assigned by the creating device and names the same
//! logical object on every replica forever. Replicas never reconcile by
//! content; only `id` and `updated_at` matter to the merge.
//!
//! Fields a replica does not model are kept in `extra` and written back
//! untouched, so an older build never strips data written by a newer one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::time::Timestamp;

/// The three replicated collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Folder,
    Notebook,
    Note,
}

impl EntityKind {
    /// Merge order: parents before children.
    pub const MERGE_ORDER: [EntityKind; 3] =
        [EntityKind::Folder, EntityKind::Notebook, EntityKind::Note];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folder",
            EntityKind::Notebook => "notebook",
            EntityKind::Note => "note",
        }
    }

    /// Name of the collection key in sync messages.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folders",
            EntityKind::Notebook => "notebooks",
            EntityKind::Note => "notes",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common behaviour of every replicated record.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn updated_at(&self) -> &Timestamp;

    /// Last-write-wins: whether `self` replaces `local`.
    fn supersedes(&self, local: &Self) -> bool {
        self.updated_at().is_after(local.updated_at())
    }
}

/// A folder. Folders form a tree through `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Folder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            created_at: None,
            updated_at,
            extra: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

impl Entity for Folder {
    const KIND: EntityKind = EntityKind::Folder;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}

/// A notebook, optionally filed under a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            folder_id: None,
            created_at: None,
            updated_at,
            extra: Map::new(),
        }
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }
}

impl Entity for Notebook {
    const KIND: EntityKind = EntityKind::Notebook;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}

/// A note inside a notebook.
///
/// `content` is the editor's serialized document; ink strokes, tags and
/// other editor data travel in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Note {
    pub fn new(id: impl Into<String>, title: impl Into<String>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            notebook_id: None,
            title: title.into(),
            content: String::new(),
            created_at: None,
            updated_at,
            extra: Map::new(),
        }
    }

    pub fn in_notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = Some(notebook_id.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

impl Entity for Note {
    const KIND: EntityKind = EntityKind::Note;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}
