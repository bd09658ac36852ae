//! SQLite implementation of the store traits.
//!
//! Reference persistent backend. Entities are stored as JSON bodies with
//! their foreign keys copied into indexed columns. All operations run on the
//! blocking pool via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ktn_core::{Entity, Folder, Note, Notebook};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{EntityStore, SettingsStore};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Table layout for one entity type.
trait Table: Entity {
    const TABLE: &'static str;
    const INDEX_COLUMN: &'static str;

    fn index_value(&self) -> Option<&str>;
}

impl Table for Folder {
    const TABLE: &'static str = "folders";
    const INDEX_COLUMN: &'static str = "parent_id";

    fn index_value(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
}

impl Table for Notebook {
    const TABLE: &'static str = "notebooks";
    const INDEX_COLUMN: &'static str = "folder_id";

    fn index_value(&self) -> Option<&str> {
        self.folder_id.as_deref()
    }
}

impl Table for Note {
    const TABLE: &'static str = "notes";
    const INDEX_COLUMN: &'static str = "notebook_id";

    fn index_value(&self) -> Option<&str> {
        self.notebook_id.as_deref()
    }
}

fn decode_rows<E: DeserializeOwned>(bodies: Vec<String>) -> Result<Vec<E>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

fn query_bodies(conn: &Connection, sql: &str, arg: Option<&str>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = match arg {
        Some(arg) => stmt
            .query_map(params![arg], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

impl SqliteStore {
    async fn all<E: Table>(&self) -> Result<Vec<E>> {
        let sql = format!("SELECT body FROM {} ORDER BY id", E::TABLE);
        let bodies = self.with_conn(move |conn| query_bodies(conn, &sql, None)).await?;
        decode_rows(bodies)
    }

    async fn by_index<E: Table>(&self, value: &str) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT body FROM {} WHERE {} = ?1 ORDER BY id",
            E::TABLE,
            E::INDEX_COLUMN
        );
        let value = value.to_string();
        let bodies = self
            .with_conn(move |conn| query_bodies(conn, &sql, Some(&value)))
            .await?;
        decode_rows(bodies)
    }

    async fn get<E: Table>(&self, id: &str) -> Result<Option<E>> {
        let sql = format!("SELECT body FROM {} WHERE id = ?1", E::TABLE);
        let id = id.to_string();
        let body: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(&sql, params![id], |row| row.get(0))
                    .optional()?)
            })
            .await?;
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn upsert<E: Table>(&self, entity: &E) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table} (id, {col}, updated_at, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                {col} = excluded.{col},
                updated_at = excluded.updated_at,
                body = excluded.body",
            table = E::TABLE,
            col = E::INDEX_COLUMN
        );
        let id = entity.id().to_string();
        let index = entity.index_value().map(str::to_string);
        let updated_at = entity.updated_at().as_str().to_string();
        let body = serde_json::to_string(entity)?;

        self.with_conn(move |conn| {
            conn.execute(&sql, params![id, index, updated_at, body])?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn get_all_folders(&self) -> Result<Vec<Folder>> {
        self.all().await
    }

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        self.get(id).await
    }

    async fn upsert_folder(&self, folder: &Folder) -> Result<()> {
        self.upsert(folder).await
    }

    async fn get_folder_children(&self, parent_id: &str) -> Result<Vec<Folder>> {
        self.by_index(parent_id).await
    }

    async fn get_all_notebooks(&self) -> Result<Vec<Notebook>> {
        self.all().await
    }

    async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>> {
        self.get(id).await
    }

    async fn upsert_notebook(&self, notebook: &Notebook) -> Result<()> {
        self.upsert(notebook).await
    }

    async fn get_notebooks_in_folder(&self, folder_id: &str) -> Result<Vec<Notebook>> {
        self.by_index(folder_id).await
    }

    async fn get_all_notes(&self) -> Result<Vec<Note>> {
        self.all().await
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        self.get(id).await
    }

    async fn upsert_note(&self, note: &Note) -> Result<()> {
        self.upsert(note).await
    }

    async fn get_notes_in_notebook(&self, notebook_id: &str) -> Result<Vec<Note>> {
        self.by_index(notebook_id).await
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}
