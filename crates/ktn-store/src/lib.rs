//! # ktn Store
//!
//! Storage contracts consumed by the sync engine, with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The document store belongs to the host application. The engine talks to
//! it through [`EntityStore`] (three replicated collections) and
//! [`SettingsStore`] (where the device identity lives). [`SqliteStore`] is
//! the reference persistent backend; [`MemoryStore`] is for tests.
//!
//! ## Key Types
//!
//! - [`EntityStore`] - Folders, notebooks and notes by id and by parent
//! - [`SettingsStore`] - Key-value settings
//! - [`EntityAccess`] - One collection viewed generically, for merge code
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ktn_core::{Note, Timestamp};
//! use ktn_store::{EntityStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("ktn.db").unwrap();
//!
//!     let note = Note::new("n-1", "Groceries", Timestamp::now());
//!     store.upsert_note(&note).await.unwrap();
//!
//!     let notes = store.get_all_notes().await.unwrap();
//!     assert_eq!(notes.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Upserts keep timestamps**: `updated_at` is stored as given, never bumped
//! - **Unknown fields survive**: entity bodies are stored whole as JSON
//! - **No transactions across calls**: each upsert stands alone

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{EntityAccess, EntityStore, SettingsStore};
