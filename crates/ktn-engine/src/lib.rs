//! # ktn Engine
//!
//! The unified API for ktn: offline pairing of two devices and
//! last-write-wins sync of folders, notebooks and notes between them.
//!
//! ## Overview
//!
//! - **Identity**: A random device id and signing keypair, created once per
//!   installation and kept in the settings store
//! - **Pairing**: Offer and answer travel as scanned or pasted codes, no
//!   signaling server involved
//! - **Sync**: Full snapshots cross a direct data channel and are merged
//!   record by record on `updatedAt`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ktn_engine::{EngineConfig, EventSink, Role, SyncEngine, SyncStart};
//! use ktn_engine::store::SqliteStore;
//! use ktn_engine::sync::loopback::LoopbackNetwork;
//!
//! # async fn example() -> ktn_engine::Result<()> {
//! let store = Arc::new(SqliteStore::open("ktn.db")?);
//! let network = LoopbackNetwork::new();
//! let engine = SyncEngine::new(store, network.transport(), EngineConfig::default());
//!
//! engine.ensure_identity().await?;
//! let mut session = engine.begin_pairing(Role::Initiator, EventSink::discard()).await?;
//! let offer = session.create_offer().await?;
//! // show offer.fragments, scan the answer with session.receive_code(..)
//! session.connect().await?;
//! session.sync(SyncStart::Request).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `ktn_engine::core` - Identity, entities, signaling codec
//! - `ktn_engine::store` - Store contracts, memory and SQLite backends
//! - `ktn_engine::sync` - Transport, channel, reconciliation, sessions

pub mod config;
pub mod engine;
pub mod error;

// Re-export component crates
pub use ktn_core as core;
pub use ktn_store as store;
pub use ktn_sync as sync;

pub use config::{EngineConfig, IDENTITY_SETTING_KEY};
pub use engine::{PairingSession, SyncEngine};
pub use error::{EngineError, Result};

// Re-export commonly used types
pub use ktn_core::{DeviceId, DeviceIdentity, Folder, Note, Notebook, Timestamp};
pub use ktn_sync::{
    EventSink, MergeReport, Role, ScanOutcome, SessionStage, SyncEvent, SyncStart,
};
