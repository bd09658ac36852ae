//! # ktn Sync
//!
//! Pairing and snapshot exchange between two devices over a direct
//! peer-to-peer data channel.
//!
//! ## Overview
//!
//! Two devices pair by showing each other a code: the initiator's offer,
//! then the responder's answer, each cut into `KTN1:` fragments small enough
//! for a QR code. Once the data channel opens, both sides exchange full
//! snapshots of their folders, notebooks and notes and merge them with
//! last-write-wins on `updatedAt`.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Merging the same snapshot twice changes nothing
//! - **Order-preserving merge**: Folders, then notebooks, then notes
//! - **Bounded**: Gathering, channel open and message waits all time out
//! - **Chunked**: Frames larger than 16 KiB are split and reassembled
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ktn_core::DeviceId;
//! use ktn_store::MemoryStore;
//! use ktn_sync::{loopback::LoopbackNetwork, EventSink, Role, SyncConfig, SyncSession, SyncStart};
//!
//! # async fn example() -> ktn_sync::Result<()> {
//! let network = LoopbackNetwork::new();
//! let store = Arc::new(MemoryStore::new());
//! let mut session = SyncSession::new(
//!     Role::Initiator,
//!     store,
//!     &network.transport(),
//!     DeviceId::random(),
//!     SyncConfig::default(),
//!     EventSink::discard(),
//! )
//! .await?;
//!
//! let offer = session.create_offer().await?;
//! // show offer.fragments, scan the answer back with receive_code
//! session.connect().await?;
//! let report = session.sync(SyncStart::Request).await?;
//! println!("{} records changed", report.total_changed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Device A                              Device B
//!   |==== offer (KTN1 fragments) =======>|
//!   |<=== answer (KTN1 fragments) =======|
//!   |-------- sync_request ------------->|
//!   |<------- sync_data -----------------|
//!   |-------- sync_ack ----------------->|
//! ```

pub mod channel;
pub mod chunk;
pub mod error;
pub mod events;
pub mod messages;
pub mod negotiator;
pub mod protocol;
pub mod reconcile;
pub mod transport;

pub use channel::{ChannelConfig, ChunkedChannel};
pub use chunk::{chunk_frame, new_chunk_id, split_frame, ChunkReassembler};
pub use error::{Result, SyncError, SyncErrorKind};
pub use events::{EventSink, SessionStage, SyncEvent};
pub use messages::{limits, AppMessage, ChunkEnvelope, Snapshot, CHUNK_TYPE};
pub use negotiator::{
    NegotiationConfig, NegotiationState, Negotiator, Role, DEFAULT_STUN_SERVER,
};
pub use protocol::{ScanOutcome, SyncConfig, SyncSession, SyncStart};
pub use reconcile::{
    gather_snapshot, merge_collection, merge_entity, merge_snapshot, CollectionReport,
    MergeOutcome, MergeReport, SkippedEntity,
};
pub use transport::{
    loopback, ChannelState, ConnectionState, DataChannel, DirectTransport, PeerConnection,
    PeerEvent,
};
