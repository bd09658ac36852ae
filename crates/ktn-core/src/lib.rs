//! # ktn Core
//!
//! Pure primitives for the ktn pairing-and-sync engine: device identity,
//! replicated entities, timestamps and the out-of-band signaling codec.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`DeviceIdentity`] - Per-installation device id and signing keypair
//! - [`Folder`], [`Notebook`], [`Note`] - The three replicated collections
//! - [`Timestamp`] - ISO-8601 modification time used for last-write-wins
//! - [`SignalingPayload`] - Offer/answer exchanged over the visual channel
//! - [`FragmentAssembler`] - Reassembles `KTN1:` fragments scanned in any order
//!
//! ## Signaling
//!
//! Signaling payloads are compacted to single-character keys before they are
//! split into fragments, because QR capacity is small:
//!
//! ```rust
//! use ktn_core::{encode_for_transfer, decode_signaling, SessionDescription, SignalingPayload};
//!
//! let offer = SignalingPayload::Offer(SessionDescription::new("v=0\r\n"));
//! let transfer = encode_for_transfer(&offer, 1500).unwrap();
//! assert_eq!(transfer.fragments.len(), 1);
//! assert_eq!(decode_signaling(&transfer.text).unwrap(), offer);
//! ```

pub mod entity;
pub mod error;
pub mod fragment;
pub mod identity;
pub mod signaling;
pub mod time;

pub use entity::{Entity, EntityKind, Folder, Note, Notebook};
pub use error::{CoreError, Result};
pub use fragment::{
    parse, split, wrap, Fragment, FragmentAssembler, FragmentProgress, DEFAULT_FRAGMENT_SIZE,
    FRAGMENT_PREFIX,
};
pub use identity::{DeviceId, DeviceIdentity, DeviceKeypair, DevicePublicKey};
pub use signaling::{
    compact, decode_signaling, encode_compact, encode_for_transfer, expand, IceCandidate,
    OutOfBand, SessionDescription, SignalingKind, SignalingPayload,
};
pub use time::Timestamp;
