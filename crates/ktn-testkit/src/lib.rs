//! # ktn Testkit
//!
//! Testing utilities for ktn.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Wire vectors**: Signaling payloads and data-channel frames with the
//!   exact JSON other clients exchange
//! - **Generators**: Proptest strategies for entities, snapshots and
//!   signaling payloads
//! - **Fixtures**: Two engines on a loopback network, paired in one call
//!
//! ## Wire Vectors
//!
//! ```rust
//! use ktn_testkit::vectors::verify_all_vectors;
//!
//! verify_all_vectors().unwrap();
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use ktn_testkit::generators::signaling_payload;
//!
//! proptest! {
//!     #[test]
//!     fn compact_round_trips(payload in signaling_payload()) {
//!         let text = ktn_core::encode_compact(&payload).unwrap();
//!         prop_assert_eq!(ktn_core::decode_signaling(&text).unwrap(), payload);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use ktn_testkit::fixtures::PairFixture;
//! use ktn_engine::{EventSink, SyncStart};
//!
//! # async fn example() {
//! let fixture = PairFixture::new();
//! let (mut a, mut b) = fixture.pair(EventSink::discard(), EventSink::discard()).await;
//! let (ra, rb) = tokio::join!(a.sync(SyncStart::Request), b.sync(SyncStart::Wait));
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{all_ids, ts, Library, PairFixture, TestEngine};
pub use vectors::{message_vectors, signaling_vectors, verify_all_vectors};
