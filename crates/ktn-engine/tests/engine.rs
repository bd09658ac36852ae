//! Engine-level behavior: identity lifecycle and the single-session guard.

use std::sync::Arc;

use ktn_engine::store::{EntityStore, MemoryStore, SettingsStore, SqliteStore};
use ktn_engine::sync::loopback::{LoopbackNetwork, LoopbackTransport};
use ktn_engine::{
    EngineConfig, EngineError, EventSink, Role, ScanOutcome, SessionStage, SyncEngine, SyncStart,
    IDENTITY_SETTING_KEY,
};
use ktn_engine::{Folder, Timestamp};

/// Install a test-writer subscriber once per process.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(true)
        .try_init();
}

fn engine(network: &Arc<LoopbackNetwork>) -> SyncEngine<MemoryStore, LoopbackTransport> {
    SyncEngine::new(
        Arc::new(MemoryStore::new()),
        network.transport(),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn test_identity_is_created_once() {
    let network = LoopbackNetwork::new();
    let engine = engine(&network);

    assert!(engine.identity().await.is_none());
    let first = engine.ensure_identity().await.unwrap();
    let second = engine.ensure_identity().await.unwrap();
    assert_eq!(first, second);

    let stored = engine
        .store()
        .get_setting(IDENTITY_SETTING_KEY)
        .await
        .unwrap()
        .expect("identity persisted");
    assert!(hex::decode(&stored).is_ok());

    // A second engine over the same store loads rather than regenerates.
    let again = SyncEngine::new(
        Arc::clone(engine.store()),
        network.transport(),
        EngineConfig::default(),
    );
    assert_eq!(again.ensure_identity().await.unwrap(), first);
    assert_eq!(
        again.identity().await.unwrap().fingerprint(),
        engine.identity().await.unwrap().fingerprint()
    );
}

#[tokio::test]
async fn test_identity_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ktn.db");
    let network = LoopbackNetwork::new();

    let first = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let engine = SyncEngine::new(store, network.transport(), EngineConfig::default());
        engine.ensure_identity().await.unwrap()
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let engine = SyncEngine::new(store, network.transport(), EngineConfig::default());
    assert_eq!(engine.ensure_identity().await.unwrap(), first);
}

#[tokio::test]
async fn test_reset_identity_generates_new_id() {
    let network = LoopbackNetwork::new();
    let engine = engine(&network);

    let before = engine.ensure_identity().await.unwrap();
    let after = engine.reset_identity().await.unwrap();
    assert_ne!(before, after);
    assert_eq!(engine.ensure_identity().await.unwrap(), after);
}

#[tokio::test]
async fn test_identity_store_failure_only_disables_sync() {
    init_tracing();
    let network = LoopbackNetwork::new();
    let engine = engine(&network);
    engine.store().set_unavailable(true);

    let err = engine.ensure_identity().await.unwrap_err();
    assert!(matches!(err, EngineError::IdentityStore(_)));
    assert!(!err.user_message().is_empty());

    let err = engine
        .begin_pairing(Role::Initiator, EventSink::discard())
        .await
        .err()
        .expect("pairing needs an identity");
    assert!(matches!(err, EngineError::IdentityStore(_)));
    assert!(!engine.is_busy());

    engine.store().set_unavailable(false);
    assert!(engine.ensure_identity().await.is_ok());
}

#[tokio::test]
async fn test_corrupt_identity_record() {
    let network = LoopbackNetwork::new();
    let engine = engine(&network);
    engine
        .store()
        .set_setting(IDENTITY_SETTING_KEY, "not hex at all")
        .await
        .unwrap();

    let err = engine.ensure_identity().await.unwrap_err();
    assert!(matches!(err, EngineError::IdentityStore(_)));

    // A device reset recovers.
    assert!(engine.reset_identity().await.is_ok());
}

#[tokio::test]
async fn test_one_session_at_a_time() {
    let network = LoopbackNetwork::new();
    let engine = engine(&network);

    let mut first = engine
        .begin_pairing(Role::Initiator, EventSink::discard())
        .await
        .unwrap();
    assert!(engine.is_busy());

    let err = engine
        .begin_pairing(Role::Responder, EventSink::discard())
        .await
        .err()
        .expect("second session refused");
    assert!(matches!(err, EngineError::SessionBusy));
    assert!(matches!(
        engine.reset_identity().await,
        Err(EngineError::SessionBusy)
    ));

    first.close();
    assert!(!engine.is_busy());

    let second = engine
        .begin_pairing(Role::Responder, EventSink::discard())
        .await
        .unwrap();
    assert!(engine.is_busy());
    drop(second);
    assert!(!engine.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_two_engines_pair_and_sync() {
    init_tracing();
    let network = LoopbackNetwork::new();
    let phone = engine(&network);
    let laptop = engine(&network);

    let created = Timestamp::parse("2026-03-01T08:00:00Z").unwrap();
    laptop
        .store()
        .upsert_folder(&Folder::new("F-work", "Work", created))
        .await
        .unwrap();

    let mut a = phone
        .begin_pairing(Role::Initiator, EventSink::discard())
        .await
        .unwrap();
    let mut b = laptop
        .begin_pairing(Role::Responder, EventSink::discard())
        .await
        .unwrap();

    let offer = a.create_offer().await.unwrap();
    let mut answer = None;
    for code in &offer.fragments {
        if let ScanOutcome::Reply(reply) = b.receive_code(code).await.unwrap() {
            answer = Some(reply);
        }
    }
    let answer = answer.unwrap();
    for code in &answer.fragments {
        a.receive_code(code).await.unwrap();
    }

    let (ra, rb) = tokio::join!(a.connect(), b.connect());
    ra.unwrap();
    rb.unwrap();

    let (ra, rb) = tokio::join!(a.sync(SyncStart::Request), b.sync(SyncStart::Wait));
    assert_eq!(ra.unwrap().folders.inserted, 1);
    assert_eq!(rb.unwrap().total_changed(), 0);
    assert_eq!(a.stage(), SessionStage::Done);

    let folder = phone.store().get_folder("F-work").await.unwrap().unwrap();
    assert_eq!(folder.name, "Work");
}
