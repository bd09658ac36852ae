//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: two engines on one loopback
//! network, and a helper that walks them through pairing.

use std::sync::Arc;

use ktn_core::{Folder, Note, Notebook, Timestamp};
use ktn_engine::{EngineConfig, EventSink, PairingSession, Role, ScanOutcome, SyncEngine};
use ktn_store::{EntityStore, MemoryStore};
use ktn_sync::loopback::{LoopbackNetwork, LoopbackOptions, LoopbackTransport};

/// Parse a timestamp literal. Panics on bad input.
pub fn ts(raw: &str) -> Timestamp {
    Timestamp::parse(raw).unwrap_or_else(|e| panic!("bad fixture timestamp {raw:?}: {e}"))
}

pub type TestEngine = SyncEngine<MemoryStore, LoopbackTransport>;

/// Two engines that can reach each other.
pub struct PairFixture {
    pub network: Arc<LoopbackNetwork>,
    pub a: TestEngine,
    pub b: TestEngine,
}

impl PairFixture {
    pub fn new() -> Self {
        Self::with(LoopbackOptions::default(), EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with(LoopbackOptions::default(), config)
    }

    pub fn with(options: LoopbackOptions, config: EngineConfig) -> Self {
        let network = LoopbackNetwork::with_options(options);
        let engine = |config: EngineConfig| {
            SyncEngine::new(Arc::new(MemoryStore::new()), network.transport(), config)
        };
        Self {
            a: engine(config.clone()),
            b: engine(config),
            network,
        }
    }

    pub fn store_a(&self) -> &MemoryStore {
        self.a.store()
    }

    pub fn store_b(&self) -> &MemoryStore {
        self.b.store()
    }

    /// Pair `a` (initiator) with `b` (responder) through the code exchange
    /// and wait for the channel on both sides. Panics if any step fails.
    pub async fn pair(
        &self,
        events_a: EventSink,
        events_b: EventSink,
    ) -> (PairingSession<MemoryStore>, PairingSession<MemoryStore>) {
        let mut a = self
            .a
            .begin_pairing(Role::Initiator, events_a)
            .await
            .unwrap_or_else(|e| panic!("initiator session: {e}"));
        let mut b = self
            .b
            .begin_pairing(Role::Responder, events_b)
            .await
            .unwrap_or_else(|e| panic!("responder session: {e}"));

        let offer = a
            .create_offer()
            .await
            .unwrap_or_else(|e| panic!("create_offer: {e}"));
        let mut answer = None;
        for code in &offer.fragments {
            match b.receive_code(code).await {
                Ok(ScanOutcome::Reply(reply)) => answer = Some(reply),
                Ok(_) => {}
                Err(e) => panic!("responder scan: {e}"),
            }
        }
        let answer = answer.unwrap_or_else(|| panic!("responder produced no answer"));
        for code in &answer.fragments {
            if let Err(e) = a.receive_code(code).await {
                panic!("initiator scan: {e}");
            }
        }

        let (ra, rb) = tokio::join!(a.connect(), b.connect());
        if let Err(e) = ra.and(rb) {
            panic!("connect: {e}");
        }
        (a, b)
    }
}

impl Default for PairFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A small library: one folder holding one notebook holding `notes` notes.
#[derive(Debug, Clone)]
pub struct Library {
    pub folders: Vec<Folder>,
    pub notebooks: Vec<Notebook>,
    pub notes: Vec<Note>,
}

impl Library {
    pub fn sample(prefix: &str, notes: usize, at: Timestamp) -> Self {
        let folder = Folder::new(format!("{prefix}-F"), format!("{prefix} folder"), at.clone());
        let notebook =
            Notebook::new(format!("{prefix}-NB"), format!("{prefix} notebook"), at.clone())
                .in_folder(&folder.id);
        let notes = (0..notes)
            .map(|i| {
                Note::new(format!("{prefix}-N{i}"), format!("{prefix} note {i}"), at.clone())
                    .in_notebook(&notebook.id)
                    .with_content(format!("body of {prefix} note {i}"))
            })
            .collect();
        Self {
            folders: vec![folder],
            notebooks: vec![notebook],
            notes,
        }
    }

    /// Write everything into `store`.
    pub async fn seed<S: EntityStore + ?Sized>(&self, store: &S) -> ktn_store::Result<()> {
        for folder in &self.folders {
            store.upsert_folder(folder).await?;
        }
        for notebook in &self.notebooks {
            store.upsert_notebook(notebook).await?;
        }
        for note in &self.notes {
            store.upsert_note(note).await?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.notebooks.len() + self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sorted ids of every entity in `store`, for convergence checks.
pub async fn all_ids<S: EntityStore + ?Sized>(store: &S) -> ktn_store::Result<Vec<String>> {
    let mut ids: Vec<String> = store
        .get_all_folders()
        .await?
        .into_iter()
        .map(|f| f.id)
        .chain(store.get_all_notebooks().await?.into_iter().map(|n| n.id))
        .chain(store.get_all_notes().await?.into_iter().map(|n| n.id))
        .collect();
    ids.sort();
    Ok(ids)
}
