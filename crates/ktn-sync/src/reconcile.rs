//! Last-write-wins reconciliation of full snapshots.
//!
//! For every remote entity: insert it if the id is unknown locally, overwrite
//! the local copy if the remote `updated_at` is strictly later, otherwise
//! leave the local copy alone. Collections merge parents first (folders,
//! then notebooks, then notes). A failure on one entity is logged and
//! skipped; the rest of the batch continues. Nothing is rolled back.

use serde_json::Value;

use ktn_core::{Entity, EntityKind, Folder, Note, Notebook, Timestamp};
use ktn_store::{EntityAccess, EntityStore};

use crate::error::{Result, SyncError};
use crate::messages::Snapshot;

/// Changes applied to one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Remote entities that were unknown locally.
    pub inserted: usize,
    /// Local entities overwritten by a newer remote copy.
    pub updated: usize,
}

impl CollectionReport {
    /// Inserted plus overwritten.
    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }
}

/// A remote entity that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    pub kind: EntityKind,
    /// Absent when the record had no readable id.
    pub id: Option<String>,
    pub reason: String,
}

impl From<SkippedEntity> for SyncError {
    fn from(skipped: SkippedEntity) -> Self {
        SyncError::MergeEntity {
            kind: skipped.kind,
            id: skipped.id,
            reason: skipped.reason,
        }
    }
}

/// Outcome of merging one or more snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub folders: CollectionReport,
    pub notebooks: CollectionReport,
    pub notes: CollectionReport,
    pub skipped: Vec<SkippedEntity>,
}

impl MergeReport {
    pub fn collection(&self, kind: EntityKind) -> &CollectionReport {
        match kind {
            EntityKind::Folder => &self.folders,
            EntityKind::Notebook => &self.notebooks,
            EntityKind::Note => &self.notes,
        }
    }

    fn collection_mut(&mut self, kind: EntityKind) -> &mut CollectionReport {
        match kind {
            EntityKind::Folder => &mut self.folders,
            EntityKind::Notebook => &mut self.notebooks,
            EntityKind::Note => &mut self.notes,
        }
    }

    /// Changes across all collections.
    pub fn total_changed(&self) -> usize {
        EntityKind::MERGE_ORDER
            .iter()
            .map(|kind| self.collection(*kind).changed())
            .sum()
    }

    /// Fold another report into this one.
    pub fn absorb(&mut self, other: MergeReport) {
        for kind in EntityKind::MERGE_ORDER {
            let theirs = *other.collection(kind);
            let ours = self.collection_mut(kind);
            ours.inserted += theirs.inserted;
            ours.updated += theirs.updated;
        }
        self.skipped.extend(other.skipped);
    }
}

/// What merging one entity did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Merge one remote entity into the store.
pub async fn merge_entity<E, S>(store: &S, remote: &E) -> Result<MergeOutcome>
where
    E: Entity,
    S: EntityAccess<E> + ?Sized,
{
    match store.load(remote.id()).await? {
        None => {
            store.save(remote).await?;
            Ok(MergeOutcome::Inserted)
        }
        Some(local) if remote.supersedes(&local) => {
            store.save(remote).await?;
            Ok(MergeOutcome::Updated)
        }
        Some(_) => Ok(MergeOutcome::Unchanged),
    }
}

fn entity_id(value: &Value) -> Option<String> {
    value.get("id").and_then(Value::as_str).map(str::to_string)
}

async fn merge_value<E, S>(
    store: &S,
    value: &Value,
) -> std::result::Result<MergeOutcome, SkippedEntity>
where
    E: Entity,
    S: EntityAccess<E> + ?Sized,
{
    let skip = |id: Option<String>, reason: String| SkippedEntity {
        kind: E::KIND,
        id,
        reason,
    };
    let entity: E = serde_json::from_value(value.clone())
        .map_err(|e| skip(entity_id(value), e.to_string()))?;
    merge_entity(store, &entity)
        .await
        .map_err(|e| skip(Some(entity.id().to_string()), e.to_string()))
}

/// Merge one collection of raw remote records.
pub async fn merge_collection<E, S>(store: &S, values: &[Value], report: &mut MergeReport)
where
    E: Entity,
    S: EntityAccess<E> + ?Sized,
{
    for value in values {
        match merge_value::<E, S>(store, value).await {
            Ok(MergeOutcome::Inserted) => report.collection_mut(E::KIND).inserted += 1,
            Ok(MergeOutcome::Updated) => report.collection_mut(E::KIND).updated += 1,
            Ok(MergeOutcome::Unchanged) => {}
            Err(skipped) => {
                tracing::warn!(error = %SyncError::from(skipped.clone()), "skipping entity");
                report.skipped.push(skipped);
            }
        }
    }
}

/// Merge a snapshot, folders then notebooks then notes.
pub async fn merge_snapshot<S>(store: &S, snapshot: &Snapshot) -> MergeReport
where
    S: EntityStore + ?Sized,
{
    let mut report = MergeReport::default();
    merge_collection::<Folder, S>(store, snapshot.collection(EntityKind::Folder), &mut report)
        .await;
    merge_collection::<Notebook, S>(store, snapshot.collection(EntityKind::Notebook), &mut report)
        .await;
    merge_collection::<Note, S>(store, snapshot.collection(EntityKind::Note), &mut report).await;

    tracing::info!(
        folders = report.folders.changed(),
        notebooks = report.notebooks.changed(),
        notes = report.notes.changed(),
        skipped = report.skipped.len(),
        "merged snapshot"
    );
    report
}

/// Read the full local collections into a snapshot.
pub async fn gather_snapshot<S>(store: &S) -> Result<Snapshot>
where
    S: EntityStore + ?Sized,
{
    let mut snapshot = Snapshot::new(Timestamp::now());
    for folder in store.get_all_folders().await? {
        snapshot.push(&folder)?;
    }
    for notebook in store.get_all_notebooks().await? {
        snapshot.push(&notebook)?;
    }
    for note in store.get_all_notes().await? {
        snapshot.push(&note)?;
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktn_store::MemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(ts("2026-03-01T00:00:00Z"))
    }

    #[tokio::test]
    async fn test_inserts_unknown_folder() {
        let store = MemoryStore::new();
        let remote = snapshot()
            .with(&Folder::new("F1", "Inbox", ts("2026-01-01T00:00:00Z")))
            .unwrap();

        let report = merge_snapshot(&store, &remote).await;

        assert_eq!(report.folders.changed(), 1);
        assert_eq!(report.folders.inserted, 1);
        let folder = store.get_folder("F1").await.unwrap().unwrap();
        assert_eq!(folder.updated_at.as_str(), "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_keeps_newer_local_note() {
        let store = MemoryStore::new();
        let local = Note::new("N1", "mine", ts("2026-02-01T00:00:00Z"));
        store.upsert_note(&local).await.unwrap();

        let remote = snapshot()
            .with(&Note::new("N1", "theirs", ts("2026-01-15T00:00:00Z")))
            .unwrap();
        let report = merge_snapshot(&store, &remote).await;

        assert_eq!(report.notes.changed(), 0);
        assert_eq!(store.get_note("N1").await.unwrap(), Some(local));
    }

    #[tokio::test]
    async fn test_overwrites_older_local_with_remote_timestamp() {
        let store = MemoryStore::new();
        store
            .upsert_notebook(&Notebook::new("B1", "old", ts("2026-01-01T00:00:00Z")))
            .await
            .unwrap();

        let remote = Notebook::new("B1", "new", ts("2026-01-02T00:00:00Z")).in_folder("F1");
        let report = merge_snapshot(&store, &snapshot().with(&remote).unwrap()).await;

        assert_eq!(report.notebooks.updated, 1);
        assert_eq!(store.get_notebook("B1").await.unwrap(), Some(remote));
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_local() {
        let store = MemoryStore::new();
        let t = ts("2026-01-01T00:00:00Z");
        let local = Folder::new("F1", "mine", t.clone());
        store.upsert_folder(&local).await.unwrap();

        let report =
            merge_snapshot(&store, &snapshot().with(&Folder::new("F1", "theirs", t)).unwrap())
                .await;
        assert_eq!(report.total_changed(), 0);
        assert_eq!(store.get_folder("F1").await.unwrap(), Some(local));
    }

    #[tokio::test]
    async fn test_second_application_changes_nothing() {
        let store = MemoryStore::new();
        let remote = snapshot()
            .with(&Folder::new("F1", "a", ts("2026-01-01T00:00:00Z")))
            .unwrap()
            .with(&Notebook::new("B1", "b", ts("2026-01-01T00:00:00Z")).in_folder("F1"))
            .unwrap()
            .with(&Note::new("N1", "c", ts("2026-01-01T00:00:00Z")).in_notebook("B1"))
            .unwrap();

        let first = merge_snapshot(&store, &remote).await;
        assert_eq!(first.total_changed(), 3);
        let state = gather_snapshot(&store).await.unwrap();

        let second = merge_snapshot(&store, &remote).await;
        assert_eq!(second.total_changed(), 0);
        let again = gather_snapshot(&store).await.unwrap();
        assert_eq!(state.folders, again.folders);
        assert_eq!(state.notebooks, again.notebooks);
        assert_eq!(state.notes, again.notes);
    }

    #[tokio::test]
    async fn test_bad_records_are_skipped() {
        let store = MemoryStore::new();
        store.reject_writes_for("N-reject");

        let mut remote = snapshot()
            .with(&Note::new("N-ok", "fine", ts("2026-01-01T00:00:00Z")))
            .unwrap()
            .with(&Note::new("N-reject", "fine", ts("2026-01-01T00:00:00Z")))
            .unwrap();
        remote.notes.push(json!({"id": "N-bad-ts", "updatedAt": "yesterday"}));
        remote.notes.push(json!({"title": "no id"}));

        let report = merge_snapshot(&store, &remote).await;

        assert_eq!(report.notes.inserted, 1);
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.id.as_deref()).collect();
        assert_eq!(skipped, vec![Some("N-reject"), Some("N-bad-ts"), None]);
        assert!(report.skipped.iter().all(|s| s.kind == EntityKind::Note));
        assert!(store.get_note("N-ok").await.unwrap().is_some());

        let err = SyncError::from(report.skipped[0].clone());
        assert_eq!(err.kind(), crate::SyncErrorKind::MergeEntity);
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_unknown_fields_survive_merge() {
        let store = MemoryStore::new();
        let mut remote = snapshot();
        remote.notes.push(json!({
            "id": "N1",
            "title": "t",
            "content": "c",
            "updatedAt": "2026-01-01T00:00:00Z",
            "inkStrokes": [[1, 2], [3, 4]]
        }));

        merge_snapshot(&store, &remote).await;
        let gathered = gather_snapshot(&store).await.unwrap();
        assert_eq!(gathered.notes[0]["inkStrokes"], json!([[1, 2], [3, 4]]));
    }

    #[tokio::test]
    async fn test_report_absorb() {
        let mut total = MergeReport::default();
        total.notes.inserted = 1;
        let mut other = MergeReport::default();
        other.notes.updated = 2;
        other.skipped.push(SkippedEntity {
            kind: EntityKind::Folder,
            id: None,
            reason: "x".into(),
        });

        total.absorb(other);
        assert_eq!(total.notes.changed(), 3);
        assert_eq!(total.skipped.len(), 1);
    }

    fn arb_instant() -> impl Strategy<Value = Timestamp> {
        (0i64..4_000_000_000, 0u32..1000).prop_map(|(secs, millis)| {
            let at = chrono::DateTime::from_timestamp(secs, millis * 1_000_000)
                .expect("in range");
            Timestamp::from_datetime(at)
        })
    }

    proptest! {
        #[test]
        fn prop_remote_wins_iff_strictly_later(t1 in arb_instant(), t2 in arb_instant()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let store = MemoryStore::new();
                let local = Note::new("N1", "local", t1.clone());
                let remote = Note::new("N1", "remote", t2.clone());
                store.upsert_note(&local).await.unwrap();

                let report = merge_snapshot(&store, &snapshot().with(&remote).unwrap()).await;
                let merged = store.get_note("N1").await.unwrap().unwrap();

                if t2.is_after(&t1) {
                    prop_assert_eq!(merged, remote);
                    prop_assert_eq!(report.notes.updated, 1);
                } else {
                    prop_assert_eq!(merged, local);
                    prop_assert_eq!(report.notes.changed(), 0);
                }
                Ok(())
            })?;
        }
    }
}
