//! Integration tests for the journal and the instance repository.
//!
//! These tests drive a file-backed journal through live appends, restores
//! and a restart, and check that replayed projections match the live ones.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use eventfold_journal::{
    Entry, Event, Guid, Index, Instance, InstanceEvent, InstanceService, Journal, JournalError,
    MemoryStore, Repository, RepositoryError,
};
use serde_json::json;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

fn payload(guid: &str, event: &InstanceEvent) -> Vec<u8> {
    Event::from_domain(guid, event)
        .and_then(|e| e.encode())
        .expect("failed to encode event")
}

/// Open a file-backed journal with a fresh instance repository subscribed,
/// then replay whatever is on disk.
fn open(path: &Path) -> (Journal, Arc<Repository<Instance>>) {
    let journal = Journal::builder()
        .file(path)
        .open()
        .expect("failed to open journal");
    let repository: Arc<Repository<Instance>> = Arc::new(Repository::new(MemoryStore::new()));
    journal.subscribe(repository.clone());
    journal.replay().expect("failed to replay journal");
    (journal, repository)
}

/// The end-to-end scenario: create, update, invalid update, out-of-order
/// restore, restart.
#[test]
fn append_update_restore_and_restart() {
    let tmp = tempfile::tempdir().expect("failed to create tmpdir");
    let path = tmp.path().join("journal.jsonl");
    let g1 = Guid::from("g1");
    let g2 = Guid::from("g2");

    let before_restart = {
        let (journal, repository) = open(&path);

        let created = InstanceEvent::Created {
            owner_id: "alice".into(),
            kind: "note".into(),
            created: at(100),
            updated: at(100),
            payload: json!({"text": "first"}),
        };
        let index = journal.append(payload("g1", &created)).expect("append A");
        assert_eq!(index, Index::new(1));
        let instance = repository.get_by_guid(&g1).expect("g1 after create");
        assert_eq!(instance.payload, json!({"text": "first"}));
        assert_eq!(instance.owner_id, "alice");

        let updated = InstanceEvent::Updated {
            updated: at(200),
            payload: json!({"text": "second"}),
        };
        let index = journal.append(payload("g1", &updated)).expect("append B");
        assert_eq!(index, Index::new(2));
        assert_eq!(
            journal.get_entry(index).expect("entry 2").parent_index(),
            Index::new(1)
        );
        let instance = repository.get_by_guid(&g1).expect("g1 after update");
        assert_eq!(instance.payload, json!({"text": "second"}));
        assert_eq!(instance.updated, at(200));
        assert_eq!(instance.created, at(100));

        // The journal accepts the entry; the projection refuses it.
        let orphan = InstanceEvent::Updated {
            updated: at(300),
            payload: json!({"text": "orphan"}),
        };
        let index = journal.append(payload("g2", &orphan)).expect("append C");
        assert_eq!(index, Index::new(3));
        assert!(matches!(
            repository.get_by_guid(&g2),
            Err(RepositoryError::NotFound(g)) if g == g2
        ));

        let err = journal
            .restore(Entry::new(Index::new(5), b"late".to_vec()))
            .expect_err("restore past the tip must fail");
        assert!(err.is_missing_parent());
        assert!(matches!(err, JournalError::MissingParent { tip, .. } if tip == Index::new(3)));
        assert_eq!(journal.last_index(), Index::new(3));

        repository.get_by_guid(&g1).expect("g1 before restart")
    };

    let (journal, repository) = open(&path);
    assert_eq!(journal.last_index(), Index::new(3));
    assert_eq!(
        repository.get_by_guid(&g1).expect("g1 after restart"),
        before_restart
    );
    assert!(repository.get_by_guid(&g2).is_err());
}

/// Projections built live and projections rebuilt by replay are identical
/// for an interleaving of topics across several guids.
#[test]
fn replay_matches_live_projection() {
    let tmp = tempfile::tempdir().expect("failed to create tmpdir");
    let path = tmp.path().join("journal.jsonl");

    let created = |secs, text: &str| InstanceEvent::Created {
        owner_id: "bob".into(),
        kind: "doc".into(),
        created: at(secs),
        updated: at(secs),
        payload: json!({"text": text}),
    };
    let updated = |secs, text: &str| InstanceEvent::Updated {
        updated: at(secs),
        payload: json!({"text": text}),
    };
    let script: Vec<(&str, InstanceEvent)> = vec![
        ("a", created(1, "a1")),
        ("b", updated(2, "too early")),
        ("b", created(3, "b1")),
        ("a", updated(4, "a2")),
        ("c", InstanceEvent::Removed { updated: at(5) }),
        ("b", InstanceEvent::Removed { updated: at(6) }),
        ("c", created(7, "c1")),
        ("a", updated(8, "a3")),
        ("b", updated(9, "b after removal")),
        ("a", created(10, "a reborn")),
    ];

    let live = {
        let (journal, repository) = open(&path);
        for (guid, event) in &script {
            journal.append(payload(guid, event)).expect("append");
        }
        // Entries the repository does not understand are still journaled.
        journal
            .append(b"{\"topic\":\"Archived\",\"guid\":\"YQ==\"}".to_vec())
            .expect("append unknown topic");
        repository.all().expect("live projections")
    };

    let (journal, repository) = open(&path);
    assert_eq!(journal.last_index(), Index::new(script.len() as u64 + 1));
    let replayed = repository.all().expect("replayed projections");

    assert_eq!(replayed, live);
    assert_eq!(live.len(), 3);

    let b = repository.get_by_guid(&Guid::from("b")).expect("b");
    assert!(b.removed);
    assert_eq!(b.payload, json!({"text": "b after removal"}));
}

/// A replica fed from another journal's entries ends up with the same
/// projections, catching up after a gap.
#[test]
fn replica_catches_up_from_missing_parent() {
    let source = Journal::builder().open().expect("open source");
    let source_repo: Arc<Repository<Instance>> = Arc::new(Repository::new(MemoryStore::new()));
    source.subscribe(source_repo.clone());
    let service = InstanceService::new(Arc::new(source), source_repo.clone(), "carol");

    let first = service.create("note", json!(1)).expect("create");
    let id = Guid::from(first.id.as_str());
    service.update(&id, json!(2)).expect("update");
    service.remove(&id).expect("remove");

    let replica = Journal::builder().open().expect("open replica");
    let replica_repo: Arc<Repository<Instance>> = Arc::new(Repository::new(MemoryStore::new()));
    replica.subscribe(replica_repo.clone());

    let third = service.journal().get_entry(Index::new(3)).expect("entry 3");
    let tip = match replica.restore(third) {
        Err(JournalError::MissingParent { tip, .. }) => tip,
        other => panic!("expected MissingParent, got {other:?}"),
    };
    let missing = service.journal().entries_after(tip).expect("entries after tip");
    replica.restore_batch(missing).expect("catch up");

    assert_eq!(replica.last_index(), service.journal().last_index());
    assert_eq!(
        replica_repo.get_by_guid(&id).expect("replica"),
        source_repo.get_by_guid(&id).expect("source")
    );
}

/// A record cut short by a crash is dropped on restart and the journal
/// keeps working.
#[test]
fn torn_tail_is_dropped_on_restart() {
    use std::io::Write;

    let tmp = tempfile::tempdir().expect("failed to create tmpdir");
    let path = tmp.path().join("journal.jsonl");
    let created = InstanceEvent::Created {
        owner_id: "dave".into(),
        kind: "note".into(),
        created: at(1),
        updated: at(1),
        payload: json!("kept"),
    };

    {
        let (journal, _) = open(&path);
        journal.append(payload("g1", &created)).expect("append");
    }
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .expect("open journal file");
    file.write_all(b"{\"index\":2,\"payload\":\"eyJ0")
        .expect("write torn record");
    drop(file);

    let (journal, repository) = open(&path);
    assert_eq!(journal.last_index(), Index::new(1));
    assert_eq!(
        repository.get_by_guid(&Guid::from("g1")).expect("g1").payload,
        json!("kept")
    );

    journal.append(payload("g2", &created)).expect("append after repair");
    drop(journal);
    let (journal, repository) = open(&path);
    assert_eq!(journal.last_index(), Index::new(2));
    assert!(repository.contains(&Guid::from("g2")).expect("contains"));
}
