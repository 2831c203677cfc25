use entry_sync_core::repo::entry_repo::{LocalWrite, PendingDelete};
use entry_sync_core::{Entry, EntryRepository, RepoError, ScopeId, SqliteEntryRepository};
use uuid::Uuid;

fn scope(name: &str) -> ScopeId {
    ScopeId::new(name)
}

fn scoped(payload: &str, created_at: i64, owner: &ScopeId) -> Entry {
    Entry::new(payload.as_bytes().to_vec(), created_at).in_scope(owner)
}

#[test]
fn fetch_all_orders_newest_created_first() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    let oldest = scoped("oldest", 10, &user);
    let newest = scoped("newest", 30, &user);
    let middle = scoped("middle", 20, &user);

    for entry in [&oldest, &newest, &middle] {
        repo.upsert(entry).unwrap();
    }

    let ids: Vec<Uuid> = repo.fetch_all(&user).unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![newest.id, middle.id, oldest.id]);
}

#[test]
fn scopes_do_not_see_each_other() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user_a = scope("user-a");
    let user_b = scope("user-b");
    let shared_id = Uuid::new_v4();

    repo.upsert(&Entry::with_id(shared_id, b"a".to_vec(), 1).in_scope(&user_a))
        .unwrap();
    repo.upsert(&Entry::with_id(shared_id, b"b".to_vec(), 1).in_scope(&user_b))
        .unwrap();

    assert_eq!(repo.fetch_all(&user_a).unwrap()[0].payload, b"a");
    assert_eq!(repo.fetch_all(&user_b).unwrap()[0].payload, b"b");

    assert!(repo.delete(shared_id, &user_a).unwrap());
    assert!(repo.fetch_all(&user_a).unwrap().is_empty());
    assert_eq!(repo.fetch_all(&user_b).unwrap().len(), 1);
    assert_eq!(repo.delete_all_for_scope(&user_b).unwrap(), 1);
}

#[test]
fn delete_of_absent_entry_reports_false() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    assert!(!repo.delete(Uuid::new_v4(), &scope("user-a")).unwrap());
}

#[test]
fn upsert_requires_owner_scope() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let err = repo.upsert(&Entry::new(Vec::new(), 1)).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}

#[test]
fn save_stamped_keeps_created_at_and_moves_updated_at_forward() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    let draft = Entry::new(b"v1".to_vec(), 100);

    let first = repo.save_stamped(&draft, &user, 500).unwrap();
    assert_eq!((first.created_at, first.updated_at), (100, 500));
    assert_eq!(first.owner_scope.as_ref(), Some(&user));

    // A clock that went backwards still yields a newer version.
    let second = repo.save_stamped(&first, &user, 200).unwrap();
    assert_eq!((second.created_at, second.updated_at), (100, 501));

    let mut rewritten = second.clone();
    rewritten.created_at = 400;
    let third = repo.save_stamped(&rewritten, &user, 900).unwrap();
    assert_eq!((third.created_at, third.updated_at), (100, 900));
    assert_eq!(repo.get(first.id, &user).unwrap(), Some(third));
}

#[test]
fn save_stamped_drops_pending_delete() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    let entry = Entry::new(Vec::new(), 1);

    repo.apply_batch(
        &user,
        &[LocalWrite::MarkDeleted {
            id: entry.id,
            deleted_at: 5,
        }],
    )
    .unwrap();
    assert_eq!(
        repo.pending_deletes(&user).unwrap(),
        vec![PendingDelete {
            id: entry.id,
            deleted_at: 5
        }]
    );

    repo.save_stamped(&entry, &user, 10).unwrap();
    assert!(repo.pending_deletes(&user).unwrap().is_empty());
}

#[test]
fn save_stamped_after_delete_or_clear_stamps_past_the_marker() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    let deleted = Entry::new(b"deleted".to_vec(), 1);
    let cleared = Entry::new(b"cleared".to_vec(), 1);

    repo.apply_batch(
        &user,
        &[LocalWrite::MarkDeleted {
            id: deleted.id,
            deleted_at: 50,
        }],
    )
    .unwrap();
    assert_eq!(repo.save_stamped(&deleted, &user, 10).unwrap().updated_at, 51);

    repo.apply_batch(&user, &[LocalWrite::ClearScope { cleared_at: Some(80) }])
        .unwrap();
    assert_eq!(repo.save_stamped(&cleared, &user, 10).unwrap().updated_at, 81);
    assert_eq!(repo.save_stamped(&cleared, &user, 200).unwrap().updated_at, 200);
}

#[test]
fn failing_batch_leaves_no_partial_writes() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    let good = scoped("good", 1, &user);
    let foreign = scoped("foreign", 1, &scope("user-b"));

    let err = repo
        .apply_batch(
            &user,
            &[LocalWrite::Upsert(good), LocalWrite::Upsert(foreign)],
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::ScopeMismatch { .. }));
    assert!(repo.fetch_all(&user).unwrap().is_empty());
}

#[test]
fn clear_scope_sets_watermark_and_forget_clear_resets_it() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    repo.upsert(&scoped("x", 1, &user)).unwrap();
    repo.apply_batch(
        &user,
        &[LocalWrite::MarkDeleted {
            id: Uuid::new_v4(),
            deleted_at: 3,
        }],
    )
    .unwrap();

    repo.apply_batch(&user, &[LocalWrite::ClearScope { cleared_at: Some(50) }])
        .unwrap();
    // An older watermark never lowers the recorded one.
    repo.apply_batch(&user, &[LocalWrite::ClearScope { cleared_at: Some(20) }])
        .unwrap();

    assert!(repo.fetch_all(&user).unwrap().is_empty());
    assert!(repo.pending_deletes(&user).unwrap().is_empty());
    assert_eq!(repo.sync_state(&user).unwrap().cleared_at, Some(50));

    repo.apply_batch(&user, &[LocalWrite::ForgetClear, LocalWrite::MarkSynced(60)])
        .unwrap();
    let state = repo.sync_state(&user).unwrap();
    assert_eq!(state.cleared_at, None);
    assert_eq!(state.last_sync_at, Some(60));
}

#[test]
fn legacy_rows_migrate_once_and_conflicts_stay_behind() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let user = scope("user-a");
    let conflicting_id = Uuid::new_v4();

    repo.insert_legacy(&Entry::new(b"legacy".to_vec(), 10)).unwrap();
    repo.insert_legacy(&Entry::with_id(conflicting_id, b"old".to_vec(), 5))
        .unwrap();
    repo.upsert(&Entry::with_id(conflicting_id, b"scoped".to_vec(), 6).in_scope(&user))
        .unwrap();
    assert_eq!(repo.legacy_count().unwrap(), 2);

    let first = repo.migrate_legacy(&user).unwrap();
    assert_eq!((first.migrated, first.conflicting), (1, 1));
    let second = repo.migrate_legacy(&user).unwrap();
    assert_eq!((second.migrated, second.conflicting), (0, 1));

    let entries = repo.fetch_all(&user).unwrap();
    assert_eq!(entries.len(), 2);
    let kept = entries.iter().find(|e| e.id == conflicting_id).unwrap();
    assert_eq!(kept.payload, b"scoped");
}

#[test]
fn insert_legacy_rejects_scoped_entries() {
    let repo = SqliteEntryRepository::open_in_memory().unwrap();
    let err = repo
        .insert_legacy(&scoped("x", 1, &scope("user-a")))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}

#[test]
fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entries.db");
    let user = scope("user-a");
    let entry = scoped("durable", 7, &user);

    {
        let repo = SqliteEntryRepository::open(&path).unwrap();
        repo.upsert(&entry).unwrap();
    }

    let reopened = SqliteEntryRepository::open(&path).unwrap();
    assert_eq!(reopened.fetch_all(&user).unwrap(), vec![entry]);
}
