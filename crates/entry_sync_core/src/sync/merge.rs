//! Last-write-wins merge planning.
//!
//! Pure function from (local view, remote view, pending deletes, clear
//! watermark) to the writes each side needs. No I/O happens here; the engine
//! commits `local_writes` as one batch and dispatches the remote operations.

use crate::model::entry::{Entry, EntryId};
use crate::repo::entry_repo::{LocalWrite, PendingDelete};
use log::debug;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Writes required to converge one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub local_writes: Vec<LocalWrite>,
    pub remote_puts: Vec<Entry>,
    pub remote_deletes: Vec<EntryId>,
    /// Remote versions written locally (overwrites and new arrivals).
    pub pulled: usize,
    /// Entries present on both sides with equal `updated_at`.
    pub unchanged: usize,
}

impl MergePlan {
    pub fn is_noop(&self) -> bool {
        self.local_writes.is_empty() && self.remote_puts.is_empty() && self.remote_deletes.is_empty()
    }
}

/// Plans a whole-record last-write-wins merge keyed by entry id.
///
/// - both sides, remote newer: overwrite local.
/// - both sides, local newer: push local.
/// - equal `updated_at`: nothing.
/// - remote only: pull, unless a pending delete or the clear watermark
///   covers it (`updated_at <= marker`), in which case delete it remotely.
/// - local only: push.
///
/// Pending deletes and the watermark are forgotten once the remote no longer
/// holds anything they cover.
pub fn plan_merge(
    local: &[Entry],
    remote: &[Entry],
    pending_deletes: &[PendingDelete],
    cleared_at: Option<i64>,
) -> MergePlan {
    let local_by_id: BTreeMap<EntryId, &Entry> = local.iter().map(|entry| (entry.id, entry)).collect();
    let remote_by_id: BTreeMap<EntryId, &Entry> =
        remote.iter().map(|entry| (entry.id, entry)).collect();
    let pending_by_id: BTreeMap<EntryId, i64> = pending_deletes
        .iter()
        .map(|pending| (pending.id, pending.deleted_at))
        .collect();

    let mut plan = MergePlan::default();
    let mut clear_still_owed = false;

    for (id, remote_entry) in &remote_by_id {
        match (local_by_id.get(id), pending_by_id.get(id)) {
            (Some(local_entry), pending) => {
                if pending.is_some() {
                    plan.local_writes.push(LocalWrite::ForgetDeleted(*id));
                }
                match remote_entry.updated_at.cmp(&local_entry.updated_at) {
                    Ordering::Greater => {
                        debug!(
                            "event=conflict_resolved module=sync winner=remote entry_id={} local_updated_at={} remote_updated_at={}",
                            id, local_entry.updated_at, remote_entry.updated_at
                        );
                        plan.local_writes
                            .push(LocalWrite::Upsert((*remote_entry).clone()));
                        plan.pulled += 1;
                    }
                    Ordering::Less => {
                        debug!(
                            "event=conflict_resolved module=sync winner=local entry_id={} local_updated_at={} remote_updated_at={}",
                            id, local_entry.updated_at, remote_entry.updated_at
                        );
                        plan.remote_puts.push((*local_entry).clone());
                    }
                    Ordering::Equal => plan.unchanged += 1,
                }
            }
            (None, Some(deleted_at)) => {
                if remote_entry.updated_at > *deleted_at {
                    // Edited elsewhere after the local delete: the edit wins.
                    plan.local_writes
                        .push(LocalWrite::Upsert((*remote_entry).clone()));
                    plan.local_writes.push(LocalWrite::ForgetDeleted(*id));
                    plan.pulled += 1;
                } else {
                    plan.remote_deletes.push(*id);
                }
            }
            (None, None) => {
                let covered_by_clear =
                    cleared_at.is_some_and(|cleared_at| remote_entry.updated_at <= cleared_at);
                if covered_by_clear {
                    plan.remote_deletes.push(*id);
                    clear_still_owed = true;
                } else {
                    plan.local_writes
                        .push(LocalWrite::Upsert((*remote_entry).clone()));
                    plan.pulled += 1;
                }
            }
        }
    }

    for (id, local_entry) in &local_by_id {
        if !remote_by_id.contains_key(id) {
            plan.remote_puts.push((*local_entry).clone());
        }
    }

    for id in pending_by_id.keys() {
        if !remote_by_id.contains_key(id) {
            plan.local_writes.push(LocalWrite::ForgetDeleted(*id));
        }
    }

    if cleared_at.is_some() && !clear_still_owed {
        plan.local_writes.push(LocalWrite::ForgetClear);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::plan_merge;
    use crate::model::entry::{Entry, ScopeId};
    use crate::repo::entry_repo::{LocalWrite, PendingDelete};
    use uuid::Uuid;

    fn entry(id: Uuid, updated_at: i64, body: &str) -> Entry {
        let mut entry = Entry::with_id(id, body.as_bytes().to_vec(), 0).in_scope(&ScopeId::new("u"));
        entry.updated_at = updated_at;
        entry
    }

    #[test]
    fn newer_side_wins_in_both_directions() {
        let pulled_id = Uuid::new_v4();
        let pushed_id = Uuid::new_v4();
        let local = vec![entry(pulled_id, 10, "old"), entry(pushed_id, 30, "mine")];
        let remote = vec![entry(pulled_id, 20, "theirs"), entry(pushed_id, 25, "stale")];

        let plan = plan_merge(&local, &remote, &[], None);
        assert_eq!(
            plan.local_writes,
            vec![LocalWrite::Upsert(remote[0].clone())]
        );
        assert_eq!(plan.remote_puts, vec![local[1].clone()]);
        assert_eq!(plan.pulled, 1);
    }

    #[test]
    fn equal_timestamps_are_steady_state() {
        let id = Uuid::new_v4();
        let local = vec![entry(id, 10, "same")];
        let plan = plan_merge(&local, &local, &[], None);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn one_sided_entries_are_copied_across() {
        let local_only = entry(Uuid::new_v4(), 5, "offline create");
        let remote_only = entry(Uuid::new_v4(), 6, "other device");

        let plan = plan_merge(&[local_only.clone()], &[remote_only.clone()], &[], None);
        assert_eq!(plan.remote_puts, vec![local_only]);
        assert_eq!(plan.local_writes, vec![LocalWrite::Upsert(remote_only)]);
    }

    #[test]
    fn pending_delete_blocks_resurrection_until_confirmed() {
        let id = Uuid::new_v4();
        let remote = vec![entry(id, 10, "deleted locally")];
        let pending = [PendingDelete { id, deleted_at: 15 }];

        let plan = plan_merge(&[], &remote, &pending, None);
        assert_eq!(plan.remote_deletes, vec![id]);
        assert!(plan.local_writes.is_empty());

        let confirmed = plan_merge(&[], &[], &pending, None);
        assert_eq!(confirmed.local_writes, vec![LocalWrite::ForgetDeleted(id)]);
    }

    #[test]
    fn remote_edit_after_delete_wins() {
        let id = Uuid::new_v4();
        let remote = vec![entry(id, 20, "edited elsewhere")];
        let pending = [PendingDelete { id, deleted_at: 15 }];

        let plan = plan_merge(&[], &remote, &pending, None);
        assert!(plan.remote_deletes.is_empty());
        assert_eq!(
            plan.local_writes,
            vec![
                LocalWrite::Upsert(remote[0].clone()),
                LocalWrite::ForgetDeleted(id)
            ]
        );
    }

    #[test]
    fn clear_watermark_deletes_older_remote_copies() {
        let old = entry(Uuid::new_v4(), 10, "before clear");
        let newer = entry(Uuid::new_v4(), 50, "after clear");

        let plan = plan_merge(&[], &[old.clone(), newer.clone()], &[], Some(40));
        assert_eq!(plan.remote_deletes, vec![old.id]);
        assert_eq!(plan.local_writes, vec![LocalWrite::Upsert(newer.clone())]);

        let settled = plan_merge(&[newer.clone()], &[newer], &[], Some(40));
        assert_eq!(settled.local_writes, vec![LocalWrite::ForgetClear]);
    }
}
