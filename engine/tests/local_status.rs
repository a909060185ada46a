//! Property tests for the local status state machine.

use proptest::prelude::*;
use tether_engine::{DeleteTransition, LocalStatus, SyncFlags};

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Update,
    Delete,
    Undelete,
}

fn arb_mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        Just(Mutation::Update),
        Just(Mutation::Delete),
        Just(Mutation::Undelete),
    ]
}

fn arb_flags() -> impl Strategy<Value = SyncFlags> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(c, u, d)| SyncFlags {
        locally_created: c,
        locally_updated: u,
        locally_deleted: d,
    })
}

/// Apply a mutation. `None` means the record was purged.
fn apply(flags: SyncFlags, mutation: Mutation) -> Option<SyncFlags> {
    match mutation {
        Mutation::Update => Some(flags.after_local_update()),
        Mutation::Delete => match flags.on_local_delete() {
            DeleteTransition::Purge => None,
            DeleteTransition::Unchanged => Some(flags),
            DeleteTransition::Mark(next) => Some(next),
        },
        Mutation::Undelete => Some(flags.after_local_undelete().unwrap_or(flags)),
    }
}

/// The expected status transition, written out as a table.
fn expected(status: LocalStatus, mutation: Mutation, edited: bool) -> Option<LocalStatus> {
    use LocalStatus::*;
    match (status, mutation) {
        (LocallyCreated, Mutation::Delete) => None,
        (LocallyCreated, _) => Some(LocallyCreated),
        (MatchesUpstream, Mutation::Update) => Some(LocallyUpdated),
        (MatchesUpstream, Mutation::Delete) => Some(LocallyDeleted),
        (MatchesUpstream, Mutation::Undelete) => Some(MatchesUpstream),
        (LocallyUpdated, Mutation::Delete) => Some(LocallyDeletedAndLocallyUpdated),
        (LocallyUpdated, _) => Some(LocallyUpdated),
        (LocallyDeleted, Mutation::Update) => Some(LocallyDeletedAndLocallyUpdated),
        (LocallyDeleted, Mutation::Delete) => Some(LocallyDeleted),
        (LocallyDeleted, Mutation::Undelete) if edited => Some(LocallyUpdated),
        (LocallyDeleted, Mutation::Undelete) => Some(MatchesUpstream),
        (LocallyDeletedAndLocallyUpdated, Mutation::Undelete) => Some(LocallyUpdated),
        (LocallyDeletedAndLocallyUpdated, _) => Some(LocallyDeletedAndLocallyUpdated),
    }
}

proptest! {
    #[test]
    fn prop_sequences_follow_state_machine(
        start_created in any::<bool>(),
        mutations in prop::collection::vec(arb_mutation(), 0..20),
    ) {
        let mut flags = if start_created { SyncFlags::created() } else { SyncFlags::clean() };

        for mutation in mutations {
            let before = flags.status();
            let next = apply(flags, mutation);
            prop_assert_eq!(
                next.map(SyncFlags::status),
                expected(before, mutation, flags.locally_updated)
            );
            match next {
                Some(next) => flags = next,
                None => break,
            }
        }
    }

    #[test]
    fn prop_local_iff_any_flag(
        flags in arb_flags(),
        mutations in prop::collection::vec(arb_mutation(), 0..20),
    ) {
        let mut flags = flags;
        for mutation in mutations {
            let Some(next) = apply(flags, mutation) else { break };
            flags = next;
            prop_assert_eq!(
                flags.local(),
                flags.locally_created || flags.locally_updated || flags.locally_deleted
            );
        }
    }

    #[test]
    fn prop_undelete_without_delete_is_noop(flags in arb_flags()) {
        prop_assume!(!flags.locally_deleted);
        prop_assert_eq!(flags.after_local_undelete(), None);
    }

    #[test]
    fn prop_delete_is_idempotent(flags in arb_flags()) {
        if let DeleteTransition::Mark(deleted) = flags.on_local_delete() {
            prop_assert_eq!(deleted.on_local_delete(), DeleteTransition::Unchanged);
        }
    }

    #[test]
    fn prop_status_predicates_agree_with_flags(flags in arb_flags()) {
        let status = flags.status();
        prop_assert_eq!(status.is_locally_deleted(), flags.locally_deleted);
        if !flags.locally_deleted {
            prop_assert_eq!(status.is_locally_created(), flags.locally_created);
        }
    }
}
