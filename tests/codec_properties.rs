//! Property tests for the row codec and the merge plan.

use chrono::{TimeZone, Utc};
use expense_sync::{
    from_remote, plan, records_from_rows, to_remote, Category, MergeStrategy, OwnerId, Record,
    RecordId,
};
use proptest::prelude::*;
use proptest::test_runner::Config;
use std::collections::HashSet;
use uuid::Uuid;

fn arb_category() -> impl Strategy<Value = Category> {
    prop::sample::select(Category::ALL.to_vec())
}

fn arb_strategy() -> impl Strategy<Value = MergeStrategy> {
    prop::sample::select(vec![
        MergeStrategy::RemoteWins,
        MergeStrategy::LocalWins,
        MergeStrategy::FieldMerge,
    ])
}

fn arb_record() -> impl Strategy<Value = Record> {
    (
        any::<u128>(),
        "[A-Za-z][A-Za-z0-9 ]{0,24}",
        0.01f64..1_000_000.0,
        arb_category(),
        prop::option::of("[A-Za-z][A-Za-z ]{0,16}"),
        0i64..4_000_000_000,
    )
        .prop_map(|(id, name, amount, category, location, secs)| Record {
            id: RecordId(Uuid::from_u128(id)),
            name,
            amount,
            category,
            location,
            occurred_at: Utc.timestamp_opt(secs, 0).unwrap(),
        })
}

fn ids(records: &[Record]) -> HashSet<RecordId> {
    records.iter().map(|r| r.id).collect()
}

proptest! {
    #![proptest_config(Config::with_cases(256))]

    #[test]
    fn codec_round_trip(record in arb_record(), owner in "[a-z0-9-]{1,36}") {
        let owner = OwnerId::new(owner);
        let row = to_remote(&record, &owner);

        prop_assert_eq!(&row.user_id, &owner);
        prop_assert_eq!(from_remote(row), record);
    }

    #[test]
    fn fetched_rows_are_newest_first(records in prop::collection::vec(arb_record(), 0..40)) {
        let owner = OwnerId::new("alice");
        let rows = records.iter().map(|r| to_remote(r, &owner)).collect();

        let decoded = records_from_rows(rows);

        prop_assert_eq!(decoded.len(), records.len());
        prop_assert_eq!(ids(&decoded), ids(&records));
        for pair in decoded.windows(2) {
            prop_assert!(pair[0].occurred_at >= pair[1].occurred_at);
        }
    }

    #[test]
    fn plan_migrates_exactly_the_local_only_records(
        local in prop::collection::vec(arb_record(), 0..20),
        remote in prop::collection::vec(arb_record(), 0..20),
        shared in prop::collection::vec(arb_record(), 0..10),
        strategy in arb_strategy(),
    ) {
        let owner = OwnerId::new("alice");
        let local: Vec<Record> = local.into_iter().chain(shared.iter().cloned()).collect();
        let remote: Vec<Record> = remote.into_iter().chain(shared).collect();
        let remote_ids = ids(&remote);

        let p = plan(&owner, &local, &remote, strategy);

        let expected: Vec<RecordId> = local
            .iter()
            .map(|r| r.id)
            .filter(|id| !remote_ids.contains(id))
            .collect();
        prop_assert_eq!(&p.migrated, &expected);

        let uploaded: HashSet<RecordId> = p.upserts.iter().map(|row| row.id).collect();
        for id in &expected {
            prop_assert!(uploaded.contains(id));
        }
        for id in &p.remote_only {
            prop_assert!(!uploaded.contains(id));
        }
        prop_assert!(p.upserts.iter().all(|row| row.user_id == owner));
        // Shared ids are identical on both sides here, so nothing else moves.
        prop_assert_eq!(p.upserts.len(), expected.len());
        prop_assert!(p.overridden.is_empty());
    }

    #[test]
    fn remote_wins_never_uploads_shared_records(
        local in prop::collection::vec(arb_record(), 1..20),
        bump in 0.5f64..10.0,
    ) {
        let owner = OwnerId::new("alice");
        let remote: Vec<Record> = local
            .iter()
            .cloned()
            .map(|mut r| {
                r.amount += bump;
                r
            })
            .collect();

        let p = plan(&owner, &local, &remote, MergeStrategy::RemoteWins);

        prop_assert!(p.is_noop());
        prop_assert_eq!(p.overridden.len(), local.len());
    }
}
