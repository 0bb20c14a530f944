//! Recorded end-to-end behaviors: state reads, same-date replacement,
//! skip policies, and the N-chain product.

mod fixtures;

use fixtures::{assert_gapless, inventory, note, state_at, two_fields, Inventory, Note};
use strata_rs::{
    skip_when_list_member_missing, Chain, ChainError, FuturePolicy, Product,
};
use time::macros::datetime;

#[test]
fn first_recorded_point_splits_the_timeline() {
    let initial = note("foo");
    let moment = datetime!(2022-01-01 0:00 UTC);
    let mut chain = Chain::new();
    chain
        .add(&initial, &note("bar"), moment, FuturePolicy::None)
        .unwrap();

    assert_eq!(chain.len(), 2);
    assert_gapless(&chain);
    assert_eq!(
        state_at(&chain, &initial, datetime!(2021-12-31 23:59:59.9999999 UTC)).p,
        "foo"
    );
    assert_eq!(state_at(&chain, &initial, moment).p, "bar");
    assert_eq!(
        state_at(&chain, &initial, datetime!(2022-01-02 0:00 UTC)).p,
        "bar"
    );
}

#[test]
fn sequential_points_partition_the_timeline() {
    let initial = note("foo");
    let mut chain = Chain::new();
    chain
        .add(
            &initial,
            &note("bar"),
            datetime!(2022-01-01 0:00 UTC),
            FuturePolicy::None,
        )
        .unwrap();
    chain
        .add(
            &initial,
            &note("baz"),
            datetime!(2024-01-01 0:00 UTC),
            FuturePolicy::None,
        )
        .unwrap();

    assert_eq!(chain.len(), 3);
    assert_gapless(&chain);
    assert_eq!(
        state_at(&chain, &initial, datetime!(2011-01-01 0:00 UTC)).p,
        "foo"
    );
    assert_eq!(
        state_at(&chain, &initial, datetime!(2022-01-01 0:00 UTC)).p,
        "bar"
    );
    assert_eq!(
        state_at(&chain, &initial, datetime!(2024-01-01 0:00 UTC)).p,
        "baz"
    );
}

#[test]
fn past_insert_keeps_the_recorded_future() {
    let initial = note("foo");
    let mut chain = Chain::new();
    chain
        .add(
            &initial,
            &note("baz"),
            datetime!(2024-01-01 0:00 UTC),
            FuturePolicy::None,
        )
        .unwrap();
    chain
        .add(
            &initial,
            &note("bar"),
            datetime!(2022-01-01 0:00 UTC),
            FuturePolicy::KeepFuture,
        )
        .unwrap();

    assert_gapless(&chain);
    assert_eq!(
        state_at(&chain, &initial, datetime!(2022-01-01 0:00 UTC)).p,
        "bar"
    );
    assert_eq!(
        state_at(&chain, &initial, datetime!(2024-01-01 0:00 UTC)).p,
        "baz"
    );
}

#[test]
fn same_date_replacement_rewrites_the_point() {
    let initial = two_fields("A0", "B0");
    let moment = datetime!(2024-01-01 0:00 UTC);
    let mut chain = Chain::new();
    chain
        .add(&initial, &two_fields("A1", "B1"), moment, FuturePolicy::None)
        .unwrap();
    chain
        .add(
            &initial,
            &two_fields("A1", "B2"),
            moment,
            FuturePolicy::KeepFuture,
        )
        .unwrap();

    assert_eq!(chain.len(), 2);
    assert_gapless(&chain);
    assert_eq!(state_at(&chain, &initial, moment), two_fields("A1", "B2"));
}

#[test]
fn same_date_replacement_rediffs_the_follower() {
    let initial = two_fields("A0", "B0");
    let moment = datetime!(2024-01-01 0:00 UTC);
    let later = datetime!(2025-01-01 0:00 UTC);
    let mut chain = Chain::new();
    chain
        .add(&initial, &two_fields("A1", "B1"), moment, FuturePolicy::None)
        .unwrap();
    chain
        .add(&initial, &two_fields("A2", "B1"), later, FuturePolicy::None)
        .unwrap();

    chain
        .add(
            &initial,
            &two_fields("A1", "B2"),
            moment,
            FuturePolicy::KeepFuture,
        )
        .unwrap();

    assert_gapless(&chain);
    assert_eq!(state_at(&chain, &initial, moment), two_fields("A1", "B2"));
    // The later point still reads back exactly as recorded.
    assert_eq!(state_at(&chain, &initial, later), two_fields("A2", "B1"));
}

fn shrinking_list_chain(recorded_initial: &Inventory) -> Chain<Inventory> {
    let mut chain = Chain::new();
    chain
        .add(
            recorded_initial,
            &inventory("crate", &["a"]),
            datetime!(2022-01-01 0:00 UTC),
            FuturePolicy::None,
        )
        .unwrap();
    chain
}

#[test]
fn short_list_fails_loudly_without_a_policy() {
    let recorded_initial = inventory("crate", &["a", "b"]);
    let chain = shrinking_list_chain(&recorded_initial);

    // An initial whose list is shorter than the recorded patches expect.
    let short_initial = inventory("crate", &["a"]);
    let err = chain
        .patch_to_date(&short_initial, datetime!(2022-06-01 0:00 UTC))
        .unwrap_err();
    let ChainError::Patching(failure) = err else {
        panic!("expected a patching failure");
    };
    assert!(failure.source.is_index_out_of_range());
    assert_eq!(failure.index, 1);
    assert_eq!(
        failure.intermediate,
        serde_json::to_value(&short_initial).unwrap()
    );
}

#[test]
fn short_list_is_skipped_with_the_list_policy() {
    let recorded_initial = inventory("crate", &["a", "b"]);
    let source = shrinking_list_chain(&recorded_initial);

    let chain = Chain::<Inventory>::builder()
        .slices(source.slices().to_vec())
        .skip_policy(skip_when_list_member_missing(|entity: &Inventory| {
            Some(entity.items.as_slice())
        }))
        .build()
        .unwrap();

    let short_initial = inventory("crate", &["a"]);
    let outcome = chain
        .patch_to_date(&short_initial, datetime!(2022-06-01 0:00 UTC))
        .unwrap();
    assert!(outcome.patches_have_been_skipped());
    assert_eq!(outcome.skipped.len(), 1);
    assert!(!outcome.final_deserialization_failed);
    assert_eq!(outcome.entity, short_initial);
}

#[test]
fn backward_reconstruction_hits_the_same_guard() {
    let recorded_initial = inventory("crate", &["a"]);
    let mut forward = Chain::new();
    forward
        .add(
            &recorded_initial,
            &inventory("crate", &["a", "b"]),
            datetime!(2022-01-01 0:00 UTC),
            FuturePolicy::None,
        )
        .unwrap();
    let (at_end, backward) = forward.reverse(&recorded_initial).unwrap();
    assert_eq!(at_end.items, vec!["a", "b"]);

    // A boundary entity with too few members cannot unapply the growth.
    let short_end = inventory("crate", &["x"]);
    let err = backward
        .patch_to_date(&short_end, datetime!(2021-01-01 0:00 UTC))
        .unwrap_err();
    let ChainError::Patching(failure) = err else {
        panic!("expected a patching failure");
    };
    assert!(failure.source.is_index_out_of_range());
}

#[test]
fn accepted_final_failure_returns_the_initial_entity() {
    let moment = datetime!(2022-01-01 0:00 UTC);
    let initial = note("foo");
    let mut source = Chain::new();
    source
        .add(&initial, &note("bar"), moment, FuturePolicy::None)
        .unwrap();

    // A patch that deletes the only field the entity type requires.
    let breaking = serde_json::json!({"p": ["bar", 0, 0]});
    let mut slices = source.slices().to_vec();
    let broken = strata_rs::Slice::new(
        slices[1].start(),
        slices[1].end(),
        Some(breaking),
        slices[1].direction(),
    )
    .unwrap();
    slices[1] = broken;

    let strict = Chain::<Note>::builder()
        .slices(slices.clone())
        .build()
        .unwrap();
    let err = strict.patch_to_date(&initial, moment).unwrap_err();
    assert!(matches!(err, ChainError::Codec(_)));

    let lenient = Chain::<Note>::builder()
        .slices(slices)
        .skip_when(|_, slice, _| slice.is_none())
        .build()
        .unwrap();
    let outcome = lenient.patch_to_date(&initial, moment).unwrap();
    assert!(outcome.final_deserialization_failed);
    assert!(!outcome.patches_have_been_skipped());
    assert_eq!(outcome.entity, initial);
}

#[test]
fn product_joins_histories_at_every_key_date() {
    let first = datetime!(2022-01-01 0:00 UTC);
    let second = datetime!(2023-01-01 0:00 UTC);
    let third = datetime!(2024-01-01 0:00 UTC);

    let left_initial = note("l0");
    let mut left = Chain::new();
    left.add(&left_initial, &note("l1"), first, FuturePolicy::None)
        .unwrap();
    left.add(&left_initial, &note("l2"), third, FuturePolicy::None)
        .unwrap();

    let right_initial = note("r0");
    let mut right = Chain::new();
    right
        .add(&right_initial, &note("r1"), second, FuturePolicy::None)
        .unwrap();

    let product = Product::new()
        .with(&left, &left_initial)
        .with(&right, &right_initial);
    let records = product.records().unwrap();

    assert_eq!(records.len(), 3);
    let row: Vec<(&str, &str)> = records
        .iter()
        .map(|record| (record.states[0].p.as_str(), record.states[1].p.as_str()))
        .collect();
    assert_eq!(row, vec![("l1", "r0"), ("l1", "r1"), ("l2", "r1")]);
}
