//! Shared entities and assertions for the integration suites.

// Not every suite touches every fixture.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use strata_rs::{Chain, FAR_FUTURE, FAR_PAST};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub p: String,
}

pub fn note(p: &str) -> Note {
    Note { p: p.to_string() }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwoFields {
    pub a: String,
    pub b: String,
}

pub fn two_fields(a: &str, b: &str) -> TwoFields {
    TwoFields {
        a: a.to_string(),
        b: b.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub name: String,
    pub items: Vec<String>,
}

pub fn inventory(name: &str, items: &[&str]) -> Inventory {
    Inventory {
        name: name.to_string(),
        items: items.iter().map(|item| item.to_string()).collect(),
    }
}

/// Asserts the gapless-cover invariants: open ends, contiguity, ascending
/// distinct starts, uniform direction.
pub fn assert_gapless<E>(chain: &Chain<E>) {
    let slices = chain.slices();
    if slices.is_empty() {
        return;
    }
    assert_eq!(
        slices[0].start(),
        FAR_PAST,
        "first slice must open at -inf"
    );
    assert_eq!(
        slices[slices.len() - 1].end(),
        FAR_FUTURE,
        "last slice must close at +inf"
    );
    for pair in slices.windows(2) {
        assert_eq!(pair[0].end(), pair[1].start(), "slices must be contiguous");
        assert!(pair[0].start() < pair[1].start(), "starts must ascend");
    }
    for slice in slices {
        assert_eq!(slice.direction(), chain.direction());
        assert!(slice.start() < slice.end(), "no empty slices");
    }
}

pub fn state_at<E: Clone>(chain: &Chain<E>, initial: &E, at: OffsetDateTime) -> E {
    let outcome = chain.patch_to_date(initial, at).expect("reconstruction");
    assert!(!outcome.patches_have_been_skipped());
    assert!(!outcome.final_deserialization_failed);
    outcome.entity
}
