//! Chain capability errors.
//!
//! Structural errors (direction, boundaries, key-date collisions) are
//! programming errors and surface immediately. Patch-application errors
//! pass through the skip-policy pipeline first and arrive here only when
//! no policy accepts them.

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use super::codec::CodecError;
use super::diff::PatchError;
use super::slice::{Direction, SliceError};

/// Which slice boundary collided during construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Boundary::Start => "start",
            Boundary::End => "end",
        })
    }
}

/// A patch refused to apply and no skip policy accepted the failure.
///
/// Carries enough to replay the failure by hand: the serialized initial
/// entity, the JSON accumulated just before the failing patch, the patch
/// itself, and the failing slice's index in storage order.
#[derive(Debug, Error)]
#[error("patch {index} failed during reconstruction: {source}")]
pub struct PatchingFailure {
    pub initial: Value,
    pub intermediate: Value,
    pub patch: Value,
    pub index: usize,
    #[source]
    pub source: PatchError,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    #[error("key date {moment} is already recorded")]
    DuplicateKeyDate { moment: OffsetDateTime },

    #[error("{moment} precedes recorded points; pick KeepFuture or OverwriteFuture")]
    MissingFuturePolicy { moment: OffsetDateTime },

    #[error("slice direction {found} conflicts with chain direction {expected}")]
    InconsistentChain {
        expected: Direction,
        found: Direction,
    },

    #[error("ambiguous boundaries: two slices share the {boundary} {instant}")]
    AmbiguousBoundaries {
        boundary: Boundary,
        instant: OffsetDateTime,
    },

    #[error("chain coverage is discontiguous at {at}")]
    Discontiguous { at: OffsetDateTime },

    #[error("add is unsupported on a {direction} chain; reverse it first")]
    UnsupportedOperation { direction: Direction },

    #[error("populate not configured")]
    PopulateNotConfigured,

    #[error(transparent)]
    Patching(Box<PatchingFailure>),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Slice(#[from] SliceError),
}

impl From<PatchingFailure> for ChainError {
    fn from(failure: PatchingFailure) -> Self {
        ChainError::Patching(Box::new(failure))
    }
}
