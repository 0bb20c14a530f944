//! Layer 2: failure-skip policies.
//!
//! A policy decides whether a failed patch application may be swallowed
//! during reconstruction. Policies are plain function values; a chain
//! consults every one it was built with and skips on the first acceptance.

use std::sync::Arc;

use thiserror::Error;

use super::codec::CodecError;
use super::diff::PatchError;
use super::slice::Slice;

/// Why a reconstruction step failed, as presented to skip policies.
#[derive(Debug, Error)]
pub enum ApplyFailure {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ApplyFailure {
    pub fn is_index_out_of_range(&self) -> bool {
        matches!(self, ApplyFailure::Patch(err) if err.is_index_out_of_range())
    }
}

/// Predicate over (entity before the failing step, failing slice, failure).
/// The slice is `None` when the final (de)serialization failed.
pub type SkipPolicy<E> = Arc<dyn Fn(&E, Option<&Slice>, &ApplyFailure) -> bool + Send + Sync>;

/// Skips index-out-of-range patch failures as long as the entity carries
/// the list at all.
///
/// Typical corruption shape: an initial entity whose list is shorter than
/// the recorded patches expect.
pub fn skip_when_list_member_missing<E, T>(accessor: fn(&E) -> Option<&[T]>) -> SkipPolicy<E>
where
    E: 'static,
    T: 'static,
{
    Arc::new(move |entity, _slice, failure| {
        failure.is_index_out_of_range() && accessor(entity).is_some()
    })
}
