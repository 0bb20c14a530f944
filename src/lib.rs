#![forbid(unsafe_code)]

pub mod core;

pub use crate::core::error::ChainError as Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    skip_when_list_member_missing, within_grace, ApplyFailure, Boundary, Chain, ChainBuilder,
    ChainError, Codec, CodecError, DiffEngine, Direction, FuturePolicy, Grace, PatchError,
    PatchingFailure, PopulateReport, Product, ProductRecord, Reconstruction, SkipPolicy, Slice,
    SliceError, StructuralDiff, WireSlice, FAR_FUTURE, FAR_PAST, TICK,
};
