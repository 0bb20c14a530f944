//! Core chain engine (Layers 0-4)
//!
//! Module hierarchy follows type dependency order:
//! - time: instants, ticks, grace tolerance (Layer 0)
//! - slice: half-open time slices + wire mapping (Layer 1)
//! - diff: differ seam and the structural default (Layer 2)
//! - codec: the entity/JSON boundary (Layer 2)
//! - skip: failure-skip policies (Layer 2)
//! - chain: the gapless slice chain (Layer 3)
//! - product: read-only N-chain join (Layer 4)
//! - error: chain capability errors

pub mod chain;
pub mod codec;
pub mod diff;
pub mod error;
pub mod product;
pub mod skip;
pub mod slice;
pub mod time;

pub use chain::{Chain, ChainBuilder, FuturePolicy, PopulateReport, Reconstruction};
pub use codec::{Codec, CodecError};
pub use diff::{DiffEngine, PatchError, StructuralDiff};
pub use error::{Boundary, ChainError, PatchingFailure};
pub use product::{Product, ProductRecord};
pub use skip::{skip_when_list_member_missing, ApplyFailure, SkipPolicy};
pub use slice::{Direction, Slice, SliceError, WireSlice};
pub use time::{within_grace, Grace, FAR_FUTURE, FAR_PAST, TICK};
