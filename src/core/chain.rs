//! Layer 3: the time-slice chain.
//!
//! A chain covers `[-inf, +inf)` with contiguous half-open slices, each
//! carrying the structural diff from its predecessor's state. Recording a
//! state point splits the covering slice and rediffs the first later
//! slice: patches are differential, so the slice after an insertion must
//! be recomputed against its new predecessor or its recorded states would
//! silently change meaning.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::codec::{Codec, CodecError};
use super::diff::{DiffEngine, StructuralDiff};
use super::error::{Boundary, ChainError, PatchingFailure};
use super::skip::{ApplyFailure, SkipPolicy};
use super::slice::{Direction, Slice};
use super::time::{within_grace, Grace, FAR_FUTURE, FAR_PAST};

/// What to do when a new key date lands before already-recorded points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FuturePolicy {
    /// Refuse the insert.
    #[default]
    None,
    /// Keep later states; the slice following the insert is rediffed so
    /// its recorded states still read back unchanged.
    KeepFuture,
    /// Drop every slice at or after the new key date.
    OverwriteFuture,
}

/// Outcome of a reconstruction.
#[derive(Clone, Debug)]
pub struct Reconstruction<E> {
    /// Entity at the requested key date.
    pub entity: E,
    /// Slices whose patch failed but was accepted by a skip policy.
    pub skipped: Vec<Slice>,
    /// The composed JSON could not be deserialized and a policy accepted
    /// that; `entity` is the untouched initial entity.
    pub final_deserialization_failed: bool,
}

impl<E> Reconstruction<E> {
    pub fn patches_have_been_skipped(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Reconstruction report for the in-place populate variant.
#[derive(Clone, Debug, Default)]
pub struct PopulateReport {
    pub skipped: Vec<Slice>,
    pub final_deserialization_failed: bool,
}

impl PopulateReport {
    pub fn patches_have_been_skipped(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Ordered, gapless, directed sequence of slices covering `[-inf, +inf)`.
pub struct Chain<E> {
    direction: Direction,
    slices: Vec<Slice>,
    codec: Codec<E>,
    engine: Arc<dyn DiffEngine>,
    policies: Vec<SkipPolicy<E>>,
    grace: Grace,
}

impl<E> fmt::Debug for Chain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("direction", &self.direction)
            .field("slices", &self.slices)
            .field("policies", &self.policies.len())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

/// Two chains are equal when direction and slices agree; collaborators
/// are not part of a chain's identity.
impl<E> PartialEq for Chain<E> {
    fn eq(&self, other: &Self) -> bool {
        self.direction == other.direction && self.slices == other.slices
    }
}

impl<E: Serialize + DeserializeOwned> Chain<E> {
    /// Empty forward chain with the serde codec and structural differ.
    pub fn new() -> Self {
        Self {
            direction: Direction::Forward,
            slices: Vec::new(),
            codec: Codec::serde(),
            engine: Arc::new(StructuralDiff),
            policies: Vec::new(),
            grace: Grace::DEFAULT,
        }
    }

    pub fn builder() -> ChainBuilder<E> {
        ChainBuilder::new()
    }
}

impl<E: Serialize + DeserializeOwned> Default for Chain<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Chain<E> {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn grace(&self) -> Grace {
        self.grace
    }

    /// Finite slice starts in ascending order: the instants `add` was
    /// called at.
    pub fn key_dates(&self) -> impl Iterator<Item = OffsetDateTime> + '_ {
        self.slices
            .iter()
            .map(Slice::start)
            .filter(|start| *start != FAR_PAST)
    }

    /// True when some slice starts within `grace` ticks of `instant`.
    pub fn contains(&self, instant: OffsetDateTime, grace: Grace) -> bool {
        self.slices
            .iter()
            .any(|slice| within_grace(slice.start(), instant, grace))
    }

    /// Entity state at `key_date`, composed from the initial entity and
    /// every slice the direction predicate selects.
    pub fn patch_to_date(
        &self,
        initial: &E,
        key_date: OffsetDateTime,
    ) -> Result<Reconstruction<E>, ChainError>
    where
        E: Clone,
    {
        let composed = self.compose_at(initial, key_date)?;
        let skipped = self.collect_skipped(&composed.skipped);
        match self.codec.deserialize(&composed.doc) {
            Ok(entity) => Ok(Reconstruction {
                entity,
                skipped,
                final_deserialization_failed: false,
            }),
            Err(source) => {
                let failure = ApplyFailure::Codec(source);
                if self.final_failure_accepted(initial, &failure) {
                    tracing::warn!("final deserialization failed, returning the initial entity");
                    Ok(Reconstruction {
                        entity: initial.clone(),
                        skipped,
                        final_deserialization_failed: true,
                    })
                } else {
                    Err(codec_error(failure))
                }
            }
        }
    }

    /// In-place variant of [`Chain::patch_to_date`]; requires a populate
    /// hook on the codec.
    pub fn populate_to_date(
        &self,
        initial: &E,
        key_date: OffsetDateTime,
        target: &mut E,
    ) -> Result<PopulateReport, ChainError> {
        if !self.codec.supports_populate() {
            return Err(ChainError::PopulateNotConfigured);
        }
        let composed = self.compose_at(initial, key_date)?;
        let skipped = self.collect_skipped(&composed.skipped);
        match self.codec.populate(&composed.doc, target) {
            Ok(()) => Ok(PopulateReport {
                skipped,
                final_deserialization_failed: false,
            }),
            Err(source) => {
                let failure = ApplyFailure::Codec(source);
                if self.final_failure_accepted(initial, &failure) {
                    tracing::warn!("populate failed, leaving the target as the hook left it");
                    Ok(PopulateReport {
                        skipped,
                        final_deserialization_failed: true,
                    })
                } else {
                    Err(codec_error(failure))
                }
            }
        }
    }

    /// Records that the entity read `changed` from `moment` on.
    ///
    /// `initial` is the state at `-inf`; the patch stored for `moment` is
    /// computed against the reconstructed state just before it. Only
    /// forward chains accept inserts.
    pub fn add(
        &mut self,
        initial: &E,
        changed: &E,
        moment: OffsetDateTime,
        policy: FuturePolicy,
    ) -> Result<(), ChainError> {
        if self.direction == Direction::Backward {
            return Err(ChainError::UnsupportedOperation {
                direction: self.direction,
            });
        }
        // The open boundaries are not insertable instants.
        if moment == FAR_PAST || moment == FAR_FUTURE {
            return Err(ChainError::DuplicateKeyDate { moment });
        }
        if let Some(index) = self.start_within_grace(moment) {
            let exact = self.slices[index].start() == moment;
            if policy == FuturePolicy::KeepFuture && exact {
                return self.replace_at(initial, changed, index);
            }
            return Err(ChainError::DuplicateKeyDate { moment });
        }

        let changed_json = self.codec.serialize(changed)?;

        if self.slices.is_empty() {
            let initial_json = self.codec.serialize(initial)?;
            let patch = self.engine.diff(&initial_json, &changed_json);
            self.slices
                .push(Slice::spanning(FAR_PAST, moment, None, self.direction));
            self.slices
                .push(Slice::spanning(moment, FAR_FUTURE, patch, self.direction));
            tracing::debug!(%moment, "first state point recorded");
            return Ok(());
        }

        match (self.first_start_after(moment), policy) {
            (None, _) => self.append(initial, changed_json, moment),
            (Some(_), FuturePolicy::None) => Err(ChainError::MissingFuturePolicy { moment }),
            (Some(first_after), FuturePolicy::OverwriteFuture) => {
                self.overwrite_future(initial, changed_json, moment, first_after)
            }
            (Some(first_after), FuturePolicy::KeepFuture) => {
                self.insert_between(initial, changed_json, moment, first_after)
            }
        }
    }

    /// Rebuilds this chain against the opposite temporal direction.
    ///
    /// Returns the entity at the opposite open boundary together with a
    /// fresh chain whose patches read correctly under the reversed
    /// reconstruction rule. The source chain is untouched.
    pub fn reverse(&self, initial: &E) -> Result<(E, Chain<E>), ChainError> {
        let (base, states) = self.region_states(initial)?;
        let count = self.slices.len();
        let reversed = self.direction.opposite();

        let mut slices = Vec::with_capacity(count);
        for (index, slice) in self.slices.iter().enumerate() {
            let patch = match (self.direction, index) {
                // Forward -> Backward: slice i carries the step into its
                // successor's state; the last slice is quiet.
                (Direction::Forward, i) if i + 1 < count => {
                    self.engine.diff(&states[i], &states[i + 1])
                }
                (Direction::Forward, _) => None,
                // Backward -> Forward: slice i carries the step out of its
                // predecessor's state; the first slice is quiet.
                (Direction::Backward, 0) => None,
                (Direction::Backward, i) => self.engine.diff(&states[i - 1], &states[i]),
            };
            slices.push(Slice::spanning(slice.start(), slice.end(), patch, reversed));
        }

        let boundary_doc = match self.direction {
            Direction::Forward => states.last().unwrap_or(&base),
            Direction::Backward => states.first().unwrap_or(&base),
        };
        let boundary = self.codec.deserialize(boundary_doc)?;

        Ok((
            boundary,
            Chain {
                direction: reversed,
                slices,
                codec: self.codec.clone(),
                engine: Arc::clone(&self.engine),
                policies: self.policies.clone(),
                grace: self.grace,
            },
        ))
    }

    fn start_within_grace(&self, moment: OffsetDateTime) -> Option<usize> {
        self.slices
            .iter()
            .position(|slice| within_grace(slice.start(), moment, self.grace))
    }

    fn first_start_after(&self, moment: OffsetDateTime) -> Option<usize> {
        self.slices.iter().position(|slice| slice.start() > moment)
    }

    /// Case: no recorded point lies after `moment`.
    fn append(
        &mut self,
        initial: &E,
        changed_json: Value,
        moment: OffsetDateTime,
    ) -> Result<(), ChainError> {
        let at_moment = self.compose_at(initial, moment)?;
        let patch = self.engine.diff(&at_moment.doc, &changed_json);
        let last = self
            .slices
            .last_mut()
            .expect("non-empty chain has a last slice");
        last.shrink_end_to(moment)?;
        self.slices
            .push(Slice::spanning(moment, FAR_FUTURE, patch, self.direction));
        tracing::debug!(%moment, "state point appended");
        Ok(())
    }

    /// Case: later points exist and the caller chose to drop them.
    fn overwrite_future(
        &mut self,
        initial: &E,
        changed_json: Value,
        moment: OffsetDateTime,
        first_after: usize,
    ) -> Result<(), ChainError> {
        let at_moment = self.compose_at(initial, moment)?;
        let patch = self.engine.diff(&at_moment.doc, &changed_json);
        let dropped = self.slices.len() - first_after;
        self.slices.truncate(first_after);
        let last = self
            .slices
            .last_mut()
            .expect("slices before the dropped future remain");
        last.shrink_end_to(moment)?;
        self.slices
            .push(Slice::spanning(moment, FAR_FUTURE, patch, self.direction));
        tracing::debug!(%moment, dropped, "future state points overwritten");
        Ok(())
    }

    /// Case: `moment` coincides exactly with an existing key date under
    /// KeepFuture. The point's patch is recomputed, and so is the
    /// follower's: its predecessor state just changed.
    fn replace_at(&mut self, initial: &E, changed: &E, index: usize) -> Result<(), ChainError> {
        let changed_json = self.codec.serialize(changed)?;
        let before = self.compose_before_index(initial, index)?;
        let follower_state = if index + 1 < self.slices.len() {
            Some(self.compose_before_index(initial, index + 2)?.doc)
        } else {
            None
        };

        let moment = self.slices[index].start();
        let patch = self.engine.diff(&before.doc, &changed_json);
        self.slices[index].set_patch(patch);
        if let Some(follower_state) = follower_state {
            let follower_patch = self.engine.diff(&changed_json, &follower_state);
            self.slices[index + 1].set_patch(follower_patch);
        }
        tracing::debug!(%moment, index, "state point replaced in place");
        Ok(())
    }

    /// Case: `moment` falls strictly inside an existing slice with later
    /// points recorded, under KeepFuture. The covering slice is split at
    /// `moment` and the follower rediffed against the new state; every
    /// later slice keeps its boundaries and meaning.
    fn insert_between(
        &mut self,
        initial: &E,
        changed_json: Value,
        moment: OffsetDateTime,
        first_after: usize,
    ) -> Result<(), ChainError> {
        let covering = first_after - 1;
        let at_moment = self.compose_before_index(initial, covering + 1)?;
        let at_follower = self.compose_before_index(initial, first_after + 1)?;

        let follower_start = self.slices[first_after].start();
        let patch = self.engine.diff(&at_moment.doc, &changed_json);
        let follower_patch = self.engine.diff(&changed_json, &at_follower.doc);

        self.slices[first_after].set_patch(follower_patch);
        self.slices[covering].shrink_end_to(moment)?;
        self.slices.insert(
            first_after,
            Slice::spanning(moment, follower_start, patch, self.direction),
        );
        tracing::debug!(%moment, "state point inserted before existing future");
        Ok(())
    }

    fn compose_at(&self, initial: &E, key_date: OffsetDateTime) -> Result<Composed, ChainError> {
        match self.direction {
            Direction::Forward => self.compose_filtered(initial, &|_, slice| {
                (slice.start() == FAR_PAST && key_date != FAR_PAST) || slice.start() <= key_date
            }),
            Direction::Backward => {
                self.compose_filtered(initial, &|_, slice| slice.end() > key_date)
            }
        }
    }

    /// Forward fold over `slices[..index]`, the state just before the
    /// slice at `index` begins.
    fn compose_before_index(&self, initial: &E, index: usize) -> Result<Composed, ChainError> {
        self.compose_filtered(initial, &|i, _| i < index)
    }

    fn compose_filtered(
        &self,
        initial: &E,
        take: &dyn Fn(usize, &Slice) -> bool,
    ) -> Result<Composed, ChainError> {
        let initial_json = self.codec.serialize(initial)?;
        let mut doc = initial_json.clone();
        let mut skipped = Vec::new();

        let order: Vec<usize> = match self.direction {
            Direction::Forward => (0..self.slices.len()).collect(),
            Direction::Backward => (0..self.slices.len()).rev().collect(),
        };

        for index in order {
            let slice = &self.slices[index];
            if !take(index, slice) {
                continue;
            }
            let Some(patch) = slice.patch() else {
                continue;
            };
            let step = match self.direction {
                Direction::Forward => self.engine.apply(&doc, patch),
                Direction::Backward => self.engine.unapply(&doc, patch),
            };
            match step {
                Ok(next) => doc = next,
                Err(source) => {
                    let failure = ApplyFailure::Patch(source.clone());
                    if self.policy_accepts(&doc, slice, &failure) {
                        tracing::debug!(index, "patch application skipped by policy");
                        skipped.push(index);
                        continue;
                    }
                    return Err(PatchingFailure {
                        initial: initial_json,
                        intermediate: doc,
                        patch: patch.clone(),
                        index,
                        source,
                    }
                    .into());
                }
            }
        }
        Ok(Composed {
            doc,
            skipped,
        })
    }

    /// Policies inspect the entity as it stood before the failing step; a
    /// state they cannot see is a state they cannot excuse.
    fn policy_accepts(&self, doc: &Value, slice: &Slice, failure: &ApplyFailure) -> bool {
        if self.policies.is_empty() {
            return false;
        }
        let Ok(entity) = self.codec.deserialize(doc) else {
            return false;
        };
        self.policies
            .iter()
            .any(|policy| policy(&entity, Some(slice), failure))
    }

    fn final_failure_accepted(&self, initial: &E, failure: &ApplyFailure) -> bool {
        self.policies
            .iter()
            .any(|policy| policy(initial, None, failure))
    }

    fn collect_skipped(&self, indices: &[usize]) -> Vec<Slice> {
        indices.iter().map(|&index| self.slices[index].clone()).collect()
    }

    /// Per-slice entity states: `states[i]` is the JSON holding anywhere
    /// within slice `i`'s span, under this direction's reconstruction
    /// rule.
    fn region_states(&self, initial: &E) -> Result<(Value, Vec<Value>), ChainError> {
        let base = self.codec.serialize(initial)?;
        let count = self.slices.len();
        let mut states = vec![Value::Null; count];
        let mut doc = base.clone();

        let order: Vec<usize> = match self.direction {
            Direction::Forward => (0..count).collect(),
            Direction::Backward => (0..count).rev().collect(),
        };
        for index in order {
            let slice = &self.slices[index];
            if let Some(patch) = slice.patch() {
                let step = match self.direction {
                    Direction::Forward => self.engine.apply(&doc, patch),
                    Direction::Backward => self.engine.unapply(&doc, patch),
                };
                doc = step.map_err(|source| {
                    ChainError::from(PatchingFailure {
                        initial: base.clone(),
                        intermediate: doc.clone(),
                        patch: patch.clone(),
                        index,
                        source,
                    })
                })?;
            }
            states[index] = doc.clone();
        }
        Ok((base, states))
    }
}

struct Composed {
    doc: Value,
    skipped: Vec<usize>,
}

fn codec_error(failure: ApplyFailure) -> ChainError {
    let ApplyFailure::Codec(source) = failure else {
        unreachable!("final failures are codec failures");
    };
    ChainError::Codec(source)
}

/// Constructor options for a chain; every option of the wire contract is
/// here, with the serde codec and structural differ as defaults.
pub struct ChainBuilder<E> {
    direction: Direction,
    slices: Vec<Slice>,
    codec: Codec<E>,
    engine: Arc<dyn DiffEngine>,
    policies: Vec<SkipPolicy<E>>,
    grace: Grace,
}

impl<E: Serialize + DeserializeOwned> ChainBuilder<E> {
    fn new() -> Self {
        Self {
            direction: Direction::Forward,
            slices: Vec::new(),
            codec: Codec::serde(),
            engine: Arc::new(StructuralDiff),
            policies: Vec::new(),
            grace: Grace::DEFAULT,
        }
    }
}

impl<E> ChainBuilder<E> {
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Initial slices; validated at build time.
    pub fn slices(mut self, slices: Vec<Slice>) -> Self {
        self.slices = slices;
        self
    }

    pub fn codec(mut self, codec: Codec<E>) -> Self {
        self.codec = codec;
        self
    }

    /// In-place deserialization hook; unlocks `populate_to_date`.
    pub fn populate(
        mut self,
        hook: impl Fn(&Value, &mut E) -> Result<(), CodecError> + Send + Sync + 'static,
    ) -> Self {
        self.codec = self.codec.with_populate(hook);
        self
    }

    pub fn skip_policy(mut self, policy: SkipPolicy<E>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn skip_when(
        mut self,
        policy: impl Fn(&E, Option<&Slice>, &ApplyFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn engine(mut self, engine: impl DiffEngine + 'static) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn grace(mut self, grace: Grace) -> Self {
        self.grace = grace;
        self
    }

    pub fn build(self) -> Result<Chain<E>, ChainError> {
        let mut slices = self.slices;
        for slice in &slices {
            if slice.direction() != self.direction {
                return Err(ChainError::InconsistentChain {
                    expected: self.direction,
                    found: slice.direction(),
                });
            }
        }
        slices.sort_by_key(|slice| slice.start());

        for pair in slices.windows(2) {
            if pair[0].start() == pair[1].start() {
                return Err(ChainError::AmbiguousBoundaries {
                    boundary: Boundary::Start,
                    instant: pair[0].start(),
                });
            }
        }
        let mut ends: Vec<OffsetDateTime> = slices.iter().map(Slice::end).collect();
        ends.sort_unstable();
        for pair in ends.windows(2) {
            if pair[0] == pair[1] {
                return Err(ChainError::AmbiguousBoundaries {
                    boundary: Boundary::End,
                    instant: pair[0],
                });
            }
        }

        if let Some(first) = slices.first() {
            if first.start() != FAR_PAST {
                return Err(ChainError::Discontiguous { at: FAR_PAST });
            }
        }
        if let Some(last) = slices.last() {
            if last.end() != FAR_FUTURE {
                return Err(ChainError::Discontiguous { at: FAR_FUTURE });
            }
        }
        for pair in slices.windows(2) {
            if pair[0].end() != pair[1].start() {
                return Err(ChainError::Discontiguous { at: pair[0].end() });
            }
        }

        Ok(Chain {
            direction: self.direction,
            slices,
            codec: self.codec,
            engine: self.engine,
            policies: self.policies,
            grace: self.grace,
        })
    }
}
