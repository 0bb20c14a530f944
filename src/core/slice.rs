//! Layer 1: half-open time slices.
//!
//! A slice covers `[start, end)` and carries the structural diff from its
//! predecessor's state to its own. `None` means the entity did not change
//! across the slice. Wire mapping goes through [`WireSlice`], whose field
//! names are the persisted contract.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use super::time::{format_stamp, parse_stamp, FAR_FUTURE, FAR_PAST};

/// Temporal orientation of a chain and its slices.
///
/// Forward patches progress earlier to later with the base state at
/// `-inf`; Backward patches are read via `unapply` with the base state at
/// `+inf`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "Forward",
            Direction::Backward => "Backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid slice geometry or wire content.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SliceError {
    #[error("slice interval is empty or inverted: [{start}, {end})")]
    EmptyInterval {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
    #[error("{op} to {at} falls outside [{start}, {end})")]
    BoundsViolation {
        op: &'static str,
        at: OffsetDateTime,
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
    #[error("shifting by {delta} leaves the representable time range")]
    ShiftOverflow { delta: Duration },
    #[error("slice stamp `{raw}` is not an RFC-3339 instant: {source}")]
    Stamp {
        raw: String,
        #[source]
        source: time::error::Parse,
    },
}

/// Half-open `[start, end)` interval with an optional diff payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireSlice", try_from = "WireSlice")]
pub struct Slice {
    start: OffsetDateTime,
    end: OffsetDateTime,
    patch: Option<Value>,
    timestamp: Option<OffsetDateTime>,
    direction: Direction,
}

impl Slice {
    pub fn new(
        start: OffsetDateTime,
        end: OffsetDateTime,
        patch: Option<Value>,
        direction: Direction,
    ) -> Result<Self, SliceError> {
        if start >= end {
            return Err(SliceError::EmptyInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            patch,
            timestamp: None,
            direction,
        })
    }

    /// Internal constructor for bounds the chain has already ordered.
    pub(crate) fn spanning(
        start: OffsetDateTime,
        end: OffsetDateTime,
        patch: Option<Value>,
        direction: Direction,
    ) -> Self {
        debug_assert!(start < end);
        Self {
            start,
            end,
            patch,
            timestamp: None,
            direction,
        }
    }

    /// Opaque persistence-row timestamp; carried, never interpreted.
    pub fn with_timestamp(mut self, timestamp: Option<OffsetDateTime>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    pub fn patch(&self) -> Option<&Value> {
        self.patch.as_ref()
    }

    pub(crate) fn set_patch(&mut self, patch: Option<Value>) {
        self.patch = patch;
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_open_start(&self) -> bool {
        self.start == FAR_PAST
    }

    pub fn is_open_end(&self) -> bool {
        self.end == FAR_FUTURE
    }

    pub fn covers(&self, instant: OffsetDateTime) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn shrink_end_to(&mut self, at: OffsetDateTime) -> Result<(), SliceError> {
        if self.start < at && at <= self.end {
            self.end = at;
            Ok(())
        } else {
            Err(self.bounds_violation("shrink end", at))
        }
    }

    pub fn shrink_start_to(&mut self, at: OffsetDateTime) -> Result<(), SliceError> {
        if self.start <= at && at < self.end {
            self.start = at;
            Ok(())
        } else {
            Err(self.bounds_violation("shrink start", at))
        }
    }

    pub fn expand_end_to(&mut self, at: OffsetDateTime) -> Result<(), SliceError> {
        if at >= self.end {
            self.end = at;
            Ok(())
        } else {
            Err(self.bounds_violation("expand end", at))
        }
    }

    pub fn expand_start_to(&mut self, at: OffsetDateTime) -> Result<(), SliceError> {
        if at <= self.start {
            self.start = at;
            Ok(())
        } else {
            Err(self.bounds_violation("expand start", at))
        }
    }

    /// Translates the whole interval by `delta`.
    pub fn shift(&mut self, delta: Duration) -> Result<(), SliceError> {
        let start = self
            .start
            .checked_add(delta)
            .ok_or(SliceError::ShiftOverflow { delta })?;
        let end = self
            .end
            .checked_add(delta)
            .ok_or(SliceError::ShiftOverflow { delta })?;
        self.start = start;
        self.end = end;
        Ok(())
    }

    pub fn overlaps(&self, other: &Slice) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersection(&self, other: &Slice) -> Option<(OffsetDateTime, OffsetDateTime)> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some((start, end))
    }

    fn bounds_violation(&self, op: &'static str, at: OffsetDateTime) -> SliceError {
        SliceError::BoundsViolation {
            op,
            at,
            start: self.start,
            end: self.end,
        }
    }
}

/// Wire mirror with the contractual persisted field names.
///
/// `from` is always an instant (`-inf` spelled as the minimum
/// representable date-time); `to` is an instant, or `null`/max-date for
/// `+inf`; `patch` is the diff document or `null`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireSlice {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub patch: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub direction: Direction,
}

impl From<Slice> for WireSlice {
    fn from(slice: Slice) -> Self {
        Self {
            from: format_stamp(slice.start),
            to: (slice.end != FAR_FUTURE).then(|| format_stamp(slice.end)),
            patch: slice.patch,
            timestamp: slice.timestamp.map(format_stamp),
            direction: slice.direction,
        }
    }
}

impl TryFrom<WireSlice> for Slice {
    type Error = SliceError;

    fn try_from(wire: WireSlice) -> Result<Self, Self::Error> {
        let start = parse_wire_stamp(&wire.from)?;
        let end = match &wire.to {
            None => FAR_FUTURE,
            Some(raw) => parse_wire_stamp(raw)?,
        };
        let timestamp = wire
            .timestamp
            .as_deref()
            .map(parse_wire_stamp)
            .transpose()?;
        if start >= end {
            return Err(SliceError::EmptyInterval { start, end });
        }
        Ok(Slice {
            start,
            end,
            patch: wire.patch,
            timestamp,
            direction: wire.direction,
        })
    }
}

fn parse_wire_stamp(raw: &str) -> Result<OffsetDateTime, SliceError> {
    parse_stamp(raw).map_err(|source| SliceError::Stamp {
        raw: raw.to_string(),
        source,
    })
}
