//! Layer 0: instants and grace tolerance.
//!
//! All chain arithmetic happens on UTC `OffsetDateTime` values. The open
//! boundaries of a chain are pinned to the extreme representable instants,
//! so every slice has concrete, comparable bounds.

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

/// Stands in for `-inf`: the open start of the first slice.
pub const FAR_PAST: OffsetDateTime = PrimitiveDateTime::MIN.assume_utc();

/// Stands in for `+inf`: the open end of the last slice.
pub const FAR_FUTURE: OffsetDateTime = PrimitiveDateTime::MAX.assume_utc();

/// Wire stamp for [`FAR_PAST`]. RFC-3339 cannot express negative years, so
/// the minimum instant gets a fixed spelling of its own.
pub(crate) const FAR_PAST_STAMP: &str = "-9999-01-01T00:00:00Z";

/// Wire stamp accepted for [`FAR_FUTURE`] alongside `null`.
pub(crate) const FAR_FUTURE_STAMP: &str = "9999-12-31T23:59:59.999999999Z";

/// One tick is 100ns, the finest granularity persistence layers round to.
pub const TICK: Duration = Duration::nanoseconds(100);

/// Tick-denominated tolerance for key-date lookups.
///
/// Persistence round-trips may drift instants by sub-microsecond amounts;
/// the default absorbs up to 100us of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Grace(pub u64);

impl Grace {
    pub const DEFAULT: Grace = Grace(1000);

    /// Exact matching, for tests and strict lookups.
    pub const EXACT: Grace = Grace(0);

    pub fn tolerance(self) -> Duration {
        let nanos = self.0.saturating_mul(100).min(i64::MAX as u64);
        Duration::nanoseconds(nanos as i64)
    }
}

/// True when `a` and `b` are at most `grace` ticks apart.
pub fn within_grace(a: OffsetDateTime, b: OffsetDateTime, grace: Grace) -> bool {
    (a - b).abs() <= grace.tolerance()
}

pub(crate) fn format_stamp(instant: OffsetDateTime) -> String {
    if instant == FAR_PAST {
        return FAR_PAST_STAMP.to_string();
    }
    if instant == FAR_FUTURE {
        return FAR_FUTURE_STAMP.to_string();
    }
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| instant.to_string())
}

pub(crate) fn parse_stamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    if raw == FAR_PAST_STAMP {
        return Ok(FAR_PAST);
    }
    if raw == FAR_FUTURE_STAMP {
        return Ok(FAR_FUTURE);
    }
    OffsetDateTime::parse(raw, &Rfc3339)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn sentinels_bracket_every_instant() {
        let t = datetime!(2022-01-01 0:00 UTC);
        assert!(FAR_PAST < t);
        assert!(t < FAR_FUTURE);
    }

    #[test]
    fn grace_tolerance_is_tick_denominated() {
        assert_eq!(Grace(1).tolerance(), Duration::nanoseconds(100));
        assert_eq!(Grace::DEFAULT.tolerance(), Duration::microseconds(100));
        assert_eq!(Grace::EXACT.tolerance(), Duration::ZERO);
    }

    #[test]
    fn within_grace_is_symmetric_and_inclusive() {
        let t = datetime!(2022-01-01 0:00 UTC);
        let drifted = t + Duration::microseconds(100);
        assert!(within_grace(t, drifted, Grace::DEFAULT));
        assert!(within_grace(drifted, t, Grace::DEFAULT));
        assert!(!within_grace(t, drifted + TICK, Grace::DEFAULT));
        assert!(!within_grace(t, drifted, Grace::EXACT));
        assert!(within_grace(t, t, Grace::EXACT));
    }

    #[test]
    fn stamps_round_trip_including_sentinels() {
        let t = datetime!(2023-06-15 12:30:45.1234567 UTC);
        assert_eq!(parse_stamp(&format_stamp(t)).unwrap(), t);
        assert_eq!(parse_stamp(&format_stamp(FAR_PAST)).unwrap(), FAR_PAST);
        assert_eq!(parse_stamp(&format_stamp(FAR_FUTURE)).unwrap(), FAR_FUTURE);
    }

    #[test]
    fn max_date_spelling_parses_as_far_future() {
        assert_eq!(parse_stamp(FAR_FUTURE_STAMP).unwrap(), FAR_FUTURE);
    }
}
