//! Timestamp Reconstruction
//!
//! The live feed reports quote times with whole-second precision. Several
//! quotes for the same symbol routinely share one second, so the bridge
//! synthesizes the millisecond part from the wall-clock arrival order.
//!
//! # Algorithm
//!
//! - A quote whose second differs from the previous one starts a new second:
//!   its timestamp is the second boundary itself (millisecond offset 0).
//! - A quote in the same second gets `|arrival - first_arrival| + n` added,
//!   where `n` counts same-second quotes so far. The offset is clamped to 999
//!   so the result never spills into the next second.
//!
//! All values are milliseconds since the Unix epoch.
//!
//! # Offset Policy
//!
//! Feed times are wall-clock times of the quote server. Before reconstruction
//! they are shifted to UTC by one of two fixed offsets, picked by whether the
//! *current* instant is inside the observing region's daylight-saving window.
//! Historical quotes near a transition therefore get the offset in force at
//! processing time, not the one in force when they were quoted.

use chrono::{DateTime, TimeDelta, Utc};
use chrono::offset::TimeZone;
use chrono_tz::{OffsetComponents, Tz};

/// Largest synthesized millisecond offset within one second.
pub const MAX_MILLIS_OFFSET: i64 = 999;

// =============================================================================
// Timestamp State
// =============================================================================

/// Bookkeeping carried between consecutive quotes.
///
/// Owned by exactly one consumer (the publish worker) and passed by mutable
/// reference into each reconstruction. The increment counter resets to zero
/// exactly when the tracked second changes and strictly increases otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampState {
    last_second_timestamp: Option<i64>,
    last_arrival_time: i64,
    arrival_increment_counter: i64,
}

impl TimestampState {
    /// Create an empty state; the first quote always starts a new second.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_second_timestamp: None,
            last_arrival_time: 0,
            arrival_increment_counter: 0,
        }
    }

    /// Second currently being tracked, if any quote has been seen.
    #[must_use]
    pub const fn last_second_timestamp(&self) -> Option<i64> {
        self.last_second_timestamp
    }

    /// Arrival time of the first quote in the tracked second.
    #[must_use]
    pub const fn last_arrival_time(&self) -> i64 {
        self.last_arrival_time
    }

    /// Number of additional quotes seen in the tracked second.
    #[must_use]
    pub const fn arrival_increment_counter(&self) -> i64 {
        self.arrival_increment_counter
    }
}

/// Synthesize a millisecond-precision timestamp.
///
/// `event_second_ts` is the UTC-adjusted quote time in milliseconds (a whole
/// second); `arrival_time` is the wall-clock arrival in milliseconds.
#[must_use]
pub fn reconstruct(event_second_ts: i64, arrival_time: i64, state: &mut TimestampState) -> i64 {
    if state.last_second_timestamp != Some(event_second_ts) {
        state.last_second_timestamp = Some(event_second_ts);
        state.last_arrival_time = arrival_time;
        state.arrival_increment_counter = 0;
        return event_second_ts;
    }

    state.arrival_increment_counter += 1;
    let delta = (arrival_time - state.last_arrival_time)
        .saturating_abs()
        .saturating_add(state.arrival_increment_counter)
        .min(MAX_MILLIS_OFFSET);

    event_second_ts + delta
}

// =============================================================================
// Offset Policy
// =============================================================================

/// Picks the UTC correction applied to feed wall-clock times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPolicy {
    /// Offset subtracted while the region observes daylight saving.
    pub daylight_offset: TimeDelta,
    /// Offset subtracted outside daylight saving.
    pub standard_offset: TimeDelta,
    /// Region whose daylight-saving window is consulted.
    pub region: Tz,
}

impl OffsetPolicy {
    /// Largest offset magnitude accepted, in seconds.
    pub const MAX_OFFSET_SECS: i64 = 86_400;

    /// Create a policy from offsets in seconds.
    ///
    /// Returns `None` if either offset exceeds one day in magnitude.
    #[must_use]
    pub fn from_secs(daylight_secs: i64, standard_secs: i64, region: Tz) -> Option<Self> {
        let in_range = |secs: i64| (-Self::MAX_OFFSET_SECS..=Self::MAX_OFFSET_SECS).contains(&secs);
        if !in_range(daylight_secs) || !in_range(standard_secs) {
            return None;
        }
        Some(Self {
            daylight_offset: TimeDelta::try_seconds(daylight_secs)?,
            standard_offset: TimeDelta::try_seconds(standard_secs)?,
            region,
        })
    }

    /// Whether `now` falls inside the region's daylight-saving window.
    #[must_use]
    pub fn is_daylight_saving(&self, now: DateTime<Utc>) -> bool {
        self.region
            .offset_from_utc_datetime(&now.naive_utc())
            .dst_offset()
            != TimeDelta::zero()
    }

    /// Offset in force at `now`.
    #[must_use]
    pub fn offset_at(&self, now: DateTime<Utc>) -> TimeDelta {
        if self.is_daylight_saving(now) {
            self.daylight_offset
        } else {
            self.standard_offset
        }
    }

    /// Offset in force right now, in milliseconds.
    #[must_use]
    pub fn current_offset_millis(&self) -> i64 {
        self.offset_at(Utc::now()).num_milliseconds()
    }
}

impl Default for OffsetPolicy {
    fn default() -> Self {
        Self {
            daylight_offset: TimeDelta::zero(),
            standard_offset: TimeDelta::zero(),
            region: chrono_tz::America::New_York,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
