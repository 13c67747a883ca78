//! Program clock
//!
//! The program is the catalog played end to end, forever. Given the instant
//! broadcasting started, any wall-clock time maps to exactly one track and
//! one offset inside it. Nothing but the epoch is stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::Catalog;

/// A point in the looping program
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgramPosition {
    pub track_index: usize,
    pub offset_secs: f64,
}

impl ProgramPosition {
    pub const START: ProgramPosition = ProgramPosition {
        track_index: 0,
        offset_secs: 0.0,
    };
}

/// Maps wall-clock time onto the program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramClock {
    epoch: DateTime<Utc>,
}

impl ProgramClock {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self { epoch }
    }

    /// Clock whose epoch is now
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Position at the current instant
    pub fn current_position(&self, catalog: &Catalog) -> ProgramPosition {
        self.position_at(catalog, Utc::now())
    }

    /// Position at `now`.
    ///
    /// The offset is always inside `[0, track.duration)`. Instants before
    /// the epoch map to the start of the program; an empty catalog yields
    /// [`ProgramPosition::START`].
    pub fn position_at(&self, catalog: &Catalog, now: DateTime<Utc>) -> ProgramPosition {
        let total = catalog.total_duration();
        if catalog.is_empty() || !(total > 0.0) {
            return ProgramPosition::START;
        }

        let elapsed = self.elapsed_secs(now).rem_euclid(total);
        // rem_euclid may round up to `total`
        let elapsed = if elapsed < total { elapsed } else { 0.0 };

        let Some(mut index) = catalog.index_at(elapsed) else {
            return ProgramPosition::START;
        };
        let mut offset = elapsed - catalog.start_of(index);

        // cumulative sums can put us a rounding error past the end
        let duration = catalog.track(index).map(|t| t.duration).unwrap_or(0.0);
        if offset >= duration {
            index = (index + 1) % catalog.len();
            offset = 0.0;
        }

        ProgramPosition {
            track_index: index,
            offset_secs: offset.max(0.0),
        }
    }

    fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        let delta = now.signed_duration_since(self.epoch);
        match delta.num_microseconds() {
            Some(us) => (us.max(0)) as f64 / 1_000_000.0,
            // beyond ~292k years of microseconds; milliseconds still fit
            None => (delta.num_milliseconds().max(0)) as f64 / 1_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::track::test_catalog;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn ab() -> Catalog {
        test_catalog(&[("a", 10.0, 5000), ("b", 20.0, 10000)])
    }

    #[test]
    fn test_late_join_lands_in_second_track() {
        let clock = ProgramClock::new(t0());
        let pos = clock.position_at(&ab(), t0() + Duration::seconds(12));
        assert_eq!(pos.track_index, 1);
        assert!((pos.offset_secs - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_wraps_around_program() {
        let clock = ProgramClock::new(t0());
        let pos = clock.position_at(&ab(), t0() + Duration::seconds(30 * 3 + 4));
        assert_eq!(pos.track_index, 0);
        assert!((pos.offset_secs - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_boundary_starts_next_track() {
        let clock = ProgramClock::new(t0());
        let pos = clock.position_at(&ab(), t0() + Duration::seconds(10));
        assert_eq!(pos, ProgramPosition { track_index: 1, offset_secs: 0.0 });
    }

    #[test]
    fn test_empty_catalog_is_start() {
        let clock = ProgramClock::new(t0());
        let pos = clock.position_at(&Catalog::default(), t0() + Duration::seconds(99));
        assert_eq!(pos, ProgramPosition::START);
    }

    #[test]
    fn test_before_epoch_is_start() {
        let clock = ProgramClock::new(t0());
        let pos = clock.position_at(&ab(), t0() - Duration::seconds(5));
        assert_eq!(pos, ProgramPosition::START);
    }

    #[test]
    fn test_same_instant_is_idempotent() {
        let clock = ProgramClock::new(t0());
        let now = t0() + Duration::milliseconds(123_456);
        let catalog = ab();
        assert_eq!(clock.position_at(&catalog, now), clock.position_at(&catalog, now));
    }

    proptest! {
        #[test]
        fn prop_position_in_range(
            durations in prop::collection::vec(0.001f64..600.0, 1..20),
            elapsed_ms in 0i64..10_000_000_000,
        ) {
            let rows: Vec<(String, f64, u64)> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| (format!("t{:03}", i), *d, 1000))
                .collect();
            let borrowed: Vec<(&str, f64, u64)> =
                rows.iter().map(|(n, d, s)| (n.as_str(), *d, *s)).collect();
            let catalog = test_catalog(&borrowed);

            let clock = ProgramClock::new(t0());
            let pos = clock.position_at(&catalog, t0() + Duration::milliseconds(elapsed_ms));

            prop_assert!(pos.track_index < catalog.len());
            let duration = catalog.track(pos.track_index).unwrap().duration;
            prop_assert!(pos.offset_secs >= 0.0);
            prop_assert!(pos.offset_secs < duration);
        }
    }
}
