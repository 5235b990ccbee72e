//! Window periods around a visit's target date.
//!
//! A window period turns a target datetime into the range of datetimes on which
//! the visit may still be attended. Offsets are signed: the lower offset is zero
//! or negative, the upper offset zero or positive. Bounds cover whole days, so
//! the lower bound is the start of its day and the upper bound the last
//! microsecond of its day.

use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;

/// Allowed `(lower, upper)` range around a target datetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Window {
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}

impl Window {
    /// True if `dt` falls within the window, bounds included.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.lower <= dt && dt <= self.upper
    }
}

/// Relative lower/upper offsets for a visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowPeriod {
    rlower: Duration,
    rupper: Duration,
}

impl Default for WindowPeriod {
    fn default() -> Self {
        Self {
            rlower: Duration::zero(),
            rupper: Duration::zero(),
        }
    }
}

impl WindowPeriod {
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidWindowPeriod`] unless `rlower <= 0 <= rupper`.
    pub fn new(rlower: Duration, rupper: Duration) -> DomainResult<Self> {
        if rlower > Duration::zero() || rupper < Duration::zero() {
            return Err(DomainError::InvalidWindowPeriod {
                rlower: rlower.to_string(),
                rupper: rupper.to_string(),
            });
        }
        Ok(Self { rlower, rupper })
    }

    pub fn rlower(&self) -> Duration {
        self.rlower
    }

    pub fn rupper(&self) -> Duration {
        self.rupper
    }

    /// Compute the window around `base`.
    ///
    /// Pure: every call recomputes from `base`, nothing is cached.
    pub fn compute(&self, base: DateTime<Utc>) -> DomainResult<Window> {
        let out_of_range = || DomainError::DateOutOfRange {
            what: format!("window around {base}"),
        };

        let lower = base
            .checked_add_signed(self.rlower)
            .ok_or_else(out_of_range)?
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();

        let upper = base
            .checked_add_signed(self.rupper)
            .ok_or_else(out_of_range)?
            .date_naive()
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .ok_or_else(out_of_range)?
            .and_utc();

        Ok(Window { lower, upper })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn rejects_positive_lower_or_negative_upper() {
        assert!(WindowPeriod::new(Duration::days(1), Duration::days(3)).is_err());
        assert!(WindowPeriod::new(Duration::days(-1), Duration::days(-3)).is_err());
        assert!(WindowPeriod::new(Duration::zero(), Duration::zero()).is_ok());
    }

    #[test]
    fn compute_spans_whole_days() {
        let period = WindowPeriod::new(Duration::days(-3), Duration::days(6)).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 10, 14, 30, 0).unwrap();

        let window = period.compute(base).unwrap();

        assert_eq!(window.lower, Utc.with_ymd_and_hms(2024, 5, 7, 0, 0, 0).unwrap());
        assert_eq!(
            window.upper,
            Utc.with_ymd_and_hms(2024, 5, 16, 23, 59, 59).unwrap()
                + Duration::microseconds(999_999)
        );
        assert!(window.contains(base));
    }

    #[test]
    fn compute_recomputes_for_each_base() {
        let period = WindowPeriod::new(Duration::days(-1), Duration::days(1)).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

        let w1 = period.compute(first).unwrap();
        let w2 = period.compute(second).unwrap();

        assert_ne!(w1, w2);
        assert!(w2.contains(second));
        assert!(!w2.contains(first));
    }

    proptest! {
        #[test]
        fn compute_always_brackets_base(
            secs in 0i64..4_000_000_000,
            lower_days in -365i64..=0,
            upper_days in 0i64..=365,
            lower_hours in -23i64..=0,
            upper_hours in 0i64..=23,
        ) {
            let base = Utc.timestamp_opt(secs, 0).unwrap();
            let period = WindowPeriod::new(
                Duration::days(lower_days) + Duration::hours(lower_hours),
                Duration::days(upper_days) + Duration::hours(upper_hours),
            )
            .unwrap();

            let window = period.compute(base).unwrap();

            prop_assert!(window.lower <= base);
            prop_assert!(base <= window.upper);
        }
    }
}
