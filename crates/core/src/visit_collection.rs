//! Ordered visits of one schedule.

use crate::error::{DomainError, DomainResult};
use crate::visit::Visit;
use crate::window_period::Window;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vs_types::{Name, VisitCode};

/// A visit resolved against a schedule base datetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScheduledVisit {
    pub code: VisitCode,
    pub title: String,
    pub timepoint_datetime: DateTime<Utc>,
    pub window: Window,
}

/// Visits keyed by code, in insertion (protocol) order.
#[derive(Clone, Debug, Default)]
pub struct VisitCollection {
    visits: Vec<Visit>,
}

impl VisitCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `visit`, rejecting any visit whose code, title, timepoint or rbase
    /// is already taken. `schedule` names the owner in the error.
    pub fn add(&mut self, visit: Visit, schedule: &Name) -> DomainResult<&Visit> {
        for existing in &self.visits {
            let clash = if existing.code() == visit.code() {
                Some("code")
            } else if existing.title() == visit.title() {
                Some("title")
            } else if existing.timepoint() == visit.timepoint() {
                Some("timepoint")
            } else if existing.rbase() == visit.rbase() {
                Some("rbase")
            } else {
                None
            };

            if let Some(attr) = clash {
                return Err(DomainError::AlreadyRegisteredVisit {
                    visit: format!("{} ({})", visit.code(), visit.timepoint()),
                    attr,
                    schedule: schedule.clone(),
                });
            }
        }

        let code = visit.code().to_string();
        self.visits.push(visit);
        self.visits
            .last()
            .ok_or(DomainError::VisitNotFound { code })
    }

    pub fn get(&self, code: &str) -> Option<&Visit> {
        self.visits.iter().find(|v| v.code().as_str() == code)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Visit> {
        self.visits.iter()
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &VisitCode> {
        self.visits.iter().map(Visit::code)
    }

    pub fn first(&self) -> Option<&Visit> {
        self.visits.first()
    }

    pub fn last(&self) -> Option<&Visit> {
        self.visits.last()
    }

    /// The visit after `code`, if any.
    pub fn next(&self, code: &str) -> Option<&Visit> {
        let index = self.position(code)?;
        self.visits.get(index + 1)
    }

    /// The visit before `code`, if any.
    pub fn previous(&self, code: &str) -> Option<&Visit> {
        let index = self.position(code)?;
        index.checked_sub(1).and_then(|i| self.visits.get(i))
    }

    fn position(&self, code: &str) -> Option<usize> {
        self.visits.iter().position(|v| v.code().as_str() == code)
    }

    /// Target datetime and window of every visit for a schedule starting at `base`.
    pub fn timepoint_dates(&self, base: DateTime<Utc>) -> DomainResult<Vec<ScheduledVisit>> {
        self.visits
            .iter()
            .map(|visit| {
                let timepoint_datetime = visit.timepoint_datetime(base)?;
                Ok(ScheduledVisit {
                    code: visit.code().clone(),
                    title: visit.title().to_string(),
                    timepoint_datetime,
                    window: visit.window_for(timepoint_datetime)?,
                })
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a VisitCollection {
    type Item = &'a Visit;
    type IntoIter = std::slice::Iter<'a, Visit>;

    fn into_iter(self) -> Self::IntoIter {
        self.visits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::{Timepoint, VisitSpec};
    use chrono::{Duration, TimeZone};

    fn schedule_name() -> Name {
        Name::new("schedule1").unwrap()
    }

    fn visit(code: &str, timepoint: u32, rbase_days: i64) -> Visit {
        let mut spec = VisitSpec::new(code, timepoint);
        spec.rbase = Duration::days(rbase_days);
        spec.rlower = Duration::days(-1);
        spec.rupper = Duration::days(3);
        Visit::new(spec).unwrap()
    }

    fn three_visits() -> VisitCollection {
        let mut visits = VisitCollection::new();
        visits.add(visit("1000", 0, 0), &schedule_name()).unwrap();
        visits.add(visit("2000", 1, 7), &schedule_name()).unwrap();
        visits.add(visit("3000", 2, 14), &schedule_name()).unwrap();
        visits
    }

    #[test]
    fn add_keeps_insertion_order() {
        let visits = three_visits();
        let codes: Vec<&str> = visits.codes().map(VisitCode::as_str).collect();
        assert_eq!(codes, ["1000", "2000", "3000"]);
        assert_eq!(visits.first().map(|v| v.code().as_str()), Some("1000"));
        assert_eq!(visits.last().map(|v| v.code().as_str()), Some("3000"));
    }

    #[test]
    fn add_returns_the_inserted_visit() {
        let mut visits = three_visits();
        let added = visits.add(visit("4000", 3, 21), &schedule_name()).unwrap();
        assert_eq!(added.code().as_str(), "4000");
        assert_eq!(added.rbase(), Duration::days(21));
    }

    #[test]
    fn add_rejects_each_duplicated_attribute() {
        let cases: Vec<(VisitSpec, &str)> = vec![
            {
                let mut spec = VisitSpec::new("1000", 9);
                spec.title = Some("Other".into());
                spec.rbase = Duration::days(90);
                (spec, "code")
            },
            {
                let mut spec = VisitSpec::new("9000", 9);
                spec.title = Some("Visit 1000".into());
                spec.rbase = Duration::days(90);
                (spec, "title")
            },
            {
                let mut spec = VisitSpec::new("9000", 0);
                spec.rbase = Duration::days(90);
                (spec, "timepoint")
            },
            {
                let mut spec = VisitSpec::new("9000", 9);
                spec.rbase = Duration::days(7);
                (spec, "rbase")
            },
        ];

        for (spec, expected) in cases {
            let mut visits = three_visits();
            let err = visits
                .add(Visit::new(spec).unwrap(), &schedule_name())
                .expect_err("duplicate attribute");
            assert!(
                matches!(err, DomainError::AlreadyRegisteredVisit { attr, .. } if attr == expected),
                "expected clash on {expected}"
            );
            assert_eq!(visits.len(), 3);
        }
    }

    #[test]
    fn fractional_timepoints_are_distinct() {
        let mut visits = three_visits();
        let mut spec = VisitSpec::new("1001", 0);
        spec.timepoint = Timepoint::new(0.1).unwrap();
        spec.rbase = Duration::days(1);
        assert!(visits.add(Visit::new(spec).unwrap(), &schedule_name()).is_ok());
    }

    #[test]
    fn next_and_previous_follow_order() {
        let visits = three_visits();
        assert_eq!(visits.next("1000").map(|v| v.code().as_str()), Some("2000"));
        assert!(visits.next("3000").is_none());
        assert_eq!(visits.previous("3000").map(|v| v.code().as_str()), Some("2000"));
        assert!(visits.previous("1000").is_none());
        assert!(visits.next("9999").is_none());
    }

    #[test]
    fn timepoint_dates_offsets_each_visit_from_base() {
        let visits = three_visits();
        let base = Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap();

        let dates = visits.timepoint_dates(base).unwrap();

        assert_eq!(dates.len(), 3);
        assert_eq!(dates[1].timepoint_datetime, base + Duration::days(7));
        assert_eq!(
            dates[2].window.lower,
            Utc.with_ymd_and_hms(2024, 4, 14, 0, 0, 0).unwrap()
        );
        for scheduled in &dates {
            assert!(scheduled.window.contains(scheduled.timepoint_datetime));
        }
    }
}
