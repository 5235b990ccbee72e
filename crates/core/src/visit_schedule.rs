//! Visit schedules and the schedules they own.

use crate::error::{ConfigError, ConfigResult, DomainError, DomainResult};
use crate::schedule::Schedule;
use std::fmt;
use std::sync::Arc;
use vs_types::{ModelLabel, Name};

/// Schedules of one visit schedule, in registration order.
#[derive(Clone, Debug, Default)]
pub struct SchedulesCollection {
    schedules: Vec<Arc<Schedule>>,
}

impl SchedulesCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `schedule`, rejecting a name, onschedule model or offschedule
    /// model that is already taken.
    pub fn add(
        &mut self,
        schedule: Schedule,
        visit_schedule: &Name,
    ) -> DomainResult<Arc<Schedule>> {
        for existing in &self.schedules {
            let clash = if existing.name() == schedule.name() {
                Some("name")
            } else if existing.onschedule_model() == schedule.onschedule_model() {
                Some("onschedule_model")
            } else if existing.offschedule_model() == schedule.offschedule_model() {
                Some("offschedule_model")
            } else {
                None
            };

            if let Some(attr) = clash {
                return Err(DomainError::AlreadyRegisteredSchedule {
                    schedule: schedule.name().clone(),
                    attr,
                    visit_schedule: visit_schedule.clone(),
                });
            }
        }

        let schedule = Arc::new(schedule);
        self.schedules.push(Arc::clone(&schedule));
        Ok(schedule)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Schedule>> {
        self.schedules.iter().find(|s| s.name().as_str() == name)
    }

    pub fn get_by_onschedule_model(&self, model: &ModelLabel) -> Option<&Arc<Schedule>> {
        self.schedules
            .iter()
            .find(|s| s.onschedule_model() == model)
    }

    pub fn get_by_offschedule_model(&self, model: &ModelLabel) -> Option<&Arc<Schedule>> {
        self.schedules
            .iter()
            .find(|s| s.offschedule_model() == model)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Schedule>> {
        self.schedules.iter()
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }
}

impl<'a> IntoIterator for &'a SchedulesCollection {
    type Item = &'a Arc<Schedule>;
    type IntoIter = std::slice::Iter<'a, Arc<Schedule>>;

    fn into_iter(self) -> Self::IntoIter {
        self.schedules.iter()
    }
}

/// Raw attributes of a [`VisitSchedule`], validated by [`VisitSchedule::new`].
#[derive(Clone, Debug, Default)]
pub struct VisitScheduleSpec {
    pub name: String,
    pub verbose_name: Option<String>,
    pub offstudy_model: String,
    pub death_report_model: String,
    pub locator_model: Option<String>,
}

/// Top-level collection of schedules for one protocol arm.
#[derive(Clone, Debug)]
pub struct VisitSchedule {
    name: Name,
    verbose_name: String,
    offstudy_model: ModelLabel,
    death_report_model: ModelLabel,
    locator_model: Option<ModelLabel>,
    schedules: SchedulesCollection,
}

impl VisitSchedule {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidName`] for a name outside `[a-z0-9_-]+` and
    /// [`ConfigError::InvalidModelLabel`] for a malformed model label.
    pub fn new(spec: VisitScheduleSpec) -> ConfigResult<Self> {
        let name = Name::new(&spec.name).map_err(|source| ConfigError::InvalidName {
            kind: "visit schedule",
            source,
        })?;

        let label = |field: &str, value: &str| {
            ModelLabel::new(value).map_err(|source| ConfigError::InvalidModelLabel {
                field: format!("{name}.{field}"),
                source,
            })
        };

        let offstudy_model = label("offstudy_model", &spec.offstudy_model)?;
        let death_report_model = label("death_report_model", &spec.death_report_model)?;
        let locator_model = spec
            .locator_model
            .as_deref()
            .map(|value| label("locator_model", value))
            .transpose()?;

        Ok(Self {
            verbose_name: spec.verbose_name.unwrap_or_else(|| name.to_string()),
            name,
            offstudy_model,
            death_report_model,
            locator_model,
            schedules: SchedulesCollection::new(),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    pub fn offstudy_model(&self) -> &ModelLabel {
        &self.offstudy_model
    }

    pub fn death_report_model(&self) -> &ModelLabel {
        &self.death_report_model
    }

    pub fn locator_model(&self) -> Option<&ModelLabel> {
        self.locator_model.as_ref()
    }

    pub fn schedules(&self) -> &SchedulesCollection {
        &self.schedules
    }

    /// Add a fully built schedule. Visits must be added before this call.
    pub fn add_schedule(&mut self, schedule: Schedule) -> DomainResult<Arc<Schedule>> {
        self.schedules.add(schedule, &self.name)
    }

    pub fn get_schedule(&self, name: &str) -> Option<&Arc<Schedule>> {
        self.schedules.get(name)
    }
}

impl fmt::Display for VisitSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::schedule::ScheduleSpec;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn visit_schedule_spec(name: &str) -> VisitScheduleSpec {
        VisitScheduleSpec {
            name: name.into(),
            offstudy_model: "app.subjectoffstudy".into(),
            death_report_model: "app.deathreport".into(),
            ..VisitScheduleSpec::default()
        }
    }

    fn schedule(name: &str, onschedule: &str, offschedule: &str) -> Schedule {
        let cfg = CoreConfig::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(), None, None)
            .unwrap();
        Schedule::new(
            ScheduleSpec {
                name: name.into(),
                onschedule_model: onschedule.into(),
                offschedule_model: offschedule.into(),
                appointment_model: Some("app.appt".into()),
                consent_model: "app.consent".into(),
                ..ScheduleSpec::default()
            },
            &cfg,
        )
        .unwrap()
    }

    #[test]
    fn new_sets_defaults() {
        let vs = VisitSchedule::new(visit_schedule_spec("visit_schedule1")).unwrap();
        assert_eq!(vs.verbose_name(), "visit_schedule1");
        assert!(vs.locator_model().is_none());
        assert!(vs.schedules().is_empty());
    }

    #[test]
    fn new_rejects_bad_locator_model() {
        let mut spec = visit_schedule_spec("vs1");
        spec.locator_model = Some("locator".into());
        let err = VisitSchedule::new(spec).expect_err("bad label");
        assert!(matches!(err, ConfigError::InvalidModelLabel { field, .. } if field == "vs1.locator_model"));
    }

    #[test]
    fn add_schedule_rejects_duplicates() {
        let mut vs = VisitSchedule::new(visit_schedule_spec("vs1")).unwrap();
        vs.add_schedule(schedule("s1", "app.onsched", "app.offsched"))
            .unwrap();

        let cases = [
            (schedule("s1", "app.onsched2", "app.offsched2"), "name"),
            (schedule("s2", "app.onsched", "app.offsched2"), "onschedule_model"),
            (schedule("s2", "app.onsched2", "app.offsched"), "offschedule_model"),
        ];
        for (candidate, expected) in cases {
            let err = vs.add_schedule(candidate).expect_err("duplicate");
            assert!(
                matches!(err, DomainError::AlreadyRegisteredSchedule { attr, .. } if attr == expected),
                "expected clash on {expected}"
            );
        }
        assert_eq!(vs.schedules().len(), 1);
    }

    #[test]
    fn lookups_by_model() {
        let mut vs = VisitSchedule::new(visit_schedule_spec("vs1")).unwrap();
        vs.add_schedule(schedule("s1", "app.onsched", "app.offsched"))
            .unwrap();
        vs.add_schedule(schedule("s2", "app.onsched2", "app.offsched2"))
            .unwrap();

        let on = ModelLabel::new("app.onsched2").unwrap();
        let off = ModelLabel::new("app.offsched").unwrap();
        assert_eq!(
            vs.schedules().get_by_onschedule_model(&on).map(|s| s.name().as_str()),
            Some("s2")
        );
        assert_eq!(
            vs.schedules().get_by_offschedule_model(&off).map(|s| s.name().as_str()),
            Some("s1")
        );
        assert!(vs.get_schedule("s3").is_none());
    }

    proptest! {
        #[test]
        fn valid_names_construct(name in "[a-z0-9_-]{1,24}") {
            prop_assert!(VisitSchedule::new(visit_schedule_spec(&name)).is_ok());
        }

        #[test]
        fn names_with_other_characters_fail(
            prefix in "[a-z0-9_-]{0,8}",
            bad in "[A-Z .!/@]",
            suffix in "[a-z0-9_-]{0,8}",
        ) {
            let name = format!("{prefix}{bad}{suffix}");
            let err = VisitSchedule::new(visit_schedule_spec(&name));
            prop_assert!(
                matches!(err, Err(ConfigError::InvalidName { .. })),
                "expected a naming error for {:?}",
                name
            );
        }
    }
}
