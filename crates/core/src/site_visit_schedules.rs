//! Site registry of visit schedules.
//!
//! A [`SiteVisitSchedules`] is constructed explicitly and passed (usually as an
//! `Arc`) to everything that needs lookups. It starts `NotLoaded`, accepts
//! registrations, and is then marked loaded. Every lookup made before
//! [`SiteVisitSchedules::mark_loaded`] fails with
//! [`SiteRegistryError::NotLoaded`].

use crate::error::{RegistryResult, SiteRegistryError};
use crate::schedule::Schedule;
use crate::storage::ScheduleRecord;
use crate::visit::Visit;
use crate::visit_schedule::VisitSchedule;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use vs_types::{ModelLabel, ScheduleKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryState {
    NotLoaded,
    Loaded,
}

#[derive(Debug)]
struct Inner {
    state: RegistryState,
    visit_schedules: Vec<Arc<VisitSchedule>>,
}

/// A visit schedule paired with one of its schedules.
pub type ScheduleEntry = (Arc<VisitSchedule>, Arc<Schedule>);

#[derive(Debug)]
pub struct SiteVisitSchedules {
    inner: RwLock<Inner>,
}

impl Default for SiteVisitSchedules {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteVisitSchedules {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: RegistryState::NotLoaded,
                visit_schedules: Vec::new(),
            }),
        }
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| SiteRegistryError::Poisoned)
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| SiteRegistryError::Poisoned)
    }

    fn loaded(&self) -> RegistryResult<RwLockReadGuard<'_, Inner>> {
        let inner = self.read()?;
        if inner.state != RegistryState::Loaded {
            return Err(SiteRegistryError::NotLoaded);
        }
        Ok(inner)
    }

    /// Register a visit schedule.
    ///
    /// # Errors
    ///
    /// - [`SiteRegistryError::AlreadyLoaded`] once the registry is marked loaded.
    /// - [`SiteRegistryError::AlreadyRegistered`] for a duplicate name.
    /// - [`SiteRegistryError::AlreadyRegisteredModel`] if an onschedule or
    ///   offschedule model is already used by another visit schedule.
    pub fn register(&self, visit_schedule: VisitSchedule) -> RegistryResult<Arc<VisitSchedule>> {
        let mut inner = self.write()?;

        if inner.state == RegistryState::Loaded {
            return Err(SiteRegistryError::AlreadyLoaded {
                name: visit_schedule.name().clone(),
            });
        }

        if inner
            .visit_schedules
            .iter()
            .any(|vs| vs.name() == visit_schedule.name())
        {
            return Err(SiteRegistryError::AlreadyRegistered {
                name: visit_schedule.name().clone(),
            });
        }

        for schedule in visit_schedule.schedules() {
            for model in [schedule.onschedule_model(), schedule.offschedule_model()] {
                if let Some((vs, existing)) = find_by_model(&inner.visit_schedules, model) {
                    return Err(SiteRegistryError::AlreadyRegisteredModel {
                        model: model.clone(),
                        key: ScheduleKey::new(vs.name().clone(), existing.name().clone()),
                    });
                }
            }
        }

        tracing::info!(
            visit_schedule = %visit_schedule.name(),
            schedules = visit_schedule.schedules().len(),
            "registered visit schedule"
        );

        let visit_schedule = Arc::new(visit_schedule);
        inner.visit_schedules.push(Arc::clone(&visit_schedule));
        Ok(visit_schedule)
    }

    /// Close registration and open the registry for lookups.
    pub fn mark_loaded(&self) -> RegistryResult<()> {
        let mut inner = self.write()?;
        if inner.state != RegistryState::Loaded {
            inner.state = RegistryState::Loaded;
            tracing::info!(
                visit_schedules = inner.visit_schedules.len(),
                "site visit schedules loaded"
            );
        }
        Ok(())
    }

    /// Drop every registration and return to `NotLoaded`.
    pub fn teardown(&self) -> RegistryResult<()> {
        let mut inner = self.write()?;
        inner.visit_schedules.clear();
        inner.state = RegistryState::NotLoaded;
        Ok(())
    }

    pub fn state(&self) -> RegistryResult<RegistryState> {
        Ok(self.read()?.state)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state(), Ok(RegistryState::Loaded))
    }

    /// All registered visit schedules in registration order.
    pub fn visit_schedules(&self) -> RegistryResult<Vec<Arc<VisitSchedule>>> {
        Ok(self.loaded()?.visit_schedules.clone())
    }

    pub fn get_visit_schedule(&self, name: &str) -> RegistryResult<Arc<VisitSchedule>> {
        self.loaded()?
            .visit_schedules
            .iter()
            .find(|vs| vs.name().as_str() == name)
            .cloned()
            .ok_or_else(|| SiteRegistryError::VisitScheduleNotFound {
                name: name.to_string(),
            })
    }

    pub fn get_schedule(
        &self,
        visit_schedule_name: &str,
        schedule_name: &str,
    ) -> RegistryResult<Arc<Schedule>> {
        let visit_schedule = self.get_visit_schedule(visit_schedule_name)?;
        visit_schedule
            .get_schedule(schedule_name)
            .cloned()
            .ok_or_else(|| SiteRegistryError::ScheduleNotFound {
                visit_schedule_name: visit_schedule_name.to_string(),
                schedule_name: schedule_name.to_string(),
            })
    }

    pub fn get_schedule_by_key(&self, key: &ScheduleKey) -> RegistryResult<ScheduleEntry> {
        let visit_schedule = self.get_visit_schedule(key.visit_schedule_name().as_str())?;
        let schedule = self.get_schedule(
            key.visit_schedule_name().as_str(),
            key.schedule_name().as_str(),
        )?;
        Ok((visit_schedule, schedule))
    }

    /// The visit schedule and schedule whose onschedule model is `model`.
    pub fn get_by_onschedule_model(&self, model: &ModelLabel) -> RegistryResult<ScheduleEntry> {
        self.loaded()?
            .visit_schedules
            .iter()
            .find_map(|vs| {
                vs.schedules()
                    .get_by_onschedule_model(model)
                    .map(|schedule| (Arc::clone(vs), Arc::clone(schedule)))
            })
            .ok_or_else(|| SiteRegistryError::ModelNotFound {
                role: "onschedule",
                model: model.clone(),
            })
    }

    /// The visit schedule and schedule whose offschedule model is `model`.
    pub fn get_by_offschedule_model(&self, model: &ModelLabel) -> RegistryResult<ScheduleEntry> {
        self.loaded()?
            .visit_schedules
            .iter()
            .find_map(|vs| {
                vs.schedules()
                    .get_by_offschedule_model(model)
                    .map(|schedule| (Arc::clone(vs), Arc::clone(schedule)))
            })
            .ok_or_else(|| SiteRegistryError::ModelNotFound {
                role: "offschedule",
                model: model.clone(),
            })
    }

    /// The visit schedule and schedule a stored record belongs to.
    ///
    /// Resolved from the record's model, onschedule or offschedule. The
    /// schedule key stored on the record must name the same schedule.
    pub fn schedule_for(&self, record: &impl ScheduleRecord) -> RegistryResult<ScheduleEntry> {
        let model = record.model();
        let (visit_schedule, schedule) = match self.get_by_onschedule_model(model) {
            Err(err) if err.is_not_found() => match self.get_by_offschedule_model(model) {
                Err(err) if err.is_not_found() => {
                    return Err(SiteRegistryError::ModelNotFound {
                        role: "onschedule or offschedule",
                        model: model.clone(),
                    })
                }
                other => other?,
            },
            other => other?,
        };

        let expected = ScheduleKey::new(visit_schedule.name().clone(), schedule.name().clone());
        if &expected != record.schedule_key() {
            return Err(SiteRegistryError::ScheduleKeyMismatch {
                model: model.clone(),
                expected,
                got: record.schedule_key().clone(),
            });
        }
        Ok((visit_schedule, schedule))
    }

    /// The visit with `visit_code` on the schedule `record` belongs to.
    pub fn visit_for(&self, record: &impl ScheduleRecord, visit_code: &str) -> RegistryResult<Visit> {
        let (_, schedule) = self.schedule_for(record)?;
        schedule
            .visits()
            .get(visit_code)
            .cloned()
            .ok_or_else(|| SiteRegistryError::VisitNotFound {
                key: record.schedule_key().clone(),
                code: visit_code.to_string(),
            })
    }
}

fn find_by_model<'a>(
    visit_schedules: &'a [Arc<VisitSchedule>],
    model: &ModelLabel,
) -> Option<(&'a Arc<VisitSchedule>, &'a Arc<Schedule>)> {
    visit_schedules.iter().find_map(|vs| {
        vs.schedules()
            .iter()
            .find(|s| s.onschedule_model() == model || s.offschedule_model() == model)
            .map(|schedule| (vs, schedule))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::schedule::ScheduleSpec;
    use crate::storage::{OffScheduleRecord, OnScheduleRecord};
    use crate::visit::VisitSpec;
    use crate::visit_schedule::VisitScheduleSpec;
    use chrono::{TimeZone, Utc};

    fn visit_schedule(name: &str, schedules: &[(&str, &str, &str)]) -> VisitSchedule {
        let cfg = CoreConfig::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(), None, None)
            .unwrap();
        let mut vs = VisitSchedule::new(VisitScheduleSpec {
            name: name.into(),
            offstudy_model: "app.subjectoffstudy".into(),
            death_report_model: "app.deathreport".into(),
            ..VisitScheduleSpec::default()
        })
        .unwrap();
        for (schedule, on, off) in schedules {
            let schedule = Schedule::new(
                ScheduleSpec {
                    name: (*schedule).into(),
                    onschedule_model: (*on).into(),
                    offschedule_model: (*off).into(),
                    appointment_model: Some("app.appt".into()),
                    consent_model: "app.consent".into(),
                    ..ScheduleSpec::default()
                },
                &cfg,
            )
            .unwrap();
            vs.add_schedule(schedule).unwrap();
        }
        vs
    }

    fn loaded_registry() -> SiteVisitSchedules {
        let registry = SiteVisitSchedules::new();
        registry
            .register(visit_schedule(
                "vs1",
                &[("s1", "app.onsched", "app.offsched")],
            ))
            .unwrap();
        registry
            .register(visit_schedule(
                "vs2",
                &[("s2", "app.onsched2", "app.offsched2")],
            ))
            .unwrap();
        registry.mark_loaded().unwrap();
        registry
    }

    #[test]
    fn lookups_fail_with_not_loaded_before_mark_loaded() {
        let registry = SiteVisitSchedules::new();
        registry
            .register(visit_schedule("vs1", &[("s1", "app.onsched", "app.offsched")]))
            .unwrap();

        let model = ModelLabel::new("app.onsched").unwrap();
        assert!(matches!(
            registry.get_visit_schedule("vs1"),
            Err(SiteRegistryError::NotLoaded)
        ));
        assert!(matches!(
            registry.get_by_onschedule_model(&model),
            Err(SiteRegistryError::NotLoaded)
        ));
        assert!(matches!(
            registry.visit_schedules(),
            Err(SiteRegistryError::NotLoaded)
        ));
        assert!(!registry.is_loaded());
    }

    #[test]
    fn empty_loaded_registry_reports_not_found() {
        let registry = SiteVisitSchedules::new();
        registry.mark_loaded().unwrap();

        let err = registry.get_visit_schedule("vs1").expect_err("missing");
        assert!(err.is_not_found());
        assert!(registry.visit_schedules().unwrap().is_empty());
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let registry = SiteVisitSchedules::new();
        registry.register(visit_schedule("vs1", &[])).unwrap();
        let err = registry
            .register(visit_schedule("vs1", &[]))
            .expect_err("duplicate");
        assert!(matches!(err, SiteRegistryError::AlreadyRegistered { .. }));
    }

    #[test]
    fn register_rejects_models_shared_across_visit_schedules() {
        let registry = SiteVisitSchedules::new();
        registry
            .register(visit_schedule("vs1", &[("s1", "app.onsched", "app.offsched")]))
            .unwrap();
        let err = registry
            .register(visit_schedule("vs2", &[("s1", "app.onsched", "app.other")]))
            .expect_err("shared model");
        assert!(
            matches!(err, SiteRegistryError::AlreadyRegisteredModel { key, .. } if key.to_string() == "vs1.s1")
        );
    }

    #[test]
    fn register_after_loaded_fails() {
        let registry = loaded_registry();
        let err = registry
            .register(visit_schedule("vs3", &[]))
            .expect_err("loaded");
        assert!(matches!(err, SiteRegistryError::AlreadyLoaded { .. }));
    }

    #[test]
    fn lookups_by_name_key_and_model() {
        let registry = loaded_registry();

        assert_eq!(registry.get_visit_schedule("vs2").unwrap().name().as_str(), "vs2");
        assert_eq!(registry.get_schedule("vs1", "s1").unwrap().name().as_str(), "s1");

        let key = ScheduleKey::parse("vs2.s2").unwrap();
        let (vs, schedule) = registry.get_schedule_by_key(&key).unwrap();
        assert_eq!((vs.name().as_str(), schedule.name().as_str()), ("vs2", "s2"));

        let on = ModelLabel::new("app.onsched2").unwrap();
        let (vs, schedule) = registry.get_by_onschedule_model(&on).unwrap();
        assert_eq!((vs.name().as_str(), schedule.name().as_str()), ("vs2", "s2"));

        let off = ModelLabel::new("app.offsched").unwrap();
        let (vs, schedule) = registry.get_by_offschedule_model(&off).unwrap();
        assert_eq!((vs.name().as_str(), schedule.name().as_str()), ("vs1", "s1"));
    }

    #[test]
    fn lookup_misses_are_distinguishable() {
        let registry = loaded_registry();

        assert!(matches!(
            registry.get_schedule("vs1", "s9"),
            Err(SiteRegistryError::ScheduleNotFound { .. })
        ));
        let off = ModelLabel::new("app.onsched").unwrap();
        assert!(matches!(
            registry.get_by_offschedule_model(&off),
            Err(SiteRegistryError::ModelNotFound { role: "offschedule", .. })
        ));
    }

    #[test]
    fn records_resolve_to_their_schedule_and_visits() {
        let registry = SiteVisitSchedules::new();
        let mut vs = visit_schedule("vs1", &[]);
        let mut schedule = Schedule::new(
            ScheduleSpec {
                name: "s1".into(),
                onschedule_model: "app.onsched".into(),
                offschedule_model: "app.offsched".into(),
                appointment_model: Some("app.appt".into()),
                consent_model: "app.consent".into(),
                ..ScheduleSpec::default()
            },
            &CoreConfig::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(), None, None)
                .unwrap(),
        )
        .unwrap();
        schedule
            .add_visit(Visit::new(VisitSpec::new("1000", 0u32)).unwrap())
            .unwrap();
        vs.add_schedule(schedule).unwrap();
        registry.register(vs).unwrap();
        registry.mark_loaded().unwrap();

        let key = ScheduleKey::parse("vs1.s1").unwrap();
        let at = Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap();
        let on = OnScheduleRecord::new(ModelLabel::new("app.onsched").unwrap(), "1001-0001", key.clone(), at);
        let off = OffScheduleRecord::new(ModelLabel::new("app.offsched").unwrap(), "1001-0001", key, at);

        let (vs, schedule) = registry.schedule_for(&on).unwrap();
        assert_eq!((vs.name().as_str(), schedule.name().as_str()), ("vs1", "s1"));
        let (_, schedule) = registry.schedule_for(&off).unwrap();
        assert_eq!(schedule.name().as_str(), "s1");

        assert_eq!(registry.visit_for(&on, "1000").unwrap().code().as_str(), "1000");
        let err = registry.visit_for(&off, "9999").expect_err("no such visit");
        assert!(matches!(err, SiteRegistryError::VisitNotFound { ref code, .. } if code == "9999"));
        assert!(err.is_not_found());
    }

    #[test]
    fn record_with_foreign_schedule_key_does_not_resolve() {
        let registry = loaded_registry();
        let at = Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap();

        let mislinked = OnScheduleRecord::new(
            ModelLabel::new("app.onsched").unwrap(),
            "1001-0001",
            ScheduleKey::parse("vs2.s2").unwrap(),
            at,
        );
        assert!(matches!(
            registry.schedule_for(&mislinked),
            Err(SiteRegistryError::ScheduleKeyMismatch { expected, .. }) if expected.to_string() == "vs1.s1"
        ));

        let unknown = OffScheduleRecord::new(
            ModelLabel::new("app.unrelated").unwrap(),
            "1001-0001",
            ScheduleKey::parse("vs1.s1").unwrap(),
            at,
        );
        let err = registry.schedule_for(&unknown).expect_err("unknown model");
        assert!(err.is_not_found());
    }

    #[test]
    fn teardown_returns_to_not_loaded() {
        let registry = loaded_registry();
        registry.teardown().unwrap();
        assert_eq!(registry.state().unwrap(), RegistryState::NotLoaded);
        assert!(matches!(
            registry.get_visit_schedule("vs1"),
            Err(SiteRegistryError::NotLoaded)
        ));
        registry.register(visit_schedule("vs1", &[])).unwrap();
    }
}
