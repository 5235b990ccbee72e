//! Shared fixture for workflow tests: one visit schedule with schedule `s1`.

use crate::config::CoreConfig;
use crate::schedule::{Schedule, ScheduleContext, ScheduleSpec};
use crate::signals::ScheduleSignalHandlers;
use crate::site_visit_schedules::SiteVisitSchedules;
use crate::storage::memory::{InMemoryConsents, InMemoryStore};
use crate::storage::{ConsentLookup, ConsentRecord};
use crate::visit::{Visit, VisitSpec};
use crate::visit_schedule::{VisitSchedule, VisitScheduleSpec};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use vs_types::ModelLabel;

pub(crate) const SUBJECT: &str = "1001-0001";

pub(crate) fn label(value: &str) -> ModelLabel {
    ModelLabel::new(value).unwrap()
}

pub(crate) fn study_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

pub(crate) struct Fixture {
    pub registry: Arc<SiteVisitSchedules>,
    pub store: Arc<InMemoryStore>,
    pub consents: Arc<InMemoryConsents>,
    pub config: Arc<CoreConfig>,
}

impl Fixture {
    /// Registry loaded with `visit_schedule1.s1`; no lifecycle handlers.
    pub fn new() -> Self {
        let config = Arc::new(CoreConfig::new(study_open(), None, None).unwrap());

        let mut schedule = Schedule::new(
            ScheduleSpec {
                name: "s1".into(),
                onschedule_model: "app.onsched".into(),
                offschedule_model: "app.offsched".into(),
                appointment_model: Some("app.appt".into()),
                consent_model: "app.consent".into(),
                ..ScheduleSpec::default()
            },
            &config,
        )
        .unwrap();
        schedule.add_visit(Visit::new(VisitSpec::new("1000", 0u32)).unwrap()).unwrap();
        let mut day7 = VisitSpec::new("2000", 1u32);
        day7.rbase = Duration::days(7);
        schedule.add_visit(Visit::new(day7).unwrap()).unwrap();

        let mut visit_schedule = VisitSchedule::new(VisitScheduleSpec {
            name: "visit_schedule1".into(),
            offstudy_model: "app.subjectoffstudy".into(),
            death_report_model: "app.deathreport".into(),
            ..VisitScheduleSpec::default()
        })
        .unwrap();
        visit_schedule.add_schedule(schedule).unwrap();

        let registry = Arc::new(SiteVisitSchedules::new());
        registry.register(visit_schedule).unwrap();
        registry.mark_loaded().unwrap();

        Self {
            registry,
            store: Arc::new(InMemoryStore::new([
                label("app.onsched"),
                label("app.offsched"),
                label("app.appt"),
            ])),
            consents: Arc::new(InMemoryConsents::new([label("app.consent")])),
            config,
        }
    }

    /// Same as [`Fixture::new`] with [`ScheduleSignalHandlers`] subscribed to the store.
    pub fn with_handlers() -> Self {
        let fixture = Self::new();
        let consents: Arc<dyn ConsentLookup> = fixture.consents.clone();
        fixture
            .store
            .subscribe(Arc::new(ScheduleSignalHandlers::new(
                Arc::clone(&fixture.registry),
                consents,
                Arc::clone(&fixture.config),
            )))
            .unwrap();
        fixture
    }

    pub fn ctx(&self) -> ScheduleContext<'_> {
        ScheduleContext {
            registry: &self.registry,
            store: self.store.as_ref(),
            consents: self.consents.as_ref(),
            config: &self.config,
        }
    }

    pub fn schedule(&self) -> Arc<Schedule> {
        self.registry.get_schedule("visit_schedule1", "s1").unwrap()
    }

    pub fn consent(&self, subject_identifier: &str, consent_identifier: &str) {
        self.consents
            .add(
                &label("app.consent"),
                ConsentRecord {
                    subject_identifier: subject_identifier.into(),
                    consent_identifier: consent_identifier.into(),
                    consent_datetime: study_open() + Duration::days(30),
                },
            )
            .unwrap();
    }
}
