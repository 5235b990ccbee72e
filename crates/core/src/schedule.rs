//! Schedules: ordered visits plus the records used to get on and off them.
//!
//! A schedule is a pure domain object. Enrollment operations take a
//! [`ScheduleContext`] carrying the registry and the storage and consent
//! collaborators, and build a fresh [`SubjectSchedule`] for every call.
//!
//! ## Enrollment states
//!
//! Per `(subject, schedule)`:
//!
//! ```text
//! NotEnrolled --put_on_schedule--> OnSchedule --take_off_schedule--> OffSchedule
//!                                      ^                                  |
//!                                      +------------- reopen ------------+
//! ```
//!
//! `reopen` runs when the offschedule record is deleted. Deleting the
//! onschedule record runs `clear_history`, which removes the history rows.

use crate::config::CoreConfig;
use crate::error::{
    ConfigError, ConfigResult, DomainResult, ScheduleError, ScheduleResult, SubjectScheduleError,
};
use crate::site_visit_schedules::SiteVisitSchedules;
use crate::storage::{ConsentLookup, OffScheduleRecord, OnScheduleRecord, ScheduleStore};
use crate::subject_schedule::SubjectSchedule;
use crate::visit::Visit;
use crate::visit_collection::VisitCollection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use vs_types::{ModelLabel, Name};

/// Collaborators needed by enrollment operations.
#[derive(Clone, Copy)]
pub struct ScheduleContext<'a> {
    pub registry: &'a SiteVisitSchedules,
    pub store: &'a dyn ScheduleStore,
    pub consents: &'a dyn ConsentLookup,
    pub config: &'a CoreConfig,
}

/// Arguments for putting a subject on a schedule.
#[derive(Clone, Debug, Default)]
pub struct Enrollment {
    pub subject_identifier: String,
    /// Defaults to now.
    pub onschedule_datetime: Option<DateTime<Utc>>,
    /// Defaults to the identifier of the subject's consent when exactly one exists.
    pub consent_identifier: Option<String>,
    pub eligible: Option<bool>,
}

impl Enrollment {
    pub fn new(subject_identifier: impl Into<String>) -> Self {
        Self {
            subject_identifier: subject_identifier.into(),
            ..Self::default()
        }
    }

    pub fn onschedule_datetime(mut self, dt: DateTime<Utc>) -> Self {
        self.onschedule_datetime = Some(dt);
        self
    }

    pub fn consent_identifier(mut self, consent_identifier: impl Into<String>) -> Self {
        self.consent_identifier = Some(consent_identifier.into());
        self
    }

    pub fn eligible(mut self, eligible: bool) -> Self {
        self.eligible = Some(eligible);
        self
    }
}

/// Where a subject stands on one schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    NotEnrolled,
    OnSchedule,
    OffSchedule,
}

/// Everything needed to construct a [`Schedule`].
///
/// Names and labels are raw text and are validated by [`Schedule::new`].
#[derive(Clone, Debug, Default)]
pub struct ScheduleSpec {
    pub name: String,
    pub title: Option<String>,
    pub sequence: Option<String>,
    pub onschedule_model: String,
    pub offschedule_model: String,
    /// Falls back to the configured default appointment model.
    pub appointment_model: Option<String>,
    pub consent_model: String,
}

/// A named, ordered sequence of visits.
#[derive(Clone, Debug)]
pub struct Schedule {
    name: Name,
    title: String,
    sequence: String,
    onschedule_model: ModelLabel,
    offschedule_model: ModelLabel,
    appointment_model: ModelLabel,
    consent_model: ModelLabel,
    visits: VisitCollection,
}

impl Schedule {
    /// # Errors
    ///
    /// - [`ConfigError::InvalidName`] if `name` is not `[a-z0-9_-]+`.
    /// - [`ConfigError::InvalidModelLabel`] for any malformed model label.
    /// - [`ConfigError::MissingAppointmentModel`] if no appointment model is declared and
    ///   `cfg` has no default.
    pub fn new(spec: ScheduleSpec, cfg: &CoreConfig) -> ConfigResult<Self> {
        let name = Name::new(&spec.name).map_err(|source| ConfigError::InvalidName {
            kind: "schedule",
            source,
        })?;

        let label = |field: &str, value: &str| {
            ModelLabel::new(value).map_err(|source| ConfigError::InvalidModelLabel {
                field: format!("{name}.{field}"),
                source,
            })
        };

        let onschedule_model = label("onschedule_model", &spec.onschedule_model)?;
        let offschedule_model = label("offschedule_model", &spec.offschedule_model)?;
        let consent_model = label("consent_model", &spec.consent_model)?;
        let appointment_model = match spec.appointment_model.as_deref() {
            Some(value) => label("appointment_model", value)?,
            None => cfg
                .default_appointment_model()
                .cloned()
                .ok_or_else(|| ConfigError::MissingAppointmentModel {
                    schedule: name.clone(),
                })?,
        };

        Ok(Self {
            title: spec.title.unwrap_or_else(|| name.to_string()),
            sequence: spec.sequence.unwrap_or_else(|| name.to_string()),
            name,
            onschedule_model,
            offschedule_model,
            appointment_model,
            consent_model,
            visits: VisitCollection::new(),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn onschedule_model(&self) -> &ModelLabel {
        &self.onschedule_model
    }

    pub fn offschedule_model(&self) -> &ModelLabel {
        &self.offschedule_model
    }

    pub fn appointment_model(&self) -> &ModelLabel {
        &self.appointment_model
    }

    pub fn consent_model(&self) -> &ModelLabel {
        &self.consent_model
    }

    pub fn visits(&self) -> &VisitCollection {
        &self.visits
    }

    /// Add a visit, rejecting duplicates of code, title, timepoint or rbase.
    pub fn add_visit(&mut self, visit: Visit) -> DomainResult<&Visit> {
        self.visits.add(visit, &self.name)
    }

    /// Build the enrollment workflow for one call.
    ///
    /// # Errors
    ///
    /// Fails if this schedule is not registered, or if the registry resolves this
    /// schedule's onschedule model to a different schedule.
    pub fn subject<'a>(&self, ctx: &ScheduleContext<'a>) -> ScheduleResult<SubjectSchedule<'a>> {
        let (visit_schedule, schedule) =
            ctx.registry.get_by_onschedule_model(&self.onschedule_model)?;
        if schedule.name() != &self.name {
            return Err(ScheduleError::WrongSchedule {
                expected: self.name.clone(),
                model: self.onschedule_model.clone(),
                got: schedule.name().clone(),
            });
        }
        Ok(SubjectSchedule::new(visit_schedule, schedule, ctx))
    }

    fn wrap(&self, source: SubjectScheduleError) -> ScheduleError {
        ScheduleError::Subject {
            schedule: self.name.clone(),
            source,
        }
    }

    /// Put a subject on this schedule. Returns the existing record if there is one.
    pub fn put_on_schedule(
        &self,
        ctx: &ScheduleContext<'_>,
        enrollment: &Enrollment,
    ) -> ScheduleResult<OnScheduleRecord> {
        self.subject(ctx)?
            .put_on_schedule(enrollment)
            .map_err(|e| self.wrap(e))
    }

    /// Take a subject off this schedule. Returns the existing record if there is one.
    pub fn take_off_schedule(
        &self,
        ctx: &ScheduleContext<'_>,
        subject_identifier: &str,
        offschedule_datetime: Option<DateTime<Utc>>,
    ) -> ScheduleResult<OffScheduleRecord> {
        self.subject(ctx)?
            .take_off_schedule(subject_identifier, offschedule_datetime)
            .map_err(|e| self.wrap(e))
    }

    /// Validate an onschedule record stored outside [`Schedule::put_on_schedule`]
    /// and start the subject's history.
    pub fn onschedule_created(
        &self,
        ctx: &ScheduleContext<'_>,
        record: &OnScheduleRecord,
    ) -> ScheduleResult<()> {
        self.subject(ctx)?
            .onschedule_created(record)
            .map_err(|e| self.wrap(e))
    }

    /// Validate an offschedule record stored outside [`Schedule::take_off_schedule`]
    /// and close the subject's history.
    pub fn offschedule_created(
        &self,
        ctx: &ScheduleContext<'_>,
        record: &OffScheduleRecord,
    ) -> ScheduleResult<()> {
        self.subject(ctx)?
            .offschedule_created(record)
            .map_err(|e| self.wrap(e))
    }

    /// Re-save the onschedule record so dependents (appointments) are regenerated.
    pub fn refresh_schedule(
        &self,
        ctx: &ScheduleContext<'_>,
        subject_identifier: &str,
    ) -> ScheduleResult<OnScheduleRecord> {
        self.subject(ctx)?
            .resave(subject_identifier)
            .map_err(|e| self.wrap(e))
    }

    /// Put a subject who was taken off back on this schedule.
    pub fn reopen(
        &self,
        ctx: &ScheduleContext<'_>,
        subject_identifier: &str,
    ) -> ScheduleResult<OnScheduleRecord> {
        self.subject(ctx)?
            .reopen(subject_identifier)
            .map_err(|e| self.wrap(e))
    }

    /// Remove all enrollment history for a subject on this schedule.
    pub fn clear_history(
        &self,
        ctx: &ScheduleContext<'_>,
        subject_identifier: &str,
    ) -> ScheduleResult<usize> {
        self.subject(ctx)?
            .clear_history(subject_identifier)
            .map_err(|e| self.wrap(e))
    }

    pub fn enrollment_state(
        &self,
        ctx: &ScheduleContext<'_>,
        subject_identifier: &str,
    ) -> ScheduleResult<EnrollmentState> {
        self.subject(ctx)?
            .enrollment_state(subject_identifier)
            .map_err(|e| self.wrap(e))
    }

    /// True if the subject was on this schedule at `report_datetime`.
    pub fn is_onschedule(
        &self,
        ctx: &ScheduleContext<'_>,
        subject_identifier: &str,
        report_datetime: DateTime<Utc>,
    ) -> ScheduleResult<bool> {
        self.subject(ctx)?
            .is_onschedule(subject_identifier, report_datetime)
            .map_err(|e| self.wrap(e))
    }

    /// Check that every model this schedule names can be resolved.
    pub fn validate(&self, ctx: &ScheduleContext<'_>) -> ScheduleResult<()> {
        self.subject(ctx)?.validate().map_err(|e| self.wrap(e))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
