//! Enrollment workflow for one schedule.
//!
//! A [`SubjectSchedule`] is built for a single call by
//! [`Schedule::subject`](crate::schedule::Schedule::subject) and dropped
//! afterwards. It holds no subject state between calls.
//!
//! Existing records short-circuit: getting on or off a schedule a second time
//! returns the stored record unchanged. The consent check and the datetime
//! checks run when a record is about to be created, and again from
//! [`SubjectSchedule::onschedule_created`] and
//! [`SubjectSchedule::offschedule_created`] for records stored directly.

use crate::config::CoreConfig;
use crate::error::{StorageError, SubjectScheduleError, SubjectScheduleResult};
use crate::schedule::{Enrollment, EnrollmentState, Schedule, ScheduleContext};
use crate::storage::{
    ConsentLookup, ConsentRecord, OffScheduleRecord, OnScheduleRecord, ScheduleRecord,
    ScheduleStatus, ScheduleStore, SubjectScheduleHistory,
};
use crate::visit_schedule::VisitSchedule;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use vs_types::ScheduleKey;

pub struct SubjectSchedule<'a> {
    visit_schedule: Arc<VisitSchedule>,
    schedule: Arc<Schedule>,
    key: ScheduleKey,
    store: &'a dyn ScheduleStore,
    consents: &'a dyn ConsentLookup,
    config: &'a CoreConfig,
}

impl<'a> SubjectSchedule<'a> {
    pub(crate) fn new(
        visit_schedule: Arc<VisitSchedule>,
        schedule: Arc<Schedule>,
        ctx: &ScheduleContext<'a>,
    ) -> Self {
        let key = ScheduleKey::new(visit_schedule.name().clone(), schedule.name().clone());
        Self {
            visit_schedule,
            schedule,
            key,
            store: ctx.store,
            consents: ctx.consents,
            config: ctx.config,
        }
    }

    pub fn visit_schedule(&self) -> &VisitSchedule {
        &self.visit_schedule
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn key(&self) -> &ScheduleKey {
        &self.key
    }

    /// Get or create the onschedule record for `enrollment.subject_identifier`.
    ///
    /// On create the subject must have a consent on file and the onschedule
    /// datetime (default now) must fall within the study period.
    pub fn put_on_schedule(&self, enrollment: &Enrollment) -> SubjectScheduleResult<OnScheduleRecord> {
        let subject_identifier = enrollment.subject_identifier.as_str();
        let model = self.schedule.onschedule_model();

        if let Some(existing) = self.store.get_onschedule(model, subject_identifier)? {
            tracing::debug!(
                schedule = %self.key,
                subject = subject_identifier,
                "subject already on schedule"
            );
            self.ensure_history(&existing)?;
            return Ok(existing);
        }

        let consents = self.consented_or_raise(subject_identifier)?;

        let onschedule_datetime = enrollment.onschedule_datetime.unwrap_or_else(Utc::now);
        self.validate_datetime("onschedule_datetime", onschedule_datetime)?;

        let mut record = OnScheduleRecord::new(
            model.clone(),
            subject_identifier,
            self.key.clone(),
            onschedule_datetime,
        );
        record.consent_identifier = enrollment.consent_identifier.clone().or_else(|| {
            match consents.as_slice() {
                [only] => Some(only.consent_identifier.clone()),
                _ => None,
            }
        });
        record.is_eligible = enrollment.eligible;

        let created = self.store.create_onschedule(record)?;
        self.ensure_history(&created)?;

        tracing::info!(
            schedule = %self.key,
            subject = subject_identifier,
            onschedule_datetime = %created.onschedule_datetime,
            "put subject on schedule"
        );
        Ok(created)
    }

    /// Get or create the offschedule record for `subject_identifier`.
    ///
    /// On create the subject must have a consent on file and an onschedule
    /// record, and the offschedule datetime (default now) must fall within the
    /// study period and not precede the onschedule datetime.
    pub fn take_off_schedule(
        &self,
        subject_identifier: &str,
        offschedule_datetime: Option<DateTime<Utc>>,
    ) -> SubjectScheduleResult<OffScheduleRecord> {
        let model = self.schedule.offschedule_model();

        if let Some(existing) = self.store.get_offschedule(model, subject_identifier)? {
            tracing::debug!(
                schedule = %self.key,
                subject = subject_identifier,
                "subject already off schedule"
            );
            self.mark_offschedule(subject_identifier, existing.offschedule_datetime)?;
            return Ok(existing);
        }

        let record = OffScheduleRecord::new(
            model.clone(),
            subject_identifier,
            self.key.clone(),
            offschedule_datetime.unwrap_or_else(Utc::now),
        );
        self.validate_offschedule(&record)?;
        let created = self.store.create_offschedule(record)?;
        self.mark_offschedule(subject_identifier, created.offschedule_datetime)?;

        tracing::info!(
            schedule = %self.key,
            subject = subject_identifier,
            offschedule_datetime = %created.offschedule_datetime,
            "took subject off schedule"
        );
        Ok(created)
    }

    /// Check an onschedule record that was stored directly and start its history.
    ///
    /// The subject must have a consent on file and the onschedule datetime
    /// must fall within the study period.
    pub fn onschedule_created(&self, record: &OnScheduleRecord) -> SubjectScheduleResult<()> {
        self.consented_or_raise(&record.subject_identifier)?;
        self.validate_datetime("onschedule_datetime", record.recorded_at())?;
        self.ensure_history(record)
    }

    /// Check an offschedule record that was stored directly and close the history.
    pub fn offschedule_created(&self, record: &OffScheduleRecord) -> SubjectScheduleResult<()> {
        self.validate_offschedule(record)?;
        self.mark_offschedule(&record.subject_identifier, record.offschedule_datetime)
    }

    /// Guards on leaving the schedule, in order: consent on file, onschedule
    /// record present, datetime within the study period, offschedule not
    /// before onschedule.
    pub fn validate_offschedule(&self, record: &OffScheduleRecord) -> SubjectScheduleResult<()> {
        let subject_identifier = record.subject_identifier.as_str();
        self.consented_or_raise(subject_identifier)?;

        let onschedule = self
            .store
            .get_onschedule(self.schedule.onschedule_model(), subject_identifier)?
            .ok_or_else(|| SubjectScheduleError::NotOnSchedule {
                subject_identifier: subject_identifier.to_string(),
                key: self.key.clone(),
            })?;

        let offschedule_datetime = record.recorded_at();
        self.validate_datetime("offschedule_datetime", offschedule_datetime)?;
        if offschedule_datetime < onschedule.onschedule_datetime {
            return Err(SubjectScheduleError::OffscheduleBeforeOnschedule {
                onschedule_datetime: onschedule.onschedule_datetime,
                offschedule_datetime,
            });
        }
        Ok(())
    }

    /// Re-persist the onschedule record unchanged so dependents are regenerated.
    pub fn resave(&self, subject_identifier: &str) -> SubjectScheduleResult<OnScheduleRecord> {
        let model = self.schedule.onschedule_model();
        let record = self
            .store
            .get_onschedule(model, subject_identifier)?
            .ok_or_else(|| StorageError::NotFound {
                model: model.clone(),
                subject_identifier: subject_identifier.to_string(),
            })?;
        Ok(self.store.save_onschedule(&record)?)
    }

    /// Clear the offschedule datetime and status on the history row and resave
    /// the onschedule record.
    pub fn reopen(&self, subject_identifier: &str) -> SubjectScheduleResult<OnScheduleRecord> {
        let mut history = self
            .store
            .get_history(subject_identifier, &self.key)?
            .ok_or_else(|| StorageError::HistoryNotFound {
                subject_identifier: subject_identifier.to_string(),
                key: self.key.clone(),
            })?;
        let previous = history.offschedule_datetime.take();
        history.schedule_status = ScheduleStatus::OnSchedule;
        self.store.save_history(&history)?;

        tracing::info!(
            schedule = %self.key,
            subject = subject_identifier,
            previous_offschedule_datetime = ?previous,
            "reopened schedule"
        );
        self.resave(subject_identifier)
    }

    /// Delete every history row for the subject on this schedule.
    pub fn clear_history(&self, subject_identifier: &str) -> SubjectScheduleResult<usize> {
        let removed = self.store.delete_history(subject_identifier, &self.key)?;
        tracing::info!(
            schedule = %self.key,
            subject = subject_identifier,
            removed,
            "cleared schedule history"
        );
        Ok(removed)
    }

    pub fn enrollment_state(&self, subject_identifier: &str) -> SubjectScheduleResult<EnrollmentState> {
        if self
            .store
            .get_offschedule(self.schedule.offschedule_model(), subject_identifier)?
            .is_some()
        {
            return Ok(EnrollmentState::OffSchedule);
        }
        if self
            .store
            .get_onschedule(self.schedule.onschedule_model(), subject_identifier)?
            .is_some()
        {
            return Ok(EnrollmentState::OnSchedule);
        }
        Ok(EnrollmentState::NotEnrolled)
    }

    /// True if `report_datetime` falls between the onschedule datetime and the
    /// offschedule datetime (if any), inclusive.
    pub fn is_onschedule(
        &self,
        subject_identifier: &str,
        report_datetime: DateTime<Utc>,
    ) -> SubjectScheduleResult<bool> {
        let Some(onschedule) = self
            .store
            .get_onschedule(self.schedule.onschedule_model(), subject_identifier)?
        else {
            return Ok(false);
        };
        if report_datetime < onschedule.onschedule_datetime {
            return Ok(false);
        }

        let offschedule = self
            .store
            .get_offschedule(self.schedule.offschedule_model(), subject_identifier)?;
        Ok(offschedule.map_or(true, |off| report_datetime <= off.offschedule_datetime))
    }

    /// Check that every model named by the schedule can be resolved.
    pub fn validate(&self) -> SubjectScheduleResult<()> {
        let stored = [
            ("onschedule_model", self.schedule.onschedule_model()),
            ("offschedule_model", self.schedule.offschedule_model()),
            ("appointment_model", self.schedule.appointment_model()),
        ];
        for (field, model) in stored {
            if !self.store.is_known_model(model) {
                return Err(SubjectScheduleError::UnknownModel {
                    field,
                    model: model.clone(),
                });
            }
        }

        let consent_model = self.schedule.consent_model();
        if !self.consents.is_consent_model(consent_model) {
            return Err(SubjectScheduleError::UnknownModel {
                field: "consent_model",
                model: consent_model.clone(),
            });
        }
        Ok(())
    }

    /// Returns the subject's consents, failing if there are none.
    fn consented_or_raise(&self, subject_identifier: &str) -> SubjectScheduleResult<Vec<ConsentRecord>> {
        let consent_model = self.schedule.consent_model();
        let consents = self.consents.consents_for(consent_model, subject_identifier)?;

        match consents.len() {
            0 => Err(SubjectScheduleError::ConsentNotFound {
                consent_model: consent_model.clone(),
                subject_identifier: subject_identifier.to_string(),
            }),
            1 => Ok(consents),
            n => {
                tracing::warn!(
                    consent_model = %consent_model,
                    subject = subject_identifier,
                    consents = n,
                    "multiple consents found for subject"
                );
                Ok(consents)
            }
        }
    }

    fn validate_datetime(&self, field: &'static str, value: DateTime<Utc>) -> SubjectScheduleResult<()> {
        if value > Utc::now() {
            return Err(SubjectScheduleError::DatetimeInFuture { field, value });
        }

        let study_open = self.config.study_open_datetime();
        if value < study_open {
            return Err(SubjectScheduleError::BeforeStudyOpen {
                field,
                value,
                study_open,
            });
        }

        if let Some(study_close) = self.config.study_close_datetime() {
            if value > study_close {
                return Err(SubjectScheduleError::AfterStudyClose {
                    field,
                    value,
                    study_close,
                });
            }
        }
        Ok(())
    }

    fn ensure_history(&self, record: &OnScheduleRecord) -> SubjectScheduleResult<()> {
        if self
            .store
            .get_history(&record.subject_identifier, &self.key)?
            .is_some()
        {
            return Ok(());
        }

        self.store.save_history(&SubjectScheduleHistory {
            subject_identifier: record.subject_identifier.clone(),
            schedule_key: self.key.clone(),
            onschedule_model: self.schedule.onschedule_model().clone(),
            offschedule_model: self.schedule.offschedule_model().clone(),
            onschedule_datetime: record.onschedule_datetime,
            offschedule_datetime: None,
            schedule_status: ScheduleStatus::OnSchedule,
        })?;
        Ok(())
    }

    fn mark_offschedule(
        &self,
        subject_identifier: &str,
        offschedule_datetime: DateTime<Utc>,
    ) -> SubjectScheduleResult<()> {
        let history = match self.store.get_history(subject_identifier, &self.key)? {
            Some(history) => history,
            None => {
                let onschedule = self
                    .store
                    .get_onschedule(self.schedule.onschedule_model(), subject_identifier)?
                    .ok_or_else(|| SubjectScheduleError::NotOnSchedule {
                        subject_identifier: subject_identifier.to_string(),
                        key: self.key.clone(),
                    })?;
                SubjectScheduleHistory {
                    subject_identifier: subject_identifier.to_string(),
                    schedule_key: self.key.clone(),
                    onschedule_model: self.schedule.onschedule_model().clone(),
                    offschedule_model: self.schedule.offschedule_model().clone(),
                    onschedule_datetime: onschedule.onschedule_datetime,
                    offschedule_datetime: None,
                    schedule_status: ScheduleStatus::OnSchedule,
                }
            }
        };

        if history.schedule_status == ScheduleStatus::OffSchedule
            && history.offschedule_datetime == Some(offschedule_datetime)
        {
            return Ok(());
        }

        self.store.save_history(&SubjectScheduleHistory {
            offschedule_datetime: Some(offschedule_datetime),
            schedule_status: ScheduleStatus::OffSchedule,
            ..history
        })?;
        Ok(())
    }
}
