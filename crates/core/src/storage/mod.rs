//! Storage and consent collaborators.
//!
//! The core never talks to a database directly. It calls the small set of
//! primitives on [`ScheduleStore`] (get by unique key, create, save, delete) and
//! asks a [`ConsentLookup`] whether a subject has consented. Implementations are
//! expected to run each enrollment operation inside their own transaction.
//!
//! Stores announce record lifecycle events to [`RecordObserver`]s. Events are
//! delivered synchronously after the change is applied and after any internal
//! locks are released, so an observer may call back into the store.

pub mod memory;

use crate::error::{BoxError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vs_types::{ModelLabel, ScheduleKey};

/// Capabilities shared by onschedule and offschedule records.
pub trait ScheduleRecord {
    fn model(&self) -> &ModelLabel;
    fn subject_identifier(&self) -> &str;
    fn schedule_key(&self) -> &ScheduleKey;
    /// When the subject came on (or went off) the schedule.
    fn recorded_at(&self) -> DateTime<Utc>;
}

/// Persisted marker of a subject's enrollment on a schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnScheduleRecord {
    pub id: Uuid,
    pub model: ModelLabel,
    pub subject_identifier: String,
    pub schedule_key: ScheduleKey,
    pub consent_identifier: Option<String>,
    pub is_eligible: Option<bool>,
    pub onschedule_datetime: DateTime<Utc>,
    /// Number of saves since creation.
    pub revision: u32,
}

impl OnScheduleRecord {
    pub fn new(
        model: ModelLabel,
        subject_identifier: impl Into<String>,
        schedule_key: ScheduleKey,
        onschedule_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            subject_identifier: subject_identifier.into(),
            schedule_key,
            consent_identifier: None,
            is_eligible: None,
            onschedule_datetime,
            revision: 0,
        }
    }
}

impl ScheduleRecord for OnScheduleRecord {
    fn model(&self) -> &ModelLabel {
        &self.model
    }

    fn subject_identifier(&self) -> &str {
        &self.subject_identifier
    }

    fn schedule_key(&self) -> &ScheduleKey {
        &self.schedule_key
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.onschedule_datetime
    }
}

/// Persisted marker of a subject leaving a schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffScheduleRecord {
    pub id: Uuid,
    pub model: ModelLabel,
    pub subject_identifier: String,
    pub schedule_key: ScheduleKey,
    pub offschedule_datetime: DateTime<Utc>,
    pub revision: u32,
}

impl OffScheduleRecord {
    pub fn new(
        model: ModelLabel,
        subject_identifier: impl Into<String>,
        schedule_key: ScheduleKey,
        offschedule_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            subject_identifier: subject_identifier.into(),
            schedule_key,
            offschedule_datetime,
            revision: 0,
        }
    }
}

impl ScheduleRecord for OffScheduleRecord {
    fn model(&self) -> &ModelLabel {
        &self.model
    }

    fn subject_identifier(&self) -> &str {
        &self.subject_identifier
    }

    fn schedule_key(&self) -> &ScheduleKey {
        &self.schedule_key
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.offschedule_datetime
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    OnSchedule,
    OffSchedule,
}

/// Enrollment history of one subject on one schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectScheduleHistory {
    pub subject_identifier: String,
    pub schedule_key: ScheduleKey,
    pub onschedule_model: ModelLabel,
    pub offschedule_model: ModelLabel,
    pub onschedule_datetime: DateTime<Utc>,
    pub offschedule_datetime: Option<DateTime<Utc>>,
    pub schedule_status: ScheduleStatus,
}

/// A consent on file for a subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub subject_identifier: String,
    pub consent_identifier: String,
    pub consent_datetime: DateTime<Utc>,
}

/// Persistence primitives used by the enrollment workflow.
///
/// Onschedule and offschedule records are unique per `(model, subject_identifier)`;
/// a second create for the same key must fail with
/// [`StorageError::UniqueViolation`](crate::error::StorageError::UniqueViolation).
pub trait ScheduleStore: Send + Sync {
    /// True if the store can persist or otherwise resolve `model`.
    fn is_known_model(&self, model: &ModelLabel) -> bool;

    fn get_onschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<Option<OnScheduleRecord>>;
    fn create_onschedule(&self, record: OnScheduleRecord) -> StorageResult<OnScheduleRecord>;
    /// Re-persist an existing record. Returns the stored copy.
    fn save_onschedule(&self, record: &OnScheduleRecord) -> StorageResult<OnScheduleRecord>;
    /// Returns `false` if there was nothing to delete.
    fn delete_onschedule(&self, model: &ModelLabel, subject_identifier: &str)
        -> StorageResult<bool>;

    fn get_offschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<Option<OffScheduleRecord>>;
    fn create_offschedule(&self, record: OffScheduleRecord) -> StorageResult<OffScheduleRecord>;
    fn delete_offschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<bool>;

    fn get_history(
        &self,
        subject_identifier: &str,
        key: &ScheduleKey,
    ) -> StorageResult<Option<SubjectScheduleHistory>>;
    /// Insert or replace the history row for `(subject_identifier, schedule_key)`.
    fn save_history(&self, history: &SubjectScheduleHistory) -> StorageResult<()>;
    /// Delete every history row for the pair. Returns the number removed.
    fn delete_history(&self, subject_identifier: &str, key: &ScheduleKey) -> StorageResult<usize>;
}

/// Lookup of consents by subject.
pub trait ConsentLookup: Send + Sync {
    fn is_consent_model(&self, model: &ModelLabel) -> bool;

    fn consents_for(
        &self,
        consent_model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<Vec<ConsentRecord>>;
}

/// A record lifecycle notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordEvent {
    Saved {
        model: ModelLabel,
        subject_identifier: String,
        /// True on insert, false on update.
        created: bool,
        /// True when loading fixtures or replaying data; handlers skip these.
        raw: bool,
        /// Non-empty for partial updates; handlers skip these.
        update_fields: Vec<String>,
    },
    Deleted {
        model: ModelLabel,
        subject_identifier: String,
    },
}

impl RecordEvent {
    pub fn created(model: ModelLabel, subject_identifier: impl Into<String>) -> Self {
        Self::Saved {
            model,
            subject_identifier: subject_identifier.into(),
            created: true,
            raw: false,
            update_fields: Vec::new(),
        }
    }

    pub fn updated(model: ModelLabel, subject_identifier: impl Into<String>) -> Self {
        Self::Saved {
            model,
            subject_identifier: subject_identifier.into(),
            created: false,
            raw: false,
            update_fields: Vec::new(),
        }
    }

    pub fn deleted(model: ModelLabel, subject_identifier: impl Into<String>) -> Self {
        Self::Deleted {
            model,
            subject_identifier: subject_identifier.into(),
        }
    }

    pub fn model(&self) -> &ModelLabel {
        match self {
            Self::Saved { model, .. } | Self::Deleted { model, .. } => model,
        }
    }

    pub fn subject_identifier(&self) -> &str {
        match self {
            Self::Saved {
                subject_identifier, ..
            }
            | Self::Deleted {
                subject_identifier, ..
            } => subject_identifier,
        }
    }
}

/// Receives record lifecycle events from a store.
///
/// Observers get the store that raised the event so they can read or write
/// through it without holding their own reference. An error returned for a
/// create aborts the create.
pub trait RecordObserver: Send + Sync {
    fn notify(&self, store: &dyn ScheduleStore, event: &RecordEvent) -> Result<(), BoxError>;
}
