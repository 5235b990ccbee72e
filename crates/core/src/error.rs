//! Error types for the visit schedule core.
//!
//! Each concern has its own enum so callers can tell a configuration problem
//! from a registry miss or a failed enrollment. Errors that cross a component
//! boundary keep their cause as a `#[source]`.

use chrono::{DateTime, Utc};
use vs_types::{ModelLabel, Name, ScheduleKey, TypeError};

/// Boxed error used at the notification boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup and construction-time configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {kind} name: {source}")]
    InvalidName {
        kind: &'static str,
        #[source]
        source: TypeError,
    },
    #[error("invalid model label for '{field}': {source}")]
    InvalidModelLabel {
        field: String,
        #[source]
        source: TypeError,
    },
    #[error(
        "invalid appointment model for schedule '{schedule}'. Got none. Either declare it on \
         the schedule or configure a default appointment model"
    )]
    MissingAppointmentModel { schedule: Name },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read protocol file: {0}")]
    FileRead(std::io::Error),
    #[error("protocol schema mismatch at {path}: {source}")]
    ProtocolSchema {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Registry(#[from] SiteRegistryError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Violations of the schedule composition rules.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid visit code: {0}")]
    InvalidVisitCode(#[source] TypeError),
    #[error("visit already registered. Got visit={visit} ({attr}). See schedule '{schedule}'")]
    AlreadyRegisteredVisit {
        visit: String,
        attr: &'static str,
        schedule: Name,
    },
    #[error("form already registered. Got {form} ({attr})")]
    AlreadyRegisteredForm { form: String, attr: &'static str },
    #[error(
        "schedule already registered. Got schedule={schedule} ({attr}). See visit schedule \
         '{visit_schedule}'"
    )]
    AlreadyRegisteredSchedule {
        schedule: Name,
        attr: &'static str,
        visit_schedule: Name,
    },
    #[error(
        "visit {visit} allows unscheduled visits but declares no unscheduled crfs or \
         requisitions"
    )]
    MissingUnscheduledForms { visit: String },
    #[error("visit '{code}' not found")]
    VisitNotFound { code: String },
    #[error("invalid timepoint: {0}")]
    InvalidTimepoint(f64),
    #[error("invalid window period: lower offset {rlower} must be <= 0 <= upper offset {rupper}")]
    InvalidWindowPeriod { rlower: String, rupper: String },
    #[error("date arithmetic out of range for {what}")]
    DateOutOfRange { what: String },
}

pub type DomainResult<T> = std::result::Result<T, DomainError>;

/// Failures of the site registry.
///
/// `NotLoaded` is deliberately separate from the `*NotFound` variants so a
/// caller can tell "registry not populated yet" from "no such entry".
#[derive(Debug, thiserror::Error)]
pub enum SiteRegistryError {
    #[error("site visit schedules are not loaded. Register visit schedules first")]
    NotLoaded,
    #[error("site visit schedules are already loaded. Cannot register '{name}'")]
    AlreadyLoaded { name: Name },
    #[error("visit schedule '{name}' is already registered")]
    AlreadyRegistered { name: Name },
    #[error("model '{model}' is already used by schedule '{key}'")]
    AlreadyRegisteredModel { model: ModelLabel, key: ScheduleKey },
    #[error("visit schedule '{name}' does not exist")]
    VisitScheduleNotFound { name: String },
    #[error("schedule '{schedule_name}' does not exist in visit schedule '{visit_schedule_name}'")]
    ScheduleNotFound {
        visit_schedule_name: String,
        schedule_name: String,
    },
    #[error("no schedule uses {role} model '{model}'")]
    ModelNotFound {
        role: &'static str,
        model: ModelLabel,
    },
    #[error("visit '{code}' does not exist on schedule '{key}'")]
    VisitNotFound { key: ScheduleKey, code: String },
    #[error("{model} record links to schedule '{got}' but the model belongs to '{expected}'")]
    ScheduleKeyMismatch {
        model: ModelLabel,
        expected: ScheduleKey,
        got: ScheduleKey,
    },
    #[error("site visit schedules lock poisoned")]
    Poisoned,
}

impl SiteRegistryError {
    /// True for lookups that failed because no such entry is registered.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::VisitScheduleNotFound { .. }
                | Self::ScheduleNotFound { .. }
                | Self::ModelNotFound { .. }
                | Self::VisitNotFound { .. }
        )
    }
}

pub type RegistryResult<T> = std::result::Result<T, SiteRegistryError>;

/// Failures reported by a storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{model} matching subject_identifier={subject_identifier} does not exist")]
    NotFound {
        model: ModelLabel,
        subject_identifier: String,
    },
    #[error("no schedule history for subject_identifier={subject_identifier} on '{key}'")]
    HistoryNotFound {
        subject_identifier: String,
        key: ScheduleKey,
    },
    #[error("unique constraint failed: {model} already has subject_identifier={subject_identifier}")]
    UniqueViolation {
        model: ModelLabel,
        subject_identifier: String,
    },
    #[error("unknown model '{0}'")]
    UnknownModel(ModelLabel),
    #[error("record lifecycle handler failed: {0}")]
    Observer(#[source] BoxError),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures of the enrollment workflow.
#[derive(Debug, thiserror::Error)]
pub enum SubjectScheduleError {
    #[error(
        "failed to put subject on schedule. Consent not found. Using consent model \
         '{consent_model}' subject identifier={subject_identifier}"
    )]
    ConsentNotFound {
        consent_model: ModelLabel,
        subject_identifier: String,
    },
    #[error("subject {subject_identifier} is not on schedule '{key}'")]
    NotOnSchedule {
        subject_identifier: String,
        key: ScheduleKey,
    },
    #[error("{field} cannot be a future date. Got {value}")]
    DatetimeInFuture {
        field: &'static str,
        value: DateTime<Utc>,
    },
    #[error("{field} cannot be before the study opened on {study_open}. Got {value}")]
    BeforeStudyOpen {
        field: &'static str,
        value: DateTime<Utc>,
        study_open: DateTime<Utc>,
    },
    #[error("{field} cannot be after the study closed on {study_close}. Got {value}")]
    AfterStudyClose {
        field: &'static str,
        value: DateTime<Utc>,
        study_close: DateTime<Utc>,
    },
    #[error(
        "offschedule_datetime cannot precede onschedule_datetime {onschedule_datetime}. Got \
         {offschedule_datetime}"
    )]
    OffscheduleBeforeOnschedule {
        onschedule_datetime: DateTime<Utc>,
        offschedule_datetime: DateTime<Utc>,
    },
    #[error("{field} model '{model}' is not known to the storage collaborator")]
    UnknownModel {
        field: &'static str,
        model: ModelLabel,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type SubjectScheduleResult<T> = std::result::Result<T, SubjectScheduleError>;

/// Failures of schedule-level operations.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule '{schedule}': {source}")]
    Subject {
        schedule: Name,
        #[source]
        source: SubjectScheduleError,
    },
    #[error(
        "site visit schedules returned the wrong schedule. Expected '{expected}' for \
         onschedule_model={model}. Got '{got}'"
    )]
    WrongSchedule {
        expected: Name,
        model: ModelLabel,
        got: Name,
    },
    #[error(transparent)]
    Registry(#[from] SiteRegistryError),
}

pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;
