//! # VS Core
//!
//! Visit schedule core for a clinical trial data capture platform.
//!
//! This crate models the protocol-defined sequence of subject visits and the
//! forms due at each one, and runs the workflow that puts subjects on a
//! schedule and takes them off again:
//! - Visit schedules, schedules, visits and forms, validated at construction
//! - Window periods around a visit's target date
//! - An explicitly constructed site registry ([`SiteVisitSchedules`])
//! - The enrollment workflow ([`SubjectSchedule`]) over storage and consent traits
//! - Record lifecycle handlers ([`ScheduleSignalHandlers`])
//! - Protocol YAML loading
//!
//! **No persistence engine**: storage and consent lookups are collaborators
//! behind [`ScheduleStore`] and [`ConsentLookup`]. An in-memory implementation
//! lives in [`storage::memory`].

pub mod config;
pub mod constants;
pub mod error;
pub mod forms;
pub mod protocol;
pub mod schedule;
pub mod signals;
pub mod site_visit_schedules;
pub mod storage;
pub mod subject_schedule;
pub mod visit;
pub mod visit_collection;
pub mod visit_schedule;
pub mod window_period;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::CoreConfig;
pub use error::{
    ConfigError, DomainError, ScheduleError, SiteRegistryError, StorageError, SubjectScheduleError,
};
pub use forms::{Form, FormsCollection};
pub use schedule::{Enrollment, EnrollmentState, Schedule, ScheduleContext, ScheduleSpec};
pub use signals::ScheduleSignalHandlers;
pub use site_visit_schedules::{RegistryState, SiteVisitSchedules};
pub use storage::{
    ConsentLookup, ConsentRecord, OffScheduleRecord, OnScheduleRecord, RecordEvent,
    RecordObserver, ScheduleRecord, ScheduleStatus, ScheduleStore, SubjectScheduleHistory,
};
pub use subject_schedule::SubjectSchedule;
pub use visit::{Timepoint, Visit, VisitSpec};
pub use visit_collection::{ScheduledVisit, VisitCollection};
pub use visit_schedule::{SchedulesCollection, VisitSchedule, VisitScheduleSpec};
pub use window_period::{Window, WindowPeriod};

pub use vs_types::{ModelLabel, Name, NonEmptyText, ScheduleKey, VisitCode};
