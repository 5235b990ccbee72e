//! Record lifecycle handlers.
//!
//! [`ScheduleSignalHandlers`] turns store events into enrollment calls:
//!
//! | Event | Model role | Call |
//! |-------|------------|------|
//! | created | onschedule | `Schedule::onschedule_created` |
//! | created | offschedule | `Schedule::offschedule_created` |
//! | deleted | offschedule | `Schedule::reopen` |
//! | deleted | onschedule | `Schedule::clear_history` |
//!
//! A created record is validated the same way the enrollment workflow
//! validates the records it creates. A rejected record fails the handler, and
//! the store rolls the create back.
//!
//! Updates, raw saves and partial saves (`update_fields`) are ignored, so a
//! resave made by a handler never re-enters the handlers. Events for models no
//! registered schedule uses are ignored.

use crate::config::CoreConfig;
use crate::error::{BoxError, RegistryResult, StorageError};
use crate::schedule::ScheduleContext;
use crate::site_visit_schedules::{ScheduleEntry, SiteVisitSchedules};
use crate::storage::{ConsentLookup, RecordEvent, RecordObserver, ScheduleStore};
use std::sync::Arc;

pub struct ScheduleSignalHandlers {
    registry: Arc<SiteVisitSchedules>,
    consents: Arc<dyn ConsentLookup>,
    config: Arc<CoreConfig>,
}

impl ScheduleSignalHandlers {
    pub fn new(
        registry: Arc<SiteVisitSchedules>,
        consents: Arc<dyn ConsentLookup>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            registry,
            consents,
            config,
        }
    }

    fn context<'a>(&'a self, store: &'a dyn ScheduleStore) -> ScheduleContext<'a> {
        ScheduleContext {
            registry: &self.registry,
            store,
            consents: self.consents.as_ref(),
            config: &self.config,
        }
    }

    fn on_created(
        &self,
        ctx: &ScheduleContext<'_>,
        event: &RecordEvent,
    ) -> Result<(), BoxError> {
        let model = event.model();
        let subject_identifier = event.subject_identifier();

        if let Some((_, schedule)) = registered(self.registry.get_by_onschedule_model(model))? {
            let record = ctx
                .store
                .get_onschedule(model, subject_identifier)?
                .ok_or_else(|| missing(event))?;
            schedule.onschedule_created(ctx, &record)?;
        } else if let Some((_, schedule)) =
            registered(self.registry.get_by_offschedule_model(model))?
        {
            let record = ctx
                .store
                .get_offschedule(model, subject_identifier)?
                .ok_or_else(|| missing(event))?;
            schedule.offschedule_created(ctx, &record)?;
        }
        Ok(())
    }

    fn on_deleted(
        &self,
        ctx: &ScheduleContext<'_>,
        event: &RecordEvent,
    ) -> Result<(), BoxError> {
        let model = event.model();
        let subject_identifier = event.subject_identifier();

        if let Some((_, schedule)) = registered(self.registry.get_by_offschedule_model(model))? {
            schedule.reopen(ctx, subject_identifier)?;
        } else if let Some((_, schedule)) =
            registered(self.registry.get_by_onschedule_model(model))?
        {
            schedule.clear_history(ctx, subject_identifier)?;
        }
        Ok(())
    }
}

fn missing(event: &RecordEvent) -> StorageError {
    StorageError::NotFound {
        model: event.model().clone(),
        subject_identifier: event.subject_identifier().to_string(),
    }
}

/// `Ok(None)` for a model no registered schedule uses.
fn registered(lookup: RegistryResult<ScheduleEntry>) -> RegistryResult<Option<ScheduleEntry>> {
    match lookup {
        Ok(entry) => Ok(Some(entry)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

impl RecordObserver for ScheduleSignalHandlers {
    fn notify(&self, store: &dyn ScheduleStore, event: &RecordEvent) -> Result<(), BoxError> {
        let ctx = self.context(store);
        match event {
            RecordEvent::Saved {
                created: true,
                raw: false,
                update_fields,
                ..
            } if update_fields.is_empty() => self.on_created(&ctx, event),
            RecordEvent::Saved { .. } => Ok(()),
            RecordEvent::Deleted { .. } => self.on_deleted(&ctx, event),
        }
    }
}
