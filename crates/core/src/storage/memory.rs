//! In-memory storage and consent collaborators.
//!
//! Used by the CLI walkthrough and by tests. Every create, save and delete
//! behaves like a change inside a transaction scoped to one subject: if an
//! observer fails, the subject's onschedule, offschedule and history rows are
//! put back as they were before the change, including anything observers wrote
//! while handling it.

use super::{
    ConsentLookup, ConsentRecord, OffScheduleRecord, OnScheduleRecord, RecordEvent,
    RecordObserver, ScheduleStore, SubjectScheduleHistory,
};
use crate::error::{StorageError, StorageResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use vs_types::{ModelLabel, ScheduleKey};

#[derive(Default)]
struct Tables {
    onschedule: Vec<OnScheduleRecord>,
    offschedule: Vec<OffScheduleRecord>,
    history: Vec<SubjectScheduleHistory>,
}

/// Every row belonging to one subject.
struct SubjectRows {
    subject_identifier: String,
    onschedule: Vec<OnScheduleRecord>,
    offschedule: Vec<OffScheduleRecord>,
    history: Vec<SubjectScheduleHistory>,
}

impl Tables {
    fn rows_for(&self, subject_identifier: &str) -> SubjectRows {
        SubjectRows {
            subject_identifier: subject_identifier.to_string(),
            onschedule: self
                .onschedule
                .iter()
                .filter(|r| r.subject_identifier == subject_identifier)
                .cloned()
                .collect(),
            offschedule: self
                .offschedule
                .iter()
                .filter(|r| r.subject_identifier == subject_identifier)
                .cloned()
                .collect(),
            history: self
                .history
                .iter()
                .filter(|h| h.subject_identifier == subject_identifier)
                .cloned()
                .collect(),
        }
    }

    fn restore(&mut self, rows: SubjectRows) {
        let subject = rows.subject_identifier.as_str();
        self.onschedule.retain(|r| r.subject_identifier != subject);
        self.onschedule.extend(rows.onschedule);
        self.offschedule.retain(|r| r.subject_identifier != subject);
        self.offschedule.extend(rows.offschedule);
        self.history.retain(|h| h.subject_identifier != subject);
        self.history.extend(rows.history);
    }
}

/// A [`ScheduleStore`] backed by vectors behind a mutex.
pub struct InMemoryStore {
    known_models: HashSet<ModelLabel>,
    tables: Mutex<Tables>,
    observers: RwLock<Vec<Arc<dyn RecordObserver>>>,
}

impl InMemoryStore {
    /// Creates a store that accepts records for `known_models`.
    pub fn new(known_models: impl IntoIterator<Item = ModelLabel>) -> Self {
        Self {
            known_models: known_models.into_iter().collect(),
            tables: Mutex::new(Tables::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn RecordObserver>) -> StorageResult<()> {
        self.observers
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .push(observer);
        Ok(())
    }

    pub fn onschedule_records(&self) -> StorageResult<Vec<OnScheduleRecord>> {
        Ok(self.tables()?.onschedule.clone())
    }

    pub fn offschedule_records(&self) -> StorageResult<Vec<OffScheduleRecord>> {
        Ok(self.tables()?.offschedule.clone())
    }

    pub fn history_records(&self) -> StorageResult<Vec<SubjectScheduleHistory>> {
        Ok(self.tables()?.history.clone())
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StorageError::Poisoned)
    }

    fn ensure_known(&self, model: &ModelLabel) -> StorageResult<()> {
        if self.known_models.contains(model) {
            Ok(())
        } else {
            Err(StorageError::UnknownModel(model.clone()))
        }
    }

    /// Deliver `event` to every observer. Must be called without the table lock held.
    fn dispatch(&self, event: &RecordEvent) -> StorageResult<()> {
        let observers: Vec<Arc<dyn RecordObserver>> = self
            .observers
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .clone();

        for observer in observers {
            observer
                .notify(self, event)
                .map_err(StorageError::Observer)?;
        }
        Ok(())
    }

    /// Apply `change` under the table lock, then dispatch the event it returns.
    ///
    /// If dispatching fails, the subject's rows are restored to what they were
    /// before `change` ran. No event means nothing changed.
    fn transact<T>(
        &self,
        subject_identifier: &str,
        change: impl FnOnce(&mut Tables) -> StorageResult<(T, Option<RecordEvent>)>,
    ) -> StorageResult<T> {
        let (before, (value, event)) = {
            let mut tables = self.tables()?;
            let before = tables.rows_for(subject_identifier);
            (before, change(&mut tables)?)
        };
        let Some(event) = event else {
            return Ok(value);
        };

        if let Err(err) = self.dispatch(&event) {
            self.tables()?.restore(before);
            tracing::debug!(
                model = %event.model(),
                subject = subject_identifier,
                error = %err,
                "rolled back record change"
            );
            return Err(err);
        }
        Ok(value)
    }
}

fn unique_violation(model: &ModelLabel, subject_identifier: &str) -> StorageError {
    StorageError::UniqueViolation {
        model: model.clone(),
        subject_identifier: subject_identifier.to_string(),
    }
}

fn not_found(model: &ModelLabel, subject_identifier: &str) -> StorageError {
    StorageError::NotFound {
        model: model.clone(),
        subject_identifier: subject_identifier.to_string(),
    }
}

impl ScheduleStore for InMemoryStore {
    fn is_known_model(&self, model: &ModelLabel) -> bool {
        self.known_models.contains(model)
    }

    fn get_onschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<Option<OnScheduleRecord>> {
        self.ensure_known(model)?;
        Ok(self
            .tables()?
            .onschedule
            .iter()
            .find(|r| &r.model == model && r.subject_identifier == subject_identifier)
            .cloned())
    }

    fn create_onschedule(&self, record: OnScheduleRecord) -> StorageResult<OnScheduleRecord> {
        self.ensure_known(&record.model)?;
        let subject_identifier = record.subject_identifier.clone();
        self.transact(&subject_identifier, |tables| {
            if tables.onschedule.iter().any(|r| {
                r.model == record.model && r.subject_identifier == record.subject_identifier
            }) {
                return Err(unique_violation(&record.model, &record.subject_identifier));
            }
            tables.onschedule.push(record.clone());
            let event = RecordEvent::created(record.model.clone(), &record.subject_identifier);
            Ok((record, Some(event)))
        })
    }

    fn save_onschedule(&self, record: &OnScheduleRecord) -> StorageResult<OnScheduleRecord> {
        self.transact(&record.subject_identifier, |tables| {
            let existing = tables
                .onschedule
                .iter_mut()
                .find(|r| r.id == record.id)
                .ok_or_else(|| not_found(&record.model, &record.subject_identifier))?;
            *existing = OnScheduleRecord {
                revision: existing.revision + 1,
                ..record.clone()
            };
            let event = RecordEvent::updated(record.model.clone(), &record.subject_identifier);
            Ok((existing.clone(), Some(event)))
        })
    }

    fn delete_onschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<bool> {
        self.transact(subject_identifier, |tables| {
            let position = tables
                .onschedule
                .iter()
                .position(|r| &r.model == model && r.subject_identifier == subject_identifier);
            Ok(match position {
                Some(index) => {
                    tables.onschedule.remove(index);
                    (true, Some(RecordEvent::deleted(model.clone(), subject_identifier)))
                }
                None => (false, None),
            })
        })
    }

    fn get_offschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<Option<OffScheduleRecord>> {
        self.ensure_known(model)?;
        Ok(self
            .tables()?
            .offschedule
            .iter()
            .find(|r| &r.model == model && r.subject_identifier == subject_identifier)
            .cloned())
    }

    fn create_offschedule(&self, record: OffScheduleRecord) -> StorageResult<OffScheduleRecord> {
        self.ensure_known(&record.model)?;
        let subject_identifier = record.subject_identifier.clone();
        self.transact(&subject_identifier, |tables| {
            if tables.offschedule.iter().any(|r| {
                r.model == record.model && r.subject_identifier == record.subject_identifier
            }) {
                return Err(unique_violation(&record.model, &record.subject_identifier));
            }
            tables.offschedule.push(record.clone());
            let event = RecordEvent::created(record.model.clone(), &record.subject_identifier);
            Ok((record, Some(event)))
        })
    }

    fn delete_offschedule(
        &self,
        model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<bool> {
        self.transact(subject_identifier, |tables| {
            let position = tables
                .offschedule
                .iter()
                .position(|r| &r.model == model && r.subject_identifier == subject_identifier);
            Ok(match position {
                Some(index) => {
                    tables.offschedule.remove(index);
                    (true, Some(RecordEvent::deleted(model.clone(), subject_identifier)))
                }
                None => (false, None),
            })
        })
    }

    fn get_history(
        &self,
        subject_identifier: &str,
        key: &ScheduleKey,
    ) -> StorageResult<Option<SubjectScheduleHistory>> {
        Ok(self
            .tables()?
            .history
            .iter()
            .find(|h| h.subject_identifier == subject_identifier && &h.schedule_key == key)
            .cloned())
    }

    fn save_history(&self, history: &SubjectScheduleHistory) -> StorageResult<()> {
        let mut tables = self.tables()?;
        match tables.history.iter_mut().find(|h| {
            h.subject_identifier == history.subject_identifier
                && h.schedule_key == history.schedule_key
        }) {
            Some(existing) => *existing = history.clone(),
            None => tables.history.push(history.clone()),
        }
        Ok(())
    }

    fn delete_history(&self, subject_identifier: &str, key: &ScheduleKey) -> StorageResult<usize> {
        let mut tables = self.tables()?;
        let before = tables.history.len();
        tables
            .history
            .retain(|h| !(h.subject_identifier == subject_identifier && &h.schedule_key == key));
        Ok(before - tables.history.len())
    }
}

/// A [`ConsentLookup`] backed by a vector.
pub struct InMemoryConsents {
    consent_models: HashSet<ModelLabel>,
    records: RwLock<Vec<(ModelLabel, ConsentRecord)>>,
}

impl InMemoryConsents {
    pub fn new(consent_models: impl IntoIterator<Item = ModelLabel>) -> Self {
        Self {
            consent_models: consent_models.into_iter().collect(),
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, consent_model: &ModelLabel, record: ConsentRecord) -> StorageResult<()> {
        if !self.consent_models.contains(consent_model) {
            return Err(StorageError::UnknownModel(consent_model.clone()));
        }
        self.records
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .push((consent_model.clone(), record));
        Ok(())
    }
}

impl ConsentLookup for InMemoryConsents {
    fn is_consent_model(&self, model: &ModelLabel) -> bool {
        self.consent_models.contains(model)
    }

    fn consents_for(
        &self,
        consent_model: &ModelLabel,
        subject_identifier: &str,
    ) -> StorageResult<Vec<ConsentRecord>> {
        if !self.consent_models.contains(consent_model) {
            return Err(StorageError::UnknownModel(consent_model.clone()));
        }
        Ok(self
            .records
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .iter()
            .filter(|(model, record)| {
                model == consent_model && record.subject_identifier == subject_identifier
            })
            .map(|(_, record)| record.clone())
            .collect())
    }
}
