//! A single protocol-defined visit.

use crate::error::{DomainError, DomainResult};
use crate::forms::{Form, FormsCollection};
use crate::window_period::{Window, WindowPeriod};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use vs_types::{ModelLabel, VisitCode};

/// Ordinal position of a visit in its schedule, e.g. `0`, `1`, `1.5`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Timepoint(f64);

impl Timepoint {
    pub fn new(value: f64) -> DomainResult<Self> {
        if !value.is_finite() {
            return Err(DomainError::InvalidTimepoint(value));
        }
        // -0.0 and 0.0 are the same timepoint
        Ok(Self(value + 0.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Timepoint {
    type Error = DomainError;

    fn try_from(value: f64) -> DomainResult<Self> {
        Self::new(value)
    }
}

impl From<Timepoint> for f64 {
    fn from(timepoint: Timepoint) -> Self {
        timepoint.0
    }
}

impl From<u32> for Timepoint {
    fn from(value: u32) -> Self {
        Self(f64::from(value))
    }
}

impl PartialEq for Timepoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timepoint {}

impl PartialOrd for Timepoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timepoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Timepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to construct a [`Visit`].
///
/// `code` is taken as raw text and validated by [`Visit::new`].
#[derive(Clone, Debug)]
pub struct VisitSpec {
    pub code: String,
    pub title: Option<String>,
    pub timepoint: Timepoint,
    pub rbase: Duration,
    pub rlower: Duration,
    pub rupper: Duration,
    pub grouping: Option<String>,
    pub instructions: Option<String>,
    pub facility_name: Option<String>,
    pub allow_unscheduled: bool,
    pub crfs: Vec<Form>,
    pub requisitions: Vec<Form>,
    pub crfs_unscheduled: Vec<Form>,
    pub requisitions_unscheduled: Vec<Form>,
}

impl VisitSpec {
    /// A visit with an integer timepoint, no offsets and no forms.
    pub fn new(code: impl Into<String>, timepoint: u32) -> Self {
        Self {
            code: code.into(),
            title: None,
            timepoint: Timepoint::from(timepoint),
            rbase: Duration::zero(),
            rlower: Duration::zero(),
            rupper: Duration::zero(),
            grouping: None,
            instructions: None,
            facility_name: None,
            allow_unscheduled: false,
            crfs: Vec::new(),
            requisitions: Vec::new(),
            crfs_unscheduled: Vec::new(),
            requisitions_unscheduled: Vec::new(),
        }
    }
}

/// A named, ordered point in a schedule with the forms due at it.
#[derive(Clone, Debug)]
pub struct Visit {
    code: VisitCode,
    title: String,
    timepoint: Timepoint,
    rbase: Duration,
    window_period: WindowPeriod,
    grouping: Option<String>,
    instructions: Option<String>,
    facility_name: Option<String>,
    allow_unscheduled: bool,
    crfs: FormsCollection,
    requisitions: FormsCollection,
    crfs_unscheduled: FormsCollection,
    requisitions_unscheduled: FormsCollection,
}

impl Visit {
    /// # Errors
    ///
    /// - [`DomainError::InvalidVisitCode`] if the code is empty or not `[A-Z0-9]+`.
    /// - [`DomainError::InvalidWindowPeriod`] for a positive lower or negative upper offset.
    /// - [`DomainError::AlreadyRegisteredForm`] for duplicate forms in any collection.
    /// - [`DomainError::MissingUnscheduledForms`] if `allow_unscheduled` is set without
    ///   unscheduled crfs or requisitions.
    pub fn new(spec: VisitSpec) -> DomainResult<Self> {
        let code = VisitCode::new(&spec.code).map_err(DomainError::InvalidVisitCode)?;

        if spec.allow_unscheduled
            && spec.crfs_unscheduled.is_empty()
            && spec.requisitions_unscheduled.is_empty()
        {
            return Err(DomainError::MissingUnscheduledForms {
                visit: code.to_string(),
            });
        }

        Ok(Self {
            title: spec.title.unwrap_or_else(|| format!("Visit {code}")),
            code,
            timepoint: spec.timepoint,
            rbase: spec.rbase,
            window_period: WindowPeriod::new(spec.rlower, spec.rupper)?,
            grouping: spec.grouping,
            instructions: spec.instructions,
            facility_name: spec.facility_name,
            allow_unscheduled: spec.allow_unscheduled,
            crfs: FormsCollection::new(spec.crfs)?,
            requisitions: FormsCollection::new(spec.requisitions)?,
            crfs_unscheduled: FormsCollection::new(spec.crfs_unscheduled)?,
            requisitions_unscheduled: FormsCollection::new(spec.requisitions_unscheduled)?,
        })
    }

    pub fn code(&self) -> &VisitCode {
        &self.code
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn timepoint(&self) -> Timepoint {
        self.timepoint
    }

    /// Offset of this visit's target date from the schedule's base date.
    pub fn rbase(&self) -> Duration {
        self.rbase
    }

    pub fn window_period(&self) -> &WindowPeriod {
        &self.window_period
    }

    pub fn grouping(&self) -> Option<&str> {
        self.grouping.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn facility_name(&self) -> Option<&str> {
        self.facility_name.as_deref()
    }

    pub fn allow_unscheduled(&self) -> bool {
        self.allow_unscheduled
    }

    pub fn crfs(&self) -> &FormsCollection {
        &self.crfs
    }

    pub fn requisitions(&self) -> &FormsCollection {
        &self.requisitions
    }

    pub fn crfs_unscheduled(&self) -> &FormsCollection {
        &self.crfs_unscheduled
    }

    pub fn requisitions_unscheduled(&self) -> &FormsCollection {
        &self.requisitions_unscheduled
    }

    /// Scheduled crfs followed by scheduled requisitions.
    pub fn forms(&self) -> impl Iterator<Item = &Form> {
        self.crfs.iter().chain(self.requisitions.iter())
    }

    /// Unscheduled crfs followed by unscheduled requisitions.
    pub fn unscheduled_forms(&self) -> impl Iterator<Item = &Form> {
        self.crfs_unscheduled
            .iter()
            .chain(self.requisitions_unscheduled.iter())
    }

    /// The form that follows a required `model` (and `panel`, if given).
    ///
    /// Every required match updates the answer to the entry after it, so the
    /// last match wins. A match in last position has no follower and leaves the
    /// previous answer unchanged.
    pub fn next_form(&self, model: &ModelLabel, panel: Option<&str>) -> Option<&Form> {
        let forms: Vec<&Form> = self.forms().collect();
        let mut next_form = None;
        for (index, form) in forms.iter().enumerate() {
            if form.required() && form.matches(model, panel) {
                if let Some(following) = forms.get(index + 1) {
                    next_form = Some(*following);
                }
            }
        }
        next_form
    }

    /// First scheduled form (crf or requisition) for `model`.
    pub fn get_form(&self, model: &ModelLabel) -> Option<&Form> {
        self.forms().find(|form| form.model() == model)
    }

    pub fn get_crf(&self, model: &ModelLabel) -> Option<&Form> {
        self.crfs.get(model)
    }

    pub fn get_requisition(&self, model: &ModelLabel, panel: &str) -> Option<&Form> {
        self.requisitions.get_with_panel(model, panel)
    }

    /// Target datetime of this visit for a schedule that starts at `base`.
    pub fn timepoint_datetime(&self, base: DateTime<Utc>) -> DomainResult<DateTime<Utc>> {
        base.checked_add_signed(self.rbase)
            .ok_or_else(|| DomainError::DateOutOfRange {
                what: format!("visit {} timepoint from {base}", self.code),
            })
    }

    /// Window around an already-resolved target datetime.
    pub fn window_for(&self, timepoint_datetime: DateTime<Utc>) -> DomainResult<Window> {
        self.window_period.compute(timepoint_datetime)
    }
}

impl fmt::Display for Visit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}
