//! Protocol definition files.
//!
//! A protocol file is YAML describing every visit schedule a site runs:
//!
//! ```yaml
//! visit_schedules:
//!   - name: visit_schedule1
//!     offstudy_model: edc_offstudy.subjectoffstudy
//!     death_report_model: ambition_prn.deathreport
//!     schedules:
//!       - name: schedule1
//!         onschedule_model: ambition_prn.onschedule
//!         offschedule_model: ambition_prn.offschedule
//!         consent_model: ambition_subject.subjectconsent
//!         visits:
//!           - code: "1000"
//!             timepoint: 0
//!             rupper_days: 3
//!             crfs:
//!               - { model: ambition_subject.bloodresult, show_order: 10 }
//! ```
//!
//! Visit codes must be quoted. Offsets are whole days. Unknown keys are
//! rejected.

use crate::config::CoreConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::forms::Form;
use crate::schedule::{Schedule, ScheduleSpec};
use crate::site_visit_schedules::SiteVisitSchedules;
use crate::visit::{Timepoint, Visit, VisitSpec};
use crate::visit_schedule::{VisitSchedule, VisitScheduleSpec};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use vs_types::VisitCode;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolDefinition {
    pub visit_schedules: Vec<VisitScheduleDefinition>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VisitScheduleDefinition {
    pub name: String,
    #[serde(default)]
    pub verbose_name: Option<String>,
    pub offstudy_model: String,
    pub death_report_model: String,
    #[serde(default)]
    pub locator_model: Option<String>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDefinition>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleDefinition {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sequence: Option<String>,
    pub onschedule_model: String,
    pub offschedule_model: String,
    #[serde(default)]
    pub appointment_model: Option<String>,
    pub consent_model: String,
    #[serde(default)]
    pub visits: Vec<VisitDefinition>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VisitDefinition {
    pub code: VisitCode,
    #[serde(default)]
    pub title: Option<String>,
    pub timepoint: Timepoint,
    #[serde(default)]
    pub rbase_days: i64,
    #[serde(default)]
    pub rlower_days: i64,
    #[serde(default)]
    pub rupper_days: i64,
    #[serde(default)]
    pub grouping: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub facility_name: Option<String>,
    #[serde(default)]
    pub allow_unscheduled: bool,
    #[serde(default)]
    pub crfs: Vec<Form>,
    #[serde(default)]
    pub requisitions: Vec<Form>,
    #[serde(default)]
    pub crfs_unscheduled: Vec<Form>,
    #[serde(default)]
    pub requisitions_unscheduled: Vec<Form>,
}

fn days(code: &VisitCode, field: &str, value: i64) -> ConfigResult<Duration> {
    Duration::try_days(value).ok_or_else(|| {
        ConfigError::InvalidInput(format!("visit {code}: {field} out of range ({value})"))
    })
}

impl VisitDefinition {
    pub fn build(&self) -> ConfigResult<Visit> {
        let spec = VisitSpec {
            code: self.code.to_string(),
            title: self.title.clone(),
            timepoint: self.timepoint,
            rbase: days(&self.code, "rbase_days", self.rbase_days)?,
            rlower: days(&self.code, "rlower_days", self.rlower_days)?,
            rupper: days(&self.code, "rupper_days", self.rupper_days)?,
            grouping: self.grouping.clone(),
            instructions: self.instructions.clone(),
            facility_name: self.facility_name.clone(),
            allow_unscheduled: self.allow_unscheduled,
            crfs: self.crfs.clone(),
            requisitions: self.requisitions.clone(),
            crfs_unscheduled: self.crfs_unscheduled.clone(),
            requisitions_unscheduled: self.requisitions_unscheduled.clone(),
        };
        Ok(Visit::new(spec)?)
    }
}

impl ScheduleDefinition {
    pub fn build(&self, cfg: &CoreConfig) -> ConfigResult<Schedule> {
        let mut schedule = Schedule::new(
            ScheduleSpec {
                name: self.name.clone(),
                title: self.title.clone(),
                sequence: self.sequence.clone(),
                onschedule_model: self.onschedule_model.clone(),
                offschedule_model: self.offschedule_model.clone(),
                appointment_model: self.appointment_model.clone(),
                consent_model: self.consent_model.clone(),
            },
            cfg,
        )?;
        for visit in &self.visits {
            schedule.add_visit(visit.build()?)?;
        }
        Ok(schedule)
    }
}

impl VisitScheduleDefinition {
    pub fn build(&self, cfg: &CoreConfig) -> ConfigResult<VisitSchedule> {
        let mut visit_schedule = VisitSchedule::new(VisitScheduleSpec {
            name: self.name.clone(),
            verbose_name: self.verbose_name.clone(),
            offstudy_model: self.offstudy_model.clone(),
            death_report_model: self.death_report_model.clone(),
            locator_model: self.locator_model.clone(),
        })?;
        for schedule in &self.schedules {
            visit_schedule.add_schedule(schedule.build(cfg)?)?;
        }
        Ok(visit_schedule)
    }
}

impl ProtocolDefinition {
    /// Build every visit schedule without registering any of them.
    pub fn build(&self, cfg: &CoreConfig) -> ConfigResult<Vec<VisitSchedule>> {
        self.visit_schedules.iter().map(|vs| vs.build(cfg)).collect()
    }
}

/// Parse protocol YAML. Errors name the path of the offending field.
pub fn parse_protocol(yaml_text: &str) -> ConfigResult<ProtocolDefinition> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);

    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        ConfigError::ProtocolSchema {
            path,
            source: err.into_inner(),
        }
    })
}

pub fn load_protocol_file(path: &Path) -> ConfigResult<ProtocolDefinition> {
    let text = fs::read_to_string(path).map_err(ConfigError::FileRead)?;
    parse_protocol(&text)
}

/// Build and register every visit schedule, then mark the registry loaded.
///
/// Every visit schedule is built before any is registered. If a registration
/// fails, the registry is torn down and left empty and not loaded.
pub fn register_protocol(
    registry: &SiteVisitSchedules,
    protocol: &ProtocolDefinition,
    cfg: &CoreConfig,
) -> ConfigResult<Vec<Arc<VisitSchedule>>> {
    let built = protocol.build(cfg)?;
    let registered = built
        .into_iter()
        .map(|vs| registry.register(vs))
        .collect::<Result<Vec<_>, _>>();

    let registered = match registered {
        Ok(registered) => registered,
        Err(err) => {
            tracing::warn!(error = %err, "protocol registration failed; tearing down registry");
            registry.teardown()?;
            return Err(err.into());
        }
    };
    registry.mark_loaded()?;
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainError, SiteRegistryError};
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PROTOCOL: &str = r#"
visit_schedules:
  - name: visit_schedule1
    verbose_name: Main study
    offstudy_model: app.subjectoffstudy
    death_report_model: app.deathreport
    schedules:
      - name: schedule1
        onschedule_model: app.onschedule
        offschedule_model: app.offschedule
        consent_model: app.subjectconsent
        visits:
          - code: "1000"
            timepoint: 0
            rupper_days: 3
            crfs:
              - { model: app.crfone, show_order: 10 }
              - { model: app.crftwo, show_order: 20, required: false }
          - code: "2000"
            timepoint: 1
            rbase_days: 28
            rlower_days: -3
            rupper_days: 3
            requisitions:
              - { model: app.requisition, panel: cd4, show_order: 10 }
"#;

    fn cfg() -> CoreConfig {
        CoreConfig::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            None,
            Some(vs_types::ModelLabel::new("app.appointment").unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn parse_and_build_protocol() {
        let protocol = parse_protocol(PROTOCOL).unwrap();
        let built = protocol.build(&cfg()).unwrap();

        assert_eq!(built.len(), 1);
        let vs = &built[0];
        assert_eq!(vs.verbose_name(), "Main study");
        let schedule = vs.get_schedule("schedule1").unwrap();
        assert_eq!(schedule.appointment_model().as_str(), "app.appointment");
        assert_eq!(schedule.visits().len(), 2);

        let visit = schedule.visits().get("2000").unwrap();
        assert_eq!(visit.rbase(), Duration::days(28));
        assert_eq!(visit.window_period().rlower(), Duration::days(-3));
        assert_eq!(visit.requisitions().len(), 1);
        assert!(!schedule.visits().get("1000").unwrap().crfs().as_slice()[1].required());
    }

    #[test]
    fn integer_visit_code_is_rejected() {
        let yaml = PROTOCOL.replace(r#"code: "1000""#, "code: 1000");
        let err = parse_protocol(&yaml).expect_err("integer code");
        match err {
            ConfigError::ProtocolSchema { path, .. } => {
                assert!(path.contains("visits[0].code"), "path was {path}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = PROTOCOL.replace("verbose_name: Main study", "verbose: Main study");
        assert!(matches!(
            parse_protocol(&yaml),
            Err(ConfigError::ProtocolSchema { .. })
        ));
    }

    #[test]
    fn unscheduled_visit_without_forms_fails_build() {
        let yaml = PROTOCOL.replace(
            "rupper_days: 3\n            crfs:",
            "rupper_days: 3\n            allow_unscheduled: true\n            crfs:",
        );
        let protocol = parse_protocol(&yaml).unwrap();
        let err = protocol.build(&cfg()).expect_err("missing unscheduled forms");
        assert!(matches!(
            err,
            ConfigError::Domain(DomainError::MissingUnscheduledForms { .. })
        ));
    }

    #[test]
    fn load_and_register_protocol_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PROTOCOL.as_bytes()).unwrap();

        let protocol = load_protocol_file(file.path()).unwrap();
        let registry = SiteVisitSchedules::new();
        let registered = register_protocol(&registry, &protocol, &cfg()).unwrap();

        assert_eq!(registered.len(), 1);
        assert!(registry.is_loaded());
        let schedule = registry.get_schedule("visit_schedule1", "schedule1").unwrap();
        assert_eq!(schedule.visits().first().unwrap().code().as_str(), "1000");
    }

    #[test]
    fn failed_registration_leaves_registry_empty() {
        let yaml = format!(
            "{PROTOCOL}{}",
            r#"  - name: visit_schedule2
    offstudy_model: app.subjectoffstudy
    death_report_model: app.deathreport
    schedules:
      - name: schedule1
        onschedule_model: app.onschedule
        offschedule_model: app.offschedule2
        consent_model: app.subjectconsent
"#
        );
        let protocol = parse_protocol(&yaml).unwrap();
        let registry = SiteVisitSchedules::new();

        let err = register_protocol(&registry, &protocol, &cfg()).expect_err("shared model");
        assert!(matches!(
            err,
            ConfigError::Registry(SiteRegistryError::AlreadyRegisteredModel { .. })
        ));
        assert!(!registry.is_loaded());
        registry.mark_loaded().unwrap();
        assert!(registry.visit_schedules().unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_protocol_file(&dir.path().join("missing.yaml")).expect_err("missing");
        assert!(matches!(err, ConfigError::FileRead(_)));
    }
}
