//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the
//! registry, schedules and workflow as an `Arc<CoreConfig>`. The core never reads
//! environment variables itself; binaries read them and hand the raw values to
//! the parsers below.

use crate::constants::DEFAULT_APPOINTMENT_MODEL;
use crate::error::{ConfigError, ConfigResult};
use chrono::{DateTime, NaiveDate, Utc};
use vs_types::ModelLabel;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    study_open_datetime: DateTime<Utc>,
    study_close_datetime: Option<DateTime<Utc>>,
    default_appointment_model: Option<ModelLabel>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInput`] if the study closes before it opens.
    pub fn new(
        study_open_datetime: DateTime<Utc>,
        study_close_datetime: Option<DateTime<Utc>>,
        default_appointment_model: Option<ModelLabel>,
    ) -> ConfigResult<Self> {
        if let Some(close) = study_close_datetime {
            if close < study_open_datetime {
                return Err(ConfigError::InvalidInput(format!(
                    "study close datetime {close} is before study open datetime \
                     {study_open_datetime}"
                )));
            }
        }

        Ok(Self {
            study_open_datetime,
            study_close_datetime,
            default_appointment_model,
        })
    }

    /// Earliest datetime any enrollment timestamp may carry.
    pub fn study_open_datetime(&self) -> DateTime<Utc> {
        self.study_open_datetime
    }

    pub fn study_close_datetime(&self) -> Option<DateTime<Utc>> {
        self.study_close_datetime
    }

    /// Appointment model used by schedules that do not declare one.
    pub fn default_appointment_model(&self) -> Option<&ModelLabel> {
        self.default_appointment_model.as_ref()
    }
}

/// Parse a datetime from an optional string value.
///
/// Accepts RFC 3339 (`2024-01-01T08:00:00Z`) or a bare date (`2024-01-01`,
/// taken as midnight UTC). `None` or whitespace yields `Ok(None)`.
pub fn datetime_from_env_value(
    value: Option<String>,
    var_name: &str,
) -> ConfigResult<Option<DateTime<Utc>>> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(value) = value else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| {
            ConfigError::InvalidInput(format!(
                "{var_name} must be an RFC 3339 datetime or YYYY-MM-DD date, got '{value}'"
            ))
        })
}

/// Parse the default appointment model from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_APPOINTMENT_MODEL`].
pub fn appointment_model_from_env_value(value: Option<String>) -> ConfigResult<ModelLabel> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_APPOINTMENT_MODEL.to_string());

    ModelLabel::new(&value).map_err(|source| ConfigError::InvalidModelLabel {
        field: "default_appointment_model".into(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn datetime_from_env_value_accepts_rfc3339_and_dates() {
        let parsed = datetime_from_env_value(Some("2024-03-01T10:30:00+02:00".into()), "X")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap());

        let parsed = datetime_from_env_value(Some(" 2024-03-01 ".into()), "X")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn datetime_from_env_value_treats_blank_as_unset() {
        assert!(datetime_from_env_value(None, "X").unwrap().is_none());
        assert!(datetime_from_env_value(Some("  ".into()), "X")
            .unwrap()
            .is_none());
    }

    #[test]
    fn datetime_from_env_value_rejects_garbage() {
        let err = datetime_from_env_value(Some("yesterday".into()), "VS_STUDY_OPEN_DATETIME")
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::InvalidInput(msg) if msg.contains("VS_STUDY_OPEN_DATETIME")));
    }

    #[test]
    fn appointment_model_defaults_when_unset() {
        let label = appointment_model_from_env_value(None).unwrap();
        assert_eq!(label.as_str(), DEFAULT_APPOINTMENT_MODEL);

        let label = appointment_model_from_env_value(Some("Trial.Appointment".into())).unwrap();
        assert_eq!(label.as_str(), "trial.appointment");
    }

    #[test]
    fn core_config_rejects_close_before_open() {
        let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let close = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert!(CoreConfig::new(open, Some(close), None).is_err());
        assert!(CoreConfig::new(open, None, None).is_ok());
    }
}
