//! Constants used throughout the visit schedule core crate.

/// Appointment model used when a schedule does not declare one.
pub const DEFAULT_APPOINTMENT_MODEL: &str = "edc_appointment.appointment";

/// Environment variable naming the protocol definition file.
pub const PROTOCOL_FILE_ENV: &str = "VS_PROTOCOL_FILE";

/// Environment variable holding the study open datetime (RFC 3339 or `YYYY-MM-DD`).
pub const STUDY_OPEN_DATETIME_ENV: &str = "VS_STUDY_OPEN_DATETIME";

/// Environment variable holding the optional study close datetime.
pub const STUDY_CLOSE_DATETIME_ENV: &str = "VS_STUDY_CLOSE_DATETIME";

/// Environment variable overriding [`DEFAULT_APPOINTMENT_MODEL`].
pub const DEFAULT_APPOINTMENT_MODEL_ENV: &str = "VS_DEFAULT_APPOINTMENT_MODEL";
