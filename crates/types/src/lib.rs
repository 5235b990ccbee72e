//! Validated identifier types shared by the visit schedule crates.
//!
//! Every type here is checked once at construction (or deserialization) and can
//! be relied upon afterwards without re-validation.

mod names;

pub use names::{ModelLabel, Name, ScheduleKey, VisitCode};

/// Errors that can occur when creating validated text types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// A visit schedule or schedule name outside `[a-z0-9_-]+`.
    #[error(
        "invalid name '{0}': may only contain numbers, lower case letters, '_' and '-'"
    )]
    InvalidName(String),
    /// A visit code outside `[A-Z0-9]+`.
    #[error("invalid visit code '{0}': may only contain upper case letters and numbers")]
    InvalidVisitCode(String),
    /// A model label that is not of the form `app_label.model_name`.
    #[error("invalid model label '{0}': expected 'app_label.model_name'")]
    InvalidModelLabel(String),
    /// A compound key that is not of the form `visit_schedule_name.schedule_name`.
    #[error("invalid schedule key '{0}': expected 'visit_schedule_name.schedule_name'")]
    InvalidScheduleKey(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypeError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypeError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}
