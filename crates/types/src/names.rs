//! Names, visit codes and model labels.

use crate::TypeError;
use std::fmt;
use std::str::FromStr;

/// Implements string-backed serde, `Display`, `AsRef<str>` and `FromStr` for a
/// validated newtype whose constructor is `new(&str) -> Result<Self, TypeError>`.
macro_rules! string_newtype {
    ($ty:ident) => {
        impl $ty {
            /// Returns the validated value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $ty {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                // Only string input is accepted: a YAML/JSON number is a type error here.
                let s = String::deserialize(deserializer)?;
                $ty::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Name of a visit schedule or schedule.
///
/// Lower case letters, digits, `_` and `-` only; never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypeError> {
        let input = input.as_ref();
        let ok = !input.is_empty()
            && input
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'));
        if !ok {
            return Err(TypeError::InvalidName(input.to_owned()));
        }
        Ok(Self(input.to_owned()))
    }
}

string_newtype!(Name);

/// Code identifying a visit within a schedule, e.g. `1000` or `V1`.
///
/// Upper case letters and digits only. Codes must be supplied as strings; a
/// numeric value in a protocol file is rejected during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisitCode(String);

impl VisitCode {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypeError> {
        let input = input.as_ref();
        let ok = !input.is_empty()
            && input
                .bytes()
                .all(|b| matches!(b, b'A'..=b'Z' | b'0'..=b'9'));
        if !ok {
            return Err(TypeError::InvalidVisitCode(input.to_owned()));
        }
        Ok(Self(input.to_owned()))
    }
}

string_newtype!(VisitCode);

/// A persisted record type identifier of the form `app_label.model_name`.
///
/// Input is lower-cased before validation, so `App.OnSchedule` and
/// `app.onschedule` name the same model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelLabel(String);

impl ModelLabel {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypeError> {
        let raw = input.as_ref();
        let lowered = raw.trim().to_ascii_lowercase();

        let valid_part = |part: &str| {
            !part.is_empty()
                && part
                    .bytes()
                    .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_'))
        };

        match lowered.split_once('.') {
            Some((app_label, model_name))
                if valid_part(app_label) && valid_part(model_name) =>
            {
                Ok(Self(lowered))
            }
            _ => Err(TypeError::InvalidModelLabel(raw.to_owned())),
        }
    }

    /// The part before the dot.
    pub fn app_label(&self) -> &str {
        self.0.split_once('.').map(|(app, _)| app).unwrap_or_default()
    }

    /// The part after the dot.
    pub fn model_name(&self) -> &str {
        self.0
            .split_once('.')
            .map(|(_, model)| model)
            .unwrap_or_default()
    }
}

string_newtype!(ModelLabel);

/// A structured `visit_schedule_name.schedule_name` key.
///
/// Parsed once; the two halves are kept as separate validated [`Name`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleKey {
    visit_schedule_name: Name,
    schedule_name: Name,
}

impl ScheduleKey {
    pub fn new(visit_schedule_name: Name, schedule_name: Name) -> Self {
        Self {
            visit_schedule_name,
            schedule_name,
        }
    }

    /// Parses a dotted `visit_schedule_name.schedule_name` string.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let invalid = || TypeError::InvalidScheduleKey(input.to_owned());
        let (visit_schedule_name, schedule_name) = input.split_once('.').ok_or_else(invalid)?;
        if schedule_name.contains('.') {
            return Err(invalid());
        }
        Ok(Self {
            visit_schedule_name: Name::new(visit_schedule_name).map_err(|_| invalid())?,
            schedule_name: Name::new(schedule_name).map_err(|_| invalid())?,
        })
    }

    pub fn visit_schedule_name(&self) -> &Name {
        &self.visit_schedule_name
    }

    pub fn schedule_name(&self) -> &Name {
        &self.schedule_name
    }
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.visit_schedule_name, self.schedule_name)
    }
}

impl FromStr for ScheduleKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ScheduleKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ScheduleKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ScheduleKey::parse(&s).map_err(serde::de::Error::custom)
    }
}
