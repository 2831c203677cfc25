//! Symptom log payload carried inside [`Entry::payload`](super::entry::Entry).
//!
//! The sync engine never reads these fields. They exist so that callers
//! (CLI, export) encode one stable JSON shape.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Highest accepted severity score.
pub const SEVERITY_MAX: u8 = 10;

/// Where on the body a symptom was felt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyLocation {
    pub surface: BodySurface,
    pub side: BodySide,
    /// Normalized horizontal position on the body map, `0.0..=1.0`.
    pub x: f64,
    /// Normalized vertical position on the body map, `0.0..=1.0`.
    pub y: f64,
    pub region_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySurface {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySide {
    Left,
    Right,
    Center,
}

/// Lifestyle context recorded next to a symptom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SymptomContext {
    pub sleep_hours: Option<f64>,
    pub hydration_liters: Option<f64>,
    pub caffeine_mg: Option<u32>,
    pub alcohol_units: Option<u32>,
    pub meds_taken: Vec<String>,
}

/// Application payload for one symptom log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomLog {
    pub symptom_type: String,
    #[serde(default)]
    pub symptom_name_override: Option<String>,
    #[serde(default)]
    pub body_location: Option<BodyLocation>,
    pub severity: u8,
    /// Epoch milliseconds.
    #[serde(default)]
    pub onset: Option<i64>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub qualities: Vec<String>,
    #[serde(default)]
    pub associated_symptoms: Vec<String>,
    #[serde(default)]
    pub possible_triggers: Vec<String>,
    #[serde(default)]
    pub context: SymptomContext,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymptomValidationError {
    EmptySymptomType,
    SeverityOutOfRange(u8),
}

impl Display for SymptomValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySymptomType => write!(f, "symptom type must not be blank"),
            Self::SeverityOutOfRange(value) => {
                write!(f, "severity {value} is outside 0..={SEVERITY_MAX}")
            }
        }
    }
}

impl Error for SymptomValidationError {}

impl SymptomLog {
    pub fn new(symptom_type: impl Into<String>, severity: u8) -> Self {
        Self {
            symptom_type: symptom_type.into(),
            symptom_name_override: None,
            body_location: None,
            severity,
            onset: None,
            duration_minutes: None,
            qualities: Vec::new(),
            associated_symptoms: Vec::new(),
            possible_triggers: Vec::new(),
            context: SymptomContext::default(),
            notes: String::new(),
            attachment_ids: Vec::new(),
            red_flags: Vec::new(),
        }
    }

    /// Name shown to the user: the override when set, otherwise the type.
    pub fn display_name(&self) -> &str {
        self.symptom_name_override
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.symptom_type.as_str())
    }

    pub fn validate(&self) -> Result<(), SymptomValidationError> {
        if self.symptom_type.trim().is_empty() {
            return Err(SymptomValidationError::EmptySymptomType);
        }
        if self.severity > SEVERITY_MAX {
            return Err(SymptomValidationError::SeverityOutOfRange(self.severity));
        }
        Ok(())
    }
}
