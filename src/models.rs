use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Inline form errors collected while validating a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Records a "required" error when `value` is empty after trimming.
    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        }
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.push(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> Vec<&str> {
        self.0.iter().map(|error| error.field.as_str()).collect()
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|error| format!("{} {}", error.field, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionPolicy {
    #[default]
    Unrestricted,
    Enforced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub transition_policy: TransitionPolicy,
    pub seed_sample_data: bool,
    pub at_risk_threshold: f64,
    pub export_dir_name: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            transition_policy: TransitionPolicy::Unrestricted,
            seed_sample_data: true,
            at_risk_threshold: 60.0,
            export_dir_name: "exports".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    Recruitment,
    Students,
    Messaging,
    Insights,
    Roadmap,
    Invoices,
}

impl AppKind {
    pub const ALL: [AppKind; 6] = [
        Self::Recruitment,
        Self::Students,
        Self::Messaging,
        Self::Insights,
        Self::Roadmap,
        Self::Invoices,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recruitment => "recruitment",
            Self::Students => "students",
            Self::Messaging => "messaging",
            Self::Insights => "insights",
            Self::Roadmap => "roadmap",
            Self::Invoices => "invoices",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Snapshot of one app's collections as written by export and read by import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub app: String,
    pub exported_at: DateTime<Utc>,
    pub collections: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub app: String,
    pub collections: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{FieldErrors, StoreSettings, TransitionPolicy};

    #[test]
    fn field_errors_collect_required_fields() {
        let mut errors = FieldErrors::new();
        errors.require("title", "  ");
        errors.require("department", "Engineering");
        errors.check(false, "openings", "must be at least 1");
        assert_eq!(errors.fields(), vec!["title", "openings"]);
        assert_eq!(errors.to_string(), "title is required; openings must be at least 1");
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: StoreSettings =
            serde_json::from_value(serde_json::json!({ "transitionPolicy": "enforced" })).expect("settings");
        assert_eq!(settings.transition_policy, TransitionPolicy::Enforced);
        assert!(settings.seed_sample_data);
        assert_eq!(settings.export_dir_name, "exports");
    }
}
