//! Hand-off to an external completion service and interpretation of what it
//! sends back. The service is a trait so the host can plug in any backend and
//! tests can use a canned one.

use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").expect("valid fenced block regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub prompt: String,
    pub attachment: Option<Attachment>,
    /// JSON Schema a structured answer has to satisfy.
    pub schema: Option<Value>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            attachment: None,
            schema: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum AnalysisOutcome {
    Structured(Map<String, Value>),
    FreeText(String),
    ParseFailed { raw: String, errors: Vec<String> },
}

impl AnalysisOutcome {
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

pub trait CompletionService {
    fn complete(&self, request: &AnalysisRequest) -> anyhow::Result<String>;
}

/// Sends the request and interprets the reply. A failing service is reported
/// as [`AppError::ExternalService`].
pub fn analyze(service: &dyn CompletionService, request: &AnalysisRequest) -> AppResult<AnalysisOutcome> {
    info!(request_id = %request.id, attachment = request.attachment.is_some(), "analysis requested");
    let raw = service.complete(request).map_err(|error| {
        warn!(request_id = %request.id, error = %error, "completion service failed");
        AppError::ExternalService(format!("analysis {} failed: {:#}", request.id, error))
    })?;
    let outcome = interpret(&raw, request.schema.as_ref());
    if let AnalysisOutcome::ParseFailed { errors, .. } = &outcome {
        warn!(request_id = %request.id, errors = errors.len(), "analysis reply was not usable JSON");
    }
    Ok(outcome)
}

/// Classifies a reply. A JSON object, bare or in a fenced block, is
/// structured; JSON-looking text that does not parse or fails `schema` is a
/// parse failure; anything else is free text.
pub fn interpret(raw: &str, schema: Option<&Value>) -> AnalysisOutcome {
    let Some(candidate) = json_candidate(raw) else {
        return AnalysisOutcome::FreeText(raw.trim().to_string());
    };

    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(error) => {
            return AnalysisOutcome::ParseFailed {
                raw: raw.to_string(),
                errors: vec![error.to_string()],
            }
        }
    };
    let Value::Object(map) = value else {
        return AnalysisOutcome::ParseFailed {
            raw: raw.to_string(),
            errors: vec!["expected a JSON object".to_string()],
        };
    };

    if let Some(schema) = schema {
        let errors = schema_errors(schema, &Value::Object(map.clone()));
        if !errors.is_empty() {
            return AnalysisOutcome::ParseFailed {
                raw: raw.to_string(),
                errors,
            };
        }
    }
    AnalysisOutcome::Structured(map)
}

fn json_candidate(raw: &str) -> Option<&str> {
    if let Some(captures) = FENCED_JSON.captures(raw) {
        return captures.get(1).map(|inner| inner.as_str().trim());
    }
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Some(trimmed)
    } else {
        None
    }
}

/// Schema violations as `path: message` lines. An unusable schema is
/// reported as a single error.
pub fn schema_errors(schema: &Value, value: &Value) -> Vec<String> {
    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(error) => return vec![format!("invalid schema: {}", error)],
    };
    compiled
        .validate(value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}
