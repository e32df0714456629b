use crate::collection::{ensure_unique_ids, Collection, Entity};
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, ExportFormat, ExportResponse, ImportSummary};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ARRAY_DELIMITER: &str = ";";

static NEEDS_QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[",\r\n]"#).expect("valid csv quoting regex"));

impl ExportBundle {
    pub fn new(app: AppKind) -> Self {
        Self {
            app: app.as_str().to_string(),
            exported_at: Utc::now(),
            collections: Default::default(),
        }
    }

    pub fn insert<T: Entity>(&mut self, name: &str, collection: &Collection<T>) -> AppResult<()> {
        let records = collection
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.collections.insert(name.to_string(), records);
        Ok(())
    }

    /// Decodes one collection. `Ok(None)` when the bundle does not carry it.
    pub fn decode<T: Entity>(&self, name: &str) -> AppResult<Option<Vec<T>>> {
        let Some(values) = self.collections.get(name) else {
            return Ok(None);
        };
        let mut records = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            let record: T = serde_json::from_value(value.clone()).map_err(|error| {
                AppError::InvalidImport(format!("{} record {}: {}", name, index, error))
            })?;
            record.validate().map_err(|errors| {
                AppError::InvalidImport(format!("{} record {}: {}", name, index, errors))
            })?;
            records.push(record);
        }
        ensure_unique_ids(name, &records)?;
        Ok(Some(records))
    }

    pub fn expect_app(&self, app: AppKind) -> AppResult<()> {
        if self.app != app.as_str() {
            return Err(AppError::InvalidImport(format!(
                "bundle is for {} not {}",
                self.app,
                app.as_str()
            )));
        }
        Ok(())
    }
}

impl ImportSummary {
    pub fn new(app: AppKind) -> Self {
        Self {
            app: app.as_str().to_string(),
            collections: Default::default(),
        }
    }

    pub fn record(&mut self, name: &str, count: usize) {
        self.collections.insert(name.to_string(), count);
    }
}

pub fn parse_bundle(raw: &str) -> AppResult<ExportBundle> {
    serde_json::from_str::<ExportBundle>(raw)
        .map_err(|error| AppError::InvalidImport(format!("not a valid export document: {}", error)))
}

/// Writes `bundle` below `export_dir`: a single JSON document, or one CSV file
/// per collection.
pub fn write_export(export_dir: &Path, bundle: &ExportBundle, format: ExportFormat) -> AppResult<ExportResponse> {
    fs::create_dir_all(export_dir).map_err(|error| AppError::Io(error.to_string()))?;
    let stamp = bundle.exported_at.format("%Y%m%dT%H%M%SZ").to_string();
    let app = sanitize_filename_component(&bundle.app);

    let mut paths = Vec::new();
    match format {
        ExportFormat::Json => {
            let path = confined_path(export_dir, &format!("{}-{}.json", app, stamp))?;
            fs::write(&path, serde_json::to_string_pretty(bundle)?)
                .map_err(|error| AppError::Io(error.to_string()))?;
            paths.push(path);
        }
        ExportFormat::Csv => {
            for (name, records) in &bundle.collections {
                let file_name = format!("{}-{}-{}.csv", app, sanitize_filename_component(name), stamp);
                let path = confined_path(export_dir, &file_name)?;
                fs::write(&path, render_csv(records)).map_err(|error| AppError::Io(error.to_string()))?;
                paths.push(path);
            }
        }
    }

    debug!(app = %bundle.app, files = paths.len(), "export written");
    Ok(ExportResponse {
        paths: paths
            .into_iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect(),
    })
}

/// Header is the union of field names in first-seen order.
pub fn render_csv(records: &[Value]) -> String {
    let mut header: Vec<&str> = Vec::new();
    for record in records {
        if let Value::Object(fields) = record {
            for key in fields.keys() {
                if !header.contains(&key.as_str()) {
                    header.push(key.as_str());
                }
            }
        }
    }

    let mut out = String::new();
    out.push_str(
        &header
            .iter()
            .map(|name| quote_if_needed(name))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');
    for record in records {
        let row = header
            .iter()
            .map(|name| csv_cell(record.get(*name).unwrap_or(&Value::Null)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&row);
        out.push('\n');
    }
    out
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote_if_needed(text),
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(text) => escape_array_item(text),
                    other => escape_array_item(&other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(ARRAY_DELIMITER);
            quote_if_needed(&joined)
        }
        Value::Object(_) => quote_if_needed(&value.to_string()),
    }
}

/// Backslash-escapes backslashes and the array delimiter so `["a;b"]` and
/// `["a", "b"]` stay distinguishable in a cell.
fn escape_array_item(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(ARRAY_DELIMITER, &format!("\\{ARRAY_DELIMITER}"))
}

fn quote_if_needed(text: &str) -> String {
    if NEEDS_QUOTES.is_match(text) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn confined_path(export_dir: &Path, file_name: &str) -> AppResult<PathBuf> {
    let path = export_dir.join(file_name);
    if !path.starts_with(export_dir) {
        return Err(AppError::Io("Resolved export path escaped export directory".to_string()));
    }
    Ok(path)
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let candidate: String = out.trim_matches('_').chars().take(120).collect();
    if candidate.is_empty() {
        "export".to_string()
    } else {
        candidate
    }
}
