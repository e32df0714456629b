//! One workspace per dashboard app. A workspace owns its collections, seeds
//! sample data the first time it is opened, applies delete cascades, and
//! computes the app's derived metrics.

pub mod insights;
pub mod invoices;
pub mod messaging;
pub mod recruitment;
pub mod roadmap;
pub mod students;

use crate::errors::AppResult;
use crate::models::{AppKind, ExportBundle, ImportSummary};

pub trait Workspace {
    const APP: AppKind;

    fn snapshot(&self) -> AppResult<ExportBundle>;

    /// Replaces the collections present in `bundle`. Every collection is
    /// decoded and checked before any of them is written.
    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary>;
}

pub(crate) fn collection_key(app: AppKind, name: &str) -> String {
    format!("{}.{}", app.as_str(), name)
}

pub(crate) fn trimmed(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
