//! Local record store and derived metrics behind six admin dashboards:
//! recruitment, student progress, bulk messaging, consumer insights, agile
//! roadmap and invoicing.

pub mod aggregate;
pub mod analysis;
pub mod app;
pub mod apps;
pub mod collection;
pub mod db;
pub mod errors;
pub mod export;
pub mod ids;
pub mod models;
pub mod notices;
pub mod status;

pub use crate::app::AppState;
pub use crate::collection::{Collection, Draft, Entity};
pub use crate::db::{KvStore, MemoryKvStore, Persistence, SqliteKvStore};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{AppKind, ExportFormat, StoreSettings, TransitionPolicy};
pub use crate::status::{HasStatus, Lifecycle};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger under `<data_dir>/logs`. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboards.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

pub fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
