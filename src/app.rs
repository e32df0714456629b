use crate::analysis::{analyze, AnalysisOutcome, AnalysisRequest, CompletionService};
use crate::apps::insights::InsightsWorkspace;
use crate::apps::invoices::InvoicesWorkspace;
use crate::apps::messaging::MessagingWorkspace;
use crate::apps::recruitment::RecruitmentWorkspace;
use crate::apps::roadmap::RoadmapWorkspace;
use crate::apps::students::StudentsWorkspace;
use crate::apps::Workspace;
use crate::db::{KvStore, Persistence, SqliteKvStore};
use crate::errors::AppResult;
use crate::export::{parse_bundle, write_export};
use crate::models::{
    AppKind, ExportBundle, ExportFormat, ExportResponse, ImportSummary, Notice, NoticeLevel, StoreSettings,
    TransitionPolicy,
};
use crate::notices::Notices;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const DATABASE_FILE: &str = "dashboards.db";

/// Everything one dashboard session works with: settings, notices, and the
/// six workspaces over a single persistence adapter.
pub struct AppState {
    persistence: Persistence,
    settings: StoreSettings,
    notices: Notices,
    data_dir: PathBuf,
    pub recruitment: RecruitmentWorkspace,
    pub students: StudentsWorkspace,
    pub messaging: MessagingWorkspace,
    pub insights: InsightsWorkspace,
    pub roadmap: RoadmapWorkspace,
    pub invoices: InvoicesWorkspace,
}

impl AppState {
    /// Opens (or creates) the SQLite store under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let store = SqliteKvStore::open(&data_dir.join(DATABASE_FILE))?;
        Ok(Self::with_store(Arc::new(store), data_dir))
    }

    pub fn with_store(store: Arc<dyn KvStore>, data_dir: impl Into<PathBuf>) -> Self {
        let persistence = Persistence::new(store);
        let settings = persistence.get_settings();
        let state = Self {
            recruitment: RecruitmentWorkspace::open(&persistence, &settings),
            students: StudentsWorkspace::open(&persistence, &settings),
            messaging: MessagingWorkspace::open(&persistence, &settings),
            insights: InsightsWorkspace::open(&persistence, &settings),
            roadmap: RoadmapWorkspace::open(&persistence, &settings),
            invoices: InvoicesWorkspace::open(&persistence, &settings),
            persistence,
            settings,
            notices: Notices::new(),
            data_dir: data_dir.into(),
        };
        info!(data_dir = %state.data_dir.display(), "dashboard state ready");
        state
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        self.settings.transition_policy
    }

    pub fn update_settings(&mut self, patch: serde_json::Value) -> AppResult<StoreSettings> {
        let settings = self.persistence.update_settings(patch)?;
        self.students.set_at_risk_threshold(settings.at_risk_threshold);
        self.settings = settings.clone();
        Ok(settings)
    }

    pub fn notices(&self) -> &[Notice] {
        self.notices.list()
    }

    pub fn push_notice(&mut self, level: NoticeLevel, message: impl Into<String>) -> u64 {
        self.notices.push(level, message)
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    /// Export directory below the data dir. Only the last path component of
    /// the configured name is used.
    pub fn export_dir(&self) -> PathBuf {
        let name = Path::new(&self.settings.export_dir_name)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "exports".into());
        self.data_dir.join(name)
    }

    pub fn snapshot(&self, app: AppKind) -> AppResult<ExportBundle> {
        match app {
            AppKind::Recruitment => self.recruitment.snapshot(),
            AppKind::Students => self.students.snapshot(),
            AppKind::Messaging => self.messaging.snapshot(),
            AppKind::Insights => self.insights.snapshot(),
            AppKind::Roadmap => self.roadmap.snapshot(),
            AppKind::Invoices => self.invoices.snapshot(),
        }
    }

    pub fn export(&mut self, app: AppKind, format: ExportFormat) -> AppResult<ExportResponse> {
        let result = self
            .snapshot(app)
            .and_then(|bundle| write_export(&self.export_dir(), &bundle, format));
        match &result {
            Ok(response) => {
                self.notices.push(
                    NoticeLevel::Info,
                    format!("Exported {} ({} file(s))", app.as_str(), response.paths.len()),
                );
            }
            Err(error) => {
                self.notices
                    .push(NoticeLevel::Error, format!("Export of {} failed: {}", app.as_str(), error));
            }
        }
        result
    }

    /// Replaces the collections carried by `raw`. A document that fails to
    /// parse or validate leaves every collection untouched.
    pub fn import(&mut self, app: AppKind, raw: &str) -> AppResult<ImportSummary> {
        let result = parse_bundle(raw).and_then(|bundle| match app {
            AppKind::Recruitment => self.recruitment.restore(&bundle),
            AppKind::Students => self.students.restore(&bundle),
            AppKind::Messaging => self.messaging.restore(&bundle),
            AppKind::Insights => self.insights.restore(&bundle),
            AppKind::Roadmap => self.roadmap.restore(&bundle),
            AppKind::Invoices => self.invoices.restore(&bundle),
        });
        match &result {
            Ok(summary) => {
                let records: usize = summary.collections.values().sum();
                info!(app = app.as_str(), records, "import applied");
                self.notices
                    .push(NoticeLevel::Info, format!("Imported {} record(s) into {}", records, app.as_str()));
            }
            Err(error) => {
                self.notices
                    .push(NoticeLevel::Error, format!("Import into {} failed: {}", app.as_str(), error));
            }
        }
        result
    }

    /// Runs an analysis; a service failure also raises an error notice.
    pub fn run_analysis(
        &mut self,
        service: &dyn CompletionService,
        request: &AnalysisRequest,
    ) -> AppResult<AnalysisOutcome> {
        let result = analyze(service, request);
        if let Err(error) = &result {
            self.notices.push(NoticeLevel::Error, format!("Analysis failed: {}", error));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::AppState;
    use crate::analysis::{AnalysisRequest, CompletionService};
    use crate::db::MemoryKvStore;
    use crate::models::{AppKind, ExportFormat, NoticeLevel, TransitionPolicy};
    use serde_json::json;
    use std::sync::Arc;

    struct Offline;

    impl CompletionService for Offline {
        fn complete(&self, _request: &AnalysisRequest) -> anyhow::Result<String> {
            anyhow::bail!("service offline")
        }
    }

    #[test]
    fn settings_updates_flow_into_workspaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = AppState::with_store(Arc::new(MemoryKvStore::new()), dir.path());
        assert_eq!(state.transition_policy(), TransitionPolicy::Unrestricted);

        let before = state.students.at_risk_students().len();
        state
            .update_settings(json!({ "transitionPolicy": "enforced", "atRiskThreshold": 100.0 }))
            .expect("settings");
        assert_eq!(state.transition_policy(), TransitionPolicy::Enforced);
        assert!(state.students.at_risk_students().len() >= before);
        assert_eq!(state.students.at_risk_students().len(), state.students.students().len());
    }

    #[test]
    fn export_dir_ignores_parent_components() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = AppState::with_store(Arc::new(MemoryKvStore::new()), dir.path());
        state
            .update_settings(json!({ "exportDirName": "../../escape" }))
            .expect("settings");
        assert_eq!(state.export_dir(), dir.path().join("escape"));

        let response = state.export(AppKind::Roadmap, ExportFormat::Csv).expect("export");
        assert_eq!(response.paths.len(), 5);
        assert_eq!(state.notices().last().map(|notice| notice.level), Some(NoticeLevel::Info));
    }

    #[test]
    fn failed_analysis_raises_dismissible_notice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = AppState::with_store(Arc::new(MemoryKvStore::new()), dir.path());
        let request = AnalysisRequest::new("Summarize the pipeline");
        assert!(state.run_analysis(&Offline, &request).is_err());

        let notice = state.notices().last().cloned().expect("notice");
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("service offline"));
        assert!(state.dismiss_notice(notice.id));
        assert!(state.notices().is_empty());
    }

    #[test]
    fn bad_import_reports_notice_and_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = AppState::with_store(Arc::new(MemoryKvStore::new()), dir.path());
        let jobs = state.recruitment.jobs().len();
        assert!(state.import(AppKind::Recruitment, "not json").is_err());
        assert_eq!(state.recruitment.jobs().len(), jobs);
        assert_eq!(state.notices().len(), 1);
    }
}
