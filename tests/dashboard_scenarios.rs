use admin_dashboards_lib::analysis::{AnalysisOutcome, AnalysisRequest, CompletionService};
use admin_dashboards_lib::apps::insights::ConsumerSegment;
use admin_dashboards_lib::apps::recruitment::{ApplicationDraft, JobDraft, UNKNOWN_JOB};
use admin_dashboards_lib::apps::students::StudentDraft;
use admin_dashboards_lib::{AppError, AppKind, AppState, ExportFormat, MemoryKvStore, Persistence};
use serde_json::json;
use std::sync::Arc;

struct ProfileWriter;

impl CompletionService for ProfileWriter {
    fn complete(&self, request: &AnalysisRequest) -> anyhow::Result<String> {
        assert!(request.prompt.contains("persona"));
        Ok("```json\n{\"name\": \"Remote worker\", \"segment\": \"premium\", \"interests\": [\"travel\"]}\n```".into())
    }
}

#[test]
fn deleted_job_reads_as_unknown_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");

    let job = state
        .recruitment
        .create_job(JobDraft::new("Platform Engineer", "Engineering"))
        .expect("job");
    let application = state
        .recruitment
        .create_application(ApplicationDraft::new(&job.id, "Ada Lovelace", "ada@example.com"))
        .expect("application");

    assert!(state.recruitment.delete_job(&job.id));
    assert_eq!(state.recruitment.job_title_for(&application), UNKNOWN_JOB);
    assert!(state.recruitment.applications().contains(&application.id));
}

#[test]
fn math_average_of_three_students_is_eighty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryKvStore::new());
    Persistence::new(store.clone())
        .update_settings(json!({ "seedSampleData": false }))
        .expect("settings");
    let mut state = AppState::with_store(store, dir.path());
    assert!(state.students.students().is_empty());

    for (name, score) in [("Kim", 70.0), ("Lee", 80.0), ("Noor", 90.0)] {
        state
            .students
            .create_student(StudentDraft::new(name, format!("{}@school.example", name.to_lowercase())).score("Math", score))
            .expect("student");
    }
    assert_eq!(state.students.students().len(), 3);
    assert_eq!(state.students.subject_average("Math"), 80.0);
}

#[test]
fn sample_data_is_seeded_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = AppState::open(dir.path()).expect("first open");
    let jobs = first.recruitment.jobs().len();
    let invoices = first.invoices.invoices().len();
    assert!(jobs > 0);
    drop(first);

    let mut second = AppState::open(dir.path()).expect("second open");
    assert_eq!(second.recruitment.jobs().len(), jobs);
    assert_eq!(second.invoices.invoices().len(), invoices);

    let ids: Vec<String> = second.recruitment.jobs().iter().map(|job| job.id.clone()).collect();
    for id in &ids {
        assert!(second.recruitment.delete_job(id));
    }
    drop(second);

    let third = AppState::open(dir.path()).expect("third open");
    assert!(third.recruitment.jobs().is_empty());
}

#[test]
fn store_without_seeding_starts_empty_and_persists_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryKvStore::new());
    Persistence::new(store.clone())
        .update_settings(json!({ "seedSampleData": false }))
        .expect("settings");

    let mut state = AppState::with_store(store.clone(), dir.path());
    assert!(state.roadmap.stories().is_empty());
    assert!(state.recruitment.jobs().is_empty());
    state
        .recruitment
        .create_job(JobDraft::new("Analyst", "Finance"))
        .expect("job");
    drop(state);

    let reopened = AppState::with_store(store, dir.path());
    assert_eq!(reopened.recruitment.jobs().len(), 1);
    assert!(!reopened.settings().seed_sample_data);
}

#[test]
fn json_export_round_trips_through_import() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");
    let original = state.snapshot(AppKind::Invoices).expect("snapshot");

    let export = state.export(AppKind::Invoices, ExportFormat::Json).expect("export");
    assert_eq!(export.paths.len(), 1);
    let raw = std::fs::read_to_string(&export.paths[0]).expect("read export");

    for invoice in original.collections["invoices"].iter() {
        let id = invoice["id"].as_str().expect("id");
        state.invoices.delete_invoice(id);
    }
    assert!(state.invoices.invoices().is_empty());

    let summary = state.import(AppKind::Invoices, &raw).expect("import");
    assert_eq!(summary.collections["invoices"], original.collections["invoices"].len());
    let restored = state.snapshot(AppKind::Invoices).expect("snapshot");
    assert_eq!(restored.collections, original.collections);
}

#[test]
fn csv_export_writes_one_file_per_collection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");
    let export = state.export(AppKind::Messaging, ExportFormat::Csv).expect("export");
    assert_eq!(export.paths.len(), 3);
    let contacts = export
        .paths
        .iter()
        .find(|path| path.contains("contacts"))
        .expect("contacts csv");
    let csv = std::fs::read_to_string(contacts).expect("read csv");
    assert!(csv.lines().next().expect("header").contains("optedIn"));
    assert!(csv.contains("vip;lagos"));
}

#[test]
fn invalid_import_changes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");
    let before = state.snapshot(AppKind::Recruitment).expect("snapshot");

    let mut tampered = serde_json::to_value(&before).expect("bundle json");
    tampered["collections"]["jobs"] = json!([]);
    tampered["collections"]["applications"][0]["rating"] = json!("five");
    let error = state
        .import(AppKind::Recruitment, &tampered.to_string())
        .expect_err("invalid record");
    assert!(matches!(error, AppError::InvalidImport(_)));

    let wrong_app = state
        .import(AppKind::Students, &serde_json::to_string(&before).expect("json"))
        .expect_err("wrong app");
    assert!(matches!(wrong_app, AppError::InvalidImport(_)));

    let after = state.snapshot(AppKind::Recruitment).expect("snapshot");
    assert_eq!(after.collections, before.collections);
    assert_eq!(state.notices().len(), 2);
}

#[test]
fn structured_analysis_reply_becomes_a_profile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");
    let request = AnalysisRequest::new("Draft a customer persona for the travel segment");

    let outcome = state.run_analysis(&ProfileWriter, &request).expect("analysis");
    let AnalysisOutcome::Structured(fields) = outcome else {
        panic!("expected structured reply");
    };
    let profile = state
        .insights
        .create_profile_from_fields(fields)
        .expect("profile");
    assert_eq!(profile.segment, ConsumerSegment::Premium);
    assert!(state.insights.profiles().contains(&profile.id));
    assert!(state.notices().is_empty());
}

#[test]
fn enforced_policy_guards_status_patches_and_setters() {
    use admin_dashboards_lib::apps::recruitment::JobStatus;
    use admin_dashboards_lib::TransitionPolicy;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");
    state
        .update_settings(json!({ "transitionPolicy": "enforced" }))
        .expect("settings");
    let policy = state.transition_policy();
    assert_eq!(policy, TransitionPolicy::Enforced);

    let job = state
        .recruitment
        .create_job(JobDraft::new("Data Engineer", "Engineering"))
        .expect("job");
    let updated = state
        .recruitment
        .update_job(&job.id, json!({ "id": "job-hijack", "department": "Platform" }), policy)
        .expect("update");
    assert_eq!(updated.id, job.id);
    assert_eq!(updated.department, "Platform");

    let application = state
        .recruitment
        .create_application(ApplicationDraft::new(&job.id, "Ada Lovelace", "ada@example.com"))
        .expect("application");
    let skipped = state
        .recruitment
        .update_application(&application.id, json!({ "status": "hired" }), policy)
        .expect_err("new to hired");
    assert!(matches!(skipped, AppError::InvalidTransition { .. }));

    state
        .recruitment
        .set_job_status(&job.id, JobStatus::Closed, policy)
        .expect("open to closed");
    let blocked = state
        .recruitment
        .update_job(&job.id, json!({ "status": "on-hold" }), policy)
        .expect_err("closed to on-hold");
    assert!(matches!(blocked, AppError::InvalidTransition { .. }));
    let reopened = state
        .recruitment
        .set_job_status(&job.id, JobStatus::OnHold, TransitionPolicy::Unrestricted)
        .expect("unrestricted");
    assert_eq!(reopened.status, JobStatus::OnHold);
}

#[test]
fn schema_mismatch_is_reported_without_touching_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut state = AppState::open(dir.path()).expect("open state");
    let profiles = state.insights.profiles().len();
    let request = AnalysisRequest::new("Draft a customer persona").with_schema(json!({
        "type": "object",
        "required": ["name", "annualSpend"],
        "properties": { "annualSpend": { "type": "number" } }
    }));

    let outcome = state.run_analysis(&ProfileWriter, &request).expect("analysis");
    let AnalysisOutcome::ParseFailed { errors, .. } = outcome else {
        panic!("expected schema failure");
    };
    assert!(!errors.is_empty());
    assert_eq!(state.insights.profiles().len(), profiles);
}
