use crate::aggregate::{
    average, count_by_many, join_totals, percentage, CategoryCount, JoinBucket, JoinIndex,
};
use crate::apps::{collection_key, trimmed, Workspace};
use crate::collection::{Collection, Draft, Entity};
use crate::db::Persistence;
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, FieldErrors, ImportSummary, StoreSettings, TransitionPolicy};
use crate::status::{HasStatus, Lifecycle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const UNKNOWN_JOB: &str = "Unknown Job";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    #[default]
    Open,
    OnHold,
    Closed,
}

impl Lifecycle for JobStatus {
    const ALL: &'static [Self] = &[Self::Open, Self::OnHold, Self::Closed];

    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::OnHold => "on-hold",
            Self::Closed => "closed",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Open => &[Self::OnHold, Self::Closed],
            Self::OnHold => &[Self::Open, Self::Closed],
            Self::Closed => &[Self::Open],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmploymentType {
    #[default]
    FullTime,
    PartTime,
    Contract,
    Internship,
}

/// Candidate pipeline. Rejection is reachable from every active stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    #[default]
    New,
    Screening,
    Interview,
    Offer,
    Hired,
    Rejected,
}

impl Lifecycle for ApplicationStatus {
    const ALL: &'static [Self] = &[
        Self::New,
        Self::Screening,
        Self::Interview,
        Self::Offer,
        Self::Hired,
        Self::Rejected,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Screening => "screening",
            Self::Interview => "interview",
            Self::Offer => "offer",
            Self::Hired => "hired",
            Self::Rejected => "rejected",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::New => &[Self::Screening, Self::Rejected],
            Self::Screening => &[Self::Interview, Self::Rejected],
            Self::Interview => &[Self::Offer, Self::Rejected],
            Self::Offer => &[Self::Hired, Self::Rejected],
            Self::Hired | Self::Rejected => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentKind {
    #[default]
    Technical,
    Behavioral,
    Cultural,
    TakeHome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub title: String,
    pub department: String,
    pub location: String,
    pub employment_type: EmploymentType,
    pub openings: u32,
    pub description: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub title: String,
    pub department: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub employment_type: EmploymentType,
    #[serde(default = "default_openings")]
    pub openings: u32,
    #[serde(default)]
    pub description: String,
}

fn default_openings() -> u32 {
    1
}

impl JobDraft {
    pub fn new(title: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            department: department.into(),
            location: String::new(),
            employment_type: EmploymentType::default(),
            openings: default_openings(),
            description: String::new(),
        }
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn employment_type(mut self, employment_type: EmploymentType) -> Self {
        self.employment_type = employment_type;
        self
    }

    pub fn openings(mut self, openings: u32) -> Self {
        self.openings = openings;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Draft for JobDraft {
    type Output = Job;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Job {
        Job {
            id,
            title: self.title.trim().to_string(),
            department: self.department.trim().to_string(),
            location: self.location.trim().to_string(),
            employment_type: self.employment_type,
            openings: self.openings,
            description: self.description,
            status: JobStatus::Open,
            created_at,
        }
    }
}

impl Entity for Job {
    type Draft = JobDraft;
    const KIND: &'static str = "job";
    const ID_PREFIX: &'static str = "job";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("title", &self.title);
        errors.require("department", &self.department);
        errors.check(self.openings > 0, "openings", "must be at least 1");
        errors.into_result()
    }
}

impl HasStatus for Job {
    type Status = JobStatus;

    fn status(&self) -> JobStatus {
        self.status
    }

    fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub job_id: String,
    pub candidate_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub skills: Vec<String>,
    pub experience_years: f64,
    pub rating: Option<f64>,
    pub notes: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDraft {
    pub job_id: String,
    pub candidate_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience_years: f64,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

impl ApplicationDraft {
    pub fn new(job_id: impl Into<String>, candidate_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            candidate_name: candidate_name.into(),
            email: email.into(),
            phone: None,
            skills: Vec::new(),
            experience_years: 0.0,
            rating: None,
            notes: String::new(),
        }
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn experience_years(mut self, years: f64) -> Self {
        self.experience_years = years;
        self
    }

    pub fn rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

impl Draft for ApplicationDraft {
    type Output = Application;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Application {
        Application {
            id,
            job_id: self.job_id,
            candidate_name: self.candidate_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.filter(|phone| !phone.trim().is_empty()),
            skills: trimmed(self.skills),
            experience_years: self.experience_years,
            rating: self.rating,
            notes: self.notes,
            status: ApplicationStatus::New,
            created_at,
        }
    }
}

impl Entity for Application {
    type Draft = ApplicationDraft;
    const KIND: &'static str = "application";
    const ID_PREFIX: &'static str = "app";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("jobId", &self.job_id);
        errors.require("candidateName", &self.candidate_name);
        errors.require("email", &self.email);
        errors.check(self.experience_years >= 0.0, "experienceYears", "must not be negative");
        if let Some(rating) = self.rating {
            errors.check((0.0..=5.0).contains(&rating), "rating", "must be between 0 and 5");
        }
        errors.into_result()
    }
}

impl HasStatus for Application {
    type Status = ApplicationStatus;

    fn status(&self) -> ApplicationStatus {
        self.status
    }

    fn set_status(&mut self, status: ApplicationStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub application_id: String,
    pub kind: AssessmentKind,
    pub score: f64,
    pub max_score: f64,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Assessment {
    pub fn percent(&self) -> f64 {
        if self.max_score <= 0.0 {
            0.0
        } else {
            self.score / self.max_score * 100.0
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentDraft {
    pub application_id: String,
    #[serde(default)]
    pub kind: AssessmentKind,
    pub score: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default)]
    pub notes: String,
}

fn default_max_score() -> f64 {
    100.0
}

impl AssessmentDraft {
    pub fn new(application_id: impl Into<String>, kind: AssessmentKind, score: f64) -> Self {
        Self {
            application_id: application_id.into(),
            kind,
            score,
            max_score: default_max_score(),
            notes: String::new(),
        }
    }

    pub fn max_score(mut self, max_score: f64) -> Self {
        self.max_score = max_score;
        self
    }
}

impl Draft for AssessmentDraft {
    type Output = Assessment;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Assessment {
        Assessment {
            id,
            application_id: self.application_id,
            kind: self.kind,
            score: self.score,
            max_score: self.max_score,
            notes: self.notes,
            created_at,
        }
    }
}

impl Entity for Assessment {
    type Draft = AssessmentDraft;
    const KIND: &'static str = "assessment";
    const ID_PREFIX: &'static str = "assess";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("applicationId", &self.application_id);
        errors.check(self.max_score > 0.0, "maxScore", "must be positive");
        errors.check(
            self.score >= 0.0 && self.score <= self.max_score,
            "score",
            "must be between 0 and maxScore",
        );
        errors.into_result()
    }
}

/// An application joined with its job for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    pub application: Application,
    pub job_title: String,
    pub assessment_average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecruitmentSummary {
    pub total_jobs: usize,
    pub open_jobs: usize,
    pub total_openings: u32,
    pub total_applications: usize,
    pub average_rating: f64,
    pub hire_rate: f64,
    pub pipeline: Vec<CategoryCount<ApplicationStatus>>,
    pub applications_per_job: Vec<JoinBucket>,
}

pub struct RecruitmentWorkspace {
    jobs: Collection<Job>,
    applications: Collection<Application>,
    assessments: Collection<Assessment>,
}

impl RecruitmentWorkspace {
    pub fn open(persistence: &Persistence, settings: &StoreSettings) -> Self {
        let mut workspace = Self {
            jobs: Collection::open(persistence.clone(), collection_key(Self::APP, "jobs")),
            applications: Collection::open(persistence.clone(), collection_key(Self::APP, "applications")),
            assessments: Collection::open(persistence.clone(), collection_key(Self::APP, "assessments")),
        };
        if workspace.jobs.is_fresh() && workspace.applications.is_fresh() && workspace.assessments.is_fresh() {
            if settings.seed_sample_data {
                if let Err(error) = workspace.seed_sample_data() {
                    warn!(error = %error, "recruitment sample data could not be seeded");
                }
            }
            workspace.jobs.persist();
            workspace.applications.persist();
            workspace.assessments.persist();
        }
        workspace
    }

    pub fn jobs(&self) -> &Collection<Job> {
        &self.jobs
    }

    pub fn applications(&self) -> &Collection<Application> {
        &self.applications
    }

    pub fn assessments(&self) -> &Collection<Assessment> {
        &self.assessments
    }

    pub fn create_job(&mut self, draft: JobDraft) -> AppResult<Job> {
        self.jobs.create(draft)
    }

    /// A `status` in the patch must be a transition `policy` allows.
    pub fn update_job(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Job> {
        self.jobs.update_with_policy(id, patch, policy)
    }

    pub fn set_job_status(&mut self, id: &str, status: JobStatus, policy: TransitionPolicy) -> AppResult<Job> {
        self.jobs.set_status(id, status, policy)
    }

    /// Applications for a deleted job are kept; their job resolves to
    /// [`UNKNOWN_JOB`].
    pub fn delete_job(&mut self, id: &str) -> bool {
        self.jobs.delete(id)
    }

    pub fn create_application(&mut self, draft: ApplicationDraft) -> AppResult<Application> {
        if !draft.job_id.trim().is_empty() && !self.jobs.contains(&draft.job_id) {
            let mut errors = FieldErrors::new();
            errors.push("jobId", "does not match an existing job");
            return Err(AppError::Validation(errors));
        }
        self.applications.create(draft)
    }

    pub fn update_application(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Application> {
        self.applications.update_with_policy(id, patch, policy)
    }

    pub fn set_application_status(
        &mut self,
        id: &str,
        status: ApplicationStatus,
        policy: TransitionPolicy,
    ) -> AppResult<Application> {
        self.applications.set_status(id, status, policy)
    }

    /// Removes the application together with its assessments.
    pub fn delete_application(&mut self, id: &str) -> bool {
        let removed = self.applications.delete(id);
        if removed {
            let orphans = self.assessments.delete_where(|assessment| assessment.application_id == id);
            debug!(%id, assessments = orphans.len(), "application deleted");
        }
        removed
    }

    pub fn create_assessment(&mut self, draft: AssessmentDraft) -> AppResult<Assessment> {
        if !self.applications.contains(&draft.application_id) {
            let mut errors = FieldErrors::new();
            errors.push("applicationId", "does not match an existing application");
            return Err(AppError::Validation(errors));
        }
        self.assessments.create(draft)
    }

    pub fn delete_assessment(&mut self, id: &str) -> bool {
        self.assessments.delete(id)
    }

    pub fn job_title_for(&self, application: &Application) -> String {
        JoinIndex::new(self.jobs.records()).label(
            Some(application.job_id.as_str()),
            |job| job.title.clone(),
            UNKNOWN_JOB,
        )
    }

    pub fn application_views(&self) -> Vec<ApplicationView> {
        let jobs = JoinIndex::new(self.jobs.records());
        self.applications
            .iter()
            .map(|application| ApplicationView {
                application: application.clone(),
                job_title: jobs.label(Some(application.job_id.as_str()), |job| job.title.clone(), UNKNOWN_JOB),
                assessment_average: self.assessment_average(&application.id),
            })
            .collect()
    }

    pub fn applications_for_job(&self, job_id: &str) -> Vec<&Application> {
        self.applications.filter(|application| application.job_id == job_id)
    }

    pub fn pipeline_counts(&self) -> Vec<CategoryCount<ApplicationStatus>> {
        self.applications.status_counts()
    }

    pub fn applications_per_job(&self) -> Vec<JoinBucket> {
        join_totals(
            self.applications.records(),
            |application| Some(application.job_id.as_str()),
            |_| 1.0,
            self.jobs.records(),
            |job| job.title.clone(),
            UNKNOWN_JOB,
        )
    }

    /// Mean rating over rated applications.
    pub fn average_rating(&self) -> f64 {
        average(self.applications.iter().filter_map(|application| application.rating))
    }

    pub fn hire_rate(&self) -> f64 {
        let hired = self
            .applications
            .filter(|application| application.status == ApplicationStatus::Hired)
            .len();
        percentage(hired, self.applications.len())
    }

    /// Mean assessment percentage for one application; `None` when it has not
    /// been assessed.
    pub fn assessment_average(&self, application_id: &str) -> Option<f64> {
        let scores: Vec<f64> = self
            .assessments
            .iter()
            .filter(|assessment| assessment.application_id == application_id)
            .map(Assessment::percent)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(average(scores))
        }
    }

    pub fn top_skills(&self, limit: usize) -> Vec<(String, usize)> {
        let counts = count_by_many(self.applications.records(), |application| {
            application
                .skills
                .iter()
                .map(|skill| skill.to_lowercase())
                .collect()
        });
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        ranked.truncate(limit);
        ranked
    }

    pub fn summary(&self) -> RecruitmentSummary {
        RecruitmentSummary {
            total_jobs: self.jobs.len(),
            open_jobs: self.jobs.filter(|job| job.status == JobStatus::Open).len(),
            total_openings: self
                .jobs
                .iter()
                .filter(|job| job.status == JobStatus::Open)
                .map(|job| job.openings)
                .sum(),
            total_applications: self.applications.len(),
            average_rating: self.average_rating(),
            hire_rate: self.hire_rate(),
            pipeline: self.pipeline_counts(),
            applications_per_job: self.applications_per_job(),
        }
    }

    fn seed_sample_data(&mut self) -> AppResult<()> {
        let backend = self.jobs.create(
            JobDraft::new("Senior Backend Engineer", "Engineering")
                .location("Remote")
                .openings(2)
                .description("Own the billing and ledger services."),
        )?;
        let designer = self.jobs.create(
            JobDraft::new("Product Designer", "Design")
                .location("Berlin")
                .employment_type(EmploymentType::Contract),
        )?;
        self.jobs.create(JobDraft::new("Support Specialist", "Customer Success").location("Austin"))?;

        let first = self.applications.create(
            ApplicationDraft::new(&backend.id, "Amara Okafor", "amara@example.com")
                .skills(["Rust", "PostgreSQL", "Kafka"])
                .experience_years(7.0)
                .rating(4.5),
        )?;
        self.applications.create(
            ApplicationDraft::new(&backend.id, "Luis Ortega", "luis@example.com")
                .skills(["Go", "PostgreSQL"])
                .experience_years(4.0)
                .rating(3.5),
        )?;
        let third = self.applications.create(
            ApplicationDraft::new(&designer.id, "Mei Tanaka", "mei@example.com")
                .skills(["Figma", "Prototyping"])
                .experience_years(5.0)
                .rating(4.0),
        )?;
        self.applications
            .set_status(&first.id, ApplicationStatus::Interview, TransitionPolicy::Unrestricted)?;
        self.applications
            .set_status(&third.id, ApplicationStatus::Offer, TransitionPolicy::Unrestricted)?;

        self.assessments
            .create(AssessmentDraft::new(&first.id, AssessmentKind::Technical, 88.0))?;
        self.assessments
            .create(AssessmentDraft::new(&first.id, AssessmentKind::Behavioral, 4.0).max_score(5.0))?;
        self.assessments
            .create(AssessmentDraft::new(&third.id, AssessmentKind::TakeHome, 92.0))?;
        debug!("recruitment sample data seeded");
        Ok(())
    }
}

impl Workspace for RecruitmentWorkspace {
    const APP: AppKind = AppKind::Recruitment;

    fn snapshot(&self) -> AppResult<ExportBundle> {
        let mut bundle = ExportBundle::new(Self::APP);
        bundle.insert("jobs", &self.jobs)?;
        bundle.insert("applications", &self.applications)?;
        bundle.insert("assessments", &self.assessments)?;
        Ok(bundle)
    }

    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary> {
        bundle.expect_app(Self::APP)?;
        let jobs = bundle.decode::<Job>("jobs")?;
        let applications = bundle.decode::<Application>("applications")?;
        let assessments = bundle.decode::<Assessment>("assessments")?;

        let mut summary = ImportSummary::new(Self::APP);
        if let Some(records) = jobs {
            summary.record("jobs", records.len());
            self.jobs.replace_all(records)?;
        }
        if let Some(records) = applications {
            summary.record("applications", records.len());
            self.applications.replace_all(records)?;
        }
        if let Some(records) = assessments {
            summary.record("assessments", records.len());
            self.assessments.replace_all(records)?;
        }
        Ok(summary)
    }
}
