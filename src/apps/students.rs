use crate::aggregate::{
    average, count_by_categories, group_average, join_totals, percentage, CategoryCount, JoinBucket, JoinIndex,
};
use crate::apps::{collection_key, Workspace};
use crate::collection::{Collection, Draft, Entity};
use crate::db::Persistence;
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, FieldErrors, ImportSummary, StoreSettings, TransitionPolicy};
use crate::status::{check_transition, HasStatus, Lifecycle};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const UNKNOWN_STUDENT: &str = "Unknown Student";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StudentStatus {
    #[default]
    Active,
    OnLeave,
    Graduated,
    Withdrawn,
}

impl Lifecycle for StudentStatus {
    const ALL: &'static [Self] = &[Self::Active, Self::OnLeave, Self::Graduated, Self::Withdrawn];

    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OnLeave => "on-leave",
            Self::Graduated => "graduated",
            Self::Withdrawn => "withdrawn",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Active => &[Self::OnLeave, Self::Graduated, Self::Withdrawn],
            Self::OnLeave => &[Self::Active, Self::Withdrawn],
            Self::Graduated => &[],
            Self::Withdrawn => &[Self::Active],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentStatus {
    #[default]
    Assigned,
    Submitted,
    Late,
    Missing,
    Graded,
}

impl AssignmentStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Submitted | Self::Late | Self::Graded)
    }
}

impl Lifecycle for AssignmentStatus {
    const ALL: &'static [Self] = &[Self::Assigned, Self::Submitted, Self::Late, Self::Missing, Self::Graded];

    fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Submitted => "submitted",
            Self::Late => "late",
            Self::Missing => "missing",
            Self::Graded => "graded",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Assigned => &[Self::Submitted, Self::Late, Self::Missing],
            Self::Submitted => &[Self::Graded],
            Self::Late => &[Self::Graded],
            Self::Missing => &[Self::Submitted, Self::Late],
            Self::Graded => &[],
        }
    }
}

/// Letter grade buckets used by the distribution chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub const ALL: [Grade; 5] = [Grade::A, Grade::B, Grade::C, Grade::D, Grade::F];

    pub fn from_percent(percent: f64) -> Self {
        match percent {
            p if p >= 90.0 => Self::A,
            p if p >= 80.0 => Self::B,
            p if p >= 70.0 => Self::C,
            p if p >= 60.0 => Self::D,
            _ => Self::F,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    pub grade_level: String,
    /// Subject name to score out of 100.
    pub scores: BTreeMap<String, f64>,
    pub attendance_rate: f64,
    pub status: StudentStatus,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn average_score(&self) -> Option<f64> {
        if self.scores.is_empty() {
            None
        } else {
            Some(average(self.scores.values().copied()))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub grade_level: String,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default = "full_attendance")]
    pub attendance_rate: f64,
}

fn full_attendance() -> f64 {
    100.0
}

impl StudentDraft {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            grade_level: String::new(),
            scores: BTreeMap::new(),
            attendance_rate: full_attendance(),
        }
    }

    pub fn grade_level(mut self, grade_level: impl Into<String>) -> Self {
        self.grade_level = grade_level.into();
        self
    }

    pub fn score(mut self, subject: impl Into<String>, score: f64) -> Self {
        self.scores.insert(subject.into(), score);
        self
    }

    pub fn attendance_rate(mut self, rate: f64) -> Self {
        self.attendance_rate = rate;
        self
    }
}

impl Draft for StudentDraft {
    type Output = Student;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Student {
        Student {
            id,
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            grade_level: self.grade_level.trim().to_string(),
            scores: self
                .scores
                .into_iter()
                .map(|(subject, score)| (subject.trim().to_string(), score))
                .filter(|(subject, _)| !subject.is_empty())
                .collect(),
            attendance_rate: self.attendance_rate,
            status: StudentStatus::Active,
            created_at,
        }
    }
}

impl Entity for Student {
    type Draft = StudentDraft;
    const KIND: &'static str = "student";
    const ID_PREFIX: &'static str = "student";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.require("email", &self.email);
        errors.check(
            (0.0..=100.0).contains(&self.attendance_rate),
            "attendanceRate",
            "must be between 0 and 100",
        );
        for (subject, score) in &self.scores {
            if !(0.0..=100.0).contains(score) {
                errors.push("scores", format!("{subject} must be between 0 and 100"));
            }
        }
        errors.into_result()
    }
}

impl HasStatus for Student {
    type Status = StudentStatus;

    fn status(&self) -> StudentStatus {
        self.status
    }

    fn set_status(&mut self, status: StudentStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub student_id: String,
    pub subject: String,
    pub title: String,
    pub score: Option<f64>,
    pub max_score: f64,
    pub due_date: Option<NaiveDate>,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn percent(&self) -> Option<f64> {
        match self.score {
            Some(score) if self.max_score > 0.0 => Some(score / self.max_score * 100.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDraft {
    pub student_id: String,
    pub subject: String,
    pub title: String,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

fn default_max_score() -> f64 {
    100.0
}

impl AssignmentDraft {
    pub fn new(student_id: impl Into<String>, subject: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            subject: subject.into(),
            title: title.into(),
            max_score: default_max_score(),
            due_date: None,
        }
    }

    pub fn max_score(mut self, max_score: f64) -> Self {
        self.max_score = max_score;
        self
    }

    pub fn due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

impl Draft for AssignmentDraft {
    type Output = Assignment;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Assignment {
        Assignment {
            id,
            student_id: self.student_id,
            subject: self.subject.trim().to_string(),
            title: self.title.trim().to_string(),
            score: None,
            max_score: self.max_score,
            due_date: self.due_date,
            status: AssignmentStatus::Assigned,
            created_at,
        }
    }
}

impl Entity for Assignment {
    type Draft = AssignmentDraft;
    const KIND: &'static str = "assignment";
    const ID_PREFIX: &'static str = "assignment";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("studentId", &self.student_id);
        errors.require("subject", &self.subject);
        errors.require("title", &self.title);
        errors.check(self.max_score > 0.0, "maxScore", "must be positive");
        if let Some(score) = self.score {
            errors.check(
                score >= 0.0 && score <= self.max_score,
                "score",
                "must be between 0 and maxScore",
            );
        }
        errors.into_result()
    }
}

impl HasStatus for Assignment {
    type Status = AssignmentStatus;

    fn status(&self) -> AssignmentStatus {
        self.status
    }

    fn set_status(&mut self, status: AssignmentStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: String,
    pub name: String,
    pub average_score: Option<f64>,
    pub grade: Option<Grade>,
    pub completed_assignments: usize,
    pub total_assignments: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub total_students: usize,
    pub active_students: usize,
    pub class_average: f64,
    pub average_attendance: f64,
    pub completion_rate: f64,
    pub subject_averages: BTreeMap<String, f64>,
    pub grade_distribution: Vec<CategoryCount<Grade>>,
    pub at_risk: usize,
}

pub struct StudentsWorkspace {
    students: Collection<Student>,
    assignments: Collection<Assignment>,
    at_risk_threshold: f64,
}

impl StudentsWorkspace {
    pub fn open(persistence: &Persistence, settings: &StoreSettings) -> Self {
        let mut workspace = Self {
            students: Collection::open(persistence.clone(), collection_key(Self::APP, "students")),
            assignments: Collection::open(persistence.clone(), collection_key(Self::APP, "assignments")),
            at_risk_threshold: settings.at_risk_threshold,
        };
        if workspace.students.is_fresh() && workspace.assignments.is_fresh() {
            if settings.seed_sample_data {
                if let Err(error) = workspace.seed_sample_data() {
                    warn!(error = %error, "student sample data could not be seeded");
                }
            }
            workspace.students.persist();
            workspace.assignments.persist();
        }
        workspace
    }

    pub fn students(&self) -> &Collection<Student> {
        &self.students
    }

    pub fn assignments(&self) -> &Collection<Assignment> {
        &self.assignments
    }

    pub fn set_at_risk_threshold(&mut self, threshold: f64) {
        self.at_risk_threshold = threshold;
    }

    pub fn create_student(&mut self, draft: StudentDraft) -> AppResult<Student> {
        self.students.create(draft)
    }

    pub fn update_student(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Student> {
        self.students.update_with_policy(id, patch, policy)
    }

    pub fn set_student_status(
        &mut self,
        id: &str,
        status: StudentStatus,
        policy: TransitionPolicy,
    ) -> AppResult<Student> {
        self.students.set_status(id, status, policy)
    }

    /// Records a score for one subject, replacing any earlier one.
    pub fn record_score(&mut self, id: &str, subject: &str, score: f64) -> AppResult<Student> {
        let mut scores = serde_json::Map::new();
        scores.insert(subject.trim().to_string(), serde_json::json!(score));
        self.students.update(id, serde_json::json!({ "scores": scores }))
    }

    /// Assignments of a deleted student are kept and resolve to
    /// [`UNKNOWN_STUDENT`].
    pub fn delete_student(&mut self, id: &str) -> bool {
        self.students.delete(id)
    }

    pub fn create_assignment(&mut self, draft: AssignmentDraft) -> AppResult<Assignment> {
        if !self.students.contains(&draft.student_id) {
            let mut errors = FieldErrors::new();
            errors.push("studentId", "does not match an existing student");
            return Err(AppError::Validation(errors));
        }
        self.assignments.create(draft)
    }

    pub fn set_assignment_status(
        &mut self,
        id: &str,
        status: AssignmentStatus,
        policy: TransitionPolicy,
    ) -> AppResult<Assignment> {
        self.assignments.set_status(id, status, policy)
    }

    /// Stores the score and moves the assignment to graded.
    pub fn grade_assignment(&mut self, id: &str, score: f64, policy: TransitionPolicy) -> AppResult<Assignment> {
        let current = self
            .assignments
            .find(id)
            .ok_or_else(|| AppError::NotFound(format!("assignment {} not found", id)))?;
        check_transition(Assignment::KIND, current.status, AssignmentStatus::Graded, policy)?;
        self.assignments.update(
            id,
            serde_json::json!({ "score": score, "status": AssignmentStatus::Graded }),
        )
    }

    pub fn delete_assignment(&mut self, id: &str) -> bool {
        self.assignments.delete(id)
    }

    pub fn student_name_for(&self, assignment: &Assignment) -> String {
        JoinIndex::new(self.students.records()).label(
            Some(assignment.student_id.as_str()),
            |student| student.name.clone(),
            UNKNOWN_STUDENT,
        )
    }

    /// Class average for one subject over the students that have a score in it.
    pub fn subject_average(&self, subject: &str) -> f64 {
        average(
            self.students
                .iter()
                .filter_map(|student| student.scores.get(subject).copied()),
        )
    }

    pub fn subject_averages(&self) -> BTreeMap<String, f64> {
        let pairs: Vec<(&str, f64)> = self
            .students
            .iter()
            .flat_map(|student| {
                student
                    .scores
                    .iter()
                    .map(|(subject, score)| (subject.as_str(), *score))
            })
            .collect();
        group_average(&pairs, |pair| Some(pair.0.to_string()), |pair| Some(pair.1))
    }

    pub fn grade_distribution(&self) -> Vec<CategoryCount<Grade>> {
        count_by_categories(
            self.students.records(),
            |student| student.average_score().map(Grade::from_percent),
            &Grade::ALL,
        )
    }

    pub fn completion_rate(&self) -> f64 {
        let complete = self
            .assignments
            .filter(|assignment| assignment.status.is_complete())
            .len();
        percentage(complete, self.assignments.len())
    }

    /// Active students whose average is below the at-risk threshold.
    pub fn at_risk_students(&self) -> Vec<&Student> {
        self.students.filter(|student| {
            student.status == StudentStatus::Active
                && student
                    .average_score()
                    .is_some_and(|score| score < self.at_risk_threshold)
        })
    }

    pub fn assignments_per_student(&self) -> Vec<JoinBucket> {
        join_totals(
            self.assignments.records(),
            |assignment| Some(assignment.student_id.as_str()),
            |assignment| if assignment.status.is_complete() { 1.0 } else { 0.0 },
            self.students.records(),
            |student| student.name.clone(),
            UNKNOWN_STUDENT,
        )
    }

    pub fn progress(&self) -> Vec<StudentProgress> {
        self.students
            .iter()
            .map(|student| {
                let assignments = self.assignments.filter(|assignment| assignment.student_id == student.id);
                let average_score = student.average_score();
                StudentProgress {
                    student_id: student.id.clone(),
                    name: student.name.clone(),
                    average_score,
                    grade: average_score.map(Grade::from_percent),
                    completed_assignments: assignments
                        .iter()
                        .filter(|assignment| assignment.status.is_complete())
                        .count(),
                    total_assignments: assignments.len(),
                }
            })
            .collect()
    }

    pub fn summary(&self) -> ClassSummary {
        ClassSummary {
            total_students: self.students.len(),
            active_students: self
                .students
                .filter(|student| student.status == StudentStatus::Active)
                .len(),
            class_average: average(self.students.iter().filter_map(Student::average_score)),
            average_attendance: average(self.students.iter().map(|student| student.attendance_rate)),
            completion_rate: self.completion_rate(),
            subject_averages: self.subject_averages(),
            grade_distribution: self.grade_distribution(),
            at_risk: self.at_risk_students().len(),
        }
    }

    fn seed_sample_data(&mut self) -> AppResult<()> {
        let priya = self.students.create(
            StudentDraft::new("Priya Raman", "priya@example.edu")
                .grade_level("10")
                .score("Math", 92.0)
                .score("Science", 88.0)
                .score("English", 79.0)
                .attendance_rate(97.0),
        )?;
        let jonah = self.students.create(
            StudentDraft::new("Jonah Becker", "jonah@example.edu")
                .grade_level("10")
                .score("Math", 52.0)
                .score("Science", 48.0)
                .score("English", 66.0)
                .attendance_rate(82.0),
        )?;
        self.students.create(
            StudentDraft::new("Sofia Lind", "sofia@example.edu")
                .grade_level("11")
                .score("Math", 84.0)
                .score("English", 91.0)
                .attendance_rate(93.5),
        )?;

        let essay = self
            .assignments
            .create(AssignmentDraft::new(&priya.id, "English", "Persuasive essay"))?;
        self.assignments
            .set_status(&essay.id, AssignmentStatus::Submitted, TransitionPolicy::Unrestricted)?;
        let lab = self
            .assignments
            .create(AssignmentDraft::new(&jonah.id, "Science", "Titration lab report").max_score(50.0))?;
        self.assignments
            .set_status(&lab.id, AssignmentStatus::Missing, TransitionPolicy::Unrestricted)?;
        self.assignments
            .create(AssignmentDraft::new(&jonah.id, "Math", "Quadratics worksheet"))?;
        debug!("student sample data seeded");
        Ok(())
    }
}

impl Workspace for StudentsWorkspace {
    const APP: AppKind = AppKind::Students;

    fn snapshot(&self) -> AppResult<ExportBundle> {
        let mut bundle = ExportBundle::new(Self::APP);
        bundle.insert("students", &self.students)?;
        bundle.insert("assignments", &self.assignments)?;
        Ok(bundle)
    }

    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary> {
        bundle.expect_app(Self::APP)?;
        let students = bundle.decode::<Student>("students")?;
        let assignments = bundle.decode::<Assignment>("assignments")?;

        let mut summary = ImportSummary::new(Self::APP);
        if let Some(records) = students {
            summary.record("students", records.len());
            self.students.replace_all(records)?;
        }
        if let Some(records) = assignments {
            summary.record("assignments", records.len());
            self.assignments.replace_all(records)?;
        }
        Ok(summary)
    }
}
