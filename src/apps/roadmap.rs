use crate::aggregate::{average, join_totals, percent_of, CategoryCount, JoinBucket};
use crate::apps::{collection_key, trimmed, Workspace};
use crate::collection::{Collection, Draft, Entity};
use crate::db::Persistence;
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, FieldErrors, ImportSummary, StoreSettings, TransitionPolicy};
use crate::status::{HasStatus, Lifecycle};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

pub const UNASSIGNED: &str = "Unassigned";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SprintStatus {
    #[default]
    Planned,
    Active,
    Completed,
}

impl Lifecycle for SprintStatus {
    const ALL: &'static [Self] = &[Self::Planned, Self::Active, Self::Completed];

    fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Planned => &[Self::Active],
            Self::Active => &[Self::Completed],
            Self::Completed => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EpicStatus {
    #[default]
    Proposed,
    InProgress,
    Done,
}

impl Lifecycle for EpicStatus {
    const ALL: &'static [Self] = &[Self::Proposed, Self::InProgress, Self::Done];

    fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Proposed => &[Self::InProgress],
            Self::InProgress => &[Self::Done],
            Self::Done => &[Self::InProgress],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    #[default]
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
}

impl Lifecycle for StoryStatus {
    const ALL: &'static [Self] = &[Self::Backlog, Self::Todo, Self::InProgress, Self::Review, Self::Done];

    fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Backlog => &[Self::Todo],
            Self::Todo => &[Self::Backlog, Self::InProgress],
            Self::InProgress => &[Self::Todo, Self::Review],
            Self::Review => &[Self::InProgress, Self::Done],
            Self::Done => &[Self::InProgress],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    /// Story points the team can take on per sprint.
    pub capacity_points: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDraft {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    pub capacity_points: u32,
}

impl TeamDraft {
    pub fn new(name: impl Into<String>, capacity_points: u32) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            capacity_points,
        }
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.members.push(member.into());
        self
    }
}

impl Draft for TeamDraft {
    type Output = Team;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Team {
        Team {
            id,
            name: self.name.trim().to_string(),
            members: trimmed(self.members),
            capacity_points: self.capacity_points,
            created_at,
        }
    }
}

impl Entity for Team {
    type Draft = TeamDraft;
    const KIND: &'static str = "team";
    const ID_PREFIX: &'static str = "team";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: String,
    pub name: String,
    pub team_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub goal: Option<String>,
    pub status: SprintStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintDraft {
    pub name: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub goal: Option<String>,
}

impl SprintDraft {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            team_id: None,
            start_date,
            end_date,
            goal: None,
        }
    }

    /// Two-week sprint starting on `start_date`.
    pub fn fortnight(name: impl Into<String>, start_date: NaiveDate) -> Self {
        Self::new(name, start_date, start_date + Duration::days(13))
    }

    pub fn team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }
}

impl Draft for SprintDraft {
    type Output = Sprint;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Sprint {
        Sprint {
            id,
            name: self.name.trim().to_string(),
            team_id: self.team_id.filter(|team_id| !team_id.trim().is_empty()),
            start_date: self.start_date,
            end_date: self.end_date,
            goal: self.goal,
            status: SprintStatus::Planned,
            created_at,
        }
    }
}

impl Entity for Sprint {
    type Draft = SprintDraft;
    const KIND: &'static str = "sprint";
    const ID_PREFIX: &'static str = "sprint";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.check(self.end_date >= self.start_date, "endDate", "cannot be before startDate");
        errors.into_result()
    }
}

impl HasStatus for Sprint {
    type Status = SprintStatus;

    fn status(&self) -> SprintStatus {
        self.status
    }

    fn set_status(&mut self, status: SprintStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: EpicStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
}

impl EpicDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl Draft for EpicDraft {
    type Output = Epic;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Epic {
        Epic {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            priority: self.priority,
            status: EpicStatus::Proposed,
            created_at,
        }
    }
}

impl Entity for Epic {
    type Draft = EpicDraft;
    const KIND: &'static str = "epic";
    const ID_PREFIX: &'static str = "epic";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("title", &self.title);
        errors.into_result()
    }
}

impl HasStatus for Epic {
    type Status = EpicStatus;

    fn status(&self) -> EpicStatus {
        self.status
    }

    fn set_status(&mut self, status: EpicStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStory {
    pub id: String,
    pub title: String,
    pub epic_id: Option<String>,
    pub sprint_id: Option<String>,
    pub points: u32,
    pub status: StoryStatus,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStoryDraft {
    pub title: String,
    #[serde(default)]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub sprint_id: Option<String>,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl UserStoryDraft {
    pub fn new(title: impl Into<String>, points: u32) -> Self {
        Self {
            title: title.into(),
            epic_id: None,
            sprint_id: None,
            points,
            assignee: None,
        }
    }

    pub fn epic(mut self, epic_id: impl Into<String>) -> Self {
        self.epic_id = Some(epic_id.into());
        self
    }

    pub fn sprint(mut self, sprint_id: impl Into<String>) -> Self {
        self.sprint_id = Some(sprint_id.into());
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }
}

impl Draft for UserStoryDraft {
    type Output = UserStory;

    fn build(self, id: String, created_at: DateTime<Utc>) -> UserStory {
        UserStory {
            id,
            title: self.title.trim().to_string(),
            epic_id: self.epic_id.filter(|epic_id| !epic_id.trim().is_empty()),
            sprint_id: self.sprint_id.filter(|sprint_id| !sprint_id.trim().is_empty()),
            points: self.points,
            status: StoryStatus::Backlog,
            assignee: self.assignee,
            created_at,
        }
    }
}

impl Entity for UserStory {
    type Draft = UserStoryDraft;
    const KIND: &'static str = "user story";
    const ID_PREFIX: &'static str = "story";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("title", &self.title);
        errors.check(self.points <= 100, "points", "must be 100 or less");
        errors.into_result()
    }
}

impl HasStatus for UserStory {
    type Status = StoryStatus;

    fn status(&self) -> StoryStatus {
        self.status
    }

    fn set_status(&mut self, status: StoryStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roadmap {
    pub id: String,
    pub name: String,
    pub quarter: String,
    pub epic_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapDraft {
    pub name: String,
    #[serde(default)]
    pub quarter: String,
    #[serde(default)]
    pub epic_ids: Vec<String>,
}

impl RoadmapDraft {
    pub fn new(name: impl Into<String>, quarter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quarter: quarter.into(),
            epic_ids: Vec::new(),
        }
    }

    pub fn epic(mut self, epic_id: impl Into<String>) -> Self {
        self.epic_ids.push(epic_id.into());
        self
    }
}

impl Draft for RoadmapDraft {
    type Output = Roadmap;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Roadmap {
        let mut seen = HashSet::new();
        Roadmap {
            id,
            name: self.name.trim().to_string(),
            quarter: self.quarter.trim().to_string(),
            epic_ids: trimmed(self.epic_ids)
                .into_iter()
                .filter(|epic_id| seen.insert(epic_id.clone()))
                .collect(),
            created_at,
        }
    }
}

impl Entity for Roadmap {
    type Draft = RoadmapDraft;
    const KIND: &'static str = "roadmap";
    const ID_PREFIX: &'static str = "roadmap";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintVelocity {
    pub sprint_id: String,
    pub name: String,
    pub committed_points: u64,
    pub completed_points: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicProgress {
    pub epic_id: String,
    pub title: String,
    pub total_points: u64,
    pub done_points: u64,
    pub stories: usize,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamCapacity {
    pub team_id: String,
    pub name: String,
    pub capacity_points: u64,
    pub committed_points: u64,
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapSummary {
    pub total_stories: usize,
    pub stories_by_status: Vec<CategoryCount<StoryStatus>>,
    pub sprint_velocity: Vec<SprintVelocity>,
    pub average_velocity: f64,
    pub epic_progress: Vec<EpicProgress>,
    pub team_capacity: Vec<TeamCapacity>,
}

pub struct RoadmapWorkspace {
    teams: Collection<Team>,
    sprints: Collection<Sprint>,
    epics: Collection<Epic>,
    stories: Collection<UserStory>,
    roadmaps: Collection<Roadmap>,
}

impl RoadmapWorkspace {
    pub fn open(persistence: &Persistence, settings: &StoreSettings) -> Self {
        let mut workspace = Self {
            teams: Collection::open(persistence.clone(), collection_key(Self::APP, "teams")),
            sprints: Collection::open(persistence.clone(), collection_key(Self::APP, "sprints")),
            epics: Collection::open(persistence.clone(), collection_key(Self::APP, "epics")),
            stories: Collection::open(persistence.clone(), collection_key(Self::APP, "stories")),
            roadmaps: Collection::open(persistence.clone(), collection_key(Self::APP, "roadmaps")),
        };
        let fresh = workspace.teams.is_fresh()
            && workspace.sprints.is_fresh()
            && workspace.epics.is_fresh()
            && workspace.stories.is_fresh()
            && workspace.roadmaps.is_fresh();
        if fresh {
            if settings.seed_sample_data {
                if let Err(error) = workspace.seed_sample_data() {
                    warn!(error = %error, "roadmap sample data could not be seeded");
                }
            }
            workspace.teams.persist();
            workspace.sprints.persist();
            workspace.epics.persist();
            workspace.stories.persist();
            workspace.roadmaps.persist();
        }
        workspace
    }

    pub fn teams(&self) -> &Collection<Team> {
        &self.teams
    }

    pub fn sprints(&self) -> &Collection<Sprint> {
        &self.sprints
    }

    pub fn epics(&self) -> &Collection<Epic> {
        &self.epics
    }

    pub fn stories(&self) -> &Collection<UserStory> {
        &self.stories
    }

    pub fn roadmaps(&self) -> &Collection<Roadmap> {
        &self.roadmaps
    }

    pub fn create_team(&mut self, draft: TeamDraft) -> AppResult<Team> {
        self.teams.create(draft)
    }

    pub fn update_team(&mut self, id: &str, patch: serde_json::Value) -> AppResult<Team> {
        self.teams.update(id, patch)
    }

    /// Sprints of a deleted team become unowned.
    pub fn delete_team(&mut self, id: &str) -> bool {
        if !self.teams.delete(id) {
            return false;
        }
        self.sprints.update_where(
            |sprint| sprint.team_id.as_deref() == Some(id),
            |sprint| sprint.team_id = None,
        );
        true
    }

    pub fn create_sprint(&mut self, draft: SprintDraft) -> AppResult<Sprint> {
        if let Some(team_id) = draft.team_id.as_deref().filter(|id| !id.trim().is_empty()) {
            if !self.teams.contains(team_id) {
                return Err(dangling("teamId", "team"));
            }
        }
        self.sprints.create(draft)
    }

    pub fn update_sprint(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Sprint> {
        self.sprints.update_with_policy(id, patch, policy)
    }

    pub fn set_sprint_status(&mut self, id: &str, status: SprintStatus, policy: TransitionPolicy) -> AppResult<Sprint> {
        self.sprints.set_status(id, status, policy)
    }

    /// Stories in a deleted sprint go back to the backlog pool.
    pub fn delete_sprint(&mut self, id: &str) -> bool {
        if !self.sprints.delete(id) {
            return false;
        }
        let released = self.stories.update_where(
            |story| story.sprint_id.as_deref() == Some(id),
            |story| story.sprint_id = None,
        );
        debug!(sprint_id = %id, stories = released, "sprint stories released");
        true
    }

    pub fn create_epic(&mut self, draft: EpicDraft) -> AppResult<Epic> {
        self.epics.create(draft)
    }

    pub fn update_epic(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Epic> {
        self.epics.update_with_policy(id, patch, policy)
    }

    pub fn set_epic_status(&mut self, id: &str, status: EpicStatus, policy: TransitionPolicy) -> AppResult<Epic> {
        self.epics.set_status(id, status, policy)
    }

    /// Detaches the epic's stories and removes it from every roadmap.
    pub fn delete_epic(&mut self, id: &str) -> bool {
        if !self.epics.delete(id) {
            return false;
        }
        self.stories.update_where(
            |story| story.epic_id.as_deref() == Some(id),
            |story| story.epic_id = None,
        );
        self.roadmaps.update_where(
            |roadmap| roadmap.epic_ids.iter().any(|epic_id| epic_id == id),
            |roadmap| roadmap.epic_ids.retain(|epic_id| epic_id != id),
        );
        true
    }

    pub fn create_story(&mut self, draft: UserStoryDraft) -> AppResult<UserStory> {
        let mut errors = FieldErrors::new();
        if let Some(epic_id) = draft.epic_id.as_deref().filter(|id| !id.trim().is_empty()) {
            errors.check(self.epics.contains(epic_id), "epicId", "does not match an existing epic");
        }
        if let Some(sprint_id) = draft.sprint_id.as_deref().filter(|id| !id.trim().is_empty()) {
            errors.check(
                self.sprints.contains(sprint_id),
                "sprintId",
                "does not match an existing sprint",
            );
        }
        errors.into_result()?;
        self.stories.create(draft)
    }

    pub fn update_story(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<UserStory> {
        self.stories.update_with_policy(id, patch, policy)
    }

    pub fn set_story_status(&mut self, id: &str, status: StoryStatus, policy: TransitionPolicy) -> AppResult<UserStory> {
        self.stories.set_status(id, status, policy)
    }

    /// Moves a story into a sprint, or back to the backlog with `None`.
    pub fn assign_story_to_sprint(&mut self, story_id: &str, sprint_id: Option<&str>) -> AppResult<UserStory> {
        if let Some(sprint_id) = sprint_id {
            if !self.sprints.contains(sprint_id) {
                return Err(dangling("sprintId", "sprint"));
            }
        }
        self.stories
            .update(story_id, serde_json::json!({ "sprintId": sprint_id }))
    }

    pub fn delete_story(&mut self, id: &str) -> bool {
        self.stories.delete(id)
    }

    pub fn create_roadmap(&mut self, draft: RoadmapDraft) -> AppResult<Roadmap> {
        let unknown = draft
            .epic_ids
            .iter()
            .filter(|epic_id| !self.epics.contains(epic_id.trim()))
            .count();
        if unknown > 0 {
            let mut errors = FieldErrors::new();
            errors.push("epicIds", format!("{} unknown epic(s)", unknown));
            return Err(AppError::Validation(errors));
        }
        self.roadmaps.create(draft)
    }

    pub fn update_roadmap(&mut self, id: &str, patch: serde_json::Value) -> AppResult<Roadmap> {
        self.roadmaps.update(id, patch)
    }

    pub fn delete_roadmap(&mut self, id: &str) -> bool {
        self.roadmaps.delete(id)
    }

    /// Epics of a roadmap in roadmap order, skipping ids that no longer resolve.
    pub fn roadmap_epics(&self, roadmap_id: &str) -> AppResult<Vec<&Epic>> {
        let roadmap = self
            .roadmaps
            .find(roadmap_id)
            .ok_or_else(|| AppError::NotFound(format!("roadmap {} not found", roadmap_id)))?;
        Ok(roadmap
            .epic_ids
            .iter()
            .filter_map(|epic_id| self.epics.find(epic_id))
            .collect())
    }

    pub fn stories_by_status(&self) -> Vec<CategoryCount<StoryStatus>> {
        self.stories.status_counts()
    }

    /// Committed and done points per sprint, in sprint order.
    pub fn sprint_velocity(&self) -> Vec<SprintVelocity> {
        self.sprints
            .iter()
            .map(|sprint| {
                let stories = self
                    .stories
                    .filter(|story| story.sprint_id.as_deref() == Some(sprint.id.as_str()));
                SprintVelocity {
                    sprint_id: sprint.id.clone(),
                    name: sprint.name.clone(),
                    committed_points: stories.iter().map(|story| u64::from(story.points)).sum(),
                    completed_points: stories
                        .iter()
                        .filter(|story| story.status == StoryStatus::Done)
                        .map(|story| u64::from(story.points))
                        .sum(),
                }
            })
            .collect()
    }

    /// Mean completed points over completed sprints.
    pub fn average_velocity(&self) -> f64 {
        let completed: Vec<u64> = self
            .sprint_velocity()
            .into_iter()
            .filter(|velocity| {
                self.sprints
                    .find(&velocity.sprint_id)
                    .is_some_and(|sprint| sprint.status == SprintStatus::Completed)
            })
            .map(|velocity| velocity.completed_points)
            .collect();
        average(completed.into_iter().map(|points| points as f64))
    }

    pub fn epic_progress(&self) -> Vec<EpicProgress> {
        self.epics
            .iter()
            .map(|epic| {
                let stories = self
                    .stories
                    .filter(|story| story.epic_id.as_deref() == Some(epic.id.as_str()));
                let total_points: u64 = stories.iter().map(|story| u64::from(story.points)).sum();
                let done_points: u64 = stories
                    .iter()
                    .filter(|story| story.status == StoryStatus::Done)
                    .map(|story| u64::from(story.points))
                    .sum();
                EpicProgress {
                    epic_id: epic.id.clone(),
                    title: epic.title.clone(),
                    total_points,
                    done_points,
                    stories: stories.len(),
                    percent_complete: percent_of(done_points as f64, total_points as f64),
                }
            })
            .collect()
    }

    /// Story points per epic; stories without a live epic land in
    /// [`UNASSIGNED`].
    pub fn points_per_epic(&self) -> Vec<JoinBucket> {
        join_totals(
            self.stories.records(),
            |story| story.epic_id.as_deref(),
            |story| f64::from(story.points),
            self.epics.records(),
            |epic| epic.title.clone(),
            UNASSIGNED,
        )
    }

    /// Points committed in each team's active sprints against its capacity.
    pub fn team_capacity(&self) -> Vec<TeamCapacity> {
        self.teams
            .iter()
            .map(|team| {
                let active_sprints: Vec<&str> = self
                    .sprints
                    .iter()
                    .filter(|sprint| {
                        sprint.team_id.as_deref() == Some(team.id.as_str()) && sprint.status == SprintStatus::Active
                    })
                    .map(|sprint| sprint.id.as_str())
                    .collect();
                let committed_points: u64 = self
                    .stories
                    .iter()
                    .filter(|story| {
                        story
                            .sprint_id
                            .as_deref()
                            .is_some_and(|sprint_id| active_sprints.contains(&sprint_id))
                    })
                    .map(|story| u64::from(story.points))
                    .sum();
                let capacity = u64::from(team.capacity_points).saturating_mul(active_sprints.len() as u64);
                TeamCapacity {
                    team_id: team.id.clone(),
                    name: team.name.clone(),
                    capacity_points: capacity,
                    committed_points,
                    utilization: percent_of(committed_points as f64, capacity as f64),
                }
            })
            .collect()
    }

    pub fn summary(&self) -> RoadmapSummary {
        RoadmapSummary {
            total_stories: self.stories.len(),
            stories_by_status: self.stories_by_status(),
            sprint_velocity: self.sprint_velocity(),
            average_velocity: self.average_velocity(),
            epic_progress: self.epic_progress(),
            team_capacity: self.team_capacity(),
        }
    }

    fn seed_sample_data(&mut self) -> AppResult<()> {
        let platform = self.teams.create(
            TeamDraft::new("Platform", 30)
                .member("Ines")
                .member("Kofi")
                .member("Mei"),
        )?;
        let start = Utc::now().date_naive();
        let previous = self.sprints.create(
            SprintDraft::fortnight("Sprint 11", start - Duration::days(14))
                .team(&platform.id)
                .goal("Billing export"),
        )?;
        self.sprints
            .set_status(&previous.id, SprintStatus::Completed, TransitionPolicy::Unrestricted)?;
        let current = self
            .sprints
            .create(SprintDraft::fortnight("Sprint 12", start).team(&platform.id).goal("SSO beta"))?;
        self.sprints
            .set_status(&current.id, SprintStatus::Active, TransitionPolicy::Unrestricted)?;

        let sso = self
            .epics
            .create(EpicDraft::new("Single sign-on").priority(Priority::High))?;
        let billing = self.epics.create(EpicDraft::new("Billing exports"))?;

        let shipped = self.stories.create(
            UserStoryDraft::new("CSV export of invoices", 5)
                .epic(&billing.id)
                .sprint(&previous.id),
        )?;
        self.stories
            .set_status(&shipped.id, StoryStatus::Done, TransitionPolicy::Unrestricted)?;
        let in_flight = self.stories.create(
            UserStoryDraft::new("SAML login flow", 8)
                .epic(&sso.id)
                .sprint(&current.id)
                .assignee("Kofi"),
        )?;
        self.stories
            .set_status(&in_flight.id, StoryStatus::InProgress, TransitionPolicy::Unrestricted)?;
        self.stories
            .create(UserStoryDraft::new("Admin SSO settings page", 5).epic(&sso.id).sprint(&current.id))?;
        self.stories.create(UserStoryDraft::new("Dark mode polish", 3))?;

        self.roadmaps.create(
            RoadmapDraft::new("Product roadmap", "Q3")
                .epic(&sso.id)
                .epic(&billing.id),
        )?;
        debug!("roadmap sample data seeded");
        Ok(())
    }
}

fn dangling(field: &str, target: &str) -> AppError {
    let mut errors = FieldErrors::new();
    errors.push(field, format!("does not match an existing {}", target));
    AppError::Validation(errors)
}

impl Workspace for RoadmapWorkspace {
    const APP: AppKind = AppKind::Roadmap;

    fn snapshot(&self) -> AppResult<ExportBundle> {
        let mut bundle = ExportBundle::new(Self::APP);
        bundle.insert("teams", &self.teams)?;
        bundle.insert("sprints", &self.sprints)?;
        bundle.insert("epics", &self.epics)?;
        bundle.insert("stories", &self.stories)?;
        bundle.insert("roadmaps", &self.roadmaps)?;
        Ok(bundle)
    }

    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary> {
        bundle.expect_app(Self::APP)?;
        let teams = bundle.decode::<Team>("teams")?;
        let sprints = bundle.decode::<Sprint>("sprints")?;
        let epics = bundle.decode::<Epic>("epics")?;
        let stories = bundle.decode::<UserStory>("stories")?;
        let roadmaps = bundle.decode::<Roadmap>("roadmaps")?;

        let mut summary = ImportSummary::new(Self::APP);
        if let Some(records) = teams {
            summary.record("teams", records.len());
            self.teams.replace_all(records)?;
        }
        if let Some(records) = sprints {
            summary.record("sprints", records.len());
            self.sprints.replace_all(records)?;
        }
        if let Some(records) = epics {
            summary.record("epics", records.len());
            self.epics.replace_all(records)?;
        }
        if let Some(records) = stories {
            summary.record("stories", records.len());
            self.stories.replace_all(records)?;
        }
        if let Some(records) = roadmaps {
            summary.record("roadmaps", records.len());
            self.roadmaps.replace_all(records)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EpicDraft, EpicStatus, RoadmapDraft, RoadmapWorkspace, SprintDraft, SprintStatus, StoryStatus, TeamDraft,
        UserStoryDraft, UNASSIGNED,
    };
    use crate::db::Persistence;
    use crate::errors::AppError;
    use crate::models::{StoreSettings, TransitionPolicy};
    use chrono::NaiveDate;
    use serde_json::json;

    fn empty_workspace() -> RoadmapWorkspace {
        let settings = StoreSettings {
            seed_sample_data: false,
            ..StoreSettings::default()
        };
        RoadmapWorkspace::open(&Persistence::in_memory(), &settings)
    }

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).expect("valid date")
    }

    #[test]
    fn deleting_epic_detaches_stories_and_roadmaps() {
        let mut workspace = empty_workspace();
        let epic = workspace.create_epic(EpicDraft::new("Search")).expect("epic");
        let other = workspace.create_epic(EpicDraft::new("Billing")).expect("epic");
        let story = workspace
            .create_story(UserStoryDraft::new("Indexing", 5).epic(&epic.id))
            .expect("story");
        let roadmap = workspace
            .create_roadmap(RoadmapDraft::new("H1", "Q1").epic(&epic.id).epic(&other.id))
            .expect("roadmap");

        assert!(workspace.delete_epic(&epic.id));
        assert_eq!(workspace.stories().find(&story.id).expect("story").epic_id, None);
        let stored = workspace.roadmaps().find(&roadmap.id).expect("roadmap");
        assert_eq!(stored.epic_ids, vec![other.id.clone()]);

        let buckets = workspace.points_per_epic();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].total, 0.0);
        assert_eq!(buckets[1].label, UNASSIGNED);
        assert_eq!(buckets[1].total, 5.0);
    }

    #[test]
    fn deleting_sprint_returns_stories_to_backlog() {
        let mut workspace = empty_workspace();
        let sprint = workspace
            .create_sprint(SprintDraft::new("S1", day(1), day(14)))
            .expect("sprint");
        let story = workspace
            .create_story(UserStoryDraft::new("Story", 3).sprint(&sprint.id))
            .expect("story");
        assert!(workspace.delete_sprint(&sprint.id));
        assert_eq!(workspace.stories().find(&story.id).expect("story").sprint_id, None);
    }

    #[test]
    fn sprint_dates_and_references_are_checked() {
        let mut workspace = empty_workspace();
        assert!(workspace
            .create_sprint(SprintDraft::new("Backwards", day(14), day(1)))
            .is_err());
        assert!(workspace
            .create_sprint(SprintDraft::new("Orphan", day(1), day(14)).team("team-1"))
            .is_err());
        assert!(workspace
            .create_story(UserStoryDraft::new("Lost", 1).epic("epic-1"))
            .is_err());
        assert!(workspace
            .create_roadmap(RoadmapDraft::new("Empty", "Q2").epic("epic-1"))
            .is_err());
    }

    #[test]
    fn velocity_and_epic_progress_count_done_points() {
        let mut workspace = empty_workspace();
        let epic = workspace.create_epic(EpicDraft::new("Search")).expect("epic");
        let sprint = workspace
            .create_sprint(SprintDraft::new("S1", day(1), day(14)))
            .expect("sprint");
        let done = workspace
            .create_story(UserStoryDraft::new("A", 3).epic(&epic.id).sprint(&sprint.id))
            .expect("story");
        workspace
            .create_story(UserStoryDraft::new("B", 5).epic(&epic.id).sprint(&sprint.id))
            .expect("story");
        workspace
            .set_story_status(&done.id, StoryStatus::Done, TransitionPolicy::Unrestricted)
            .expect("done");

        let velocity = workspace.sprint_velocity();
        assert_eq!(velocity[0].committed_points, 8);
        assert_eq!(velocity[0].completed_points, 3);
        assert_eq!(workspace.average_velocity(), 0.0);

        workspace
            .set_sprint_status(&sprint.id, SprintStatus::Active, TransitionPolicy::Enforced)
            .expect("active");
        workspace
            .set_sprint_status(&sprint.id, SprintStatus::Completed, TransitionPolicy::Enforced)
            .expect("completed");
        assert_eq!(workspace.average_velocity(), 3.0);

        let progress = workspace.epic_progress();
        assert_eq!(progress[0].total_points, 8);
        assert_eq!(progress[0].done_points, 3);
        assert_eq!(progress[0].percent_complete, 37.5);
    }

    #[test]
    fn story_status_rules_apply_when_enforced() {
        let mut workspace = empty_workspace();
        let story = workspace.create_story(UserStoryDraft::new("S", 2)).expect("story");
        assert!(workspace
            .set_story_status(&story.id, StoryStatus::Done, TransitionPolicy::Enforced)
            .is_err());
        workspace
            .set_story_status(&story.id, StoryStatus::Todo, TransitionPolicy::Enforced)
            .expect("todo");
        let counts = workspace.stories_by_status();
        assert_eq!(counts.len(), 5);
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn team_utilization_uses_active_sprints() {
        let mut workspace = empty_workspace();
        let team = workspace.create_team(TeamDraft::new("Core", 20)).expect("team");
        let sprint = workspace
            .create_sprint(SprintDraft::new("S1", day(1), day(14)).team(&team.id))
            .expect("sprint");
        let story = workspace.create_story(UserStoryDraft::new("S", 15)).expect("story");
        workspace
            .assign_story_to_sprint(&story.id, Some(&sprint.id))
            .expect("assign");
        assert_eq!(workspace.team_capacity()[0].utilization, 0.0);

        workspace
            .set_sprint_status(&sprint.id, SprintStatus::Active, TransitionPolicy::Enforced)
            .expect("active");
        let capacity = &workspace.team_capacity()[0];
        assert_eq!(capacity.committed_points, 15);
        assert_eq!(capacity.utilization, 75.0);

        let unassigned = workspace
            .assign_story_to_sprint(&story.id, None)
            .expect("unassign");
        assert_eq!(unassigned.sprint_id, None);
        assert!(workspace.assign_story_to_sprint(&story.id, Some("sprint-1")).is_err());

        assert!(workspace.delete_team(&team.id));
        assert_eq!(workspace.sprints().find(&sprint.id).expect("sprint").team_id, None);
    }

    #[test]
    fn huge_capacity_over_several_active_sprints_does_not_overflow() {
        let mut workspace = empty_workspace();
        let team = workspace
            .create_team(TeamDraft::new("Everyone", 3_000_000_000))
            .expect("team");
        for name in ["S1", "S2"] {
            let sprint = workspace
                .create_sprint(SprintDraft::new(name, day(1), day(14)).team(&team.id))
                .expect("sprint");
            workspace
                .set_sprint_status(&sprint.id, SprintStatus::Active, TransitionPolicy::Enforced)
                .expect("active");
        }
        let capacity = &workspace.team_capacity()[0];
        assert_eq!(capacity.capacity_points, 6_000_000_000);
        assert_eq!(capacity.committed_points, 0);
        assert_eq!(capacity.utilization, 0.0);
    }

    #[test]
    fn status_patches_follow_each_lifecycle_when_enforced() {
        let mut workspace = empty_workspace();
        let sprint = workspace
            .create_sprint(SprintDraft::new("S1", day(1), day(14)))
            .expect("sprint");
        let error = workspace
            .update_sprint(&sprint.id, json!({ "status": "completed" }), TransitionPolicy::Enforced)
            .expect_err("planned -> completed");
        assert!(matches!(error, AppError::InvalidTransition { .. }));
        assert_eq!(
            workspace.sprints().find(&sprint.id).map(|sprint| sprint.status),
            Some(SprintStatus::Planned)
        );

        let epic = workspace.create_epic(EpicDraft::new("Search")).expect("epic");
        assert!(workspace
            .update_epic(&epic.id, json!({ "status": "done" }), TransitionPolicy::Enforced)
            .is_err());
        let started = workspace
            .update_epic(&epic.id, json!({ "status": "in-progress" }), TransitionPolicy::Enforced)
            .expect("proposed -> in-progress");
        assert_eq!(started.status, EpicStatus::InProgress);

        let story = workspace.create_story(UserStoryDraft::new("S", 2)).expect("story");
        assert!(workspace
            .update_story(&story.id, json!({ "status": "done", "points": 3 }), TransitionPolicy::Enforced)
            .is_err());
        let unchanged = workspace.stories().find(&story.id).expect("story");
        assert_eq!(unchanged.status, StoryStatus::Backlog);
        assert_eq!(unchanged.points, 2);
        let done = workspace
            .update_story(&story.id, json!({ "status": "done" }), TransitionPolicy::Unrestricted)
            .expect("unrestricted");
        assert_eq!(done.status, StoryStatus::Done);
    }

    #[test]
    fn seeded_roadmap_lists_epics_in_order() {
        let workspace = RoadmapWorkspace::open(&Persistence::in_memory(), &StoreSettings::default());
        let roadmap = workspace.roadmaps().iter().next().expect("seeded roadmap");
        let epics = workspace.roadmap_epics(&roadmap.id).expect("epics");
        assert_eq!(epics.len(), 2);
        assert_eq!(epics[0].title, "Single sign-on");
        assert_eq!(workspace.summary().average_velocity, 5.0);
        assert!(workspace.roadmap_epics("roadmap-1").is_err());
    }
}
