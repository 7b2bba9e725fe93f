//! Hierarchical completion roll-ups for the project planning tree.
//!
//! One canonical aggregator replaces the per-endpoint copies: every level
//! (project, epic, feature, task) is computed from the same recursive
//! [`Rollup`], so parent totals are by construction the sums of child totals.
//! What counts as "complete" is decided by the per-kind table in
//! [`CompletionRules`], never by a literal at a call site.
//!
//! All functions here are pure: they read an already-fetched object graph and
//! attach numbers beside it. Missing child collections count as empty.

use serde::{Deserialize, Serialize};

use crate::models::{Epic, Feature, Project, SubTask, Task, Ticket, UserStory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Epic,
    Feature,
    UserStory,
    Task,
    SubTask,
    Ticket,
}

/// Maps each entity kind to its terminal-status literal.
///
/// The literals are deliberately uneven (epics close at `completed`, the rest
/// of the hierarchy at `done`, tickets at `Closed`) because that is what the
/// persisted data uses.
pub struct CompletionRules;

impl CompletionRules {
    pub fn terminal_status(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Epic => "completed",
            EntityKind::Feature
            | EntityKind::UserStory
            | EntityKind::Task
            | EntityKind::SubTask => "done",
            EntityKind::Ticket => "Closed",
        }
    }

    pub fn is_complete(kind: EntityKind, status: &str) -> bool {
        status == Self::terminal_status(kind)
    }
}

/// Completion counts for one descendant kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: u32,
    pub completed: u32,
}

impl Tally {
    pub fn add(&mut self, complete: bool) {
        self.total += 1;
        if complete {
            self.completed += 1;
        }
    }

    pub fn absorb(&mut self, other: Tally) {
        self.total += other.total;
        self.completed += other.completed;
    }

    /// Completion rate as a rounded percentage; 0 when the tally is empty.
    pub fn rate(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((f64::from(self.completed) / f64::from(self.total)) * 100.0).round() as u32
    }
}

fn tally_of<T>(items: &[T], kind: EntityKind, status: impl Fn(&T) -> &str) -> Tally {
    let mut tally = Tally::default();
    for item in items {
        tally.add(CompletionRules::is_complete(kind, status(item)));
    }
    tally
}

/// Accumulated counts for every descendant kind reachable from a node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rollup {
    pub epics: Tally,
    pub features: Tally,
    pub stories: Tally,
    pub tasks: Tally,
    pub sub_tasks: Tally,
    pub total_story_points: f64,
    pub completed_story_points: f64,
    pub estimated_hours: f64,
    pub actual_hours: f64,
}

impl Rollup {
    pub fn absorb(&mut self, child: Rollup) {
        self.epics.absorb(child.epics);
        self.features.absorb(child.features);
        self.stories.absorb(child.stories);
        self.tasks.absorb(child.tasks);
        self.sub_tasks.absorb(child.sub_tasks);
        self.total_story_points += child.total_story_points;
        self.completed_story_points += child.completed_story_points;
        self.estimated_hours += child.estimated_hours;
        self.actual_hours += child.actual_hours;
    }
}

pub fn rollup_task(task: &Task) -> Rollup {
    let mut rollup = Rollup {
        sub_tasks: tally_of(&task.sub_tasks, EntityKind::SubTask, |st: &SubTask| {
            &st.status
        }),
        ..Rollup::default()
    };
    for sub_task in &task.sub_tasks {
        rollup.estimated_hours += sub_task.estimated_hours;
        rollup.actual_hours += sub_task.actual_hours;
    }
    rollup
}

pub fn rollup_feature(feature: &Feature) -> Rollup {
    let mut rollup = Rollup {
        stories: tally_of(&feature.user_stories, EntityKind::UserStory, |s: &UserStory| {
            &s.status
        }),
        tasks: tally_of(&feature.tasks, EntityKind::Task, |t: &Task| &t.status),
        ..Rollup::default()
    };
    for story in &feature.user_stories {
        rollup.total_story_points += story.story_points;
        if CompletionRules::is_complete(EntityKind::UserStory, &story.status) {
            rollup.completed_story_points += story.story_points;
        }
    }
    for task in &feature.tasks {
        rollup.absorb(rollup_task(task));
    }
    rollup
}

pub fn rollup_epic(epic: &Epic) -> Rollup {
    let mut rollup = Rollup {
        features: tally_of(&epic.features, EntityKind::Feature, |f: &Feature| &f.status),
        ..Rollup::default()
    };
    for feature in &epic.features {
        rollup.absorb(rollup_feature(feature));
    }
    rollup
}

pub fn rollup_project(project: &Project) -> Rollup {
    let mut rollup = Rollup {
        epics: tally_of(&project.epics, EntityKind::Epic, |e: &Epic| &e.status),
        ..Rollup::default()
    };
    for epic in &project.epics {
        rollup.absorb(rollup_epic(epic));
    }
    rollup
}

// ── Metric views ──────────────────────────────────────────────────────
//
// JSON field names match the dashboard contract (camelCase, velocity =
// completed story points).

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetrics {
    pub total_epics: u32,
    pub completed_epics: u32,
    pub total_features: u32,
    pub completed_features: u32,
    pub total_stories: u32,
    pub completed_stories: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub total_sub_tasks: u32,
    pub completed_sub_tasks: u32,
    pub total_story_points: f64,
    pub completed_story_points: f64,
    pub epic_completion_rate: u32,
    pub feature_completion_rate: u32,
    pub story_completion_rate: u32,
    pub task_completion_rate: u32,
    pub velocity: f64,
}

impl ProjectMetrics {
    pub fn compute(project: &Project) -> Self {
        let r = rollup_project(project);
        Self {
            total_epics: r.epics.total,
            completed_epics: r.epics.completed,
            total_features: r.features.total,
            completed_features: r.features.completed,
            total_stories: r.stories.total,
            completed_stories: r.stories.completed,
            total_tasks: r.tasks.total,
            completed_tasks: r.tasks.completed,
            total_sub_tasks: r.sub_tasks.total,
            completed_sub_tasks: r.sub_tasks.completed,
            total_story_points: r.total_story_points,
            completed_story_points: r.completed_story_points,
            epic_completion_rate: r.epics.rate(),
            feature_completion_rate: r.features.rate(),
            story_completion_rate: r.stories.rate(),
            task_completion_rate: r.tasks.rate(),
            velocity: r.completed_story_points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EpicMetrics {
    pub total_features: u32,
    pub completed_features: u32,
    pub total_stories: u32,
    pub completed_stories: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub total_sub_tasks: u32,
    pub completed_sub_tasks: u32,
    pub feature_completion_rate: u32,
    pub story_completion_rate: u32,
    pub task_completion_rate: u32,
}

impl EpicMetrics {
    pub fn compute(epic: &Epic) -> Self {
        let r = rollup_epic(epic);
        Self {
            total_features: r.features.total,
            completed_features: r.features.completed,
            total_stories: r.stories.total,
            completed_stories: r.stories.completed,
            total_tasks: r.tasks.total,
            completed_tasks: r.tasks.completed,
            total_sub_tasks: r.sub_tasks.total,
            completed_sub_tasks: r.sub_tasks.completed,
            feature_completion_rate: r.features.rate(),
            story_completion_rate: r.stories.rate(),
            task_completion_rate: r.tasks.rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetrics {
    pub total_stories: u32,
    pub completed_stories: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub total_sub_tasks: u32,
    pub completed_sub_tasks: u32,
    pub total_story_points: f64,
    pub completed_story_points: f64,
    pub story_completion_rate: u32,
    pub task_completion_rate: u32,
    pub velocity: f64,
}

impl FeatureMetrics {
    pub fn compute(feature: &Feature) -> Self {
        let r = rollup_feature(feature);
        Self {
            total_stories: r.stories.total,
            completed_stories: r.stories.completed,
            total_tasks: r.tasks.total,
            completed_tasks: r.tasks.completed,
            total_sub_tasks: r.sub_tasks.total,
            completed_sub_tasks: r.sub_tasks.completed,
            total_story_points: r.total_story_points,
            completed_story_points: r.completed_story_points,
            story_completion_rate: r.stories.rate(),
            task_completion_rate: r.tasks.rate(),
            velocity: r.completed_story_points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    pub total_sub_tasks: u32,
    pub completed_sub_tasks: u32,
    pub total_estimated_hours: f64,
    pub total_actual_hours: f64,
    pub sub_task_completion_rate: u32,
}

impl TaskMetrics {
    pub fn compute(task: &Task) -> Self {
        let r = rollup_task(task);
        Self {
            total_sub_tasks: r.sub_tasks.total,
            completed_sub_tasks: r.sub_tasks.completed,
            total_estimated_hours: r.estimated_hours,
            total_actual_hours: r.actual_hours,
            sub_task_completion_rate: r.sub_tasks.rate(),
        }
    }
}

// ── Enriched views ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub metrics: ProjectMetrics,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        let metrics = ProjectMetrics::compute(&project);
        Self { project, metrics }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicView {
    #[serde(flatten)]
    pub epic: Epic,
    pub metrics: EpicMetrics,
}

impl From<Epic> for EpicView {
    fn from(epic: Epic) -> Self {
        let metrics = EpicMetrics::compute(&epic);
        Self { epic, metrics }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureView {
    #[serde(flatten)]
    pub feature: Feature,
    pub metrics: FeatureMetrics,
}

impl From<Feature> for FeatureView {
    fn from(feature: Feature) -> Self {
        let metrics = FeatureMetrics::compute(&feature);
        Self { feature, metrics }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub metrics: TaskMetrics,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let metrics = TaskMetrics::compute(&task);
        Self { task, metrics }
    }
}

/// Convenience for the tickets dashboard: counts a ticket as resolved when it
/// has reached its terminal status.
pub fn ticket_is_resolved(ticket: &Ticket) -> bool {
    CompletionRules::is_complete(EntityKind::Ticket, ticket.status.as_str())
}
