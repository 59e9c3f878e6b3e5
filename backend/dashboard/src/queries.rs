//! Read-side aggregation over the contract's index-addressed collections.
//!
//! The contract exposes projects, milestones and expenses as flat, densely
//! numbered lists. Every loader here walks those lists one request at a time
//! and assembles a view model. Per-item failures are logged and recorded in
//! [`Partial::skipped`]; only the root request (the project count, or the
//! root project of a tree) aborts with [`DashboardError::TopLevelQuery`].
//! A stale handle always aborts so the caller can retry on the new one.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::amount::{progress_percentage, Amount};
use crate::contract::ProjectTracker;
use crate::errors::{DashboardError, Result};
use crate::types::{
    Activity, DashboardStats, Expense, FlatExpense, FlatMilestone, MilestoneView, Notification,
    NotificationKind, Project, ProjectSummary, ProjectTree, Timestamp,
};

/// Lookahead for upcoming deadlines, and the deadline assumed when a
/// milestone has none.
pub const DEADLINE_HORIZON_SECS: i64 = 7 * 24 * 60 * 60;

const RECENT_ACTIVITY: usize = 5;

/// A view model plus the items that could not be loaded for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partial<T> {
    pub value: T,
    pub skipped: Vec<Skipped>,
}

impl<T> Partial<T> {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Partial<U> {
        Partial {
            value: f(self.value),
            skipped: self.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Default)]
struct Skips(Vec<Skipped>);

impl Skips {
    /// Record a per-item failure, unless it means the whole handle is gone.
    fn record(&mut self, item: String, err: DashboardError) -> Result<()> {
        if matches!(err, DashboardError::StaleHandle) {
            return Err(err);
        }
        warn!("Error loading {item}: {err}");
        self.0.push(Skipped {
            item,
            error: err.to_string(),
        });
        Ok(())
    }

    fn finish<T>(self, value: T) -> Partial<T> {
        Partial {
            value,
            skipped: self.0,
        }
    }
}

fn top_level(what: &str, err: DashboardError) -> DashboardError {
    match err {
        DashboardError::StaleHandle => err,
        other => {
            error!("Error loading {what}: {other}");
            DashboardError::TopLevelQuery(format!("{what}: {other}"))
        }
    }
}

fn project_label(project: &Project, project_id: u64) -> String {
    if project.name.is_empty() {
        format!("Project {project_id}")
    } else {
        project.name.clone()
    }
}

/// Expenses listed under `milestone_id` that claim another milestone.
///
/// The per-milestone listing is what the tree shows; a disagreeing
/// `milestoneId` is only reported.
fn check_milestone_ids(project_id: u64, milestone_id: u64, expenses: &[Expense]) {
    for (position, expense) in expenses.iter().enumerate() {
        if expense.milestone_id != milestone_id {
            warn!(
                "project {project_id}: expense #{position} listed under milestone {milestone_id} \
                 reports milestoneId {}",
                expense.milestone_id
            );
        }
    }
}

// ─────────────────────────────────────────────────────────
// Project tree and listings
// ─────────────────────────────────────────────────────────

/// One project with its milestones and, per milestone, its expenses.
pub async fn load_project_tree(
    contract: &dyn ProjectTracker,
    project_id: u64,
) -> Result<Partial<ProjectTree>> {
    let project = contract
        .get_project(project_id)
        .await
        .map_err(|e| top_level(&format!("project {project_id}"), e))?;

    let mut skips = Skips::default();
    let mut milestones = Vec::new();

    for milestone_id in 0..project.milestone_count {
        let milestone = match contract.get_milestone(project_id, milestone_id).await {
            Ok(milestone) => milestone,
            Err(e) => {
                skips.record(format!("milestone {milestone_id} of project {project_id}"), e)?;
                continue;
            }
        };

        let expenses = match contract
            .get_expenses_by_milestone(project_id, milestone_id)
            .await
        {
            Ok(expenses) => {
                check_milestone_ids(project_id, milestone_id, &expenses);
                expenses
            }
            Err(e) => {
                skips.record(
                    format!("expenses of milestone {milestone_id} in project {project_id}"),
                    e,
                )?;
                Vec::new()
            }
        };

        milestones.push(MilestoneView {
            id: milestone_id,
            milestone,
            expenses,
        });
    }

    Ok(skips.finish(ProjectTree {
        id: project_id,
        progress: progress_percentage(project.spent, project.budget),
        project,
        milestones,
    }))
}

/// One milestone with its expenses.
pub async fn load_milestone(
    contract: &dyn ProjectTracker,
    project_id: u64,
    milestone_id: u64,
) -> Result<Partial<MilestoneView>> {
    let what = format!("milestone {milestone_id} of project {project_id}");
    let milestone = contract
        .get_milestone(project_id, milestone_id)
        .await
        .map_err(|e| top_level(&what, e))?;

    let mut skips = Skips::default();
    let expenses = match contract
        .get_expenses_by_milestone(project_id, milestone_id)
        .await
    {
        Ok(expenses) => {
            check_milestone_ids(project_id, milestone_id, &expenses);
            expenses
        }
        Err(e) => {
            skips.record(format!("expenses of {what}"), e)?;
            Vec::new()
        }
    };

    Ok(skips.finish(MilestoneView {
        id: milestone_id,
        milestone,
        expenses,
    }))
}

/// One expense by its per-project index.
pub async fn load_expense(
    contract: &dyn ProjectTracker,
    project_id: u64,
    expense_id: u64,
) -> Result<Expense> {
    contract
        .get_expense(project_id, expense_id)
        .await
        .map_err(|e| top_level(&format!("expense {expense_id} of project {project_id}"), e))
}

/// Every project's summary fields, in index order.
pub async fn load_all_projects_summary(
    contract: &dyn ProjectTracker,
) -> Result<Partial<Vec<ProjectSummary>>> {
    let count = contract
        .project_count()
        .await
        .map_err(|e| top_level("project count", e))?;

    let mut skips = Skips::default();
    let mut projects = Vec::new();
    for id in 0..count {
        match contract.get_project(id).await {
            Ok(project) => projects.push(ProjectSummary {
                id,
                progress: progress_percentage(project.spent, project.budget),
                project,
            }),
            Err(e) => skips.record(format!("project {id}"), e)?,
        }
    }
    Ok(skips.finish(projects))
}

/// All expenses across all projects, most recent first.
///
/// An expense without a timestamp is treated as happening `now`.
pub async fn load_flat_expenses(
    contract: &dyn ProjectTracker,
    now: Timestamp,
) -> Result<Partial<Vec<FlatExpense>>> {
    let count = contract
        .project_count()
        .await
        .map_err(|e| top_level("project count", e))?;

    let mut skips = Skips::default();
    let mut expenses = Vec::new();

    for project_id in 0..count {
        let project = match contract.get_project(project_id).await {
            Ok(project) => project,
            Err(e) => {
                skips.record(format!("project {project_id}"), e)?;
                continue;
            }
        };
        let project_name = project_label(&project, project_id);

        for milestone_id in 0..project.milestone_count {
            let listed = match contract
                .get_expenses_by_milestone(project_id, milestone_id)
                .await
            {
                Ok(listed) => listed,
                Err(e) => {
                    skips.record(
                        format!("expenses of milestone {milestone_id} in project {project_id}"),
                        e,
                    )?;
                    continue;
                }
            };

            for (position, expense) in listed.into_iter().enumerate() {
                expenses.push(FlatExpense {
                    id: position as u64,
                    project_id,
                    project_name: project_name.clone(),
                    milestone_id,
                    description: if expense.description.is_empty() {
                        "Untitled Expense".to_string()
                    } else {
                        expense.description
                    },
                    amount: expense.amount,
                    timestamp: expense.timestamp.unwrap_or(now),
                });
            }
        }
    }

    expenses.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(skips.finish(expenses))
}

/// All milestones across all projects, soonest deadline first.
///
/// A milestone without a target date is assumed due a week from `now`.
pub async fn load_flat_milestones(
    contract: &dyn ProjectTracker,
    now: Timestamp,
) -> Result<Partial<Vec<FlatMilestone>>> {
    let count = contract
        .project_count()
        .await
        .map_err(|e| top_level("project count", e))?;

    let mut skips = Skips::default();
    let mut milestones = Vec::new();

    for project_id in 0..count {
        let project = match contract.get_project(project_id).await {
            Ok(project) => project,
            Err(e) => {
                skips.record(format!("project {project_id}"), e)?;
                continue;
            }
        };
        let project_name = project_label(&project, project_id);

        for milestone_id in 0..project.milestone_count {
            match contract.get_milestone(project_id, milestone_id).await {
                Ok(milestone) => milestones.push(FlatMilestone {
                    id: milestone_id,
                    project_id,
                    project_name: project_name.clone(),
                    description: if milestone.description.is_empty() {
                        "Untitled Milestone".to_string()
                    } else {
                        milestone.description
                    },
                    deadline: milestone
                        .target_date
                        .unwrap_or(now + DEADLINE_HORIZON_SECS),
                    is_completed: milestone.is_completed,
                }),
                Err(e) => skips.record(
                    format!("milestone {milestone_id} of project {project_id}"),
                    e,
                )?,
            }
        }
    }

    milestones.sort_by(|a, b| a.deadline.cmp(&b.deadline));
    Ok(skips.finish(milestones))
}

// ─────────────────────────────────────────────────────────
// Notifications and dashboard
// ─────────────────────────────────────────────────────────

fn is_upcoming(deadline: Timestamp, now: Timestamp) -> bool {
    deadline > now && deadline - now < DEADLINE_HORIZON_SECS
}

fn notification(
    kind: NotificationKind,
    message: String,
    timestamp: Timestamp,
    project_id: u64,
    project_name: &str,
    milestone_id: Option<u64>,
) -> Notification {
    Notification {
        kind,
        title: kind.title(),
        message,
        timestamp,
        is_read: kind.read_by_default(),
        project_id,
        project_name: project_name.to_string(),
        milestone_id,
    }
}

/// Synthesise the notification feed from creation timestamps and upcoming
/// deadlines, most recent first.
pub async fn derive_notifications(
    contract: &dyn ProjectTracker,
    now: Timestamp,
) -> Result<Partial<Vec<Notification>>> {
    let count = contract
        .project_count()
        .await
        .map_err(|e| top_level("project count", e))?;

    let mut skips = Skips::default();
    let mut feed = Vec::new();

    for project_id in 0..count {
        let project = match contract.get_project(project_id).await {
            Ok(project) => project,
            Err(e) => {
                skips.record(format!("project {project_id}"), e)?;
                continue;
            }
        };
        let name = project.name.as_str();

        if let Some(created_at) = project.created_at {
            feed.push(notification(
                NotificationKind::Project,
                format!("Project \"{name}\" has been created"),
                created_at,
                project_id,
                name,
                None,
            ));
        }

        for milestone_id in 0..project.milestone_count {
            let milestone = match contract.get_milestone(project_id, milestone_id).await {
                Ok(milestone) => milestone,
                Err(e) => {
                    skips.record(
                        format!("milestone {milestone_id} of project {project_id}"),
                        e,
                    )?;
                    continue;
                }
            };

            if let Some(created_at) = milestone.created_at {
                feed.push(notification(
                    NotificationKind::Milestone,
                    format!(
                        "New milestone \"{}\" added to project \"{name}\"",
                        milestone.description
                    ),
                    created_at,
                    project_id,
                    name,
                    Some(milestone_id),
                ));
            }

            if let Some(deadline) = milestone.target_date {
                if !milestone.is_completed && is_upcoming(deadline, now) {
                    feed.push(notification(
                        NotificationKind::Deadline,
                        format!(
                            "Milestone \"{}\" in project \"{name}\" is due soon",
                            milestone.description
                        ),
                        now,
                        project_id,
                        name,
                        Some(milestone_id),
                    ));
                }
            }

            match contract
                .get_expenses_by_milestone(project_id, milestone_id)
                .await
            {
                Ok(expenses) => {
                    for expense in expenses {
                        let Some(timestamp) = expense.timestamp else {
                            continue;
                        };
                        feed.push(notification(
                            NotificationKind::Expense,
                            format!(
                                "New expense of {} USD added to project \"{name}\"",
                                expense.amount
                            ),
                            timestamp,
                            project_id,
                            name,
                            Some(milestone_id),
                        ));
                    }
                }
                Err(e) => skips.record(
                    format!("expenses of milestone {milestone_id} in project {project_id}"),
                    e,
                )?,
            }
        }
    }

    feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(skips.finish(feed))
}

/// Portfolio totals and the latest creation events.
pub async fn load_dashboard_stats(contract: &dyn ProjectTracker) -> Result<Partial<DashboardStats>> {
    let count = contract
        .project_count()
        .await
        .map_err(|e| top_level("project count", e))?;

    let mut skips = Skips::default();
    let mut active = 0;
    let mut completed = 0;
    let mut budgets = Vec::new();
    let mut spent = Vec::new();
    let mut activity = Vec::new();

    for project_id in 0..count {
        let project = match contract.get_project(project_id).await {
            Ok(project) => project,
            Err(e) => {
                skips.record(format!("project {project_id}"), e)?;
                continue;
            }
        };

        if project.is_completed {
            completed += 1;
        } else {
            active += 1;
        }
        budgets.push(project.budget);
        spent.push(project.spent);

        if let Some(timestamp) = project.created_at {
            activity.push(Activity {
                kind: NotificationKind::Project,
                timestamp,
                description: format!("Project \"{}\" created", project.name),
            });
        }

        for milestone_id in 0..project.milestone_count {
            let milestone = match contract.get_milestone(project_id, milestone_id).await {
                Ok(milestone) => milestone,
                Err(e) => {
                    skips.record(
                        format!("milestone {milestone_id} of project {project_id}"),
                        e,
                    )?;
                    continue;
                }
            };
            if let Some(timestamp) = milestone.created_at {
                activity.push(Activity {
                    kind: NotificationKind::Milestone,
                    timestamp,
                    description: format!(
                        "Milestone \"{}\" added to \"{}\"",
                        milestone.description, project.name
                    ),
                });
            }

            match contract
                .get_expenses_by_milestone(project_id, milestone_id)
                .await
            {
                Ok(expenses) => activity.extend(expenses.into_iter().filter_map(|expense| {
                    expense.timestamp.map(|timestamp| Activity {
                        kind: NotificationKind::Expense,
                        timestamp,
                        description: format!(
                            "Expense of {} USD added to \"{}\"",
                            expense.amount, project.name
                        ),
                    })
                })),
                Err(e) => skips.record(
                    format!("expenses of milestone {milestone_id} in project {project_id}"),
                    e,
                )?,
            }
        }
    }

    activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    activity.truncate(RECENT_ACTIVITY);

    let total_budget: Amount = budgets.into_iter().sum();
    let total_spent: Amount = spent.into_iter().sum();

    Ok(skips.finish(DashboardStats {
        total_projects: count,
        active_projects: active,
        completed_projects: completed,
        total_budget,
        total_spent,
        budget_utilization: progress_percentage(total_spent, total_budget),
        recent_activity: activity,
    }))
}

// ─────────────────────────────────────────────────────────
// Listing filters
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Recent,
    Budget,
    Spent,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectFilter {
    pub status: StatusFilter,
    pub sort_by: SortBy,
    pub search: String,
}

impl ProjectFilter {
    pub fn apply(&self, mut projects: Vec<ProjectSummary>) -> Vec<ProjectSummary> {
        let needle = self.search.trim().to_lowercase();
        projects.retain(|s| {
            let status_ok = match self.status {
                StatusFilter::All => true,
                StatusFilter::Active => !s.project.is_completed,
                StatusFilter::Completed => s.project.is_completed,
            };
            status_ok
                && (needle.is_empty()
                    || s.project.name.to_lowercase().contains(&needle)
                    || s.project.description.to_lowercase().contains(&needle))
        });

        match self.sort_by {
            // Indices are append-only, so the highest is the newest.
            SortBy::Recent => projects.sort_by(|a, b| b.id.cmp(&a.id)),
            SortBy::Budget => projects.sort_by(|a, b| b.project.budget.cmp(&a.project.budget)),
            SortBy::Spent => projects.sort_by(|a, b| b.project.spent.cmp(&a.project.spent)),
        }
        projects
    }
}
