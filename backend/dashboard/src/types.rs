//! Typed projections of the project tracker contract state.
//!
//! Everything here is produced once at the ABI boundary (see [`crate::abi`])
//! and consumed by the session, role cache and aggregation queries.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// The four capability flags returned by `checkRoles`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSet {
    pub is_admin: bool,
    pub is_default_admin_holder: bool,
    pub is_government_official: bool,
    pub is_auditor: bool,
}

impl RoleSet {
    /// All flags cleared.
    pub const NONE: Self = Self {
        is_admin: false,
        is_default_admin_holder: false,
        is_government_official: false,
        is_auditor: false,
    };

    /// Build from the fixed `(admin, defaultAdmin, government, auditor)` order.
    pub fn from_flags(flags: [bool; 4]) -> Self {
        Self {
            is_admin: flags[0],
            is_default_admin_holder: flags[1],
            is_government_official: flags[2],
            is_auditor: flags[3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub description: String,
    pub budget: Amount,
    pub spent: Amount,
    pub government: Address,
    pub is_completed: bool,
    pub expense_count: u64,
    pub milestone_count: u64,
    pub last_updated: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub description: String,
    pub target_date: Option<Timestamp>,
    pub is_completed: bool,
    pub budget: Amount,
    pub spent: Amount,
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub description: String,
    pub amount: Amount,
    pub timestamp: Option<Timestamp>,
    #[serde(rename = "proofIPFSHash")]
    pub proof_ipfs_hash: String,
    pub milestone_id: u64,
}

/// An entry of the contract-held per-address notification inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractNotification {
    pub project_id: u64,
    pub message: String,
    pub timestamp: Option<Timestamp>,
    pub is_read: bool,
}

/// A finalized state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutcome {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

// ─────────────────────────────────────────────────────────
// Aggregated view models
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: u64,
    #[serde(flatten)]
    pub project: Project,
    pub progress: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneView {
    pub id: u64,
    #[serde(flatten)]
    pub milestone: Milestone,
    pub expenses: Vec<Expense>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTree {
    pub id: u64,
    #[serde(flatten)]
    pub project: Project,
    pub progress: String,
    pub milestones: Vec<MilestoneView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatExpense {
    pub id: u64,
    pub project_id: u64,
    pub project_name: String,
    pub milestone_id: u64,
    pub description: String,
    pub amount: Amount,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMilestone {
    pub id: u64,
    pub project_id: u64,
    pub project_name: String,
    pub description: String,
    pub deadline: Timestamp,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Project,
    Milestone,
    Deadline,
    Expense,
}

impl NotificationKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Project => "New Project Created",
            Self::Milestone => "New Milestone Added",
            Self::Deadline => "Upcoming Deadline",
            Self::Expense => "New Expense Added",
        }
    }

    /// Creation events are informational; deadlines demand attention.
    pub fn read_by_default(self) -> bool {
        !matches!(self, Self::Deadline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: &'static str,
    pub message: String,
    pub timestamp: Timestamp,
    pub is_read: bool,
    pub project_id: u64,
    pub project_name: String,
    pub milestone_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub kind: NotificationKind,
    pub timestamp: Timestamp,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_projects: u64,
    pub active_projects: u64,
    pub completed_projects: u64,
    pub total_budget: Amount,
    pub total_spent: Amount,
    pub budget_utilization: String,
    pub recent_activity: Vec<Activity>,
}
