//! Solidity bindings for the project tracker contract and the single
//! decode step from raw ABI values into [`crate::types`].
//!
//! Zero timestamps are the contract's "unset" value and decode as `None`.
//! Counts that do not fit a `u64` decode as `0` with a warning.

use alloy_primitives::{keccak256, B256, U256};
use alloy_sol_types::{sol, SolCall};
use serde::Deserialize;
use tracing::warn;

use crate::amount::Amount;
use crate::errors::{DashboardError, Result};
use crate::types::{ContractNotification, Expense, Milestone, Project, RoleSet, Timestamp};

sol! {
    #[derive(Debug)]
    struct ProjectData {
        string name;
        string description;
        uint256 budget;
        uint256 spent;
        address government;
        bool isCompleted;
        uint256 expenseCount;
        uint256 milestoneCount;
        uint256 lastUpdated;
        uint256 createdAt;
    }

    #[derive(Debug)]
    struct MilestoneData {
        string description;
        uint256 targetDate;
        bool isCompleted;
        uint256 budget;
        uint256 spent;
        uint256 createdAt;
    }

    #[derive(Debug)]
    struct ExpenseData {
        string description;
        uint256 amount;
        uint256 timestamp;
        string proofIPFSHash;
        uint256 milestoneId;
    }

    #[derive(Debug)]
    struct NotificationData {
        uint256 projectId;
        string message;
        uint256 timestamp;
        bool isRead;
    }

    #[derive(Debug)]
    interface IProjectTracker {
        function projectCount() external view returns (uint256);
        function getProject(uint256 projectId) external view returns (ProjectData memory);
        function getMilestone(uint256 projectId, uint256 milestoneId) external view returns (MilestoneData memory);
        function getExpense(uint256 projectId, uint256 expenseId) external view returns (ExpenseData memory);
        function getExpensesByMilestone(uint256 projectId, uint256 milestoneId) external view returns (ExpenseData[] memory);
        function checkRoles(address account) external view returns (bool isAdmin, bool isDefaultAdmin, bool isGovernment, bool isAuditor);
        function getNotifications(address user) external view returns (NotificationData[] memory);

        function createProject(string name, string description, uint256 budget) external;
        function addMilestone(uint256 projectId, string description, uint256 targetDate, uint256 budget) external;
        function addExpense(uint256 projectId, string description, uint256 amount, string proofIPFSHash, uint256 milestoneId) external;
        function completeMilestone(uint256 projectId, uint256 milestoneId) external;
        function completeProject(uint256 projectId) external;
        function markNotificationAsRead(uint256 index) external;
        function addAuditor(address account) external;
        function addGovernmentOfficial(address account) external;
        function revokeRole(bytes32 role, address account) external;
    }
}

/// Roles an admin may grant or revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedRole {
    Auditor,
    Government,
}

impl ManagedRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auditor => "AUDITOR_ROLE",
            Self::Government => "GOVERNMENT_ROLE",
        }
    }

    /// The `bytes32` role identifier used by the contract's access control.
    pub fn hash(self) -> B256 {
        keccak256(self.as_str())
    }
}

/// Decode the return data of `C`, mapping any ABI failure to
/// [`DashboardError::Decode`].
pub fn decode_returns<C: SolCall>(data: &[u8]) -> Result<C::Return> {
    C::abi_decode_returns(data, true)
        .map_err(|e| DashboardError::Decode(format!("{}: {e}", C::SIGNATURE)))
}

// ─────────────────────────────────────────────────────────
// Raw → typed
// ─────────────────────────────────────────────────────────

fn count(value: U256, field: &str) -> u64 {
    u64::try_from(value).unwrap_or_else(|_| {
        warn!("{field} does not fit in u64 ({value}); treating as 0");
        0
    })
}

fn timestamp(value: U256) -> Option<Timestamp> {
    if value.is_zero() {
        return None;
    }
    u64::try_from(value)
        .ok()
        .and_then(|v| Timestamp::try_from(v).ok())
}

fn index(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| DashboardError::Decode(format!("{field} out of range: {value}")))
}

impl From<ProjectData> for Project {
    fn from(raw: ProjectData) -> Self {
        Project {
            name: raw.name,
            description: raw.description,
            budget: Amount::from_base_units(raw.budget),
            spent: Amount::from_base_units(raw.spent),
            government: raw.government,
            is_completed: raw.isCompleted,
            expense_count: count(raw.expenseCount, "expenseCount"),
            milestone_count: count(raw.milestoneCount, "milestoneCount"),
            last_updated: timestamp(raw.lastUpdated),
            created_at: timestamp(raw.createdAt),
        }
    }
}

impl From<MilestoneData> for Milestone {
    fn from(raw: MilestoneData) -> Self {
        Milestone {
            description: raw.description,
            target_date: timestamp(raw.targetDate),
            is_completed: raw.isCompleted,
            budget: Amount::from_base_units(raw.budget),
            spent: Amount::from_base_units(raw.spent),
            created_at: timestamp(raw.createdAt),
        }
    }
}

impl TryFrom<ExpenseData> for Expense {
    type Error = DashboardError;

    fn try_from(raw: ExpenseData) -> Result<Self> {
        Ok(Expense {
            milestone_id: index(raw.milestoneId, "milestoneId")?,
            description: raw.description,
            amount: Amount::from_base_units(raw.amount),
            timestamp: timestamp(raw.timestamp),
            proof_ipfs_hash: raw.proofIPFSHash,
        })
    }
}

impl TryFrom<NotificationData> for ContractNotification {
    type Error = DashboardError;

    fn try_from(raw: NotificationData) -> Result<Self> {
        Ok(ContractNotification {
            project_id: index(raw.projectId, "projectId")?,
            message: raw.message,
            timestamp: timestamp(raw.timestamp),
            is_read: raw.isRead,
        })
    }
}

impl From<IProjectTracker::checkRolesReturn> for RoleSet {
    fn from(raw: IProjectTracker::checkRolesReturn) -> Self {
        RoleSet::from_flags([raw.isAdmin, raw.isDefaultAdmin, raw.isGovernment, raw.isAuditor])
    }
}
