//! State-changing contract calls.
//!
//! Requests arrive with decimal amount strings, are parsed exactly, gated on
//! the cached capability flags, then submitted and awaited in two steps so
//! a rejected submission is never confused with a failed finalization.

use alloy_primitives::Address;
use serde::Deserialize;
use tracing::{info, warn};

use crate::abi::ManagedRole;
use crate::amount::Amount;
use crate::contract::{ProjectTracker, TrackerCall};
use crate::errors::{DashboardError, Result};
use crate::types::{RoleSet, Timestamp, TxOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Connected,
    Government,
    Admin,
}

impl Capability {
    pub fn required_for(call: &TrackerCall) -> Self {
        match call {
            TrackerCall::CreateProject { .. }
            | TrackerCall::AddMilestone { .. }
            | TrackerCall::AddExpense { .. }
            | TrackerCall::CompleteMilestone { .. }
            | TrackerCall::CompleteProject { .. } => Self::Government,
            TrackerCall::AddAuditor { .. }
            | TrackerCall::AddGovernmentOfficial { .. }
            | TrackerCall::RevokeRole { .. } => Self::Admin,
            TrackerCall::MarkNotificationAsRead { .. } => Self::Connected,
        }
    }

    pub fn check(self, roles: RoleSet) -> Result<()> {
        let granted = match self {
            Self::Connected => true,
            Self::Government => roles.is_government_official,
            Self::Admin => roles.is_admin || roles.is_default_admin_holder,
        };
        if granted {
            Ok(())
        } else {
            Err(DashboardError::MissingCapability(match self {
                Self::Connected => "connected",
                Self::Government => "government",
                Self::Admin => "admin",
            }))
        }
    }
}

/// Gate, submit and wait for `call`.
pub async fn execute(
    contract: &dyn ProjectTracker,
    roles: RoleSet,
    call: TrackerCall,
) -> Result<TxOutcome> {
    Capability::required_for(&call).check(roles)?;

    let name = call.name();
    let pending = contract.submit(call).await.map_err(|e| {
        warn!("{name} was not submitted: {e}");
        e
    })?;
    match contract.wait(&pending).await {
        Ok(outcome) => {
            info!("{name} confirmed: {}", outcome.tx_hash);
            Ok(outcome)
        }
        Err(e) => {
            warn!("{name} ({}) did not finalize: {e}", pending.tx_hash);
            Err(e)
        }
    }
}

// ─────────────────────────────────────────────────────────
// Request bodies
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: String,
    pub budget: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMilestoneRequest {
    pub description: String,
    pub target_date: Timestamp,
    pub budget: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddExpenseRequest {
    pub description: String,
    pub amount: String,
    pub proof_hash: String,
    pub milestone_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleGrantRequest {
    pub role: ManagedRole,
    pub account: Address,
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DashboardError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

impl CreateProjectRequest {
    pub fn into_call(self) -> Result<TrackerCall> {
        required("name", &self.name)?;
        Ok(TrackerCall::CreateProject {
            budget: self.budget.parse::<Amount>()?,
            name: self.name,
            description: self.description,
        })
    }
}

impl AddMilestoneRequest {
    pub fn into_call(self, project_id: u64) -> Result<TrackerCall> {
        required("description", &self.description)?;
        if self.target_date <= 0 {
            return Err(DashboardError::InvalidInput(format!(
                "targetDate must be a unix timestamp, got {}",
                self.target_date
            )));
        }
        Ok(TrackerCall::AddMilestone {
            project_id,
            budget: self.budget.parse::<Amount>()?,
            description: self.description,
            target_date: self.target_date,
        })
    }
}

impl AddExpenseRequest {
    pub fn into_call(self, project_id: u64) -> Result<TrackerCall> {
        required("description", &self.description)?;
        Ok(TrackerCall::AddExpense {
            project_id,
            amount: self.amount.parse::<Amount>()?,
            description: self.description,
            proof_hash: self.proof_hash,
            milestone_id: self.milestone_id,
        })
    }
}

impl RoleGrantRequest {
    pub fn grant(self) -> TrackerCall {
        match self.role {
            ManagedRole::Auditor => TrackerCall::AddAuditor {
                account: self.account,
            },
            ManagedRole::Government => TrackerCall::AddGovernmentOfficial {
                account: self.account,
            },
        }
    }

    pub fn revoke(self) -> TrackerCall {
        TrackerCall::RevokeRole {
            role: self.role.hash(),
            account: self.account,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{amount, FakeTracker};

    fn government() -> RoleSet {
        RoleSet::from_flags([false, false, true, false])
    }

    fn admin() -> RoleSet {
        RoleSet::from_flags([true, false, false, false])
    }

    #[tokio::test]
    async fn government_call_is_submitted_and_confirmed() {
        let fake = FakeTracker::default();
        let call = CreateProjectRequest {
            name: "Road".into(),
            description: "North".into(),
            budget: "1000.5".into(),
        }
        .into_call()
        .unwrap();

        let outcome = execute(&fake, government(), call).await.unwrap();
        assert_eq!(outcome.block_number, Some(1));

        let submitted = fake.state().submitted.clone();
        assert_eq!(
            submitted,
            vec![TrackerCall::CreateProject {
                name: "Road".into(),
                description: "North".into(),
                budget: amount("1000.5"),
            }]
        );
    }

    #[tokio::test]
    async fn missing_capability_never_reaches_the_chain() {
        let fake = FakeTracker::default();
        let call = TrackerCall::CompleteProject { project_id: 0 };

        let err = execute(&fake, admin(), call).await.unwrap_err();
        assert!(matches!(err, DashboardError::MissingCapability("government")));

        let revoke = RoleGrantRequest {
            role: ManagedRole::Auditor,
            account: Address::repeat_byte(7),
        }
        .revoke();
        assert!(execute(&fake, government(), revoke).await.is_err());
        assert!(fake.state().submitted.is_empty());
    }

    #[tokio::test]
    async fn inbox_read_needs_only_a_connection() {
        let fake = FakeTracker::default();
        let call = TrackerCall::MarkNotificationAsRead { index: 2 };
        assert!(execute(&fake, RoleSet::NONE, call).await.is_ok());
    }

    #[tokio::test]
    async fn default_admin_may_manage_roles() {
        let fake = FakeTracker::default();
        let grant = RoleGrantRequest {
            role: ManagedRole::Government,
            account: Address::repeat_byte(7),
        }
        .grant();
        let roles = RoleSet::from_flags([false, true, false, false]);
        execute(&fake, roles, grant).await.unwrap();
        assert_eq!(
            fake.state().submitted[0],
            TrackerCall::AddGovernmentOfficial {
                account: Address::repeat_byte(7)
            }
        );
    }

    #[tokio::test]
    async fn submission_and_finalization_failures_are_distinct() {
        let fake = FakeTracker::default();
        let call = TrackerCall::CompleteMilestone {
            project_id: 0,
            milestone_id: 0,
        };

        fake.state().reject_submit = Some("not owner".into());
        let err = execute(&fake, government(), call.clone()).await.unwrap_err();
        assert!(matches!(err, DashboardError::ChainCallReverted(_)));

        fake.state().reject_submit = None;
        fake.state().fail_finalize = true;
        let err = execute(&fake, government(), call).await.unwrap_err();
        assert!(matches!(err, DashboardError::FinalizationFailed { .. }));
    }

    #[test]
    fn malformed_amounts_are_rejected_before_submission() {
        let bad = AddExpenseRequest {
            description: "cement".into(),
            amount: "1.2.3".into(),
            proof_hash: "Qm".into(),
            milestone_id: 0,
        };
        assert!(matches!(
            bad.into_call(0),
            Err(DashboardError::InvalidAmount(_))
        ));

    }

    #[test]
    fn missing_fields_are_invalid_input_not_amounts() {
        let unnamed = CreateProjectRequest {
            name: "  ".into(),
            description: "d".into(),
            budget: "1".into(),
        };
        let err = unnamed.into_call().unwrap_err();
        assert!(matches!(err, DashboardError::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: name must not be empty");
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidInput);

        let undated = AddMilestoneRequest {
            description: "walls".into(),
            target_date: 0,
            budget: "1".into(),
        };
        assert!(matches!(
            undated.into_call(0),
            Err(DashboardError::InvalidInput(_))
        ));
    }

    #[test]
    fn request_bodies_use_camel_case() {
        let body: AddExpenseRequest = serde_json::from_str(
            r#"{"description":"fuel","amount":"0.25","proofHash":"QmX","milestoneId":3}"#,
        )
        .unwrap();
        let call = body.into_call(4).unwrap();
        assert_eq!(
            call,
            TrackerCall::AddExpense {
                project_id: 4,
                description: "fuel".into(),
                amount: amount("0.25"),
                proof_hash: "QmX".into(),
                milestone_id: 3,
            }
        );

        let grant: RoleGrantRequest = serde_json::from_str(&format!(
            r#"{{"role":"auditor","account":"{}"}}"#,
            Address::repeat_byte(1)
        ))
        .unwrap();
        assert_eq!(grant.role, ManagedRole::Auditor);
    }
}
