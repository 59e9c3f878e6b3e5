//! Chain client binding for the project tracker contract.
//!
//! [`ProjectTracker`] is the fixed method set every other module talks to.
//! [`RpcTracker`] implements it over Ethereum JSON-RPC; [`BoundContract`]
//! wraps an implementation with the session generation it was bound under so
//! calls through a superseded handle fail with [`DashboardError::StaleHandle`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::abi::{decode_returns, IProjectTracker};
use crate::amount::Amount;
use crate::errors::{DashboardError, Result};
use crate::rpc::{from_hex, quantity, to_hex, RpcClient};
use crate::types::{
    ContractNotification, Expense, Milestone, Project, RoleSet, Timestamp, TxOutcome,
};

#[async_trait]
pub trait ProjectTracker: Send + Sync {
    async fn project_count(&self) -> Result<u64>;
    async fn get_project(&self, project_id: u64) -> Result<Project>;
    async fn get_milestone(&self, project_id: u64, milestone_id: u64) -> Result<Milestone>;
    /// Expense by its per-project index.
    async fn get_expense(&self, project_id: u64, expense_id: u64) -> Result<Expense>;
    /// Expenses recorded against one milestone, in contract order.
    async fn get_expenses_by_milestone(
        &self,
        project_id: u64,
        milestone_id: u64,
    ) -> Result<Vec<Expense>>;
    async fn check_roles(&self, account: Address) -> Result<RoleSet>;
    async fn get_notifications(&self, account: Address) -> Result<Vec<ContractNotification>>;

    /// First step of a state change: hand the call to the signer.
    async fn submit(&self, call: TrackerCall) -> Result<PendingTx>;
    /// Second step: wait until the submitted call is mined.
    async fn wait(&self, pending: &PendingTx) -> Result<TxOutcome>;
}

/// Produces a contract handle bound to a signer.
pub trait ContractBinder: Send + Sync {
    fn bind(&self, signer: Address) -> Arc<dyn ProjectTracker>;
}

/// State-changing calls of the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    CreateProject {
        name: String,
        description: String,
        budget: Amount,
    },
    AddMilestone {
        project_id: u64,
        description: String,
        target_date: Timestamp,
        budget: Amount,
    },
    AddExpense {
        project_id: u64,
        description: String,
        amount: Amount,
        proof_hash: String,
        milestone_id: u64,
    },
    CompleteMilestone {
        project_id: u64,
        milestone_id: u64,
    },
    CompleteProject {
        project_id: u64,
    },
    MarkNotificationAsRead {
        index: u64,
    },
    AddAuditor {
        account: Address,
    },
    AddGovernmentOfficial {
        account: Address,
    },
    RevokeRole {
        role: B256,
        account: Address,
    },
}

impl TrackerCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateProject { .. } => "createProject",
            Self::AddMilestone { .. } => "addMilestone",
            Self::AddExpense { .. } => "addExpense",
            Self::CompleteMilestone { .. } => "completeMilestone",
            Self::CompleteProject { .. } => "completeProject",
            Self::MarkNotificationAsRead { .. } => "markNotificationAsRead",
            Self::AddAuditor { .. } => "addAuditor",
            Self::AddGovernmentOfficial { .. } => "addGovernmentOfficial",
            Self::RevokeRole { .. } => "revokeRole",
        }
    }

    /// ABI calldata including the selector.
    pub fn calldata(&self) -> Vec<u8> {
        use IProjectTracker as I;
        match self.clone() {
            Self::CreateProject {
                name,
                description,
                budget,
            } => I::createProjectCall {
                name,
                description,
                budget: budget.base_units(),
            }
            .abi_encode(),
            Self::AddMilestone {
                project_id,
                description,
                target_date,
                budget,
            } => I::addMilestoneCall {
                projectId: U256::from(project_id),
                description,
                targetDate: U256::from(target_date.max(0) as u64),
                budget: budget.base_units(),
            }
            .abi_encode(),
            Self::AddExpense {
                project_id,
                description,
                amount,
                proof_hash,
                milestone_id,
            } => I::addExpenseCall {
                projectId: U256::from(project_id),
                description,
                amount: amount.base_units(),
                proofIPFSHash: proof_hash,
                milestoneId: U256::from(milestone_id),
            }
            .abi_encode(),
            Self::CompleteMilestone {
                project_id,
                milestone_id,
            } => I::completeMilestoneCall {
                projectId: U256::from(project_id),
                milestoneId: U256::from(milestone_id),
            }
            .abi_encode(),
            Self::CompleteProject { project_id } => I::completeProjectCall {
                projectId: U256::from(project_id),
            }
            .abi_encode(),
            Self::MarkNotificationAsRead { index } => I::markNotificationAsReadCall {
                index: U256::from(index),
            }
            .abi_encode(),
            Self::AddAuditor { account } => I::addAuditorCall { account }.abi_encode(),
            Self::AddGovernmentOfficial { account } => {
                I::addGovernmentOfficialCall { account }.abi_encode()
            }
            Self::RevokeRole { role, account } => I::revokeRoleCall { role, account }.abi_encode(),
        }
    }
}

/// A submitted but not yet finalized transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub tx_hash: String,
    pub call: &'static str,
}

// ─────────────────────────────────────────────────────────
// JSON-RPC implementation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RpcTracker {
    rpc: RpcClient,
    contract: Address,
    from: Address,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
}

impl RpcTracker {
    async fn call<C: SolCall + Send>(&self, call: C) -> Result<C::Return> {
        let data = call.abi_encode();
        let result = self
            .rpc
            .request(
                "eth_call",
                json!([
                    {
                        "from": self.from.to_string(),
                        "to": self.contract.to_string(),
                        "data": to_hex(&data),
                    },
                    "latest"
                ]),
            )
            .await?;
        decode_returns::<C>(&from_hex(&result)?)
    }

    async fn fetch_receipt(&self, tx_hash: &str) -> Result<Option<Value>> {
        let receipt = self
            .rpc
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        Ok((!receipt.is_null()).then_some(receipt))
    }
}

#[async_trait]
impl ProjectTracker for RpcTracker {
    async fn project_count(&self) -> Result<u64> {
        let ret = self.call(IProjectTracker::projectCountCall {}).await?;
        u64::try_from(ret._0)
            .map_err(|_| DashboardError::Decode(format!("projectCount out of range: {}", ret._0)))
    }

    async fn get_project(&self, project_id: u64) -> Result<Project> {
        let ret = self
            .call(IProjectTracker::getProjectCall {
                projectId: U256::from(project_id),
            })
            .await?;
        Ok(ret._0.into())
    }

    async fn get_milestone(&self, project_id: u64, milestone_id: u64) -> Result<Milestone> {
        let ret = self
            .call(IProjectTracker::getMilestoneCall {
                projectId: U256::from(project_id),
                milestoneId: U256::from(milestone_id),
            })
            .await?;
        Ok(ret._0.into())
    }

    async fn get_expense(&self, project_id: u64, expense_id: u64) -> Result<Expense> {
        let ret = self
            .call(IProjectTracker::getExpenseCall {
                projectId: U256::from(project_id),
                expenseId: U256::from(expense_id),
            })
            .await?;
        ret._0.try_into()
    }

    async fn get_expenses_by_milestone(
        &self,
        project_id: u64,
        milestone_id: u64,
    ) -> Result<Vec<Expense>> {
        let ret = self
            .call(IProjectTracker::getExpensesByMilestoneCall {
                projectId: U256::from(project_id),
                milestoneId: U256::from(milestone_id),
            })
            .await?;
        ret._0.into_iter().map(Expense::try_from).collect()
    }

    async fn check_roles(&self, account: Address) -> Result<RoleSet> {
        let ret = self
            .call(IProjectTracker::checkRolesCall { account })
            .await?;
        Ok(ret.into())
    }

    async fn get_notifications(&self, account: Address) -> Result<Vec<ContractNotification>> {
        let ret = self
            .call(IProjectTracker::getNotificationsCall { user: account })
            .await?;
        ret._0
            .into_iter()
            .map(ContractNotification::try_from)
            .collect()
    }

    async fn submit(&self, call: TrackerCall) -> Result<PendingTx> {
        let result = self
            .rpc
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": self.from.to_string(),
                    "to": self.contract.to_string(),
                    "data": to_hex(&call.calldata()),
                }]),
            )
            .await
            .map_err(|e| match e {
                DashboardError::UserRejected | DashboardError::ChainCallReverted(_) => e,
                other => DashboardError::SubmissionRejected(other.to_string()),
            })?;

        let tx_hash = result
            .as_str()
            .ok_or_else(|| DashboardError::Decode(format!("expected tx hash, got {result}")))?
            .to_string();
        info!("{} submitted as {tx_hash}", call.name());
        Ok(PendingTx {
            tx_hash,
            call: call.name(),
        })
    }

    async fn wait(&self, pending: &PendingTx) -> Result<TxOutcome> {
        let deadline = Instant::now() + self.receipt_timeout;
        let failed = |reason: String| DashboardError::FinalizationFailed {
            tx_hash: pending.tx_hash.clone(),
            reason,
        };

        loop {
            let receipt = self
                .fetch_receipt(&pending.tx_hash)
                .await
                .map_err(|e| failed(e.to_string()))?;

            if let Some(receipt) = receipt {
                let outcome = receipt_outcome(pending, &receipt);
                if let Ok(outcome) = &outcome {
                    info!("{} finalized in block {:?}", pending.call, outcome.block_number);
                }
                return outcome;
            }

            if Instant::now() >= deadline {
                return Err(failed(format!(
                    "no receipt after {}s",
                    self.receipt_timeout.as_secs()
                )));
            }
            debug!("{} still pending", pending.tx_hash);
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

/// Classify a mined receipt.
///
/// Status `0x1` is success and `0x0` a contract-level revert. A receipt
/// without a readable status says nothing about the effect.
fn receipt_outcome(pending: &PendingTx, receipt: &Value) -> Result<TxOutcome> {
    let status = receipt.get("status").cloned().unwrap_or(Value::Null);
    let block_number = receipt.get("blockNumber").and_then(|b| quantity(b).ok());
    match quantity(&status) {
        Ok(1) => Ok(TxOutcome {
            tx_hash: pending.tx_hash.clone(),
            block_number,
        }),
        Ok(0) => Err(DashboardError::ChainCallReverted(format!(
            "{} ({}) reverted in block {block_number:?}",
            pending.call, pending.tx_hash
        ))),
        _ => Err(DashboardError::FinalizationFailed {
            tx_hash: pending.tx_hash.clone(),
            reason: format!("receipt has unreadable status {status}"),
        }),
    }
}

/// Binds [`RpcTracker`] instances for a fixed contract address.
#[derive(Debug, Clone)]
pub struct RpcBinder {
    pub rpc: RpcClient,
    pub contract: Address,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl ContractBinder for RpcBinder {
    fn bind(&self, signer: Address) -> Arc<dyn ProjectTracker> {
        Arc::new(RpcTracker {
            rpc: self.rpc.clone(),
            contract: self.contract,
            from: signer,
            receipt_poll_interval: self.receipt_poll_interval,
            receipt_timeout: self.receipt_timeout,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Generation-checked handle
// ─────────────────────────────────────────────────────────

/// Shared counter identifying the session's current contract handle.
#[derive(Debug, Clone, Default)]
pub struct HandleGeneration(Arc<AtomicU64>);

impl HandleGeneration {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Invalidate every handle issued so far and return the new generation.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Clone)]
pub struct BoundContract {
    inner: Arc<dyn ProjectTracker>,
    signer: Address,
    generation: u64,
    current: HandleGeneration,
}

impl fmt::Debug for BoundContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundContract")
            .field("signer", &self.signer)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl BoundContract {
    pub fn new(
        inner: Arc<dyn ProjectTracker>,
        signer: Address,
        generation: u64,
        current: HandleGeneration,
    ) -> Self {
        Self {
            inner,
            signer,
            generation,
            current,
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.current() == self.generation
    }

    fn ensure_current(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(DashboardError::StaleHandle)
        }
    }

    /// Reads are checked before and after: a result produced while the
    /// handle was swapped out is discarded.
    async fn read<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.ensure_current()?;
        let out = fut.await;
        self.ensure_current()?;
        out
    }
}

#[async_trait]
impl ProjectTracker for BoundContract {
    async fn project_count(&self) -> Result<u64> {
        self.read(self.inner.project_count()).await
    }

    async fn get_project(&self, project_id: u64) -> Result<Project> {
        self.read(self.inner.get_project(project_id)).await
    }

    async fn get_milestone(&self, project_id: u64, milestone_id: u64) -> Result<Milestone> {
        self.read(self.inner.get_milestone(project_id, milestone_id))
            .await
    }

    async fn get_expense(&self, project_id: u64, expense_id: u64) -> Result<Expense> {
        self.read(self.inner.get_expense(project_id, expense_id))
            .await
    }

    async fn get_expenses_by_milestone(
        &self,
        project_id: u64,
        milestone_id: u64,
    ) -> Result<Vec<Expense>> {
        self.read(self.inner.get_expenses_by_milestone(project_id, milestone_id))
            .await
    }

    async fn check_roles(&self, account: Address) -> Result<RoleSet> {
        self.read(self.inner.check_roles(account)).await
    }

    async fn get_notifications(&self, account: Address) -> Result<Vec<ContractNotification>> {
        self.read(self.inner.get_notifications(account)).await
    }

    async fn submit(&self, call: TrackerCall) -> Result<PendingTx> {
        // Checked up front only; a call handed to the signer is never stale.
        self.ensure_current()?;
        self.inner.submit(call).await
    }

    async fn wait(&self, pending: &PendingTx) -> Result<TxOutcome> {
        self.inner.wait(pending).await
    }
}
