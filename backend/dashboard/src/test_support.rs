//! In-memory wallet, contract and storage used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::amount::Amount;
use crate::contract::{ContractBinder, PendingTx, ProjectTracker, TrackerCall};
use crate::errors::{DashboardError, Result};
use crate::storage::{PersistedSession, SessionStorage};
use crate::types::{
    ContractNotification, Expense, Milestone, Project, RoleSet, Timestamp, TxOutcome,
};
use crate::wallet::Wallet;

pub fn amount(s: &str) -> Amount {
    s.parse().unwrap()
}

pub fn project(name: &str, budget: &str, spent: &str) -> Project {
    Project {
        name: name.to_string(),
        description: format!("{name} description"),
        budget: amount(budget),
        spent: amount(spent),
        government: Address::repeat_byte(0x99),
        is_completed: false,
        expense_count: 0,
        milestone_count: 0,
        last_updated: None,
        created_at: None,
    }
}

pub fn milestone(description: &str, target_date: Option<Timestamp>) -> Milestone {
    Milestone {
        description: description.to_string(),
        target_date,
        is_completed: false,
        budget: amount("100"),
        spent: Amount::ZERO,
        created_at: None,
    }
}

pub fn expense(description: &str, timestamp: Option<Timestamp>, milestone_id: u64) -> Expense {
    Expense {
        description: description.to_string(),
        amount: amount("1.5"),
        timestamp,
        proof_ipfs_hash: format!("Qm{description}"),
        milestone_id,
    }
}

// ─────────────────────────────────────────────────────────
// Contract
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeState {
    pub projects: Vec<Project>,
    pub milestones: HashMap<(u64, u64), Milestone>,
    pub expenses_by_milestone: HashMap<(u64, u64), Vec<Expense>>,
    pub expenses: HashMap<(u64, u64), Expense>,
    pub notifications: HashMap<Address, Vec<ContractNotification>>,
    pub roles: HashMap<Address, RoleSet>,
    pub fail_count: bool,
    pub fail_roles: bool,
    pub failing_projects: HashSet<u64>,
    pub failing_milestones: HashSet<(u64, u64)>,
    pub failing_expense_lists: HashSet<(u64, u64)>,
    pub role_checks: usize,
    pub submitted: Vec<TrackerCall>,
    pub reject_submit: Option<String>,
    pub fail_finalize: bool,
}

#[derive(Debug, Default)]
pub struct FakeTracker {
    state: Mutex<FakeState>,
}

fn unavailable(what: String) -> DashboardError {
    DashboardError::ChainCallReverted(format!("{what} unavailable"))
}

impl FakeTracker {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn grant(&self, account: Address, roles: RoleSet) {
        self.state().roles.insert(account, roles);
    }

    pub fn add_project(&self, project: Project) -> u64 {
        let mut state = self.state();
        state.projects.push(project);
        state.projects.len() as u64 - 1
    }

    pub fn add_milestone(&self, project_id: u64, milestone: Milestone) -> u64 {
        let mut state = self.state();
        let project = &mut state.projects[project_id as usize];
        let id = project.milestone_count;
        project.milestone_count += 1;
        state.milestones.insert((project_id, id), milestone);
        id
    }

    pub fn add_expense(&self, project_id: u64, expense: Expense) -> u64 {
        let mut state = self.state();
        let project = &mut state.projects[project_id as usize];
        let id = project.expense_count;
        project.expense_count += 1;
        state
            .expenses_by_milestone
            .entry((project_id, expense.milestone_id))
            .or_default()
            .push(expense.clone());
        state.expenses.insert((project_id, id), expense);
        id
    }
}

#[async_trait]
impl ProjectTracker for FakeTracker {
    async fn project_count(&self) -> Result<u64> {
        let state = self.state();
        if state.fail_count {
            return Err(DashboardError::Rpc {
                code: -32000,
                message: "node unavailable".into(),
            });
        }
        Ok(state.projects.len() as u64)
    }

    async fn get_project(&self, project_id: u64) -> Result<Project> {
        let state = self.state();
        if state.failing_projects.contains(&project_id) {
            return Err(unavailable(format!("project {project_id}")));
        }
        state
            .projects
            .get(project_id as usize)
            .cloned()
            .ok_or_else(|| unavailable(format!("project {project_id}")))
    }

    async fn get_milestone(&self, project_id: u64, milestone_id: u64) -> Result<Milestone> {
        let state = self.state();
        let key = (project_id, milestone_id);
        if state.failing_milestones.contains(&key) {
            return Err(unavailable(format!("milestone {key:?}")));
        }
        state
            .milestones
            .get(&key)
            .cloned()
            .ok_or_else(|| unavailable(format!("milestone {key:?}")))
    }

    async fn get_expense(&self, project_id: u64, expense_id: u64) -> Result<Expense> {
        self.state()
            .expenses
            .get(&(project_id, expense_id))
            .cloned()
            .ok_or_else(|| unavailable(format!("expense {expense_id}")))
    }

    async fn get_expenses_by_milestone(
        &self,
        project_id: u64,
        milestone_id: u64,
    ) -> Result<Vec<Expense>> {
        let state = self.state();
        let key = (project_id, milestone_id);
        if state.failing_expense_lists.contains(&key) {
            return Err(unavailable(format!("expenses {key:?}")));
        }
        Ok(state
            .expenses_by_milestone
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn check_roles(&self, account: Address) -> Result<RoleSet> {
        let mut state = self.state();
        state.role_checks += 1;
        if state.fail_roles {
            return Err(unavailable("roles".to_string()));
        }
        Ok(state.roles.get(&account).copied().unwrap_or_default())
    }

    async fn get_notifications(&self, account: Address) -> Result<Vec<ContractNotification>> {
        Ok(self
            .state()
            .notifications
            .get(&account)
            .cloned()
            .unwrap_or_default())
    }

    async fn submit(&self, call: TrackerCall) -> Result<PendingTx> {
        let mut state = self.state();
        if let Some(reason) = state.reject_submit.clone() {
            return Err(DashboardError::ChainCallReverted(reason));
        }
        let name = call.name();
        state.submitted.push(call);
        Ok(PendingTx {
            tx_hash: format!("0x{:064x}", state.submitted.len()),
            call: name,
        })
    }

    async fn wait(&self, pending: &PendingTx) -> Result<TxOutcome> {
        if self.state().fail_finalize {
            return Err(DashboardError::FinalizationFailed {
                tx_hash: pending.tx_hash.clone(),
                reason: "no receipt after 120s".into(),
            });
        }
        Ok(TxOutcome {
            tx_hash: pending.tx_hash.clone(),
            block_number: Some(1),
        })
    }
}

pub struct FakeBinder {
    tracker: Arc<FakeTracker>,
    bound: Mutex<Vec<Address>>,
}

impl FakeBinder {
    pub fn new(tracker: Arc<FakeTracker>) -> Self {
        Self {
            tracker,
            bound: Mutex::new(Vec::new()),
        }
    }

    /// Signers handed out so far, in order.
    pub fn bound(&self) -> Vec<Address> {
        self.bound.lock().unwrap().clone()
    }
}

impl ContractBinder for FakeBinder {
    fn bind(&self, signer: Address) -> Arc<dyn ProjectTracker> {
        self.bound.lock().unwrap().push(signer);
        self.tracker.clone()
    }
}

// ─────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct WalletState {
    /// What `eth_accounts` reports.
    pub authorized: Vec<Address>,
    /// What the user picks when prompted.
    pub selectable: Vec<Address>,
    pub reject: bool,
    pub unavailable: bool,
    pub permission_prompts: usize,
    pub chain_id: u64,
}

#[derive(Debug, Default)]
pub struct FakeWallet {
    state: Mutex<WalletState>,
}

impl FakeWallet {
    pub fn with_accounts(accounts: Vec<Address>) -> Self {
        Self {
            state: Mutex::new(WalletState {
                authorized: accounts.clone(),
                selectable: accounts,
                chain_id: 1,
                ..WalletState::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    async fn accounts(&self) -> Result<Vec<Address>> {
        let state = self.state();
        if state.unavailable {
            return Err(DashboardError::WalletUnavailable);
        }
        Ok(state.authorized.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let mut state = self.state();
        if state.reject {
            return Err(DashboardError::UserRejected);
        }
        state.authorized = state.selectable.clone();
        Ok(state.authorized.clone())
    }

    async fn request_permissions(&self) -> Result<()> {
        let mut state = self.state();
        state.permission_prompts += 1;
        if state.reject {
            return Err(DashboardError::UserRejected);
        }
        Ok(())
    }

    async fn chain_id(&self) -> Result<u64> {
        let state = self.state();
        if state.unavailable {
            return Err(DashboardError::WalletUnavailable);
        }
        Ok(state.chain_id)
    }
}

// ─────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<&'static str, String>>,
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn load(&self) -> Result<PersistedSession> {
        use crate::storage::{KEY_ACCOUNT, KEY_CONNECTED, KEY_ROLES};
        let values = self.values.lock().unwrap();
        Ok(PersistedSession {
            connected: values.get(KEY_CONNECTED).map(String::as_str) == Some("true"),
            account: values.get(KEY_ACCOUNT).cloned(),
            roles: values.get(KEY_ROLES).cloned(),
        })
    }

    async fn save_connection(&self, account: &str) -> Result<()> {
        use crate::storage::{KEY_ACCOUNT, KEY_CONNECTED};
        let mut values = self.values.lock().unwrap();
        values.insert(KEY_CONNECTED, "true".to_string());
        values.insert(KEY_ACCOUNT, account.to_string());
        Ok(())
    }

    async fn save_roles(&self, roles_json: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(crate::storage::KEY_ROLES, roles_json.to_string());
        Ok(())
    }

    async fn clear_roles(&self) -> Result<()> {
        self.values.lock().unwrap().remove(crate::storage::KEY_ROLES);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}
