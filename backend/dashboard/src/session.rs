//! Wallet session: one connection, one bound contract handle.
//!
//! [`SessionStore`] is the only writer of session state. It is driven either
//! directly (tests, startup) or through [`spawn`], which runs it as a task
//! that receives [`SessionCommand`]s and [`WalletEvent`]s one at a time, so
//! no two handlers ever race on the same state.
//!
//! Observers read [`SessionSnapshot`]s from a `watch` channel and
//! [`SessionNotice`]s from a `broadcast` channel. A snapshot is published
//! only once a transition has completed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contract::{BoundContract, ContractBinder, HandleGeneration};
use crate::errors::{DashboardError, ErrorKind, Result};
use crate::roles::RoleCache;
use crate::storage::SessionStorage;
use crate::types::RoleSet;
use crate::wallet::{Wallet, WalletEvent};

const STALE_RETRIES: u32 = 3;
const STALE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub address: Option<Address>,
    pub roles: RoleSet,
    pub connecting: bool,
    pub last_error: Option<ErrorKind>,
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Connected(Address),
    AccountChanged(Address),
    Disconnected,
    /// In-memory state was dropped; views must refetch everything.
    ReloadRequired,
}

pub struct SessionStore {
    wallet: Option<Arc<dyn Wallet>>,
    binder: Arc<dyn ContractBinder>,
    storage: Arc<dyn SessionStorage>,
    roles: RoleCache,
    generation: HandleGeneration,
    address: Option<Address>,
    contract: Option<BoundContract>,
    connecting: bool,
    last_error: Option<ErrorKind>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    contract_tx: watch::Sender<Option<BoundContract>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionStore {
    pub fn new(
        wallet: Option<Arc<dyn Wallet>>,
        binder: Arc<dyn ContractBinder>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        let (contract_tx, _) = watch::channel(None);
        let (notices, _) = broadcast::channel(32);
        Self {
            wallet,
            binder,
            storage,
            roles: RoleCache::default(),
            generation: HandleGeneration::default(),
            address: None,
            contract: None,
            connecting: false,
            last_error: None,
            snapshot_tx,
            contract_tx,
            notices,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            address: self.address,
            roles: self.roles.roles(),
            connecting: self.connecting,
            last_error: self.last_error,
            generation: self.generation.current(),
        }
    }

    pub fn contract(&self) -> Option<BoundContract> {
        self.contract.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    fn publish(&self) {
        self.contract_tx.send_replace(self.contract.clone());
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn bind(&self, account: Address) -> BoundContract {
        let generation = self.generation.advance();
        debug!("binding contract for {account} (generation {generation})");
        BoundContract::new(
            self.binder.bind(account),
            account,
            generation,
            self.generation.clone(),
        )
    }

    /// Make `account` the live session and refresh its roles.
    async fn install(&mut self, account: Address, contract: BoundContract) {
        if let Err(e) = self
            .roles
            .refresh(account, &contract, self.storage.as_ref())
            .await
        {
            warn!("Role refresh for {account} failed; capabilities cleared: {e}");
        }
        self.address = Some(account);
        self.contract = Some(contract);
        self.last_error = None;
    }

    fn drop_in_memory(&mut self) {
        self.generation.advance();
        self.address = None;
        self.contract = None;
        self.roles.reset();
    }

    // ─────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────

    /// Ask the wallet for an account and bind a new session to it.
    pub async fn connect(&mut self) -> Result<Address> {
        let Some(wallet) = self.wallet.clone() else {
            self.last_error = Some(ErrorKind::WalletUnavailable);
            self.publish();
            return Err(DashboardError::WalletUnavailable);
        };

        self.connecting = true;
        self.last_error = None;
        self.publish();

        let result = self.establish(wallet.as_ref()).await;
        self.connecting = false;

        match result {
            Ok(account) => {
                info!("Wallet connected: {account}");
                self.publish();
                self.notify(SessionNotice::Connected(account));
                Ok(account)
            }
            Err(e) => {
                warn!("Error connecting wallet: {e}");
                if self.address.is_none() {
                    self.clear_persisted().await;
                }
                self.last_error = Some(e.kind());
                self.publish();
                Err(e)
            }
        }
    }

    async fn establish(&mut self, wallet: &dyn Wallet) -> Result<Address> {
        // Already authorised: re-prompt so the user can pick another account.
        if !wallet.accounts().await?.is_empty() {
            wallet.request_permissions().await?;
        }
        let accounts = wallet.request_accounts().await?;
        let account = *accounts.first().ok_or(DashboardError::NoAccounts)?;

        self.storage.save_connection(&account.to_string()).await?;
        let contract = self.bind(account);
        self.install(account, contract).await;
        Ok(account)
    }

    /// Silently rebuild a session a previous run left connected.
    ///
    /// Returns whether a session is live afterwards. A wallet that reports
    /// no accounts (or cannot be asked) clears the persisted hints.
    pub async fn restore_if_possible(&mut self) -> Result<bool> {
        let persisted = self.storage.load().await?;
        let Some(saved_account) = persisted.account.filter(|_| persisted.connected) else {
            return Ok(false);
        };
        let Some(wallet) = self.wallet.clone() else {
            debug!("No wallet available; skipping session restore");
            return Ok(false);
        };

        let accounts = match wallet.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Error checking accounts during restore: {e}");
                self.clear_session().await;
                return Ok(false);
            }
        };
        let Some(&account) = accounts.first() else {
            info!("Wallet no longer authorises any account; clearing session");
            self.clear_session().await;
            return Ok(false);
        };

        let contract = self.bind(account);
        let same_account = saved_account.parse::<Address>().ok() == Some(account);
        let cached = persisted
            .roles
            .filter(|_| same_account)
            .is_some_and(|raw| self.roles.restore(&raw));

        if cached {
            self.address = Some(account);
            self.contract = Some(contract);
            self.last_error = None;
        } else {
            if !same_account {
                if let Err(e) = self.storage.save_connection(&account.to_string()).await {
                    warn!("Could not persist restored account: {e}");
                }
            }
            self.install(account, contract).await;
        }

        info!("Session restored for {account}");
        self.publish();
        self.notify(SessionNotice::Connected(account));
        Ok(true)
    }

    /// Forget the session and reload.
    pub async fn disconnect(&mut self) {
        info!("Disconnecting wallet session");
        self.clear_persisted().await;
        self.reload().await;
    }

    /// Equivalent of a full page reload: drop everything held in memory and
    /// run the startup restore path again.
    pub async fn reload(&mut self) {
        self.drop_in_memory();
        self.last_error = None;
        self.publish();
        self.notify(SessionNotice::ReloadRequired);

        if let Err(e) = self.restore_if_possible().await {
            warn!("Session restore after reload failed: {e}");
        }
    }

    /// Clear persisted hints and in-memory state without reloading.
    async fn clear_session(&mut self) {
        let was_connected = self.address.is_some();
        self.clear_persisted().await;
        self.drop_in_memory();
        self.publish();
        if was_connected {
            self.notify(SessionNotice::Disconnected);
        }
    }

    async fn clear_persisted(&self) {
        if let Err(e) = self.storage.clear().await {
            warn!("Could not clear persisted session: {e}");
        }
    }

    /// Re-query the capability flags of the live session.
    pub async fn refresh_roles(&mut self) -> Result<RoleSet> {
        let (Some(account), Some(contract)) = (self.address, self.contract.clone()) else {
            return Err(DashboardError::NotConnected);
        };
        let result = self
            .roles
            .refresh(account, &contract, self.storage.as_ref())
            .await;
        self.publish();
        result
    }

    /// React to a wallet notification.
    pub async fn apply(&mut self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first() {
                Some(&account) if self.address.is_some() => {
                    if self.address == Some(account) {
                        return;
                    }
                    info!("Wallet account changed to {account}");
                    if let Err(e) = self.switch_account(account).await {
                        warn!("Error handling account change: {e}");
                        self.clear_session().await;
                    }
                }
                Some(account) => {
                    debug!("Ignoring account change to {account}: no live session");
                }
                None => {
                    info!("Wallet revoked all accounts");
                    self.clear_session().await;
                }
            },
            WalletEvent::ChainChanged(chain_id) => {
                info!("Wallet switched to chain {chain_id}; reloading session");
                self.reload().await;
            }
            WalletEvent::Disconnect => {
                info!("Wallet disconnected");
                self.disconnect().await;
            }
        }
    }

    async fn switch_account(&mut self, account: Address) -> Result<()> {
        self.storage.save_connection(&account.to_string()).await?;
        let contract = self.bind(account);
        self.install(account, contract).await;
        self.publish();
        self.notify(SessionNotice::AccountChanged(account));
        Ok(())
    }

    async fn handle(&mut self, command: SessionCommand) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            SessionCommand::Connect(reply) => {
                let _ = reply.send(self.connect().await);
            }
            SessionCommand::Restore(reply) => {
                let _ = reply.send(self.restore_if_possible().await);
            }
            SessionCommand::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::RefreshRoles(reply) => {
                let _ = reply.send(self.refresh_roles().await);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Session task
// ─────────────────────────────────────────────────────────

pub enum SessionCommand {
    Connect(oneshot::Sender<Result<Address>>),
    Restore(oneshot::Sender<Result<bool>>),
    Disconnect(oneshot::Sender<()>),
    RefreshRoles(oneshot::Sender<Result<RoleSet>>),
}

/// Cloneable access to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    contract: watch::Receiver<Option<BoundContract>>,
    notices: broadcast::Sender<SessionNotice>,
}

/// Run `store` as the single owner of session state.
pub fn spawn(
    store: SessionStore,
    wallet_events: mpsc::Receiver<WalletEvent>,
    cancel: CancellationToken,
) -> (SessionHandle, JoinHandle<()>) {
    let (commands, command_rx) = mpsc::channel(16);
    let handle = SessionHandle {
        commands,
        snapshot: store.subscribe(),
        contract: store.contract_tx.subscribe(),
        notices: store.notices.clone(),
    };
    let task = tokio::spawn(run(store, command_rx, wallet_events, cancel));
    (handle, task)
}

async fn run(
    mut store: SessionStore,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut wallet_events: mpsc::Receiver<WalletEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => store.handle(command).await,
            Some(event) = wallet_events.recv() => store.apply(event).await,
            else => break,
        }
    }
    info!("Session task stopped");
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| DashboardError::NotConnected)?;
        rx.await.map_err(|_| DashboardError::NotConnected)
    }

    pub async fn connect(&self) -> Result<Address> {
        self.request(SessionCommand::Connect).await?
    }

    pub async fn restore(&self) -> Result<bool> {
        self.request(SessionCommand::Restore).await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(SessionCommand::Disconnect).await
    }

    pub async fn refresh_roles(&self) -> Result<RoleSet> {
        self.request(SessionCommand::RefreshRoles).await?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn roles(&self) -> RoleSet {
        self.snapshot.borrow().roles
    }

    /// The current contract handle.
    pub fn contract(&self) -> Result<BoundContract> {
        self.contract
            .borrow()
            .clone()
            .ok_or(DashboardError::NotConnected)
    }

    /// Run `op` against the current handle, retrying with the replacement
    /// when the handle is superseded mid-flight.
    pub async fn with_contract<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(BoundContract) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            let contract = self.contract()?;
            let generation = contract.generation();
            match op(contract).await {
                Err(DashboardError::StaleHandle) if attempts < STALE_RETRIES => {
                    attempts += 1;
                    debug!("handle {generation} went stale; retry {attempts}/{STALE_RETRIES}");
                    let mut rx = self.contract.clone();
                    let published = rx.borrow_and_update().as_ref().map(BoundContract::generation);
                    if published == Some(generation) {
                        let _ = tokio::time::timeout(STALE_WAIT, rx.changed()).await;
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ProjectTracker;
    use crate::storage::PersistedSession;
    use crate::test_support::{FakeBinder, FakeTracker, FakeWallet, MemoryStorage};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    struct Harness {
        wallet: Arc<FakeWallet>,
        tracker: Arc<FakeTracker>,
        binder: Arc<FakeBinder>,
        storage: Arc<MemoryStorage>,
    }

    impl Harness {
        fn new(wallet: FakeWallet) -> Self {
            let tracker = Arc::new(FakeTracker::default());
            Self {
                wallet: Arc::new(wallet),
                binder: Arc::new(FakeBinder::new(tracker.clone())),
                tracker,
                storage: Arc::new(MemoryStorage::default()),
            }
        }

        fn store(&self) -> SessionStore {
            SessionStore::new(
                Some(self.wallet.clone()),
                self.binder.clone(),
                self.storage.clone(),
            )
        }
    }

    #[tokio::test]
    async fn connect_uses_first_account_and_checks_roles_once() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1), addr(2)]));
        h.tracker
            .grant(addr(1), RoleSet::from_flags([false, false, true, false]));
        let mut store = h.store();

        let account = store.connect().await.unwrap();

        assert_eq!(account, addr(1));
        let snap = store.snapshot();
        assert_eq!(snap.address, Some(addr(1)));
        assert!(snap.roles.is_government_official);
        assert!(!snap.connecting);
        assert_eq!(h.tracker.state().role_checks, 1);
        assert_eq!(h.binder.bound(), vec![addr(1)]);

        let persisted = h.storage.load().await.unwrap();
        assert!(persisted.connected);
        assert_eq!(persisted.account, Some(addr(1).to_string()));
    }

    #[tokio::test]
    async fn connect_reprompts_when_already_authorised() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        h.wallet.state().selectable = vec![addr(3)];
        let mut store = h.store();

        assert_eq!(store.connect().await.unwrap(), addr(3));
        assert_eq!(h.wallet.state().permission_prompts, 1);
    }

    #[tokio::test]
    async fn connect_skips_reprompt_for_fresh_wallet() {
        let h = Harness::new(FakeWallet::with_accounts(vec![]));
        h.wallet.state().selectable = vec![addr(4)];
        let mut store = h.store();

        assert_eq!(store.connect().await.unwrap(), addr(4));
        assert_eq!(h.wallet.state().permission_prompts, 0);
    }

    #[tokio::test]
    async fn connect_without_wallet_is_unavailable() {
        let h = Harness::new(FakeWallet::default());
        let mut store = SessionStore::new(None, h.binder.clone(), h.storage.clone());

        assert!(matches!(
            store.connect().await,
            Err(DashboardError::WalletUnavailable)
        ));
        assert_eq!(
            store.snapshot().last_error,
            Some(ErrorKind::WalletUnavailable)
        );
    }

    #[tokio::test]
    async fn rejected_prompt_clears_persisted_state() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        h.storage.save_connection("stale").await.unwrap();
        h.wallet.state().reject = true;
        let mut store = h.store();

        assert!(matches!(
            store.connect().await,
            Err(DashboardError::UserRejected)
        ));
        assert_eq!(h.storage.load().await.unwrap(), PersistedSession::default());
        let snap = store.snapshot();
        assert!(!snap.is_connected());
        assert_eq!(snap.last_error, Some(ErrorKind::UserRejected));
        assert!(ErrorKind::UserRejected.is_retryable());
    }

    #[tokio::test]
    async fn empty_authorisation_is_no_accounts() {
        let h = Harness::new(FakeWallet::with_accounts(vec![]));
        let mut store = h.store();

        assert!(matches!(
            store.connect().await,
            Err(DashboardError::NoAccounts)
        ));
        assert!(h.binder.bound().is_empty());
    }

    #[tokio::test]
    async fn restore_with_zero_accounts_disconnects() {
        let h = Harness::new(FakeWallet::with_accounts(vec![]));
        h.storage.save_connection(&addr(1).to_string()).await.unwrap();
        h.storage.save_roles("{}").await.unwrap();
        let mut store = h.store();

        assert!(!store.restore_if_possible().await.unwrap());
        assert!(!store.snapshot().is_connected());
        assert_eq!(h.storage.load().await.unwrap(), PersistedSession::default());
    }

    #[tokio::test]
    async fn restore_without_prior_consent_does_nothing() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let mut store = h.store();

        assert!(!store.restore_if_possible().await.unwrap());
        assert!(h.binder.bound().is_empty());
    }

    #[tokio::test]
    async fn restore_uses_cached_roles() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let cached = RoleSet::from_flags([true, false, false, true]);
        h.storage.save_connection(&addr(1).to_string()).await.unwrap();
        h.storage
            .save_roles(&serde_json::to_string(&cached).unwrap())
            .await
            .unwrap();
        let mut store = h.store();

        assert!(store.restore_if_possible().await.unwrap());
        assert_eq!(store.snapshot().roles, cached);
        assert_eq!(h.tracker.state().role_checks, 0);
        assert_eq!(h.wallet.state().permission_prompts, 0);
    }

    #[tokio::test]
    async fn restore_refetches_corrupt_roles() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        h.tracker
            .grant(addr(1), RoleSet::from_flags([false, false, false, true]));
        h.storage.save_connection(&addr(1).to_string()).await.unwrap();
        h.storage.save_roles("not-json").await.unwrap();
        let mut store = h.store();

        assert!(store.restore_if_possible().await.unwrap());
        assert!(store.snapshot().roles.is_auditor);
        assert_eq!(h.tracker.state().role_checks, 1);
    }

    #[tokio::test]
    async fn account_change_rebinds_and_refreshes_roles() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        h.tracker
            .grant(addr(2), RoleSet::from_flags([true, false, false, false]));
        let mut store = h.store();
        store.connect().await.unwrap();
        let old = store.contract().unwrap();

        store
            .apply(WalletEvent::AccountsChanged(vec![addr(2)]))
            .await;

        assert_eq!(store.snapshot().address, Some(addr(2)));
        assert!(store.snapshot().roles.is_admin);
        assert!(!old.is_current());
        assert!(store.contract().unwrap().is_current());
        assert_eq!(store.contract().unwrap().signer(), addr(2));
        assert_eq!(h.tracker.state().role_checks, 2);
        assert_eq!(
            h.storage.load().await.unwrap().account,
            Some(addr(2).to_string())
        );
    }

    #[tokio::test]
    async fn emptied_account_list_clears_session() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let mut store = h.store();
        store.connect().await.unwrap();
        let mut notices = store.notices();

        store.apply(WalletEvent::AccountsChanged(vec![])).await;

        assert!(!store.snapshot().is_connected());
        assert_eq!(store.snapshot().roles, RoleSet::NONE);
        assert_eq!(notices.recv().await.unwrap(), SessionNotice::Disconnected);
    }

    #[tokio::test]
    async fn account_change_without_session_is_ignored() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let mut store = h.store();

        store
            .apply(WalletEvent::AccountsChanged(vec![addr(2)]))
            .await;
        assert!(!store.snapshot().is_connected());
        assert!(h.binder.bound().is_empty());
    }

    #[tokio::test]
    async fn chain_change_reloads_with_new_handle() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let mut store = h.store();
        store.connect().await.unwrap();
        let old = store.contract().unwrap();
        let mut notices = store.notices();

        store.apply(WalletEvent::ChainChanged(10)).await;

        assert!(!old.is_current());
        assert_eq!(notices.recv().await.unwrap(), SessionNotice::ReloadRequired);
        assert_eq!(
            notices.recv().await.unwrap(),
            SessionNotice::Connected(addr(1))
        );
        assert!(store.contract().unwrap().is_current());
    }

    #[tokio::test]
    async fn disconnect_clears_everything() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let mut store = h.store();
        store.connect().await.unwrap();
        let old = store.contract().unwrap();

        store.disconnect().await;

        assert!(!store.snapshot().is_connected());
        assert!(store.contract().is_none());
        assert!(!old.is_current());
        assert_eq!(h.storage.load().await.unwrap(), PersistedSession::default());
    }

    #[tokio::test]
    async fn wallet_disconnect_event_clears_session() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let mut store = h.store();
        store.connect().await.unwrap();
        let old = store.contract().unwrap();
        let mut notices = store.notices();

        store.apply(WalletEvent::Disconnect).await;

        assert!(!store.snapshot().is_connected());
        assert!(!old.is_current());
        assert_eq!(h.storage.load().await.unwrap(), PersistedSession::default());
        assert_eq!(notices.recv().await.unwrap(), SessionNotice::ReloadRequired);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_role_check_after_switch_is_not_restored_from_old_account() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        h.tracker
            .grant(addr(1), RoleSet::from_flags([true, true, true, true]));
        let mut store = h.store();
        store.connect().await.unwrap();
        assert!(store.snapshot().roles.is_admin);

        h.tracker.state().fail_roles = true;
        h.wallet.state().authorized = vec![addr(2)];
        store.apply(WalletEvent::AccountsChanged(vec![addr(2)])).await;
        assert_eq!(store.snapshot().address, Some(addr(2)));
        assert_eq!(store.snapshot().roles, RoleSet::NONE);

        store.apply(WalletEvent::ChainChanged(5)).await;

        let snap = store.snapshot();
        assert_eq!(snap.address, Some(addr(2)));
        assert_eq!(snap.roles, RoleSet::NONE);
        assert_eq!(h.storage.load().await.unwrap().roles, None);
    }

    #[tokio::test]
    async fn role_failure_does_not_fail_connect() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        h.tracker.state().fail_roles = true;
        let mut store = h.store();

        assert_eq!(store.connect().await.unwrap(), addr(1));
        assert_eq!(store.snapshot().roles, RoleSet::NONE);
    }

    #[tokio::test]
    async fn spawned_session_serves_commands_and_events() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let (events_tx, events_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(h.store(), events_rx, cancel.clone());

        assert!(matches!(handle.contract(), Err(DashboardError::NotConnected)));
        assert_eq!(handle.connect().await.unwrap(), addr(1));
        assert_eq!(handle.snapshot().address, Some(addr(1)));

        let mut snapshots = handle.subscribe();
        events_tx
            .send(WalletEvent::AccountsChanged(vec![addr(2)]))
            .await
            .unwrap();
        snapshots
            .wait_for(|s| s.address == Some(addr(2)))
            .await
            .unwrap();
        assert_eq!(handle.contract().unwrap().signer(), addr(2));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn with_contract_retries_on_stale_handle() {
        let h = Harness::new(FakeWallet::with_accounts(vec![addr(1)]));
        let (events_tx, events_rx) = mpsc::channel(4);
        let (handle, _task) = spawn(h.store(), events_rx, CancellationToken::new());
        handle.connect().await.unwrap();

        let mut calls = 0;
        let signer = handle
            .with_contract(|contract| {
                calls += 1;
                let first = calls == 1;
                let events_tx = events_tx.clone();
                async move {
                    if first {
                        events_tx
                            .send(WalletEvent::AccountsChanged(vec![addr(2)]))
                            .await
                            .unwrap();
                        // Wait until the swap has happened.
                        while contract.is_current() {
                            tokio::task::yield_now().await;
                        }
                    }
                    contract.project_count().await?;
                    Ok(contract.signer())
                }
            })
            .await
            .unwrap();

        assert_eq!(signer, addr(2));
        assert_eq!(calls, 2);
    }
}
