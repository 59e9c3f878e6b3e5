//! Cached capability flags for the connected address.
//!
//! The cache only gates what the dashboard offers; the contract checks
//! every write again. Any failure therefore clears all four flags.

use alloy_primitives::Address;
use tracing::{info, warn};

use crate::contract::ProjectTracker;
use crate::errors::Result;
use crate::storage::SessionStorage;
use crate::types::RoleSet;

#[derive(Debug, Clone, Default)]
pub struct RoleCache {
    roles: RoleSet,
}

impl RoleCache {
    pub fn roles(&self) -> RoleSet {
        self.roles
    }

    pub fn reset(&mut self) {
        self.roles = RoleSet::NONE;
    }

    /// Query `checkRoles(address)` and replace the cached set.
    ///
    /// On failure the cache is cleared and the error returned; the caller
    /// decides whether to surface it.
    pub async fn refresh(
        &mut self,
        address: Address,
        contract: &dyn ProjectTracker,
        storage: &dyn SessionStorage,
    ) -> Result<RoleSet> {
        let roles = match contract.check_roles(address).await {
            Ok(roles) => roles,
            Err(e) => {
                warn!("Error checking roles for {address}: {e}");
                self.reset();
                // A snapshot left behind would be restored for this address.
                if let Err(clear_err) = storage.clear_roles().await {
                    warn!("Could not drop stale role snapshot: {clear_err}");
                }
                return Err(e);
            }
        };

        self.roles = roles;
        info!("Roles checked for {address}: {roles:?}");

        // Snapshot persistence is best-effort.
        match serde_json::to_string(&roles) {
            Ok(json) => {
                if let Err(e) = storage.save_roles(&json).await {
                    warn!("Could not persist role snapshot: {e}");
                }
            }
            Err(e) => warn!("Could not serialise role snapshot: {e}"),
        }
        Ok(roles)
    }

    /// Adopt a persisted snapshot. Returns `false` when it is unreadable,
    /// leaving the cache cleared.
    pub fn restore(&mut self, snapshot: &str) -> bool {
        match serde_json::from_str::<RoleSet>(snapshot) {
            Ok(roles) => {
                self.roles = roles;
                true
            }
            Err(e) => {
                warn!("Error parsing saved roles: {e}");
                self.reset();
                false
            }
        }
    }
}
