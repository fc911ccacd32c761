use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::account::Account;
use crate::errors::{AuthError, Result};

/// External configuration store holding the serialized account table.
///
/// The lifecycle manager is the only caller; it hands over accounts with
/// their secret fields already encrypted and calls [`ConfigStore::save`]
/// exactly once per successful mutation. The durable representation is
/// entirely this collaborator's business.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_accounts(&self) -> Vec<Account>;

    /// Insert or replace by `account.id`
    async fn upsert_account(&self, account: &Account) -> Result<()>;

    async fn remove_account(&self, id: &str) -> Result<()>;

    async fn set_selected_account(&self, id: Option<&str>) -> Result<()>;

    async fn selected_account(&self) -> Option<String>;

    /// Flush the table to durable storage
    async fn save(&self) -> Result<()>;
}

/// In-memory store for tests and ephemeral profiles
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    accounts: RwLock<HashMap<String, Account>>,
    selected: RwLock<Option<String>>,
    save_calls: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times `save` ran; used by tests to pin down persistence
    /// counts.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

fn poisoned(_: impl std::fmt::Display) -> AuthError {
    AuthError::Store("lock poisoned".to_string())
}

#[async_trait::async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_accounts(&self) -> Vec<Account> {
        self.accounts
            .read()
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .map_err(poisoned)?
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn remove_account(&self, id: &str) -> Result<()> {
        self.accounts.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    async fn set_selected_account(&self, id: Option<&str>) -> Result<()> {
        *self.selected.write().map_err(poisoned)? = id.map(str::to_string);
        Ok(())
    }

    async fn selected_account(&self) -> Option<String> {
        self.selected.read().ok()?.clone()
    }

    async fn save(&self) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
