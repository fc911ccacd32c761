use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument};

use crate::account::{Account, Provider};
use crate::client::AuthClient;
use crate::codec::SecretCodec;
use crate::envelope::Envelope;
use crate::errors::{AuthError, Result};
use crate::session::MsTokens;
use crate::store::ConfigStore;

/// Public entry point for account lifecycle operations.
///
/// Owns the account table through the external [`ConfigStore`] collaborator
/// and is the only code that moves secrets across the persistence boundary;
/// every secret field is encrypted before an upsert and decrypted after a
/// load. Each operation returns an [`Envelope`] - the surrounding
/// application never sees a raw error.
pub struct AccountManager {
    client: AuthClient,
    codec: SecretCodec,
    store: Arc<dyn ConfigStore>,
    /// Per-account-id serialization so e.g. a refresh and a remove on the
    /// same id cannot interleave. Operations on different ids run freely.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountManager {
    pub fn new(client: AuthClient, codec: SecretCodec, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            client,
            codec,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Add a local account with a synthesized deterministic id and a
    /// placeholder token. Never contacts any server; the new account
    /// becomes the selected one.
    #[instrument(skip(self))]
    pub async fn add_offline_account(&self, username: &str) -> Envelope<Account> {
        Envelope::from_result(
            "add_offline_account",
            self.add_offline_inner(username).await,
        )
    }

    async fn add_offline_inner(&self, username: &str) -> Result<Account> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::InvalidState(
                "username must not be empty".to_string(),
            ));
        }

        let account = Account::offline(username);
        let lock = self.lock_for(&account.id);
        let _guard = lock.lock().await;

        self.persist_and_select(&account).await?;
        info!(id = %account.id, "added offline account");
        Ok(account)
    }

    /// Drive the full five-hop Microsoft chain from an authorization code.
    /// Nothing is persisted unless every hop succeeded; a re-added profile
    /// id updates the existing account in place.
    #[instrument(skip(self, authorization_code))]
    pub async fn add_microsoft_account(&self, authorization_code: &str) -> Envelope<Account> {
        Envelope::from_result(
            "add_microsoft_account",
            self.add_microsoft_inner(authorization_code).await,
        )
    }

    async fn add_microsoft_inner(&self, authorization_code: &str) -> Result<Account> {
        let session = self.client.sign_in_with_code(authorization_code).await?;
        let account = Account::from_session(&session);

        let lock = self.lock_for(&account.id);
        let _guard = lock.lock().await;

        self.persist_and_select(&account).await?;
        info!(id = %account.id, name = %account.display_name, "added Microsoft account");
        Ok(account)
    }

    /// Remove by id. Removing an unknown id is a no-op, not an error;
    /// removing the selected account clears the selection.
    #[instrument(skip(self))]
    pub async fn remove_account(&self, id: &str) -> Envelope<()> {
        Envelope::from_result("remove_account", self.remove_inner(id).await)
    }

    async fn remove_inner(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;
        let result = self.remove_locked(id).await;

        // The id is gone (or never existed); reclaim its lock entry unless
        // another operation is already waiting on it
        drop(guard);
        drop(lock);
        self.evict_lock(id);
        result
    }

    async fn remove_locked(&self, id: &str) -> Result<()> {
        let exists = self.store.get_accounts().await.iter().any(|a| a.id == id);
        if !exists {
            debug!(id, "remove requested for unknown account, nothing to do");
            return Ok(());
        }

        self.store.remove_account(id).await?;
        if self.store.selected_account().await.as_deref() == Some(id) {
            self.store.set_selected_account(None).await?;
        }
        self.store.save().await?;
        info!(id, "removed account");
        Ok(())
    }

    /// Re-derive the short-lived tokens for a stored Microsoft account,
    /// redeeming the refresh token first only when the Microsoft access
    /// token has expired. Token and expiry fields update in place; id and
    /// provider never change.
    #[instrument(skip(self))]
    pub async fn refresh_microsoft_account(&self, id: &str) -> Envelope<Account> {
        Envelope::from_result(
            "refresh_microsoft_account",
            self.refresh_inner(id).await,
        )
    }

    async fn refresh_inner(&self, id: &str) -> Result<Account> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let stored = self
            .store
            .get_accounts()
            .await
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| AuthError::AccountNotFound(id.to_string()))?;
        let mut account = self.unseal(&stored);

        let ms = match &account.provider {
            Provider::Offline => {
                return Err(AuthError::InvalidState(format!(
                    "account '{id}' is not a Microsoft account"
                )));
            }
            Provider::Microsoft {
                access_token,
                expires_at,
                refresh_token,
            } => {
                if refresh_token.is_empty() {
                    return Err(AuthError::MissingRefreshToken);
                }
                MsTokens {
                    access_token: access_token.clone(),
                    refresh_token: Some(refresh_token.clone()),
                    expires_at: *expires_at,
                }
            }
        };

        let session = self.client.resume(&ms).await?;
        account.apply_session(&session);

        self.store.upsert_account(&self.seal(&account)).await?;
        self.store.save().await?;
        info!(id, "refreshed Microsoft account");
        Ok(account)
    }

    /// The stored table with every secret field decrypted for use
    #[instrument(skip(self))]
    pub async fn load_accounts(&self) -> Envelope<Vec<Account>> {
        let accounts = self
            .store
            .get_accounts()
            .await
            .iter()
            .map(|a| self.unseal(a))
            .collect();
        Envelope::success(accounts)
    }

    pub async fn selected_account(&self) -> Option<String> {
        self.store.selected_account().await
    }

    async fn persist_and_select(&self, account: &Account) -> Result<()> {
        self.store.upsert_account(&self.seal(account)).await?;
        self.store.set_selected_account(Some(&account.id)).await?;
        self.store.save().await
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn evict_lock(&self, id: &str) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    /// Clone with every secret field encrypted for the persistence boundary
    fn seal(&self, account: &Account) -> Account {
        let mut sealed = account.clone();
        sealed.game_token = self.codec.encrypt(&sealed.game_token);
        if let Provider::Microsoft {
            access_token,
            refresh_token,
            ..
        } = &mut sealed.provider
        {
            *access_token = self.codec.encrypt(access_token);
            *refresh_token = self.codec.encrypt(refresh_token);
        }
        sealed
    }

    /// Inverse of [`AccountManager::seal`]
    fn unseal(&self, account: &Account) -> Account {
        let mut unsealed = account.clone();
        unsealed.game_token = self.codec.decrypt(&unsealed.game_token);
        if let Provider::Microsoft {
            access_token,
            refresh_token,
            ..
        } = &mut unsealed.provider
        {
            *access_token = self.codec.decrypt(access_token);
            *refresh_token = self.codec.decrypt(refresh_token);
        }
        unsealed
    }
}

impl std::fmt::Debug for AccountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountManager")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SecretCodec, UnavailableStorage, FALLBACK_PREFIX};
    use crate::config::{AuthConfig, Endpoints};
    use crate::store::MemoryConfigStore;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn codec() -> SecretCodec {
        SecretCodec::with_identity(Arc::new(UnavailableStorage), "test-host", "test-user")
    }

    fn offline_manager(store: Arc<MemoryConfigStore>) -> AccountManager {
        let client = AuthClient::new(AuthConfig::official_desktop()).unwrap();
        AccountManager::new(client, codec(), store)
    }

    fn manager_for(server: &MockServer, store: Arc<MemoryConfigStore>) -> AccountManager {
        let mut config = AuthConfig::official_desktop();
        config.endpoints = Endpoints::with_base(&Url::parse(&server.uri()).unwrap());
        AccountManager::new(AuthClient::new(config).unwrap(), codec(), store)
    }

    async fn mount_happy_chain(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/oauth20_token.srf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/authenticate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Token": "xbl1",
                "DisplayClaims": { "xui": [{ "uhs": "h1" }] },
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xsts/authorize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Token": "xsts1",
                "DisplayClaims": { "xui": [{ "uhs": "h1" }] },
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/authentication/login_with_xbox"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "mc1",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/minecraft/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "uuid-1",
                "name": "Steve",
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn selection_follows_the_latest_add_and_clears_on_remove() {
        let store = MemoryConfigStore::new();
        let manager = offline_manager(store.clone());

        let a = manager.add_offline_account("Alpha").await.into_data().unwrap();
        let b = manager.add_offline_account("Beta").await.into_data().unwrap();
        assert_eq!(manager.selected_account().await.as_deref(), Some(b.id.as_str()));

        assert!(manager.remove_account(&b.id).await.is_success());
        assert_eq!(manager.selected_account().await, None);

        let a_again = manager.add_offline_account("Alpha").await.into_data().unwrap();
        assert_eq!(a_again.id, a.id);
        assert_eq!(manager.selected_account().await.as_deref(), Some(a.id.as_str()));
    }

    #[tokio::test]
    async fn removing_a_non_selected_account_keeps_selection() {
        let store = MemoryConfigStore::new();
        let manager = offline_manager(store.clone());

        let a = manager.add_offline_account("Alpha").await.into_data().unwrap();
        let b = manager.add_offline_account("Beta").await.into_data().unwrap();

        assert!(manager.remove_account(&a.id).await.is_success());
        assert_eq!(manager.selected_account().await.as_deref(), Some(b.id.as_str()));
    }

    #[tokio::test]
    async fn removal_is_idempotent_and_skips_redundant_saves() {
        let store = MemoryConfigStore::new();
        let manager = offline_manager(store.clone());

        let account = manager.add_offline_account("Gone").await.into_data().unwrap();
        let saves_after_add = store.save_calls();

        assert!(manager.remove_account(&account.id).await.is_success());
        assert_eq!(store.save_calls(), saves_after_add + 1);

        // Second removal of the same id: no error, no extra save
        assert!(manager.remove_account(&account.id).await.is_success());
        assert_eq!(store.save_calls(), saves_after_add + 1);

        assert!(manager.remove_account("never-existed").await.is_success());
    }

    #[tokio::test]
    async fn add_microsoft_account_persists_once_and_selects() {
        let server = MockServer::start().await;
        mount_happy_chain(&server).await;
        let store = MemoryConfigStore::new();
        let manager = manager_for(&server, store.clone());

        let envelope = manager.add_microsoft_account("code123").await;
        let account = envelope.into_data().unwrap();

        assert_eq!(account.id, "uuid-1");
        assert_eq!(account.display_name, "Steve");
        assert_eq!(account.game_token, "mc1");
        assert!(account.is_microsoft());
        assert_eq!(manager.selected_account().await.as_deref(), Some("uuid-1"));
        assert_eq!(store.save_calls(), 1);

        // Re-adding the same profile updates in place, no duplicate
        let again = manager.add_microsoft_account("code123").await;
        assert!(again.is_success());
        assert_eq!(store.get_accounts().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_chain_persists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth20_token.srf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/authenticate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Token": "xbl1",
                "DisplayClaims": { "xui": [{ "uhs": "h1" }] },
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xsts/authorize"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "XErr": 2148916235u64 })))
            .mount(&server)
            .await;

        let store = MemoryConfigStore::new();
        let manager = manager_for(&server, store.clone());

        let envelope = manager.add_microsoft_account("code123").await;
        assert!(!envelope.is_success());
        let detail = envelope.error.unwrap();
        assert_eq!(detail.code.as_deref(), Some("2148916235"));

        assert!(store.get_accounts().await.is_empty());
        assert_eq!(store.save_calls(), 0);
        assert_eq!(manager.selected_account().await, None);
    }

    #[tokio::test]
    async fn secrets_are_encrypted_at_the_store_boundary() {
        let server = MockServer::start().await;
        mount_happy_chain(&server).await;
        let store = MemoryConfigStore::new();
        let manager = manager_for(&server, store.clone());

        manager.add_microsoft_account("code123").await.into_data().unwrap();

        let stored = &store.get_accounts().await[0];
        assert!(stored.game_token.starts_with(FALLBACK_PREFIX));
        match &stored.provider {
            Provider::Microsoft {
                access_token,
                refresh_token,
                ..
            } => {
                assert!(access_token.starts_with(FALLBACK_PREFIX));
                assert!(refresh_token.starts_with(FALLBACK_PREFIX));
            }
            Provider::Offline => panic!("expected microsoft provider"),
        }

        // Loading decrypts back to plaintext
        let loaded = manager.load_accounts().await.into_data().unwrap();
        assert_eq!(loaded[0].game_token, "mc1");
        match &loaded[0].provider {
            Provider::Microsoft { refresh_token, .. } => assert_eq!(refresh_token, "r"),
            Provider::Offline => panic!("expected microsoft provider"),
        }
    }

    #[tokio::test]
    async fn refresh_rejects_offline_accounts_without_network() {
        let store = MemoryConfigStore::new();
        let manager = offline_manager(store.clone());

        let account = manager.add_offline_account("Local").await.into_data().unwrap();
        let envelope = manager.refresh_microsoft_account(&account.id).await;

        assert!(!envelope.is_success());
        assert_eq!(
            envelope.error.unwrap().code.as_deref(),
            Some("invalid_state")
        );
    }

    #[tokio::test]
    async fn refresh_of_unknown_id_is_not_found() {
        let manager = offline_manager(MemoryConfigStore::new());
        let envelope = manager.refresh_microsoft_account("missing").await;
        assert!(!envelope.is_success());
        assert_eq!(envelope.error.unwrap().code.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn refresh_rederives_tokens_and_persists_in_place() {
        let server = MockServer::start().await;
        mount_happy_chain(&server).await;
        let store = MemoryConfigStore::new();
        let manager = manager_for(&server, store.clone());

        manager.add_microsoft_account("code123").await.into_data().unwrap();
        let saves_after_add = store.save_calls();

        let refreshed = manager
            .refresh_microsoft_account("uuid-1")
            .await
            .into_data()
            .unwrap();

        assert_eq!(refreshed.id, "uuid-1");
        assert_eq!(refreshed.game_token, "mc1");
        assert!(refreshed.is_microsoft());
        assert_eq!(store.save_calls(), saves_after_add + 1);
        assert_eq!(store.get_accounts().await.len(), 1);

        // Stored MS token was still fresh, so the OAuth hop ran only for
        // the original add, never for the refresh
        let oauth_hits = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/oauth20_token.srf")
            .count();
        assert_eq!(oauth_hits, 1);
    }

    #[tokio::test]
    async fn refresh_with_expired_ms_token_redeems_the_refresh_token() {
        let server = MockServer::start().await;

        // The sign-in grant hands back a Microsoft token that is already
        // expired, so the later refresh must go through hop 1 again
        Mock::given(method("GET"))
            .and(path("/oauth20_token.srf"))
            .and(query_param("grant_type", "authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 0,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth20_token.srf"))
            .and(query_param("grant_type", "refresh_token"))
            .and(query_param("refresh_token", "r"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a-new",
                "refresh_token": "r-new",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_happy_chain(&server).await;

        let store = MemoryConfigStore::new();
        let manager = manager_for(&server, store.clone());

        manager
            .add_microsoft_account("code123")
            .await
            .into_data()
            .unwrap();
        let saves_after_add = store.save_calls();

        let refreshed = manager
            .refresh_microsoft_account("uuid-1")
            .await
            .into_data()
            .unwrap();

        assert_eq!(refreshed.id, "uuid-1");
        match &refreshed.provider {
            Provider::Microsoft {
                access_token,
                refresh_token,
                ..
            } => {
                assert_eq!(access_token, "a-new");
                assert_eq!(refresh_token, "r-new");
            }
            Provider::Offline => panic!("expected a Microsoft provider"),
        }
        assert_eq!(store.save_calls(), saves_after_add + 1);

        // The stored copy carries the new pair too, updated in place
        let loaded = manager.load_accounts().await.into_data().unwrap();
        assert_eq!(loaded.len(), 1);
        match &loaded[0].provider {
            Provider::Microsoft {
                access_token,
                refresh_token,
                ..
            } => {
                assert_eq!(access_token, "a-new");
                assert_eq!(refresh_token, "r-new");
            }
            Provider::Offline => panic!("expected a Microsoft provider"),
        }
    }

    #[tokio::test]
    async fn removal_reclaims_the_per_id_lock_entry() {
        let store = MemoryConfigStore::new();
        let manager = offline_manager(store.clone());

        let account = manager
            .add_offline_account("Short")
            .await
            .into_data()
            .unwrap();
        assert!(manager.locks.lock().unwrap().contains_key(&account.id));

        assert!(manager.remove_account(&account.id).await.is_success());
        assert!(!manager.locks.lock().unwrap().contains_key(&account.id));

        // A remove of an id that never existed leaves no entry behind either
        assert!(manager.remove_account("never-added").await.is_success());
        assert!(!manager.locks.lock().unwrap().contains_key("never-added"));
    }

    #[tokio::test]
    async fn add_offline_rejects_blank_usernames() {
        let store = MemoryConfigStore::new();
        let manager = offline_manager(store.clone());

        let envelope = manager.add_offline_account("   ").await;
        assert!(!envelope.is_success());
        assert_eq!(
            envelope.error.unwrap().code.as_deref(),
            Some("invalid_state")
        );
        assert_eq!(store.save_calls(), 0);
    }
}
