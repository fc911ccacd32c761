//! Account and credential core for the glowstone-mc launcher.
//!
//! Three tightly coupled pieces live here:
//!
//! 1. The Microsoft token-exchange chain ([`AuthClient`]): authorization
//!    code -> Microsoft tokens -> Xbox Live -> XSTS -> Minecraft services
//!    -> profile, strictly in order, aborting on the first failed hop.
//! 2. The secure-value codec ([`SecretCodec`]): every token written to disk
//!    goes through it; it prefers the OS secure-storage capability and
//!    falls back to AES-256-GCM keyed from machine identity, with the
//!    `"FB:"` prefix discriminating the two forms on decrypt.
//! 3. The account lifecycle manager ([`AccountManager`]): add, remove and
//!    refresh accounts of either provider (offline or Microsoft), persist
//!    them through the external [`ConfigStore`] collaborator, and keep the
//!    single-selection invariant.
//!
//! Obtaining the authorization code (embedded browser, loopback redirect)
//! is the host application's concern; this crate takes the raw code.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gs_auth::{
//!     AccountManager, AuthClient, AuthConfig, KeyringStorage, MemoryConfigStore, SecretCodec,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AuthClient::new(AuthConfig::official_desktop())?;
//! let codec = SecretCodec::new(Arc::new(KeyringStorage::new()));
//! let manager = AccountManager::new(client, codec, MemoryConfigStore::new());
//!
//! let envelope = manager.add_microsoft_account("M.C123_BAY...").await;
//! if let Some(account) = envelope.into_data() {
//!     println!("signed in as {}", account.display_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod client;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod manager;
pub mod models;
pub mod session;
pub mod store;

pub use account::{Account, Provider};
pub use client::AuthClient;
pub use codec::{SecretCodec, SecureStorage, UnavailableStorage};
#[cfg(feature = "keyring-support")]
pub use codec::KeyringStorage;
pub use config::{AuthConfig, AuthorizeFlavor, Endpoints};
pub use envelope::{Envelope, ErrorDetail, Status};
pub use errors::{AuthError, AuthStage, Result, XstsError};
pub use manager::AccountManager;
pub use models::McProfile;
pub use session::{McToken, MsTokens, Session, XblToken, XstsToken};
pub use store::{ConfigStore, MemoryConfigStore};
