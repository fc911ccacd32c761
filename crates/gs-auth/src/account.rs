use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::session::Session;

/// Placeholder game token carried by offline accounts; never validated
/// against any server.
pub const OFFLINE_GAME_TOKEN: &str = "0";

/// Provider-specific credential material, pattern-matched by every
/// lifecycle operation. The tag never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provider {
    Offline,
    Microsoft {
        access_token: String,
        expires_at: DateTime<Utc>,
        /// Durable secret enabling silent re-authentication; has no expiry
        refresh_token: String,
    },
}

/// One stored identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Stable external identity (profile UUID); immutable after creation
    pub id: String,
    /// Player-visible name; refreshed from the profile
    pub display_name: String,
    /// Credential used to launch the game
    pub game_token: String,
    pub game_token_expires_at: DateTime<Utc>,
    pub provider: Provider,
}

impl Account {
    /// Synthesize a local account with a deterministic id. No server
    /// round-trip; the same username always maps to the same id.
    pub fn offline(username: &str) -> Self {
        Self {
            id: offline_id(username),
            display_name: username.to_string(),
            game_token: OFFLINE_GAME_TOKEN.to_string(),
            // Static credential, effectively never expires
            game_token_expires_at: Utc::now() + chrono::Duration::days(36500),
            provider: Provider::Offline,
        }
    }

    /// Fold a completed token exchange into a fresh account
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.profile.id.clone(),
            display_name: session.profile.name.clone(),
            game_token: session.mc.access_token.clone(),
            game_token_expires_at: session.mc.expires_at,
            provider: Provider::Microsoft {
                access_token: session.ms.access_token.clone(),
                expires_at: session.ms.expires_at,
                refresh_token: session.ms.refresh_token.clone().unwrap_or_default(),
            },
        }
    }

    /// Update token and expiry fields in place after a refresh. `id` and
    /// the provider tag are untouched; a refresh that yields no new
    /// refresh token keeps the stored one.
    pub fn apply_session(&mut self, session: &Session) {
        self.display_name = session.profile.name.clone();
        self.game_token = session.mc.access_token.clone();
        self.game_token_expires_at = session.mc.expires_at;

        if let Provider::Microsoft {
            access_token,
            expires_at,
            refresh_token,
        } = &mut self.provider
        {
            *access_token = session.ms.access_token.clone();
            *expires_at = session.ms.expires_at;
            if let Some(new_refresh) = &session.ms.refresh_token {
                *refresh_token = new_refresh.clone();
            }
        }
    }

    pub fn is_microsoft(&self) -> bool {
        matches!(self.provider, Provider::Microsoft { .. })
    }
}

/// Deterministic offline id: one-way hash of the conventional
/// `OfflinePlayer:<name>` seed, rendered in UUID shape.
fn offline_id(username: &str) -> String {
    let digest = Sha256::digest(format!("OfflinePlayer:{username}"));
    let b = &digest[..16];
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
        b[14], b[15]
    )
}
