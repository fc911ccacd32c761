use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::McProfile;

/// Everything a completed sign-in produced.
///
/// Lives only for the duration of one exchange; the lifecycle manager folds
/// the fields it persists into an account and drops the rest. The XBL and
/// XSTS tokens are not kept at all - they are re-derived on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub ms: MsTokens,
    pub mc: McToken,
    pub profile: McProfile,
}

/// Microsoft OAuth token pair with absolute expiry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MsTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl MsTokens {
    /// Convert the provider's relative `expires_in` to an absolute instant
    /// at receipt time, so processing delay never skews the stored expiry.
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: u64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in as i64),
        }
    }

    /// Expired within the skew margin counts as expired, so a resume with
    /// seconds of life left refreshes up front instead of failing at the
    /// XBL hop.
    pub fn is_expired(&self) -> bool {
        Utc::now() + expiry_skew() >= self.expires_at
    }
}

fn expiry_skew() -> chrono::Duration {
    chrono::Duration::from_std(crate::config::TOKEN_EXPIRY_SKEW)
        .unwrap_or(chrono::Duration::seconds(300))
}

/// Minecraft access token with absolute expiry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl McToken {
    pub fn new(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() + expiry_skew() >= self.expires_at
    }
}

/// Xbox Live token, intermediate hop output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XblToken {
    pub token: String,
    pub uhs: String,
}

/// XSTS token plus the user hash Minecraft services require
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XstsToken {
    pub token: String,
    pub uhs: String,
}
