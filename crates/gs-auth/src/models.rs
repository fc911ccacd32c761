//! Wire shapes for the provider endpoints. Each hop of the exchange chain
//! deserializes into one of these and immediately normalizes it into the
//! types in [`crate::session`].

use serde::{Deserialize, Serialize};

/// Microsoft OAuth token response (code and refresh_token grants)
#[derive(Debug, Clone, Deserialize)]
pub struct MsTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// Xbox Live user.authenticate request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XblAuthRequest {
    pub properties: XblAuthProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XblAuthProperties {
    pub auth_method: String,
    pub site_name: String,
    pub rps_ticket: String,
}

/// Xbox Live user.authenticate response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XblAuthResponse {
    pub token: String,
    pub display_claims: XblDisplayClaims,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XblDisplayClaims {
    pub xui: Vec<XblUserInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XblUserInfo {
    pub uhs: String,
}

/// XSTS authorize request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthRequest {
    pub properties: XstsAuthProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthProperties {
    pub sandbox_id: String,
    pub user_tokens: Vec<String>,
}

/// XSTS authorize response (same claim layout as XBL)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthResponse {
    pub token: String,
    pub display_claims: XblDisplayClaims,
}

/// XSTS error response
#[derive(Debug, Clone, Deserialize)]
pub struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    pub xerr: u64,
}

/// Minecraft login_with_xbox request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McLoginRequest {
    pub identity_token: String,
}

/// Minecraft login_with_xbox response
#[derive(Debug, Clone, Deserialize)]
pub struct McLoginResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// Minecraft profile response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McProfile {
    /// UUID without dashes
    pub id: String,
    /// Player name
    pub name: String,
}
