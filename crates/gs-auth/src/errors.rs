use thiserror::Error;

/// Stage of the Microsoft token-exchange chain an error originated from.
///
/// Carried inside provider/parse errors so the UI can tell the user which
/// hop of the sign-in failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    MicrosoftOAuth,
    XboxLive,
    Xsts,
    MinecraftLogin,
    MinecraftProfile,
}

impl AuthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MicrosoftOAuth => "microsoft_oauth",
            Self::XboxLive => "xbox_live",
            Self::Xsts => "xsts",
            Self::MinecraftLogin => "minecraft_login",
            Self::MinecraftProfile => "minecraft_profile",
        }
    }
}

impl std::fmt::Display for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type shared by every account-lifecycle and token-exchange operation
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{stage} rejected the request with HTTP {status}: {body_snippet}")]
    Provider {
        stage: AuthStage,
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("{stage} returned an unreadable response: {detail}")]
    MalformedResponse { stage: AuthStage, detail: String },

    #[error("OAuth invalid_grant - authorization code or refresh token is no longer valid")]
    OAuthInvalidGrant,

    #[error("Xbox Live authentication failed after retry")]
    XblBadRequest,

    #[error("XSTS authorization denied: {0}")]
    XstsDenied(#[from] XstsError),

    #[error("Minecraft profile not found - the account may not own the game")]
    ProfileNotFound,

    #[error("No account with id '{0}'")]
    AccountNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Missing refresh token - cannot silently re-authenticate")]
    MissingRefreshToken,

    #[error("Invalid redirect URI or missing code")]
    InvalidRedirect,

    #[error("OAuth state mismatch - possible CSRF attack")]
    StateMismatch,

    #[error("User cancelled the authentication flow")]
    UserCancelled,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Config store error: {0}")]
    Store(String),
}

impl AuthError {
    /// Stable machine-readable code carried in the error envelope.
    ///
    /// Provider codes (HTTP status, XErr) are preserved verbatim; local
    /// validation failures get fixed tags.
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Network(_) => Some("network".into()),
            Self::Provider { status, .. } => Some(status.as_u16().to_string()),
            Self::MalformedResponse { .. } => Some("malformed_response".into()),
            Self::OAuthInvalidGrant => Some("invalid_grant".into()),
            Self::XblBadRequest => Some("xbl_bad_request".into()),
            Self::XstsDenied(e) => Some(e.xerr().to_string()),
            Self::ProfileNotFound => Some("profile_not_found".into()),
            Self::AccountNotFound(_) => Some("not_found".into()),
            Self::InvalidState(_) => Some("invalid_state".into()),
            Self::MissingRefreshToken => Some("missing_refresh_token".into()),
            _ => None,
        }
    }
}

/// XSTS-specific error codes from the XErr field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XstsError {
    #[error("Account doesn't have an Xbox account (XErr: 2148916233)")]
    NoXboxAccount,

    #[error("Xbox Live not available in this country (XErr: 2148916235)")]
    RegionNotSupported,

    #[error("Adult verification required on Xbox page (XErr: 2148916236/2148916237)")]
    AdultVerificationRequired,

    #[error("Child account requires Family (XErr: 2148916238)")]
    ChildAccountRequiresFamily,

    #[error("Unknown XSTS error code: {0}")]
    Unknown(u64),
}

impl XstsError {
    /// Parse XErr code from an XSTS response
    pub fn from_xerr(code: u64) -> Self {
        match code {
            2148916233 => Self::NoXboxAccount,
            2148916235 => Self::RegionNotSupported,
            2148916236 | 2148916237 => Self::AdultVerificationRequired,
            2148916238 => Self::ChildAccountRequiresFamily,
            code => Self::Unknown(code),
        }
    }

    /// The numeric XErr code this variant maps back to
    pub fn xerr(&self) -> u64 {
        match self {
            Self::NoXboxAccount => 2148916233,
            Self::RegionNotSupported => 2148916235,
            Self::AdultVerificationRequired => 2148916236,
            Self::ChildAccountRequiresFamily => 2148916238,
            Self::Unknown(code) => *code,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
