use std::time::Duration;
use url::Url;

/// Production Microsoft/Xbox/Minecraft endpoints
pub mod endpoints {
    pub const MS_AUTHORIZE: &str = "https://login.live.com/oauth20_authorize.srf";
    pub const MS_TOKEN: &str = "https://login.live.com/oauth20_token.srf";
    pub const XBL_AUTHENTICATE: &str = "https://user.auth.xboxlive.com/user/authenticate";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    pub const MC_LOGIN: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
    pub const MC_PROFILE: &str = "https://api.minecraftservices.com/minecraft/profile";
}

/// Official launcher OAuth parameters
pub mod official {
    /// Official launcher client ID for development/testing
    pub const CLIENT_ID: &str = "00000000402B5328";
    pub const REDIRECT_URI: &str = "https://login.live.com/oauth20_desktop.srf";
    pub const SCOPE: &str = "service::user.auth.xboxlive.com::MBI_SSL";
}

/// Standard OAuth scope for custom approved apps
pub const STANDARD_SCOPE: &str = "XboxLive.signin offline_access";

/// XSTS relying party for Minecraft services
pub const RP_MINECRAFT: &str = "rp://api.minecraftservices.com/";

/// Refresh tokens this long before their recorded expiry
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(300);

/// Authentication flow flavor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthorizeFlavor {
    /// Official launcher flow; uses the official client ID and needs no
    /// app approval
    #[default]
    OfficialDesktop,

    /// Standard OAuth2 code flow for custom approved apps
    StandardCode,
}

/// Resolved endpoint set; overridable so tests can point the chain at a
/// local mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ms_authorize: Url,
    pub ms_token: Url,
    pub xbl_authenticate: Url,
    pub xsts_authorize: Url,
    pub mc_login: Url,
    pub mc_profile: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        let parse = |s: &str| Url::parse(s).expect("static endpoint URL");
        Self {
            ms_authorize: parse(endpoints::MS_AUTHORIZE),
            ms_token: parse(endpoints::MS_TOKEN),
            xbl_authenticate: parse(endpoints::XBL_AUTHENTICATE),
            xsts_authorize: parse(endpoints::XSTS_AUTHORIZE),
            mc_login: parse(endpoints::MC_LOGIN),
            mc_profile: parse(endpoints::MC_PROFILE),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at `base`, keeping the production paths.
    /// Intended for tests against a local mock server.
    pub fn with_base(base: &Url) -> Self {
        let join = |path: &str| base.join(path).expect("valid endpoint path");
        Self {
            ms_authorize: join("/oauth20_authorize.srf"),
            ms_token: join("/oauth20_token.srf"),
            xbl_authenticate: join("/user/authenticate"),
            xsts_authorize: join("/xsts/authorize"),
            mc_login: join("/authentication/login_with_xbox"),
            mc_profile: join("/minecraft/profile"),
        }
    }
}

/// HTTP client timeouts
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for [`crate::client::AuthClient`]
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client ID (use `official::CLIENT_ID` for development)
    pub client_id: String,

    /// OAuth redirect URI
    pub redirect_uri: Url,

    /// Authorization flow flavor
    pub authorize_flavor: AuthorizeFlavor,

    /// Provider endpoint set
    pub endpoints: Endpoints,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,
}

impl AuthConfig {
    /// Config for the official launcher flow
    pub fn official_desktop() -> Self {
        Self {
            client_id: official::CLIENT_ID.to_string(),
            redirect_uri: Url::parse(official::REDIRECT_URI).expect("valid redirect URI"),
            authorize_flavor: AuthorizeFlavor::OfficialDesktop,
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("glowstone-mc".to_string()),
        }
    }

    /// Config for a custom approved app
    pub fn custom(client_id: String, redirect_uri: Url) -> Self {
        Self {
            client_id,
            redirect_uri,
            authorize_flavor: AuthorizeFlavor::StandardCode,
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("glowstone-mc".to_string()),
        }
    }

    pub fn scope(&self) -> &'static str {
        match self.authorize_flavor {
            AuthorizeFlavor::OfficialDesktop => official::SCOPE,
            AuthorizeFlavor::StandardCode => STANDARD_SCOPE,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::official_desktop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_base_rewrites_host_and_keeps_paths() {
        let base = Url::parse("http://127.0.0.1:9000").unwrap();
        let endpoints = Endpoints::with_base(&base);
        assert_eq!(endpoints.ms_token.host_str(), Some("127.0.0.1"));
        assert_eq!(endpoints.mc_profile.path(), "/minecraft/profile");
    }
}
