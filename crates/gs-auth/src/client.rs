use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{AuthConfig, RP_MINECRAFT};
use crate::errors::{AuthError, AuthStage, Result, XstsError};
use crate::models::*;
use crate::session::{McToken, MsTokens, Session, XblToken, XstsToken};

/// Grant kind for the Microsoft token endpoint
enum MsGrant<'a> {
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

/// Drives the five-hop Microsoft token-exchange chain.
///
/// Every hop is a fallible async call; the composites
/// [`AuthClient::sign_in_with_code`] and [`AuthClient::resume`] run them in
/// order and abort on the first failure, so no hop ever runs after a
/// failed one.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: AuthConfig,
    http: Client,
}

impl AuthClient {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("glowstone-mc"))
            .build()?;

        Ok(Self { config, http })
    }

    /// Build the authorization URL the host app should open for the user.
    /// The code capture itself (embedded browser, loopback server, paste
    /// box) is the host app's concern.
    #[instrument(skip(self))]
    pub fn authorize_url(&self, state: Option<&str>) -> Url {
        let mut url = self.config.endpoints.ms_authorize.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", self.config.scope())
            .append_pair("prompt", "select_account");

        if let Some(s) = state {
            url.query_pairs_mut().append_pair("state", s);
        }

        debug!("Built authorize URL: {}", url);
        url
    }

    /// Extract the authorization code from the redirect the host app captured
    #[instrument(skip(self))]
    pub fn parse_redirect(&self, redirect_url: &str, expected_state: Option<&str>) -> Result<String> {
        let url = Url::parse(redirect_url)?;
        let params: std::collections::HashMap<_, _> = url.query_pairs().collect();

        if let Some(error) = params.get("error") {
            if error == "access_denied" {
                return Err(AuthError::UserCancelled);
            }
            return Err(AuthError::InvalidRedirect);
        }

        if let Some(expected) = expected_state {
            match params.get("state") {
                Some(actual) if actual == expected => {}
                _ => return Err(AuthError::StateMismatch),
            }
        }

        params
            .get("code")
            .map(|c| c.to_string())
            .ok_or(AuthError::InvalidRedirect)
    }

    /// Hop 1: exchange an authorization code for Microsoft tokens
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<MsTokens> {
        debug!("Exchanging authorization code for Microsoft tokens");
        self.request_ms_tokens(MsGrant::AuthorizationCode(code)).await
    }

    /// Hop 1, silent-refresh variant: exchange a stored refresh token
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_ms_token(&self, refresh_token: &str) -> Result<MsTokens> {
        debug!("Refreshing Microsoft access token");
        self.request_ms_tokens(MsGrant::RefreshToken(refresh_token)).await
    }

    async fn request_ms_tokens(&self, grant: MsGrant<'_>) -> Result<MsTokens> {
        let mut url = self.config.endpoints.ms_token.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.config.client_id)
                .append_pair("scope", self.config.scope());
            match grant {
                MsGrant::AuthorizationCode(code) => pairs
                    .append_pair("code", code)
                    .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                    .append_pair("grant_type", "authorization_code"),
                MsGrant::RefreshToken(token) => pairs
                    .append_pair("refresh_token", token)
                    .append_pair("grant_type", "refresh_token"),
            };
        }

        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if body.contains("invalid_grant") {
                return Err(AuthError::OAuthInvalidGrant);
            }

            return Err(provider_error(AuthStage::MicrosoftOAuth, status, body));
        }

        let token_response: MsTokenResponse = parse_json(response, AuthStage::MicrosoftOAuth).await?;
        Ok(MsTokens::new(
            token_response.access_token,
            token_response.refresh_token,
            token_response.expires_in,
        ))
    }

    /// Hop 2: authenticate with Xbox Live
    #[instrument(skip(self, ms_access_token))]
    pub async fn xbl_authenticate(&self, ms_access_token: &str) -> Result<XblToken> {
        debug!("Authenticating with Xbox Live");
        let response = self.post_xbl_request(ms_access_token).await?;

        // Some token flavors need the RPS ticket prefixed with "d="; a 400
        // on the bare ticket gets one retry with the prefix.
        if response.status() == StatusCode::BAD_REQUEST {
            warn!("XBL authentication failed, retrying with 'd=' prefix");
            let retry = self.post_xbl_request(&format!("d={ms_access_token}")).await?;

            if !retry.status().is_success() {
                return Err(AuthError::XblBadRequest);
            }
            return xbl_token_from(parse_json(retry, AuthStage::XboxLive).await?);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(AuthStage::XboxLive, status, body));
        }

        xbl_token_from(parse_json(response, AuthStage::XboxLive).await?)
    }

    async fn post_xbl_request(&self, rps_ticket: &str) -> Result<Response> {
        let request = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: rps_ticket.to_string(),
            },
            relying_party: "http://auth.xboxlive.com".to_string(),
            token_type: "JWT".to_string(),
        };

        Ok(self
            .http
            .post(self.config.endpoints.xbl_authenticate.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?)
    }

    /// Hop 3: authorize with XSTS
    #[instrument(skip(self, xbl_token))]
    pub async fn xsts_authorize(&self, xbl_token: &str) -> Result<XstsToken> {
        let request = XstsAuthRequest {
            properties: XstsAuthProperties {
                sandbox_id: "RETAIL".to_string(),
                user_tokens: vec![xbl_token.to_string()],
            },
            relying_party: RP_MINECRAFT.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let response = self
            .http
            .post(self.config.endpoints.xsts_authorize.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let error_response: XstsErrorResponse = parse_json(response, AuthStage::Xsts).await?;
            return Err(XstsError::from_xerr(error_response.xerr).into());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(AuthStage::Xsts, status, body));
        }

        let xsts_response: XstsAuthResponse = parse_json(response, AuthStage::Xsts).await?;
        let uhs = first_uhs(&xsts_response.display_claims, AuthStage::Xsts)?;

        Ok(XstsToken {
            token: xsts_response.token,
            uhs,
        })
    }

    /// Hop 4: login to Minecraft services with the XSTS token
    #[instrument(skip(self, xsts_token, uhs))]
    pub async fn mc_login(&self, xsts_token: &str, uhs: &str) -> Result<McToken> {
        let request = McLoginRequest {
            identity_token: format!("XBL3.0 x={uhs};{xsts_token}"),
        };

        debug!("Logging in to Minecraft services");
        let response = self
            .http
            .post(self.config.endpoints.mc_login.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(AuthStage::MinecraftLogin, status, body));
        }

        let mc_response: McLoginResponse = parse_json(response, AuthStage::MinecraftLogin).await?;
        Ok(McToken::new(mc_response.access_token, mc_response.expires_in))
    }

    /// Hop 5: fetch the Minecraft profile
    #[instrument(skip(self, mc_access_token))]
    pub async fn fetch_profile(&self, mc_access_token: &str) -> Result<McProfile> {
        debug!("Fetching Minecraft profile");
        let response = self
            .http
            .get(self.config.endpoints.mc_profile.clone())
            .header("Authorization", format!("Bearer {mc_access_token}"))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AuthError::ProfileNotFound);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(AuthStage::MinecraftProfile, status, body));
        }

        parse_json(response, AuthStage::MinecraftProfile).await
    }

    /// Full chain: authorization code to playable session
    #[instrument(skip(self, code))]
    pub async fn sign_in_with_code(&self, code: &str) -> Result<Session> {
        debug!("Starting complete sign-in flow");

        let ms = self.exchange_code(code).await?;
        self.derive_session(ms).await
    }

    /// Silent refresh: reuse the stored Microsoft access token when it is
    /// still valid, otherwise redeem the refresh token first. The
    /// XBL/XSTS/Minecraft hops always re-run - those tokens are short-lived
    /// and never stored.
    #[instrument(skip(self, ms))]
    pub async fn resume(&self, ms: &MsTokens) -> Result<Session> {
        let ms = if ms.is_expired() {
            let refresh_token = ms
                .refresh_token
                .as_deref()
                .ok_or(AuthError::MissingRefreshToken)?;
            self.refresh_ms_token(refresh_token).await?
        } else {
            debug!("Microsoft access token still valid, skipping OAuth hop");
            ms.clone()
        };

        self.derive_session(ms).await
    }

    /// Hops 2-5, shared by sign-in and refresh
    async fn derive_session(&self, ms: MsTokens) -> Result<Session> {
        let xbl = self.xbl_authenticate(&ms.access_token).await?;
        let xsts = self.xsts_authorize(&xbl.token).await?;
        let mc = self.mc_login(&xsts.token, &xsts.uhs).await?;
        let profile = self.fetch_profile(&mc.access_token).await?;

        Ok(Session { ms, mc, profile })
    }
}

fn provider_error(stage: AuthStage, status: StatusCode, body: String) -> AuthError {
    AuthError::Provider {
        stage,
        status,
        body_snippet: body.chars().take(200).collect(),
    }
}

/// Decode a 2xx body, mapping unparsable/missing-field payloads to a
/// stage-tagged malformed-response error.
async fn parse_json<T: DeserializeOwned>(response: Response, stage: AuthStage) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| AuthError::MalformedResponse {
            stage,
            detail: e.to_string(),
        })
}

fn xbl_token_from(response: XblAuthResponse) -> Result<XblToken> {
    let uhs = first_uhs(&response.display_claims, AuthStage::XboxLive)?;
    Ok(XblToken {
        token: response.token,
        uhs,
    })
}

fn first_uhs(claims: &XblDisplayClaims, stage: AuthStage) -> Result<String> {
    claims
        .xui
        .first()
        .map(|u| u.uhs.clone())
        .ok_or(AuthError::MalformedResponse {
            stage,
            detail: "missing XUI claims".to_string(),
        })
}
