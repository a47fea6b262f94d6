//! Token endpoint protocol
//!
//! Device authorization grant for the one interactive sign-in, refresh
//! token redemption for everything after it. Requests are form-encoded
//! POSTs; failures come back as `{error, error_description}` bodies.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{scope_param, Account, Authority};
use crate::context::Context;
use crate::error::AuthError;

/// Provider error codes that mean "the user has to come back"
const INTERACTION_CODES: [&str; 4] = [
    "interaction_required",
    "consent_required",
    "login_required",
    "invalid_grant",
];

/// Device code handed to the user
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until the code expires
    pub expires_in: u64,
    /// Seconds between polls
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: String,
}

fn default_interval() -> u64 {
    5
}

/// Successful token response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub client_info: Option<String>,
    /// Family id; set for family-of-client refresh tokens
    #[serde(default)]
    pub foci: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    uid: String,
    utid: String,
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    upn: Option<String>,
}

impl TokenResponse {
    /// Scopes the provider says it granted
    pub fn granted_scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }

    /// Build the account from `client_info` and the id token
    pub fn account(&self, environment: &str) -> Result<Account, AuthError> {
        let raw = self
            .client_info
            .as_deref()
            .ok_or_else(|| AuthError::MalformedResponse("missing client_info".to_string()))?;
        let info: ClientInfo = decode_segment(raw)?;

        let claims: IdTokenClaims = match self.id_token.as_deref() {
            Some(jwt) => {
                let payload = jwt.split('.').nth(1).ok_or_else(|| {
                    AuthError::MalformedResponse("id_token is not a JWT".to_string())
                })?;
                decode_segment(payload)?
            }
            None => IdTokenClaims::default(),
        };

        Ok(Account {
            home_account_id: format!("{}.{}", info.uid, info.utid),
            environment: environment.to_string(),
            realm: info.utid,
            username: claims
                .preferred_username
                .or(claims.upn)
                .unwrap_or_default(),
        })
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedResponse(format!("bad base64url: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::MalformedResponse(e.to_string()))
}

/// One device code poll
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Pending,
    SlowDown,
    Granted(TokenResponse),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: String,
}

impl From<ErrorBody> for AuthError {
    fn from(body: ErrorBody) -> Self {
        if INTERACTION_CODES.contains(&body.error.as_str()) {
            AuthError::InteractionRequired {
                code: body.error,
                description: body.error_description,
            }
        } else {
            AuthError::Provider {
                code: body.error,
                description: body.error_description,
            }
        }
    }
}

/// Network side of an identity client
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn start_device_code(
        &self,
        ctx: &Context,
        authority: &Authority,
        client_id: &str,
        scopes: &[String],
    ) -> Result<DeviceCode, AuthError>;

    async fn poll_device_code(
        &self,
        ctx: &Context,
        authority: &Authority,
        client_id: &str,
        device_code: &str,
    ) -> Result<PollOutcome, AuthError>;

    async fn redeem_refresh_token(
        &self,
        ctx: &Context,
        authority: &Authority,
        client_id: &str,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError>;
}

/// [`TokenEndpoint`] over HTTPS
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    http_client: Client,
}

/// Body of a form POST, before it is classified
enum FormReply {
    Ok(String),
    Rejected(ErrorBody),
}

impl HttpTokenEndpoint {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let http_client = Client::builder()
            .user_agent(concat!("tenant-broker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    async fn post_form(
        &self,
        ctx: &Context,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<FormReply, AuthError> {
        debug!("POST {}", url);

        let call = async {
            let response = self
                .http_client
                .post(url)
                .form(form)
                .send()
                .await
                .map_err(|e| AuthError::Transport(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AuthError::Transport(e.to_string()))?;

            if status.is_success() {
                return Ok(FormReply::Ok(body));
            }

            match serde_json::from_str::<ErrorBody>(&body) {
                Ok(error) => Ok(FormReply::Rejected(error)),
                Err(_) => Err(AuthError::Provider {
                    code: status.as_u16().to_string(),
                    description: body,
                }),
            }
        };

        ctx.run(call).await?
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, AuthError> {
    serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn start_device_code(
        &self,
        ctx: &Context,
        authority: &Authority,
        client_id: &str,
        scopes: &[String],
    ) -> Result<DeviceCode, AuthError> {
        let scope = scope_param(scopes);
        let form = [("client_id", client_id), ("scope", scope.as_str())];

        match self
            .post_form(ctx, &authority.device_code_endpoint(), &form)
            .await?
        {
            FormReply::Ok(body) => parse(&body),
            FormReply::Rejected(error) => Err(error.into()),
        }
    }

    async fn poll_device_code(
        &self,
        ctx: &Context,
        authority: &Authority,
        client_id: &str,
        device_code: &str,
    ) -> Result<PollOutcome, AuthError> {
        let form = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("client_id", client_id),
            ("device_code", device_code),
            ("client_info", "1"),
        ];

        match self.post_form(ctx, &authority.token_endpoint(), &form).await? {
            FormReply::Ok(body) => Ok(PollOutcome::Granted(parse(&body)?)),
            FormReply::Rejected(error) => match error.error.as_str() {
                "authorization_pending" => Ok(PollOutcome::Pending),
                "slow_down" => Ok(PollOutcome::SlowDown),
                "expired_token" | "code_expired" => Err(AuthError::DeviceCodeExpired),
                _ => Err(error.into()),
            },
        }
    }

    async fn redeem_refresh_token(
        &self,
        ctx: &Context,
        authority: &Authority,
        client_id: &str,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = scope_param(scopes);
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
            ("client_info", "1"),
        ];

        match self.post_form(ctx, &authority.token_endpoint(), &form).await? {
            FormReply::Ok(body) => parse(&body),
            FormReply::Rejected(error) => Err(error.into()),
        }
    }
}
