//! Public client: device code sign-in plus cache-backed silent acquisition

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::endpoint::{DeviceCode, PollOutcome, TokenEndpoint, TokenResponse};
use super::state::{Grant, TokenState};
use super::{Account, AuthResult, Authority, IdentityClient};
use crate::cache::{CacheAccessor, TokenCacheStore};
use crate::context::Context;
use crate::discovery::IdentityFactory;
use crate::error::{AuthError, BrokerError};

/// Extra wait the provider asks for with `slow_down`
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Bounds applied to provider-supplied timings
const MIN_POLL_INTERVAL_SECS: u64 = 1;
const MAX_DEVICE_CODE_LIFETIME_SECS: u64 = 60 * 60;
const MAX_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Shows the device code instructions to the user
pub type DevicePrompt = Arc<dyn Fn(&DeviceCode) + Send + Sync>;

/// Default prompt: the provider's message on stderr
pub fn stderr_prompt() -> DevicePrompt {
    Arc::new(|code: &DeviceCode| {
        if code.message.is_empty() {
            eprintln!(
                "🔐 To sign in, open {} and enter the code {}",
                code.verification_uri, code.user_code
            );
        } else {
            eprintln!("🔐 {}", code.message);
        }
    })
}

/// Identity client for one authority
///
/// Holds no token state of its own: every read starts by replacing a
/// fresh [`TokenState`] from the shared cache under the account's key, and
/// every new grant is exported back under the same key.
pub struct PublicClient {
    client_id: String,
    authority: Authority,
    cache: Arc<dyn CacheAccessor>,
    endpoint: Arc<dyn TokenEndpoint>,
    prompt: DevicePrompt,
}

impl PublicClient {
    pub fn new(
        client_id: impl Into<String>,
        authority: Authority,
        cache: Arc<dyn CacheAccessor>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            authority,
            cache,
            endpoint,
            prompt: stderr_prompt(),
        }
    }

    pub fn with_prompt(mut self, prompt: DevicePrompt) -> Self {
        self.prompt = prompt;
        self
    }

    fn load(&self, account: &Account) -> TokenState {
        let mut state = TokenState::default();
        self.cache.replace(&mut state, &account.home_account_id);
        state
    }

    /// Record a grant for `account` and write it back to the cache
    fn store(
        &self,
        account: &Account,
        scopes: &[String],
        response: &TokenResponse,
    ) -> AuthResult {
        let now = Utc::now();
        let expires_on = now + token_lifetime(response.expires_in);

        // Granted scopes are stored alongside the requested ones so a later
        // request phrased either way is a hit
        let mut target: Vec<String> = scopes.to_vec();
        target.extend(response.granted_scopes());

        let mut state = self.load(account);
        state.record(
            Grant {
                account,
                realm: self.authority.tenant(),
                client_id: &self.client_id,
                scopes: &target,
                access_token: &response.access_token,
                expires_on,
                refresh_token: response.refresh_token.as_deref(),
                family_id: response.foci.as_deref(),
            },
            now,
        );
        self.cache.export(&state, &account.home_account_id);

        AuthResult {
            account: account.clone(),
            access_token: response.access_token.clone(),
            expires_on,
            granted_scopes: response.granted_scopes(),
        }
    }

    async fn poll_until_granted(
        &self,
        ctx: &Context,
        code: &DeviceCode,
    ) -> Result<TokenResponse, AuthError> {
        let (lifetime, mut interval) = poll_schedule(code);
        let expires_at = Instant::now() + lifetime;

        loop {
            if Instant::now() >= expires_at {
                return Err(AuthError::DeviceCodeExpired);
            }
            ctx.sleep(interval).await?;

            match self
                .endpoint
                .poll_device_code(ctx, &self.authority, &self.client_id, &code.device_code)
                .await?
            {
                PollOutcome::Granted(response) => return Ok(response),
                PollOutcome::Pending => debug!("Sign-in pending"),
                PollOutcome::SlowDown => {
                    interval = (interval + SLOW_DOWN_STEP).min(lifetime);
                    debug!(interval_secs = interval.as_secs(), "Provider asked to slow down");
                }
            }
        }
    }
}

fn token_lifetime(expires_in: i64) -> chrono::Duration {
    chrono::Duration::seconds(expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS))
}

/// Code lifetime and first poll interval, clamped to sane bounds
fn poll_schedule(code: &DeviceCode) -> (Duration, Duration) {
    let lifetime = code.expires_in.min(MAX_DEVICE_CODE_LIFETIME_SECS);
    let interval = code
        .interval
        .clamp(MIN_POLL_INTERVAL_SECS, MAX_DEVICE_CODE_LIFETIME_SECS);
    (Duration::from_secs(lifetime), Duration::from_secs(interval))
}

#[async_trait]
impl IdentityClient for PublicClient {
    fn authority(&self) -> &Authority {
        &self.authority
    }

    async fn acquire_token_interactive(
        &self,
        ctx: &Context,
        scopes: &[String],
    ) -> Result<AuthResult, AuthError> {
        info!(authority = %self.authority, "Starting device code sign-in");

        let code = self
            .endpoint
            .start_device_code(ctx, &self.authority, &self.client_id, scopes)
            .await?;
        (self.prompt)(&code);

        let response = self.poll_until_granted(ctx, &code).await?;
        let account = response.account(self.authority.host())?;

        info!(
            account = %account.username,
            home_tenant = %account.realm,
            "Signed in"
        );
        Ok(self.store(&account, scopes, &response))
    }

    async fn acquire_token_silent(
        &self,
        ctx: &Context,
        scopes: &[String],
        account: &Account,
    ) -> Result<AuthResult, AuthError> {
        let state = self.load(account);

        if let Some(cached) = state.find_access_token(
            account,
            self.authority.tenant(),
            &self.client_id,
            scopes,
            Utc::now(),
        ) {
            debug!(realm = %self.authority.tenant(), "Access token served from cache");
            return Ok(AuthResult {
                account: account.clone(),
                access_token: cached.secret.clone(),
                expires_on: cached.expires_on(),
                granted_scopes: cached.target.clone(),
            });
        }

        let refresh_token = state
            .find_refresh_token(account, &self.client_id)
            .map(|rt| rt.secret.clone())
            .ok_or_else(|| {
                AuthError::interaction_required(format!(
                    "no refresh token cached for {}",
                    account.home_account_id
                ))
            })?;

        debug!(realm = %self.authority.tenant(), "Redeeming cached refresh token");
        let response = self
            .endpoint
            .redeem_refresh_token(ctx, &self.authority, &self.client_id, &refresh_token, scopes)
            .await?;

        Ok(self.store(account, scopes, &response))
    }
}

/// Creates a [`PublicClient`] per authority over one shared cache
pub struct PublicClientFactory {
    client_id: String,
    cache: Arc<TokenCacheStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    prompt: DevicePrompt,
}

impl PublicClientFactory {
    pub fn new(
        client_id: impl Into<String>,
        cache: Arc<TokenCacheStore>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            cache,
            endpoint,
            prompt: stderr_prompt(),
        }
    }

    pub fn with_prompt(mut self, prompt: DevicePrompt) -> Self {
        self.prompt = prompt;
        self
    }
}

impl IdentityFactory for PublicClientFactory {
    fn create(&self, authority: Authority) -> Result<Arc<dyn IdentityClient>, BrokerError> {
        debug!(authority = %authority, "Creating identity client");
        let client = PublicClient::new(
            self.client_id.clone(),
            authority,
            self.cache.clone(),
            self.endpoint.clone(),
        )
        .with_prompt(self.prompt.clone());
        Ok(Arc::new(client))
    }
}
