//! Silent credential adapter
//!
//! Downstream API clients only know how to ask for "a bearer token for
//! these scopes". [`SilentCredential`] answers that from an identity client
//! and an already signed-in account, and never prompts: once the single
//! interactive sign-in has happened, every later token must come from the
//! shared cache or a refresh token already in it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::context::Context;
use crate::error::AuthError;
use crate::identity::{Account, IdentityClient};

/// Bearer token handed to a resource client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

/// What a resource client asks for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequestOptions {
    pub scopes: Vec<String>,
    /// Tenant the caller would like the token issued by
    pub tenant_id: Option<String>,
    /// Claims challenge from a previous 401
    pub claims: Option<String>,
}

impl TokenRequestOptions {
    pub fn for_scopes(scopes: &[String]) -> Self {
        Self {
            scopes: scopes.to_vec(),
            ..Default::default()
        }
    }
}

/// Generic "give me a bearer token" capability
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, AuthError>;
}

/// [`TokenCredential`] backed by silent acquisition only
#[derive(Clone)]
pub struct SilentCredential {
    client: Arc<dyn IdentityClient>,
    account: Account,
}

impl SilentCredential {
    pub fn new(client: Arc<dyn IdentityClient>, account: Account) -> Self {
        Self { client, account }
    }
}

#[async_trait]
impl TokenCredential for SilentCredential {
    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, AuthError> {
        if options.tenant_id.is_some() || options.claims.is_some() {
            debug!(
                tenant_id = ?options.tenant_id,
                has_claims = options.claims.is_some(),
                "Policy hints ignored by silent credential"
            );
        }

        let result = self
            .client
            .acquire_token_silent(ctx, &options.scopes, &self.account)
            .await?;

        Ok(AccessToken {
            token: result.access_token,
            expires_on: result.expires_on,
        })
    }
}
