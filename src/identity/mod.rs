//! Identity layer
//!
//! The broker treats an identity client as a capability: interactive
//! sign-in once, silent acquisition afterwards. [`public::PublicClient`] is
//! the concrete implementation used by the binary; tests substitute stubs.
//!
//! ## Token reuse across realms
//!
//! Every client of a run shares one [`crate::cache::TokenCacheStore`]. The
//! refresh token obtained by the interactive sign-in against the root
//! authority is stored under the account's key, so a client created later
//! for a specific tenant finds it and redeems it silently at its own
//! authority.

pub mod authority;
pub mod endpoint;
pub mod public;
pub mod state;

pub use authority::{Authority, AuthorityTemplate};
pub use endpoint::{HttpTokenEndpoint, TokenEndpoint};
pub use public::{PublicClient, PublicClientFactory};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::AuthError;

/// Scopes the identity provider always adds; never part of a token target
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// `<object id>.<home tenant id>`; also the cache partition key
    pub home_account_id: String,
    /// Authority host the account signed in at
    pub environment: String,
    /// Home tenant
    pub realm: String,
    pub username: String,
}

/// Outcome of a successful acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub account: Account,
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
    pub granted_scopes: Vec<String>,
}

/// Per-authority token acquisition capability
#[async_trait]
pub trait IdentityClient: Send + Sync {
    fn authority(&self) -> &Authority;

    /// Sign the user in; the only step that needs a human
    async fn acquire_token_interactive(
        &self,
        ctx: &Context,
        scopes: &[String],
    ) -> Result<AuthResult, AuthError>;

    /// Acquire a token for `account` from cached grants only
    async fn acquire_token_silent(
        &self,
        ctx: &Context,
        scopes: &[String],
        account: &Account,
    ) -> Result<AuthResult, AuthError>;
}

/// Lowercased scopes without the reserved OIDC ones, in request order
pub fn normalize_scopes(scopes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let scope = scope.trim().to_lowercase();
        if scope.is_empty() || RESERVED_SCOPES.contains(&scope.as_str()) || out.contains(&scope) {
            continue;
        }
        out.push(scope);
    }
    out
}

/// Space-separated scope parameter for the token endpoint
pub fn scope_param(scopes: &[String]) -> String {
    let mut all: Vec<String> = scopes.to_vec();
    all.extend(RESERVED_SCOPES.iter().map(|s| s.to_string()));
    all.join(" ")
}
