//! Token state kept by the identity layer
//!
//! This is what ends up inside the cache blobs: accounts, access tokens and
//! refresh tokens, serialized as JSON. Expiry is carried here, not by the
//! store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize_scopes, Account};
use crate::cache::{Marshaler, Unmarshaler};
use crate::error::CacheError;

/// Access tokens this close to expiry are treated as expired
pub const EXPIRY_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub home_account_id: String,
    pub environment: String,
    pub realm: String,
    pub client_id: String,
    /// Normalized scopes the token is valid for
    pub target: Vec<String>,
    pub secret: String,
    /// Unix seconds
    pub expires_on: i64,
    pub cached_at: i64,
}

impl AccessTokenRecord {
    pub fn expires_on(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.expires_on, 0).unwrap_or_default()
    }

    fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|scope| self.target.contains(scope))
    }

    fn intersects(&self, scopes: &[String]) -> bool {
        scopes.iter().any(|scope| self.target.contains(scope))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    /// Set when the token is redeemable by every client of the family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    pub secret: String,
}

/// Serializable accounts and tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
    #[serde(default)]
    pub access_tokens: Vec<AccessTokenRecord>,
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshTokenRecord>,
}

/// Everything needed to record a fresh grant
#[derive(Debug, Clone)]
pub struct Grant<'a> {
    pub account: &'a Account,
    pub realm: &'a str,
    pub client_id: &'a str,
    pub scopes: &'a [String],
    pub access_token: &'a str,
    pub expires_on: DateTime<Utc>,
    pub refresh_token: Option<&'a str>,
    pub family_id: Option<&'a str>,
}

impl TokenState {
    /// Cached access token for the account and realm that covers `scopes`
    /// and is not about to expire
    pub fn find_access_token(
        &self,
        account: &Account,
        realm: &str,
        client_id: &str,
        scopes: &[String],
        now: DateTime<Utc>,
    ) -> Option<&AccessTokenRecord> {
        let wanted = normalize_scopes(scopes);
        let fresh_after = now.timestamp() + EXPIRY_SKEW_SECS;

        self.access_tokens.iter().find(|at| {
            at.home_account_id == account.home_account_id
                && at.environment == account.environment
                && at.realm.eq_ignore_ascii_case(realm)
                && at.client_id == client_id
                && at.expires_on > fresh_after
                && at.covers(&wanted)
        })
    }

    /// Refresh token issued to this client, or to its family
    pub fn find_refresh_token(
        &self,
        account: &Account,
        client_id: &str,
    ) -> Option<&RefreshTokenRecord> {
        let for_account = |rt: &&RefreshTokenRecord| {
            rt.home_account_id == account.home_account_id && rt.environment == account.environment
        };

        self.refresh_tokens
            .iter()
            .filter(for_account)
            .find(|rt| rt.client_id == client_id)
            .or_else(|| {
                self.refresh_tokens
                    .iter()
                    .filter(for_account)
                    .find(|rt| rt.family_id.is_some())
            })
    }

    /// Store the account and the tokens of a grant
    pub fn record(&mut self, grant: Grant<'_>, now: DateTime<Utc>) {
        let account = grant.account;
        self.accounts
            .insert(account.home_account_id.clone(), account.clone());

        let target = normalize_scopes(grant.scopes);

        // One token per scope set: drop older ones that overlap
        self.access_tokens.retain(|at| {
            !(at.home_account_id == account.home_account_id
                && at.environment == account.environment
                && at.realm.eq_ignore_ascii_case(grant.realm)
                && at.client_id == grant.client_id
                && at.intersects(&target))
        });
        self.access_tokens.push(AccessTokenRecord {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            realm: grant.realm.to_string(),
            client_id: grant.client_id.to_string(),
            target,
            secret: grant.access_token.to_string(),
            expires_on: grant.expires_on.timestamp(),
            cached_at: now.timestamp(),
        });

        if let Some(secret) = grant.refresh_token {
            self.refresh_tokens.retain(|rt| {
                !(rt.home_account_id == account.home_account_id
                    && rt.environment == account.environment
                    && rt.client_id == grant.client_id)
            });
            self.refresh_tokens.push(RefreshTokenRecord {
                home_account_id: account.home_account_id.clone(),
                environment: account.environment.clone(),
                client_id: grant.client_id.to_string(),
                family_id: grant.family_id.map(|f| f.to_string()),
                secret: secret.to_string(),
            });
        }
    }
}

impl Marshaler for TokenState {
    fn marshal(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::MarshalFailed(e.to_string()))
    }
}

impl Unmarshaler for TokenState {
    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CacheError> {
        // Parse first so a corrupt blob leaves the current state alone
        let parsed: TokenState =
            serde_json::from_slice(data).map_err(|e| CacheError::UnmarshalFailed(e.to_string()))?;
        *self = parsed;
        Ok(())
    }
}
