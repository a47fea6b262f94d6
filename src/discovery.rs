//! Realm discovery loop
//!
//! One interactive sign-in at the root authority, then two levels of
//! paginated discovery: the tenants the account can see, and the
//! subscriptions inside each tenant. Every tenant gets its own identity
//! client bound to its own authority, all over the same cache and the same
//! account, so no further sign-in is needed.
//!
//! Discovery is all-or-nothing: the first error anywhere aborts the run and
//! is returned unchanged.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::context::Context;
use crate::credential::{SilentCredential, TokenCredential};
use crate::error::BrokerError;
use crate::identity::{Account, Authority, AuthorityTemplate, IdentityClient};
use crate::management::{Subscription, TenantDescription};
use crate::paging::{collect_all, PageSource};

/// Creates identity clients that share the run's cache
pub trait IdentityFactory: Send + Sync {
    fn create(&self, authority: Authority) -> Result<Arc<dyn IdentityClient>, BrokerError>;
}

/// Creates the page sources for both discovery levels
pub trait DirectoryFactory: Send + Sync {
    fn tenants(
        &self,
        credential: Arc<dyn TokenCredential>,
    ) -> Box<dyn PageSource<Item = TenantDescription>>;

    fn subscriptions(
        &self,
        credential: Arc<dyn TokenCredential>,
    ) -> Box<dyn PageSource<Item = Subscription>>;
}

/// Everything a completed run found
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub account: Account,
    pub tenants: Vec<TenantDescription>,
    pub subscriptions: Vec<Subscription>,
}

pub struct RealmDiscovery<I, D> {
    identities: I,
    directory: D,
    root_authority: Authority,
    realm_authorities: AuthorityTemplate,
    scopes: Vec<String>,
}

impl<I, D> RealmDiscovery<I, D>
where
    I: IdentityFactory,
    D: DirectoryFactory,
{
    pub fn new(
        identities: I,
        directory: D,
        root_authority: Authority,
        realm_authorities: AuthorityTemplate,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            identities,
            directory,
            root_authority,
            realm_authorities,
            scopes,
        }
    }

    /// Sign in once at the root authority
    pub async fn sign_in(
        &self,
        ctx: &Context,
    ) -> Result<(Arc<dyn IdentityClient>, Account), BrokerError> {
        let root = self.identities.create(self.root_authority.clone())?;
        let result = root.acquire_token_interactive(ctx, &self.scopes).await?;
        Ok((root, result.account))
    }

    /// Every tenant visible to `account` through `root`
    pub async fn list_tenants(
        &self,
        ctx: &Context,
        root: Arc<dyn IdentityClient>,
        account: &Account,
    ) -> Result<Vec<TenantDescription>, BrokerError> {
        let credential = Arc::new(SilentCredential::new(root, account.clone()));
        let mut pager = self.directory.tenants(credential);

        let tenants = collect_all(ctx, pager.as_mut(), |tenant| {
            info!(
                tenant_id = %tenant.tenant_id,
                name = tenant.display_name.as_deref().unwrap_or("-"),
                "*** discovered tenant"
            );
        })
        .await?;

        info!(count = tenants.len(), "*** discovered tenants");
        Ok(tenants)
    }

    /// Subscriptions of one tenant, through a client bound to that tenant
    pub async fn list_subscriptions(
        &self,
        ctx: &Context,
        tenant_id: &str,
        account: &Account,
    ) -> Result<Vec<Subscription>, BrokerError> {
        info!(tenant_id = %tenant_id, "*** listing subscriptions");

        let authority = self.realm_authorities.for_realm(tenant_id)?;
        let client = self.identities.create(authority)?;
        let credential = Arc::new(SilentCredential::new(client, account.clone()));
        let mut pager = self.directory.subscriptions(credential);

        collect_all(ctx, pager.as_mut(), |subscription| {
            info!(
                id = %subscription.id,
                name = subscription.display_name.as_deref().unwrap_or("-"),
                "*** discovered subscription"
            );
        })
        .await
    }

    /// Full run: sign-in, tenants, then subscriptions per tenant
    pub async fn run(&self, ctx: &Context) -> Result<DiscoveryReport, BrokerError> {
        self.run_with(ctx, |_| {}).await
    }

    /// [`Self::run`], calling `after_sign_in` once the interactive sign-in
    /// has landed in the cache and before any listing starts
    pub async fn run_with<F>(
        &self,
        ctx: &Context,
        after_sign_in: F,
    ) -> Result<DiscoveryReport, BrokerError>
    where
        F: FnOnce(&Account),
    {
        let (root, account) = self.sign_in(ctx).await?;
        after_sign_in(&account);

        let tenants = self.list_tenants(ctx, root, &account).await?;

        let mut subscriptions = Vec::new();
        for tenant in &tenants {
            let found = self
                .list_subscriptions(ctx, &tenant.tenant_id, &account)
                .await?;
            subscriptions.extend(found);
        }

        info!(
            tenants = tenants.len(),
            subscriptions = subscriptions.len(),
            "Discovery complete"
        );

        Ok(DiscoveryReport {
            account,
            tenants,
            subscriptions,
        })
    }
}
