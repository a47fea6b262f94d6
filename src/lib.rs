//! Tenant Broker
//!
//! Signs a user in once, then walks every tenant the account can see and
//! lists its subscriptions, obtaining each tenant's tokens silently from a
//! token cache shared by all identity clients of the run.
//!
//! # Layout
//! - [`cache`]: in-memory partitioned token cache
//! - [`identity`]: authorities, cached token state and the public client
//! - [`credential`]: silent "bearer token for scopes" adapter
//! - [`paging`] and [`management`]: paginated listings
//! - [`discovery`]: the realm discovery loop

pub mod cache;
pub mod config;
pub mod context;
pub mod credential;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod management;
pub mod paging;

pub use cache::{CacheAccessor, TokenCacheStore};
pub use config::BrokerConfig;
pub use context::{CancelHandle, Context};
pub use credential::{AccessToken, SilentCredential, TokenCredential, TokenRequestOptions};
pub use discovery::{DiscoveryReport, RealmDiscovery};
pub use error::{AuthError, BrokerError, CacheError, EnumerationError};
