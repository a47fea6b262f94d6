//! Management API listings
//!
//! Tenants and subscriptions come back in the `{ "value": [...],
//! "nextLink": "..." }` list envelope. Only the fields the discovery report
//! shows are decoded.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::credential::{TokenCredential, TokenRequestOptions};
use crate::discovery::DirectoryFactory;
use crate::error::{BrokerError, EnumerationError};
use crate::paging::PageSource;

pub const LIST_API_VERSION: &str = "2022-12-01";

/// A tenant the signed-in account can see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDescription {
    #[serde(default)]
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub default_domain: Option<String>,
}

/// A subscription inside a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default)]
    next_link: Option<String>,
}

/// [`PageSource`] that follows `nextLink` until it runs out
pub struct NextLinkPager<T> {
    http_client: Client,
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    next: Option<String>,
    pages: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> NextLinkPager<T> {
    pub fn new(
        http_client: Client,
        first_page: String,
        credential: Arc<dyn TokenCredential>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http_client,
            credential,
            scopes,
            next: Some(first_page),
            pages: 0,
            _item: PhantomData,
        }
    }

    /// Pages fetched so far
    pub fn pages(&self) -> usize {
        self.pages
    }
}

fn decode_page<T: DeserializeOwned>(body: &str) -> Result<(Vec<T>, Option<String>), EnumerationError> {
    let page: ListPage<T> =
        serde_json::from_str(body).map_err(|e| EnumerationError::Decode(e.to_string()))?;
    let next = page.next_link.filter(|link| !link.trim().is_empty());
    Ok((page.value, next))
}

#[async_trait]
impl<T> PageSource for NextLinkPager<T>
where
    T: DeserializeOwned + Send,
{
    type Item = T;

    fn has_more(&self) -> bool {
        self.next.is_some()
    }

    async fn next_page(&mut self, ctx: &Context) -> Result<Vec<T>, BrokerError> {
        let Some(url) = self.next.clone() else {
            return Ok(Vec::new());
        };

        // Auth failures surface as-is, not as enumeration errors
        let token = self
            .credential
            .get_token(ctx, &TokenRequestOptions::for_scopes(&self.scopes))
            .await?;

        debug!(page = self.pages + 1, "GET {}", url);
        let fetch = async {
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&token.token)
                .send()
                .await
                .map_err(|e| EnumerationError::Transport(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| EnumerationError::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(EnumerationError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(body)
        };

        let body = ctx.run(fetch).await.map_err(EnumerationError::from)??;
        let (items, next) = decode_page(&body)?;

        self.pages += 1;
        self.next = next;
        Ok(items)
    }
}

/// Tenant and subscription listings against a management endpoint
#[derive(Clone)]
pub struct ManagementDirectory {
    http_client: Client,
    endpoint: String,
    scopes: Vec<String>,
}

impl ManagementDirectory {
    pub fn new(
        endpoint: impl Into<String>,
        scopes: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let http_client = Client::builder()
            .user_agent(concat!("tenant-broker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            scopes,
        })
    }

    fn list_url(&self, collection: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.endpoint, collection, LIST_API_VERSION
        )
    }
}

impl DirectoryFactory for ManagementDirectory {
    fn tenants(
        &self,
        credential: Arc<dyn TokenCredential>,
    ) -> Box<dyn PageSource<Item = TenantDescription>> {
        Box::new(NextLinkPager::new(
            self.http_client.clone(),
            self.list_url("tenants"),
            credential,
            self.scopes.clone(),
        ))
    }

    fn subscriptions(
        &self,
        credential: Arc<dyn TokenCredential>,
    ) -> Box<dyn PageSource<Item = Subscription>> {
        Box::new(NextLinkPager::new(
            self.http_client.clone(),
            self.list_url("subscriptions"),
            credential,
            self.scopes.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::AccessToken;
    use crate::error::AuthError;
    use crate::paging::collect_all;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Granting;

    #[async_trait]
    impl TokenCredential for Granting {
        async fn get_token(
            &self,
            _ctx: &Context,
            _options: &TokenRequestOptions,
        ) -> Result<AccessToken, AuthError> {
            Ok(AccessToken {
                token: "T".to_string(),
                expires_on: Utc::now(),
            })
        }
    }

    /// Answers one connection per scripted reply, returning the request heads
    async fn serve(listener: TcpListener, replies: Vec<(u16, String)>) -> Vec<String> {
        let mut requests = Vec::new();
        for (status, body) in replies {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut head: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
            }
            requests.push(String::from_utf8_lossy(&head).to_string());

            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    }

    async fn local_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    fn pager(base: &str) -> NextLinkPager<Subscription> {
        NextLinkPager::new(
            Client::builder().no_proxy().build().unwrap(),
            format!("{}/subscriptions?api-version={}", base, LIST_API_VERSION),
            Arc::new(Granting),
            vec!["scope".to_string()],
        )
    }

    struct Rejecting(AuthError);

    #[async_trait]
    impl TokenCredential for Rejecting {
        async fn get_token(
            &self,
            _ctx: &Context,
            _options: &TokenRequestOptions,
        ) -> Result<AccessToken, AuthError> {
            Err(self.0.clone())
        }
    }

    #[test]
    fn test_decode_tenant_page_with_next_link() {
        let body = r#"{
            "value": [
                {"id": "/tenants/t1", "tenantId": "t1", "displayName": "Contoso", "defaultDomain": "contoso.com"},
                {"id": "/tenants/t2", "tenantId": "t2"}
            ],
            "nextLink": "https://management.azure.com/tenants?api-version=2022-12-01&$skiptoken=abc"
        }"#;

        let (tenants, next) = decode_page::<TenantDescription>(body).unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].display_name.as_deref(), Some("Contoso"));
        assert_eq!(tenants[1].tenant_id, "t2");
        assert!(next.unwrap().contains("skiptoken"));
    }

    #[test]
    fn test_decode_last_page() {
        let body = r#"{"value": [{"id": "/subscriptions/s1", "subscriptionId": "s1", "displayName": "Prod", "tenantId": "t1", "state": "Enabled"}], "nextLink": ""}"#;
        let (subs, next) = decode_page::<Subscription>(body).unwrap();
        assert_eq!(subs[0].subscription_id, "s1");
        assert_eq!(subs[0].tenant_id.as_deref(), Some("t1"));
        assert!(next.is_none());

        let (empty, next) = decode_page::<Subscription>("{}").unwrap();
        assert!(empty.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn test_decode_rejects_non_envelope() {
        let err = decode_page::<Subscription>("<html>").unwrap_err();
        assert!(matches!(err, EnumerationError::Decode(_)));
    }

    #[test]
    fn test_list_urls() {
        let directory = ManagementDirectory::new(
            "https://management.azure.com/",
            vec!["https://management.azure.com//.default".to_string()],
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(
            directory.list_url("tenants"),
            "https://management.azure.com/tenants?api-version=2022-12-01"
        );
    }

    #[tokio::test]
    async fn test_credential_error_passes_through_before_any_request() {
        let rejection = AuthError::interaction_required("refresh token expired");
        let mut pager: NextLinkPager<Subscription> = NextLinkPager::new(
            Client::new(),
            // Never contacted: the credential fails first
            "https://management.invalid/subscriptions".to_string(),
            Arc::new(Rejecting(rejection.clone())),
            vec!["scope".to_string()],
        );

        let err = pager.next_page(&Context::background()).await.unwrap_err();
        match err {
            BrokerError::Auth(inner) => assert_eq!(inner, rejection),
            other => panic!("unexpected error: {other}"),
        }
        assert!(pager.has_more());
        assert_eq!(pager.pages(), 0);
    }

    #[tokio::test]
    async fn test_pager_follows_next_link_until_empty() {
        let (listener, base) = local_listener().await;
        let replies = vec![
            (
                200,
                format!(
                    r#"{{"value":[{{"id":"/subscriptions/s1","subscriptionId":"s1"}}],"nextLink":"{}/subscriptions?page=2"}}"#,
                    base
                ),
            ),
            (
                200,
                format!(
                    r#"{{"value":[{{"id":"/subscriptions/s2","subscriptionId":"s2"}},{{"id":"/subscriptions/s3","subscriptionId":"s3"}}],"nextLink":"{}/subscriptions?page=3"}}"#,
                    base
                ),
            ),
            (200, r#"{"value":[],"nextLink":""}"#.to_string()),
        ];
        let server = tokio::spawn(serve(listener, replies));

        let mut pager = pager(&base);
        let subs = collect_all(&Context::background(), &mut pager, |_| {})
            .await
            .unwrap();

        let ids: Vec<&str> = subs.iter().map(|s| s.subscription_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(pager.pages(), 3);
        assert!(!pager.has_more());

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("GET /subscriptions?api-version=2022-12-01 "));
        assert!(requests[1].starts_with("GET /subscriptions?page=2 "));
        assert!(requests[2].starts_with("GET /subscriptions?page=3 "));
        assert!(requests
            .iter()
            .all(|r| r.to_lowercase().contains("authorization: bearer t")));
    }

    #[tokio::test]
    async fn test_pager_stops_on_error_status() {
        let (listener, base) = local_listener().await;
        let replies = vec![
            (
                200,
                format!(
                    r#"{{"value":[{{"id":"/subscriptions/s1","subscriptionId":"s1"}}],"nextLink":"{}/subscriptions?page=2"}}"#,
                    base
                ),
            ),
            (403, r#"{"error":{"code":"AuthorizationFailed"}}"#.to_string()),
        ];
        let server = tokio::spawn(serve(listener, replies));

        let mut pager = pager(&base);
        let err = collect_all(&Context::background(), &mut pager, |_| {})
            .await
            .unwrap_err();

        match err {
            BrokerError::Enumeration(EnumerationError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("AuthorizationFailed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pager.pages(), 1);
        assert!(pager.has_more());
        assert_eq!(server.await.unwrap().len(), 2);
    }
}
