//! Content source backed by a remote scraping service
//!
//! The backend exposes `POST /get_tweets` taking `{"size": n, "keyword": k}`
//! and answering `{"tweets": [...]}`. Requests are routed through the leased
//! resource's proxy and spaced by a governor rate limiter.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

use super::{ContentSource, FetchRequest};
use crate::config::BackendConfig;
use crate::models::RawRecord;
use crate::pool::{Credential, Resource, ResourceId};
use crate::utils::error::FetchError;

/// Backend endpoint path
pub const GET_TWEETS_PATH: &str = "get_tweets";

#[derive(Debug, Serialize)]
struct BackendRequest<'a> {
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyword: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct BackendResponse {
    #[serde(default)]
    tweets: Vec<RawRecord>,
}

/// HTTP client for the remote scraping backend
pub struct RemoteBackendSource {
    endpoint: Url,
    config: BackendConfig,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    /// One client per resource, each bound to that resource's proxy
    clients: Mutex<HashMap<ResourceId, Client>>,
}

impl RemoteBackendSource {
    pub fn new(config: &BackendConfig) -> Result<Self, FetchError> {
        let base = if config.url.ends_with('/') {
            config.url.clone()
        } else {
            format!("{}/", config.url)
        };
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join(GET_TWEETS_PATH))
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", config.url)))?;

        let rate_limiter = Quota::with_period(config.request_delay()).map(RateLimiter::direct);

        Ok(Self {
            endpoint,
            config: config.clone(),
            rate_limiter,
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn client_for(&self, resource: &Resource) -> Result<Client, FetchError> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(client) = clients.get(&resource.id) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.config.request_timeout())
            .user_agent(&self.config.user_agent)
            .gzip(true);

        match &resource.proxy {
            Some(endpoint) => {
                let mut proxy = Proxy::all(endpoint.to_url())
                    .map_err(|e| FetchError::Proxy(format!("{endpoint}: {e}")))?;
                if let Some((user, pass)) = endpoint.auth() {
                    proxy = proxy.basic_auth(user, pass);
                }
                builder = builder.proxy(proxy);
            }
            None => {
                builder = builder.no_proxy();
            }
        }

        let client = builder.build()?;
        clients.insert(resource.id.clone(), client.clone());
        Ok(client)
    }
}

impl std::fmt::Debug for RemoteBackendSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackendSource")
            .field("endpoint", &self.endpoint.as_str())
            .field("request_delay_ms", &self.config.request_delay_ms)
            .finish()
    }
}

#[async_trait]
impl ContentSource for RemoteBackendSource {
    async fn fetch(
        &self,
        resource: &Resource,
        credential: &Credential,
        request: &FetchRequest,
    ) -> Result<Vec<RawRecord>, FetchError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let client = self.client_for(resource)?;
        let body = BackendRequest {
            size: request.size,
            keyword: request.keyword.as_deref(),
        };

        tracing::debug!(
            resource = %resource.id,
            credential = %credential.label(),
            keyword = ?request.keyword,
            size = request.size,
            "Requesting batch from backend"
        );

        let response = client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        if let Some(error) = FetchError::from_status(response.status().as_u16()) {
            tracing::warn!(
                resource = %resource.id,
                status = response.status().as_u16(),
                "Backend returned an error status"
            );
            return Err(error);
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;
        let parsed: BackendResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        tracing::debug!(resource = %resource.id, records = parsed.tweets.len(), "Batch received");
        Ok(parsed.tweets)
    }
}
