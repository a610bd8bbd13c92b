//! HTTP REST client for depth snapshots.
//!
//! This module provides the [`RestClient`], which fetches full order book
//! snapshots from the per-segment depth endpoint and serves as the engine's
//! [`SnapshotFetcher`].
//!
//! # Example
//!
//! ```rust,no_run
//! use depth_sync::client::RestClient;
//! use depth_sync::types::{InstrumentKey, Segment};
//! use depth_sync::Config;
//!
//! # async fn example() -> depth_sync::Result<()> {
//! let rest = RestClient::new(&Config::new())?;
//! let key = InstrumentKey::new("BTC", "USDT", Segment::Spot);
//! let snapshot = rest.depth_snapshot(&key, 100).await?;
//! println!("{} levels at update {}", snapshot.bids.len(), snapshot.last_update_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::{Config, Environment};
use crate::error::{ApiError, Error};
use crate::sync::SnapshotFetcher;
use crate::types::messages::{DepthSnapshotResponse, ErrorDetails};
use crate::types::{InstrumentKey, Snapshot};

/// HTTP client for the exchange's public REST API
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    environment: Environment,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            environment: config.environment(),
        })
    }

    /// Depth endpoint URL for a book
    pub fn depth_url(&self, key: &InstrumentKey, limit: u32) -> Result<Url, Error> {
        let mut url = Url::parse(self.environment.rest_base_url(key.segment()))?
            .join(Environment::depth_path(key.segment()))?;
        url.query_pairs_mut()
            .append_pair("symbol", &key.symbol())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    /// Fetch a full snapshot of `key` with at most `limit` levels per side
    pub async fn depth_snapshot(&self, key: &InstrumentKey, limit: u32) -> Result<Snapshot, Error> {
        let url = self.depth_url(key, limit)?;
        debug!(key = %key, url = %url, "requesting depth snapshot");
        let body: DepthSnapshotResponse = self.get(url).await?;
        Ok(body.into_snapshot(key.clone(), limit))
    }

    /// Make a GET request and deserialize the body
    pub async fn get<T>(&self, url: Url) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Http(e)
            }
        })?;

        self.handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();

        // 418 is the ban that follows ignored 429s
        if status.as_u16() == 429 || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(
                match serde_json::from_str::<ErrorDetails>(&body) {
                    Ok(details) => ApiError::with_code(status.as_u16(), details.code, details.msg),
                    Err(_) => ApiError::new(status.as_u16(), body),
                },
            ));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(Error::from)
    }
}

#[async_trait]
impl SnapshotFetcher for RestClient {
    async fn fetch(&self, key: &InstrumentKey, depth_limit: u32) -> Result<Snapshot, Error> {
        self.depth_snapshot(key, depth_limit).await
    }
}
