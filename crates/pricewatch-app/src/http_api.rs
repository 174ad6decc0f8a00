//! HTTP implementation of the API collaborator.
//!
//! Failure mapping is what the queueing layer keys off: anything that
//! prevented a response (connect failure, timeout, broken transfer) is a
//! transport error and therefore queueable; a received non-2xx response
//! is a rejection and is surfaced to the caller instead.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use pricewatch_core::{Alert, AlertSpec, Coin, MarketOverview, WatchlistEntry};
use pricewatch_sync::{ApiClient, ApiError, ApiResult, BoxFuture};

/// Longest rejection body kept in the error.
const MAX_BODY_EXCERPT: usize = 256;

/// Remote API client over HTTP.
pub struct HttpApiClient {
    client: Client,
    base_url: Url,
}

impl HttpApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Build an endpoint URL from path segments, percent-encoding each.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport("API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn coins_endpoint(&self, search: Option<&str>, limit: Option<u32>) -> ApiResult<Url> {
        let mut url = self.endpoint(&["api", "coins"])?;
        // Skipped entirely when bare: an empty serializer would leave a
        // dangling `?` on the URL.
        if search.is_some() || limit.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(search) = search {
                query.append_pair("search", search);
            }
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        debug!(url = %url, "GET");
        let response = self.client.get(url).send().await.map_err(transport)?;
        read_json(check(response).await?).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> ApiResult<T> {
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        read_json(check(response).await?).await
    }

    async fn post_unit<B: Serialize>(&self, url: Url, body: &B) -> ApiResult<()> {
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }

    async fn delete_unit(&self, url: Url) -> ApiResult<()> {
        debug!(url = %url, "DELETE");
        let response = self.client.delete(url).send().await.map_err(transport)?;
        check(response).await?;
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(format!("HTTP request failed: {e}"))
}

async fn check(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Rejected {
        status: status.as_u16(),
        body: excerpt(&body),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let text = response
        .text()
        .await
        .map_err(|e| ApiError::Transport(format!("Failed to read body: {e}")))?;
    Ok(serde_json::from_str(&text)?)
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_BODY_EXCERPT).collect()
}

impl ApiClient for HttpApiClient {
    fn get_watchlist(&self) -> BoxFuture<'_, ApiResult<Vec<WatchlistEntry>>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "watchlist"])?;
            self.get_json(url).await
        })
    }

    fn add_to_watchlist(&self, symbol: String) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "watchlist"])?;
            self.post_unit(url, &json!({ "symbol": symbol })).await
        })
    }

    fn remove_from_watchlist(&self, symbol: String) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "watchlist", &symbol])?;
            self.delete_unit(url).await
        })
    }

    fn get_alerts(&self) -> BoxFuture<'_, ApiResult<Vec<Alert>>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "alerts"])?;
            self.get_json(url).await
        })
    }

    fn create_alert(&self, spec: AlertSpec) -> BoxFuture<'_, ApiResult<Alert>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "alerts"])?;
            self.post_json(url, &spec).await
        })
    }

    fn delete_alert(&self, id: String) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "alerts", &id])?;
            self.delete_unit(url).await
        })
    }

    fn get_market_overview(&self) -> BoxFuture<'_, ApiResult<MarketOverview>> {
        Box::pin(async move {
            let url = self.endpoint(&["api", "market", "overview"])?;
            self.get_json(url).await
        })
    }

    fn get_available_coins(
        &self,
        search: Option<String>,
        limit: Option<u32>,
    ) -> BoxFuture<'_, ApiResult<Vec<Coin>>> {
        Box::pin(async move {
            let url = self.coins_endpoint(search.as_deref(), limit)?;
            self.get_json(url).await
        })
    }
}
