//! Analysis API Client
//!
//! HTTP client for the market-data and analysis backend. The backend is a
//! black box: only request/response shapes matter here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::*;
use crate::types::Ohlc;

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Contract of the external analysis collaborators
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// `GET market-data?symbol&timeframe&periods`
    async fn market_data(&self, symbol: &str, timeframe: &str, periods: usize) -> Result<Vec<Ohlc>>;

    /// `POST pivot/detect`
    async fn detect_pivots(&self, request: &PivotDetectRequest) -> Result<PivotDetectResponse>;

    /// `POST fibonacci/{retracement|extension}`
    async fn fibonacci_levels(
        &self,
        kind: FibonacciKind,
        request: &FibonacciRequest,
    ) -> Result<FibonacciResponse>;

    /// `POST harmonic/validate`
    async fn validate_harmonic(&self, request: &HarmonicValidateRequest) -> Result<Option<HarmonicPattern>>;
}

/// Validate a harmonic pattern, treating any failure as "no pattern"
pub async fn validate_harmonic_or_none(
    api: &dyn AnalysisApi,
    request: &HarmonicValidateRequest,
) -> Option<HarmonicPattern> {
    match api.validate_harmonic(request).await {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Harmonic validation failed, treating as no pattern: {}", e);
            None
        }
    }
}

/// reqwest-backed implementation of [`AnalysisApi`]
pub struct HttpAnalysisClient {
    client: Client,
    base_url: String,
}

impl HttpAnalysisClient {
    /// Create a new client from environment variables
    ///
    /// Reads `FIB_WORKFLOW_API_URL`, defaulting to [`DEFAULT_BASE_URL`]
    pub fn from_env() -> Self {
        let base_url = std::env::var("FIB_WORKFLOW_API_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, Duration::from_secs(30))
    }

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a POST request with a JSON body
    async fn post<T: serde::Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed with status {}: {}", endpoint, status, body));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint))
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisClient {
    async fn market_data(&self, symbol: &str, timeframe: &str, periods: usize) -> Result<Vec<Ohlc>> {
        let url = format!("{}/market-data", self.base_url);
        debug!("GET {} ({} {} x{})", url, symbol, timeframe, periods);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.to_string()),
                ("periods", periods.to_string()),
            ])
            .send()
            .await
            .context("Failed to send market-data request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("market-data failed with status {}: {}", status, body));
        }

        response
            .json()
            .await
            .context("Failed to parse market-data response")
    }

    async fn detect_pivots(&self, request: &PivotDetectRequest) -> Result<PivotDetectResponse> {
        self.post("pivot/detect", request).await
    }

    async fn fibonacci_levels(
        &self,
        kind: FibonacciKind,
        request: &FibonacciRequest,
    ) -> Result<FibonacciResponse> {
        self.post(&format!("fibonacci/{}", kind.path()), request).await
    }

    async fn validate_harmonic(&self, request: &HarmonicValidateRequest) -> Result<Option<HarmonicPattern>> {
        self.post("harmonic/validate", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpAnalysisClient::new("http://example.test/api/", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://example.test/api");
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades_to_none() {
        // Port 9 (discard) on localhost is not an HTTP server
        let client = HttpAnalysisClient::new("http://127.0.0.1:9", Duration::from_millis(200));
        let request = HarmonicValidateRequest {
            x: 1.0,
            a: 2.0,
            b: 1.5,
            c: 1.8,
            d: 1.2,
        };
        assert!(validate_harmonic_or_none(&client, &request).await.is_none());
    }
}
