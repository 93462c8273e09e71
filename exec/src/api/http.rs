//! HTTP client for the risk calculation service
//!
//! `POST {endpoint}/risk/calculate` submits, `GET
//! {endpoint}/risk/calculate/{id}/results` polls. When client credentials
//! and an auth endpoint are configured, a bearer token is fetched once with
//! the client-credentials grant and reused.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::risk_api::{PollResponse, RiskApi, RiskRequest, SubmitResponse};
use crate::config::ServiceConfig;
use crate::error::{ExecError, ExecResult};
use crate::ratelimit::RateLimiter;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ReportStatus {
    status: String,
    #[serde(default, rename = "errorString")]
    error_string: Option<String>,
}

/// Risk service over HTTP
pub struct HttpRiskApi {
    config: ServiceConfig,
    client: Client,
    rate_limiter: RateLimiter,
    token: Mutex<Option<String>>,
}

impl HttpRiskApi {
    /// Create a new HTTP client
    pub fn new(config: ServiceConfig) -> ExecResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExecError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        let rate_limiter = config.rate_limit.build(config.provider.clone());

        Ok(Self {
            config,
            client,
            rate_limiter,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_endpoint.trim_end_matches('/'), path)
    }

    async fn authorize(&self, builder: RequestBuilder) -> ExecResult<RequestBuilder> {
        let (auth_endpoint, client_id, client_secret) = match (
            &self.config.auth_endpoint,
            &self.config.client_id,
            &self.config.client_secret,
        ) {
            (Some(e), Some(id), Some(secret)) => (e, id, secret),
            _ => return Ok(builder),
        };

        let mut token = self.token.lock().await;
        if token.is_none() {
            info!("Authenticating client {} against {}", client_id, auth_endpoint);
            let response = self
                .client
                .post(auth_endpoint)
                .form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                ])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ExecError::AuthenticationError(format!(
                    "token request returned {}",
                    response.status()
                )));
            }
            let body: TokenResponse = response.json().await?;
            *token = Some(body.access_token);
        }

        Ok(match token.as_deref() {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        })
    }

    async fn service_error(&self, response: reqwest::Response, what: &str) -> ExecError {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        ExecError::ServiceError {
            provider: self.config.provider.clone(),
            message: format!("{} failed: {}", what, text),
            code: Some(status.as_str().to_string()),
        }
    }
}

#[async_trait]
impl RiskApi for HttpRiskApi {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    async fn submit(&self, request: &RiskRequest) -> ExecResult<SubmitResponse> {
        self.rate_limiter.check().await?;

        debug!(
            "Submitting risk request: {} positions, {} measures, {} dates",
            request.positions.len(),
            request.measures.len(),
            request.pricing_and_market_data_as_of.len()
        );

        let builder = self.client.post(self.url("/risk/calculate")).json(request);
        let response = self.authorize(builder).await?.send().await?;

        if !response.status().is_success() {
            return Err(self.service_error(response, "Risk request").await);
        }

        Ok(response.json().await?)
    }

    async fn poll(&self, report_id: &str) -> ExecResult<PollResponse> {
        self.rate_limiter.check().await?;

        let builder = self
            .client
            .get(self.url(&format!("/risk/calculate/{}/results", report_id)));
        let response = self.authorize(builder).await?.send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ExecError::ReportNotFound(report_id.to_string())),
            StatusCode::ACCEPTED => return Ok(PollResponse::Pending),
            s if !s.is_success() => return Err(self.service_error(response, "Results query").await),
            _ => {}
        }

        let body: Value = response.json().await?;
        if body.is_array() {
            return Ok(PollResponse::Ready(body));
        }

        let status: ReportStatus = serde_json::from_value(body)?;
        match status.status.as_str() {
            "Error" | "Failed" => Ok(PollResponse::Failed(
                status.error_string.unwrap_or_else(|| status.status.clone()),
            )),
            _ => Ok(PollResponse::Pending),
        }
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_endpoint() {
        let api = HttpRiskApi::new(ServiceConfig::new("marquee", "https://api.example.com/v1/")).unwrap();
        assert_eq!(api.url("/risk/calculate"), "https://api.example.com/v1/risk/calculate");
        assert_eq!(api.provider(), "marquee");
        assert_eq!(api.poll_interval(), Duration::from_secs(1));
    }
}
