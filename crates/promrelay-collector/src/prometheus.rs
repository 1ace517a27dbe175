use crate::error::{QueryError, Result};
use crate::{BackendConnector, QueryBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promrelay_common::types::Sample;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const QUERY_PATH: [&str; 3] = ["api", "v1", "query"];

/// Builds [`PrometheusClient`]s that share one HTTP client.
pub struct PrometheusConnector {
    client: Client,
}

impl PrometheusConnector {
    /// `request_timeout` bounds every query request made by the built clients.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl BackendConnector for PrometheusConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn QueryBackend>> {
        Ok(Arc::new(PrometheusClient::new(
            self.client.clone(),
            endpoint,
        )?))
    }
}

/// Executes instant queries against the Prometheus HTTP API at one endpoint.
pub struct PrometheusClient {
    endpoint: String,
    query_url: Url,
    client: Client,
    now_fn: fn() -> DateTime<Utc>,
}

impl PrometheusClient {
    pub fn new(client: Client, endpoint: &str) -> Result<Self> {
        let invalid = |reason: String| QueryError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut query_url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(query_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", query_url.scheme())));
        }
        query_url
            .path_segments_mut()
            .map_err(|()| invalid("URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(QUERY_PATH);

        Ok(Self {
            endpoint: endpoint.to_string(),
            query_url,
            client,
            now_fn: Utc::now,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[async_trait]
impl QueryBackend for PrometheusClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, query: &str) -> Result<Vec<Sample>> {
        let at = (self.now_fn)();
        let time = format!("{:.3}", at.timestamp_millis() as f64 / 1000.0);

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query), ("time", time.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(QueryError::HttpError {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !parsed.warnings.is_empty() {
            tracing::debug!(
                endpoint = %self.endpoint,
                warnings = ?parsed.warnings,
                "Query returned warnings"
            );
        }

        if parsed.status != "success" {
            return Err(QueryError::ApiError {
                error_type: parsed.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: parsed.error.unwrap_or_default(),
            });
        }

        let data = parsed
            .data
            .ok_or_else(|| QueryError::UnexpectedResultType("<none>".to_string()))?;
        if data.result_type != "vector" {
            return Err(QueryError::UnexpectedResultType(data.result_type));
        }

        let samples: Vec<Sample> = serde_json::from_value(data.result)?;
        if samples.is_empty() {
            return Err(QueryError::EmptyResult);
        }

        Ok(samples)
    }
}
