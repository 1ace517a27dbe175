//! Client side of the central API: pushing flushed batches and fetching the
//! current source list over GraphQL.

use crate::auth::TokenSource;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use promrelay_common::types::{SourceSpec, ValueSet};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const METRICS_PATH: &str = "metricsin/";
const QUERY_PATH: &str = "query";

pub const METRIC_SOURCES_QUERY: &str = "{
\tmetricSources {
\t\tid
\t\tsourceURL
\t\tquery
\t}
}";

/// Receives flushed value sets.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(&self, values: &ValueSet) -> Result<()>;
}

/// Answers "what are my current sources".
#[async_trait]
pub trait SourceFeed: Send + Sync {
    async fn query_sources(&self) -> Result<Vec<SourceSpec>>;
}

/// Resolves a path against the API base the way relative URL references
/// resolve, so `https://api/v2/` + `query` is `https://api/v2/query` while
/// `https://api/v2` + `query` is `https://api/query`.
fn resolve(base: &str, path: &str) -> Result<Url> {
    let invalid = |reason: String| AgentError::InvalidUrl {
        url: base.to_string(),
        reason,
    };
    Url::parse(base)
        .map_err(|e| invalid(e.to_string()))?
        .join(path)
        .map_err(|e| invalid(e.to_string()))
}

async fn authorize(
    request: RequestBuilder,
    auth: Option<&Arc<dyn TokenSource>>,
) -> Result<RequestBuilder> {
    match auth {
        Some(auth) => {
            let token = auth.access_token().await?;
            Ok(request.header("Authorization", format!("bearer {token}")))
        }
        None => Ok(request),
    }
}

/// Pushes value sets to the ingestion endpoint as JSON.
pub struct MetricsPusher {
    client: Client,
    url: Url,
    auth: Option<Arc<dyn TokenSource>>,
}

impl MetricsPusher {
    /// `auth` is `None` in test mode, where requests carry no credentials.
    pub fn new(client: Client, api_server: &str, auth: Option<Arc<dyn TokenSource>>) -> Result<Self> {
        Ok(Self {
            client,
            url: resolve(api_server, METRICS_PATH)?,
            auth,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl MetricsSink for MetricsPusher {
    async fn push(&self, values: &ValueSet) -> Result<()> {
        let payload = serde_json::to_vec(values)?;
        let request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .body(payload);
        let response = authorize(request, self.auth.as_ref()).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::PushRejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricSourcesData {
    #[serde(default)]
    metric_sources: Vec<SourceSpec>,
}

/// Fetches the agent's source list from the GraphQL endpoint.
pub struct SourceQueryer {
    client: Client,
    url: Url,
    auth: Option<Arc<dyn TokenSource>>,
}

impl SourceQueryer {
    pub fn new(client: Client, api_server: &str, auth: Option<Arc<dyn TokenSource>>) -> Result<Self> {
        Ok(Self {
            client,
            url: resolve(api_server, QUERY_PATH)?,
            auth,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SourceFeed for SourceQueryer {
    async fn query_sources(&self) -> Result<Vec<SourceSpec>> {
        let request = self.client.post(self.url.clone()).json(&GraphqlRequest {
            query: METRIC_SOURCES_QUERY,
            variables: None,
        });
        let response = authorize(request, self.auth.as_ref()).await?.send().await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: GraphqlResponse<MetricSourcesData> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(AgentError::SourceQueryRejected {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !parsed.errors.is_empty() {
            let messages: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(AgentError::Graphql(messages.join("; ")));
        }

        Ok(parsed.data.map(|d| d.metric_sources).unwrap_or_default())
    }
}
