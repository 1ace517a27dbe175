use promrelay_collector::QueryError;

/// Errors raised by the agent's cache, auth provider and upstream gateway.
///
/// # Examples
///
/// ```rust
/// use promrelay_agent::error::AgentError;
///
/// let err = AgentError::PushRejected { status: 503, body: "busy".to_string() };
/// assert!(err.to_string().contains("503"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The token endpoint refused the client-credentials grant.
    #[error("token request rejected: status={status}, body={body}")]
    TokenRejected { status: u16, body: String },

    /// The ingestion API answered a push with a non-2xx status.
    #[error("push rejected: status={status}, body={body}")]
    PushRejected { status: u16, body: String },

    /// The GraphQL endpoint answered with a non-2xx status.
    #[error("source query rejected: status={status}, body={body}")]
    SourceQueryRejected { status: u16, body: String },

    #[error("graphql errors: {0}")]
    Graphql(String),

    #[error("connect to query backend {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: QueryError,
    },

    #[error("query: {query} url: {endpoint}: {source}")]
    Query {
        query: String,
        endpoint: String,
        #[source]
        source: QueryError,
    },

    /// The tick deadline passed before the named operation completed.
    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
