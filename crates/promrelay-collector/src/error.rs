/// Errors raised while building or querying a backend connection.
///
/// # Examples
///
/// ```rust
/// use promrelay_collector::error::QueryError;
///
/// let err = QueryError::UnexpectedResultType("matrix".to_string());
/// assert!(err.to_string().contains("matrix"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The endpoint string is not an absolute http(s) URL.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Non-2xx status without a Prometheus error envelope.
    #[error("query API HTTP error: status={status}, body={body}")]
    HttpError { status: u16, body: String },

    /// The API answered with `"status": "error"`.
    #[error("query API error: type={error_type}, message={message}")]
    ApiError { error_type: String, message: String },

    #[error("expected vector result type, got: {0}")]
    UnexpectedResultType(String),

    #[error("empty result vector")]
    EmptyResult,

    /// An underlying HTTP transport error from `reqwest`, including timeouts.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
