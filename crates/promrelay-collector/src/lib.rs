//! Query backends for the promrelay agent.
//!
//! A [`QueryBackend`] executes one instant query against a time-series
//! endpoint and returns the resulting samples. A [`BackendConnector`] builds
//! backends from endpoint strings, which lets the agent's source registry
//! share one connection per endpoint and lets tests substitute fakes.

pub mod error;
pub mod prometheus;

use async_trait::async_trait;
use promrelay_common::types::Sample;
use std::sync::Arc;

pub use error::{QueryError, Result};

/// A connection to a time-series query endpoint.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// The endpoint this connection was built for, used in error context.
    fn endpoint(&self) -> &str;

    /// Evaluates `query` at the current instant.
    ///
    /// # Errors
    ///
    /// Fails when the request fails, the result is not an instant vector, or
    /// the vector is empty. An empty result is never returned as `Ok`.
    async fn query(&self, query: &str) -> Result<Vec<Sample>>;
}

/// Builds [`QueryBackend`] connections from endpoint strings.
pub trait BackendConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when a connection for `endpoint` cannot be built.
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn QueryBackend>>;
}
