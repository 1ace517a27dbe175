//! Accumulation cache.
//!
//! The cache owns the [`SourceRegistry`], queries every source on each
//! [`Cache::collect`] call, and accumulates results per source id until the
//! sample count reaches the configured limit or the oldest unflushed data is
//! older than the configured maximum age. At that point the whole value set is
//! handed back to the caller and the cache starts over.
//!
//! The cache is driven by a single task and is not internally synchronized.

use crate::context::TickContext;
use crate::error::{AgentError, Result};
use crate::registry::SourceRegistry;
use chrono::{DateTime, Duration, Utc};
use promrelay_collector::{BackendConnector, QueryError};
use promrelay_common::types::{SourceSpec, ValueSet};
use std::sync::Arc;

/// Source of the current time for flush decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct Cache {
    registry: SourceRegistry,
    connector: Arc<dyn BackendConnector>,
    values: ValueSet,
    sample_count: usize,
    limit: usize,
    last_flush: DateTime<Utc>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl Cache {
    /// Creates a cache with an empty registry; `last_flush` starts at now.
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        limit: usize,
        max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_flush = clock.now();
        Self {
            registry: SourceRegistry::default(),
            connector,
            values: ValueSet::new(),
            sample_count: 0,
            limit,
            last_flush,
            max_age,
            clock,
        }
    }

    /// Creates a cache and installs `sources` into it.
    pub fn with_sources(
        sources: Vec<SourceSpec>,
        connector: Arc<dyn BackendConnector>,
        limit: usize,
        max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut cache = Self::new(connector, limit, max_age, clock);
        cache.install(sources)?;
        Ok(cache)
    }

    /// Replaces the source registry.
    ///
    /// Returns the values accumulated under the previous registry so the
    /// caller can push them. If any connection cannot be built, nothing is
    /// changed.
    pub fn install(&mut self, sources: Vec<SourceSpec>) -> Result<ValueSet> {
        let registry = SourceRegistry::build(sources, self.connector.as_ref())?;

        let previous = std::mem::take(&mut self.values);
        let previous_count = std::mem::replace(&mut self.sample_count, 0);
        self.registry = registry;
        self.last_flush = self.clock.now();

        tracing::info!(
            sources = self.registry.len(),
            leftover_samples = previous_count,
            "Installed new sources"
        );

        Ok(previous)
    }

    /// Queries every source once and appends the results.
    ///
    /// Returns `Some(values)` when this call triggered a flush and `None`
    /// otherwise. A failed query aborts the call; samples appended for sources
    /// earlier in the registry during the same call are kept.
    pub async fn collect(&mut self, ctx: &TickContext) -> Result<Option<ValueSet>> {
        for source in self.registry.sources() {
            let query_error = |source_err: QueryError| AgentError::Query {
                query: source.spec.query.clone(),
                endpoint: source.spec.endpoint.clone(),
                source: source_err,
            };

            let samples = match ctx.within(source.backend.query(&source.spec.query)).await {
                Some(Ok(samples)) if samples.is_empty() => {
                    return Err(query_error(QueryError::EmptyResult))
                }
                Some(Ok(samples)) => samples,
                Some(Err(e)) => return Err(query_error(e)),
                None => {
                    return Err(AgentError::Timeout {
                        operation: format!(
                            "query: {} url: {}",
                            source.spec.query, source.spec.endpoint
                        ),
                    })
                }
            };

            for sample in &samples {
                tracing::trace!(source = source.spec.id, %sample, "Collected sample");
            }
            self.sample_count += samples.len();
            self.values
                .entry(source.spec.id)
                .or_default()
                .extend(samples);
        }

        let now = self.clock.now();
        // An age too large to represent never expires.
        let aged = self
            .last_flush
            .checked_add_signed(self.max_age)
            .is_some_and(|deadline| now > deadline);
        if self.sample_count >= self.limit || aged {
            let flushed = std::mem::take(&mut self.values);
            tracing::debug!(samples = self.sample_count, "Cache flushed");
            self.sample_count = 0;
            self.last_flush = now;
            return Ok(Some(flushed));
        }

        Ok(None)
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn last_flush(&self) -> DateTime<Utc> {
        self.last_flush
    }

    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }
}
