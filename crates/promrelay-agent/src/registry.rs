use crate::error::{AgentError, Result};
use promrelay_collector::{BackendConnector, QueryBackend};
use promrelay_common::types::SourceSpec;
use std::collections::HashMap;
use std::sync::Arc;

/// A scrape target bound to its backend connection.
#[derive(Clone)]
pub struct Source {
    pub spec: SourceSpec,
    pub backend: Arc<dyn QueryBackend>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("spec", &self.spec)
            .field("backend", &self.backend.endpoint())
            .finish()
    }
}

/// The current set of scrape targets, in the order they were published.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Binds every spec to a backend connection.
    ///
    /// Sources with the same endpoint string share one connection. Nothing is
    /// reused from any earlier registry. The first connection failure aborts
    /// the build.
    pub fn build(specs: Vec<SourceSpec>, connector: &dyn BackendConnector) -> Result<Self> {
        let mut conns: HashMap<String, Arc<dyn QueryBackend>> = HashMap::new();
        let mut sources = Vec::with_capacity(specs.len());

        for spec in specs {
            let backend = match conns.get(&spec.endpoint) {
                Some(backend) => Arc::clone(backend),
                None => {
                    let backend =
                        connector
                            .connect(&spec.endpoint)
                            .map_err(|source| AgentError::Connect {
                                endpoint: spec.endpoint.clone(),
                                source,
                            })?;
                    conns.insert(spec.endpoint.clone(), Arc::clone(&backend));
                    backend
                }
            };
            sources.push(Source { spec, backend });
        }

        tracing::debug!(
            sources = sources.len(),
            connections = conns.len(),
            "Source registry built"
        );

        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn specs(&self) -> impl Iterator<Item = &SourceSpec> {
        self.sources.iter().map(|s| &s.spec)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
