#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use promrelay_agent::cache::{Cache, SystemClock};
use promrelay_agent::error::{AgentError, Result};
use promrelay_agent::scheduler::{Agent, Schedule};
use promrelay_agent::upstream::{MetricsSink, SourceFeed};
use promrelay_collector::{BackendConnector, QueryBackend, QueryError};
use promrelay_common::types::{Labels, Sample, SourceSpec, ValueSet};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn sample(name: &str, value: f64) -> Sample {
    let mut labels = Labels::new();
    labels.insert("__name__".to_string(), name.to_string());
    Sample::new(labels, Utc::now(), value)
}

pub fn spec(id: i64, endpoint: &str, query: &str) -> SourceSpec {
    SourceSpec {
        id,
        endpoint: endpoint.to_string(),
        query: query.to_string(),
    }
}

/// Answers each query string from a queue of scripted results.
#[derive(Default)]
pub struct ScriptedBackend {
    endpoint: String,
    script: Mutex<HashMap<String, VecDeque<promrelay_collector::Result<Vec<Sample>>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn push_ok(&self, query: &str, samples: Vec<Sample>) {
        self.push(query, Ok(samples));
    }

    pub fn push_err(&self, query: &str, message: &str) {
        self.push(
            query,
            Err(QueryError::ApiError {
                error_type: "execution".to_string(),
                message: message.to_string(),
            }),
        );
    }

    fn push(&self, query: &str, result: promrelay_collector::Result<Vec<Sample>>) {
        self.script
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, query: &str) -> promrelay_collector::Result<Vec<Sample>> {
        self.calls.lock().unwrap().push(query.to_string());
        self.script
            .lock()
            .unwrap()
            .get_mut(query)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(QueryError::EmptyResult))
    }
}

/// Hands out one [`ScriptedBackend`] per endpoint, creating it on first use.
#[derive(Default)]
pub struct FakeConnector {
    backends: Mutex<HashMap<String, Arc<ScriptedBackend>>>,
    refused: Mutex<Vec<String>>,
    connects: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn backend(&self, endpoint: &str) -> Arc<ScriptedBackend> {
        let mut backends = self.backends.lock().unwrap();
        Arc::clone(backends.entry(endpoint.to_string()).or_insert_with(|| {
            Arc::new(ScriptedBackend {
                endpoint: endpoint.to_string(),
                ..Default::default()
            })
        }))
    }

    /// Makes every later connect to `endpoint` fail.
    pub fn refuse(&self, endpoint: &str) {
        self.refused.lock().unwrap().push(endpoint.to_string());
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

impl BackendConnector for FakeConnector {
    fn connect(&self, endpoint: &str) -> promrelay_collector::Result<Arc<dyn QueryBackend>> {
        self.connects.lock().unwrap().push(endpoint.to_string());
        if self.refused.lock().unwrap().iter().any(|e| e == endpoint) {
            return Err(QueryError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.backend(endpoint))
    }
}

/// Records every pushed value set; can be told to reject pushes.
#[derive(Default)]
pub struct RecordingSink {
    pushes: Mutex<Vec<ValueSet>>,
    rejections: Mutex<usize>,
}

impl RecordingSink {
    pub fn reject_next(&self, n: usize) {
        *self.rejections.lock().unwrap() = n;
    }

    pub fn pushes(&self) -> Vec<ValueSet> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn push(&self, values: &ValueSet) -> Result<()> {
        let mut rejections = self.rejections.lock().unwrap();
        if *rejections > 0 {
            *rejections -= 1;
            return Err(AgentError::PushRejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.pushes.lock().unwrap().push(values.clone());
        Ok(())
    }
}

/// Returns scripted source lists, then repeats the last successful one.
#[derive(Default)]
pub struct ScriptedFeed {
    script: Mutex<VecDeque<Result<Vec<SourceSpec>>>>,
    last: Mutex<Vec<SourceSpec>>,
    stall: Mutex<Option<Duration>>,
    calls: Mutex<usize>,
}

impl ScriptedFeed {
    pub fn push_ok(&self, sources: Vec<SourceSpec>) {
        self.script.lock().unwrap().push_back(Ok(sources));
    }

    pub fn push_err(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(AgentError::Graphql(message.to_string())));
    }

    /// Delays every later answer by `delay`.
    pub fn stall(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SourceFeed for ScriptedFeed {
    async fn query_sources(&self) -> Result<Vec<SourceSpec>> {
        *self.calls.lock().unwrap() += 1;
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(sources)) => {
                *self.last.lock().unwrap() = sources.clone();
                Ok(sources)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

pub struct Harness {
    pub connector: Arc<FakeConnector>,
    pub sink: Arc<RecordingSink>,
    pub feed: Arc<ScriptedFeed>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(FakeConnector::default()),
            sink: Arc::new(RecordingSink::default()),
            feed: Arc::new(ScriptedFeed::default()),
        }
    }

    /// Builds an agent whose cache starts with `sources` and never flushes on
    /// age during a test.
    pub fn agent(&self, sources: Vec<SourceSpec>, limit: usize, schedule: Schedule) -> Agent {
        let cache = Cache::with_sources(
            sources,
            self.connector.clone(),
            limit,
            chrono::Duration::days(1),
            Arc::new(SystemClock),
        )
        .expect("initial sources install");
        Agent::new(cache, self.sink.clone(), self.feed.clone(), schedule)
    }
}

pub fn schedule(scrape_secs: u64, refresh_secs: u64) -> Schedule {
    Schedule {
        scrape_interval: Duration::from_secs(scrape_secs),
        refresh_interval: Duration::from_secs(refresh_secs),
        tick_timeout: Duration::from_secs(3),
    }
}
