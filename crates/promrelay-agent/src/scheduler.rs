use crate::auth::{
    ClientCredentialsGrant, CredentialsRequest, TokenSource, CLIENT_CREDENTIALS_GRANT_TYPE,
};
use crate::cache::{Cache, SystemClock};
use crate::config::AgentConfig;
use crate::context::TickContext;
use crate::upstream::{MetricsPusher, MetricsSink, SourceFeed, SourceQueryer};
use anyhow::{Context, Result};
use promrelay_collector::prometheus::PrometheusConnector;
use promrelay_common::types::{sample_count, ValueSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Periodic timing of the agent loop.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub scrape_interval: Duration,
    pub refresh_interval: Duration,
    pub tick_timeout: Duration,
}

impl From<&AgentConfig> for Schedule {
    fn from(config: &AgentConfig) -> Self {
        Self {
            scrape_interval: config.scrape_interval(),
            refresh_interval: config.refresh_sources_interval(),
            tick_timeout: config.tick_timeout(),
        }
    }
}

/// Drives scraping and source refreshes from a single task.
pub struct Agent {
    cache: Cache,
    sink: Arc<dyn MetricsSink>,
    feed: Arc<dyn SourceFeed>,
    schedule: Schedule,
}

impl Agent {
    pub fn new(
        cache: Cache,
        sink: Arc<dyn MetricsSink>,
        feed: Arc<dyn SourceFeed>,
        schedule: Schedule,
    ) -> Self {
        Self {
            cache,
            sink,
            feed,
            schedule,
        }
    }

    /// Builds the production agent from `config`.
    ///
    /// Validates credentials, installs the configured initial sources and
    /// performs the first source refresh. Every failure here is fatal.
    pub async fn init(config: &AgentConfig) -> Result<Self> {
        tracing::info!("Agent configuration:\n{config}");

        let schedule = Schedule::from(config);
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(schedule.tick_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let auth: Option<Arc<dyn TokenSource>> = if config.test_mode {
            tracing::warn!("Test mode enabled, requests are sent without credentials");
            None
        } else {
            let grant = ClientCredentialsGrant::new(
                client.clone(),
                &config.token_url,
                CredentialsRequest {
                    client_id: config.client_id.clone(),
                    client_secret: config.client_secret.clone(),
                    audience: config.audience.clone(),
                    grant_type: CLIENT_CREDENTIALS_GRANT_TYPE.to_string(),
                },
            )
            .context("init auth")?;
            grant
                .access_token()
                .await
                .context("testing credentials")?;
            Some(Arc::new(grant) as Arc<dyn TokenSource>)
        };

        let connector = PrometheusConnector::new(schedule.tick_timeout)
            .context("init query backend connector")?;
        let cache = Cache::with_sources(
            config.sources.clone(),
            Arc::new(connector),
            config.cache_depth,
            chrono::Duration::from_std(config.cache_age()).context("cache_age out of range")?,
            Arc::new(SystemClock),
        )
        .context("init cache")?;

        let sink = MetricsPusher::new(client.clone(), &config.api_server, auth.clone())
            .context("init metrics pusher")?;
        let feed = SourceQueryer::new(client, &config.api_server, auth)
            .context("init source queryer")?;

        let mut agent = Self::new(cache, Arc::new(sink), Arc::new(feed), schedule);
        let ctx = TickContext::with_timeout(schedule.tick_timeout);
        agent
            .refresh_sources(&ctx)
            .await
            .context("init refresh sources")?;

        Ok(agent)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// One scrape tick: collect from every source and push a flushed batch.
    pub async fn scrape(&mut self, ctx: &TickContext) -> Result<()> {
        let flushed = self.cache.collect(ctx).await.context("scrape")?;
        if let Some(values) = flushed {
            self.push(ctx, &values).await.context("push from scrape")?;
        }
        Ok(())
    }

    /// One refresh tick: fetch the source list, install it and push whatever
    /// had accumulated under the previous list.
    pub async fn refresh_sources(&mut self, ctx: &TickContext) -> Result<()> {
        let sources = ctx
            .run("metricSources request", self.feed.query_sources())
            .await
            .context("query sources")?;
        let leftover = self.cache.install(sources).context("set new sources")?;
        self.push(ctx, &leftover)
            .await
            .context("push after refresh sources")?;
        Ok(())
    }

    async fn push(&self, ctx: &TickContext, values: &ValueSet) -> crate::error::Result<()> {
        ctx.run("push metrics", self.sink.push(values)).await?;
        tracing::info!(
            sources = values.len(),
            samples = sample_count(values),
            "Pushed metrics batch"
        );
        Ok(())
    }

    /// Runs both timers until `shutdown` completes.
    ///
    /// Each timer is re-armed after its tick has been handled, whatever the
    /// outcome. Tick failures are logged and do not stop the loop.
    pub async fn run<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let Schedule {
            scrape_interval,
            refresh_interval,
            tick_timeout,
        } = self.schedule;

        tracing::info!(
            scrape_interval_secs = scrape_interval.as_secs(),
            refresh_interval_secs = refresh_interval.as_secs(),
            sources = self.cache.registry().len(),
            "Starting collection loop"
        );

        let scrape_timer = sleep(scrape_interval);
        let refresh_timer = sleep(refresh_interval);
        tokio::pin!(scrape_timer, refresh_timer, shutdown);

        loop {
            tokio::select! {
                () = &mut scrape_timer => {
                    let ctx = TickContext::with_timeout(tick_timeout);
                    if let Err(e) = self.scrape(&ctx).await {
                        tracing::warn!(error = %format!("{e:#}"), "Scrape tick failed");
                    }
                    scrape_timer.as_mut().reset(Instant::now() + scrape_interval);
                }
                () = &mut refresh_timer => {
                    let ctx = TickContext::with_timeout(tick_timeout);
                    if let Err(e) = self.refresh_sources(&ctx).await {
                        tracing::warn!(error = %format!("{e:#}"), "Refresh sources tick failed");
                    }
                    refresh_timer.as_mut().reset(Instant::now() + refresh_interval);
                }
                () = &mut shutdown => {
                    tracing::info!(
                        unflushed_samples = self.cache.sample_count(),
                        "Shutting down"
                    );
                    break;
                }
            }
        }
    }
}
