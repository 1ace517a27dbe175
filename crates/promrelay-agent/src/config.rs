use anyhow::{bail, Context};
use promrelay_common::types::SourceSpec;
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "PROMRELAY_";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Base URL of the central API; ingestion and GraphQL paths resolve
    /// relative to it.
    #[serde(default = "default_api_server")]
    pub api_server: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Flush once the oldest unflushed data is older than this.
    #[serde(default = "default_cache_age")]
    pub cache_age_secs: u64,
    /// Flush once this many samples have accumulated.
    #[serde(default = "default_cache_depth")]
    pub cache_depth: usize,
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,
    #[serde(default = "default_refresh_sources_interval")]
    pub refresh_sources_interval_secs: u64,
    /// Deadline for all network calls made during one tick.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_secs: u64,
    /// Skip the credential grant and send unauthenticated requests.
    #[serde(default)]
    pub test_mode: bool,
    /// Sources scraped until the first refresh replaces them.
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

fn default_api_server() -> String {
    "https://sre-api.mindsight.io/".to_string()
}

fn default_token_url() -> String {
    "https://mindsight.auth0.com/oauth/token/".to_string()
}

fn default_audience() -> String {
    "https://api.mindsight.io/".to_string()
}

fn default_cache_age() -> u64 {
    300
}

fn default_cache_depth() -> usize {
    1000
}

fn default_scrape_interval() -> u64 {
    5
}

fn default_refresh_sources_interval() -> u64 {
    3600
}

fn default_tick_timeout() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_server: default_api_server(),
            token_url: default_token_url(),
            audience: default_audience(),
            cache_age_secs: default_cache_age(),
            cache_depth: default_cache_depth(),
            scrape_interval_secs: default_scrape_interval(),
            refresh_sources_interval_secs: default_refresh_sources_interval(),
            tick_timeout_secs: default_tick_timeout(),
            test_mode: false,
            sources: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Loads the TOML file at `path`, applies `PROMRELAY_*` environment
    /// overrides and validates the result.
    ///
    /// A missing file is not an error; defaults and the environment are used.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file {path}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "Config file not found, using defaults and environment");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {path}"))
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overrides fields from `PROMRELAY_<FIELD>` variables as returned by
    /// `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> anyhow::Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{ENV_PREFIX}{name}={raw:?}: {e}"))
        }

        if let Some(v) = var("CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = var("CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = var("API_SERVER") {
            self.api_server = v;
        }
        if let Some(v) = var("TOKEN_URL") {
            self.token_url = v;
        }
        if let Some(v) = var("AUDIENCE") {
            self.audience = v;
        }
        if let Some(v) = var("CACHE_AGE_SECS") {
            self.cache_age_secs = parse("CACHE_AGE_SECS", v)?;
        }
        if let Some(v) = var("CACHE_DEPTH") {
            self.cache_depth = parse("CACHE_DEPTH", v)?;
        }
        if let Some(v) = var("SCRAPE_INTERVAL_SECS") {
            self.scrape_interval_secs = parse("SCRAPE_INTERVAL_SECS", v)?;
        }
        if let Some(v) = var("REFRESH_SOURCES_INTERVAL_SECS") {
            self.refresh_sources_interval_secs = parse("REFRESH_SOURCES_INTERVAL_SECS", v)?;
        }
        if let Some(v) = var("TICK_TIMEOUT_SECS") {
            self.tick_timeout_secs = parse("TICK_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = var("TEST_MODE") {
            self.test_mode = parse("TEST_MODE", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.test_mode {
            if self.client_id.is_empty() {
                bail!("env variable {ENV_PREFIX}CLIENT_ID (or config client_id) must be given");
            }
            if self.client_secret.is_empty() {
                bail!(
                    "env variable {ENV_PREFIX}CLIENT_SECRET (or config client_secret) must be given"
                );
            }
        }
        if self.cache_depth == 0 {
            bail!("cache_depth must be greater than 0");
        }
        if self.scrape_interval_secs == 0 {
            bail!("scrape_interval_secs must be greater than 0");
        }
        if self.refresh_sources_interval_secs == 0 {
            bail!("refresh_sources_interval_secs must be greater than 0");
        }
        if self.tick_timeout_secs == 0 {
            bail!("tick_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn cache_age(&self) -> Duration {
        Duration::from_secs(self.cache_age_secs)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn refresh_sources_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_sources_interval_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

impl std::fmt::Display for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "client_id: {}", self.client_id)?;
        writeln!(f, "client_secret: XXXX")?;
        writeln!(f, "api_server: {}", self.api_server)?;
        writeln!(f, "cache_age_secs: {}", self.cache_age_secs)?;
        writeln!(f, "cache_depth: {}", self.cache_depth)?;
        writeln!(f, "scrape_interval_secs: {}", self.scrape_interval_secs)?;
        writeln!(
            f,
            "refresh_sources_interval_secs: {}",
            self.refresh_sources_interval_secs
        )?;
        write!(f, "test_mode: {}", self.test_mode)
    }
}
