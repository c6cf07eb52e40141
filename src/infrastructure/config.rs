use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "FINDASH";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub api: ApiSettings,
    pub backend: BackendSettings,
    pub fetch: FetchSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote REST API at `api.base_url`.
    Http,
    /// In-process store, nothing persists across restarts.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    pub max_series_points: usize,
}

fn builder() -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(config::Config::builder()
        .set_default("server.bind", "0.0.0.0:8080")?
        .set_default("api.base_url", "http://localhost:3000/api")?
        .set_default("api.timeout_secs", 10)?
        .set_default("backend.kind", "memory")?
        .set_default("fetch.max_series_points", 150)?)
}

/// Reads `config/app.toml` when present, then `FINDASH__SECTION__KEY`
/// environment overrides.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = builder()?
        .add_source(config::File::with_name("config/app").required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .context("Failed to read configuration")?;

    settings
        .try_deserialize()
        .context("Invalid configuration")
}
