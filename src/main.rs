mod actions;
mod config;
mod grouping;
mod logs;
mod rules;
mod sonarr;
mod ui;
mod watched;
mod web;

use crate::actions::{ActionDispatcher, ActionTargets};
use crate::config::AppConfig;
use crate::rules::ConfigStore;
use crate::sonarr::SonarrClient;
use crate::web::AppState;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Arc::new(AppConfig::from_env());

    tracing::info!(
        "Starting seriesdash on {} (config: {})",
        config.http_bind,
        config.config_path.display()
    );

    let store = Arc::new(ConfigStore::new(&config.config_path));
    // Surface a broken config file at startup; requests still reload it each time.
    match store.load().await {
        Ok(loaded) => tracing::info!("Loaded {} rule(s)", loaded.rules.len()),
        Err(err) => tracing::warn!("Configuration not usable yet: {err}"),
    }

    let sonarr = match (&config.sonarr_url, &config.sonarr_api_key) {
        (Some(url), Some(key)) => Some(SonarrClient::new(
            url.clone(),
            key.clone(),
            config.http_timeout,
        )?),
        _ => {
            tracing::warn!("SONARR_URL or SONARR_API_KEY unset; series panels and the webhook are disabled");
            None
        }
    };

    let dispatcher = ActionDispatcher::new(
        ActionTargets {
            wake_webhook_url: config.wake_webhook_url.clone(),
            plex_url: config.plex_url.clone(),
            plex_token: config.plex_token.clone(),
        },
        config.http_timeout,
    )?;

    let state = AppState {
        config: config.clone(),
        store,
        sonarr,
        dispatcher,
    };

    web::serve(state).await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let _ = fmt().with_env_filter(env_filter).try_init();
}
