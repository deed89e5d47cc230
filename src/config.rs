use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub struct AppConfig {
    pub http_bind: String,
    pub config_path: PathBuf,
    pub missing_log_path: PathBuf,
    pub sonarr_url: Option<String>,
    pub sonarr_api_key: Option<String>,
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
    pub wake_webhook_url: Option<String>,
    pub http_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            http_bind: env_var("HTTP_BIND", "0.0.0.0:5001"),
            config_path: PathBuf::from(env_var("CONFIG_PATH", "config/config.json")),
            missing_log_path: PathBuf::from(env_var("MISSING_LOG_PATH", "logs/missing.log")),
            sonarr_url: env_opt("SONARR_URL").map(trim_base_url),
            sonarr_api_key: env_opt("SONARR_API_KEY"),
            plex_url: env_opt("PLEX_URL").map(trim_base_url),
            plex_token: env_opt("PLEX_TOKEN"),
            wake_webhook_url: env_opt("WAKE_WEBHOOK_URL"),
            http_timeout: Duration::from_secs(
                env_var("HTTP_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            ),
        }
    }
}

fn env_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
