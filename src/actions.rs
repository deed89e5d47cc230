use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    WakeDevice,
    RefreshLibrary,
    MarkWatched { rating_key: String },
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::WakeDevice => "Wake request",
            Action::RefreshLibrary => "Library refresh",
            Action::MarkWatched { .. } => "Mark watched",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("a rating key is required")]
    MissingRatingKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Request an action resolves to, before anything goes on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRequest {
    pub method: Method,
    pub url: String,
    pub plex_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionAck {
    pub ok: bool,
    pub message: String,
}

#[derive(Clone, Default)]
pub struct ActionTargets {
    pub wake_webhook_url: Option<String>,
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
}

impl ActionTargets {
    pub fn plan(&self, action: &Action) -> Result<PlannedRequest, ActionError> {
        match action {
            Action::WakeDevice => {
                let url = self
                    .wake_webhook_url
                    .clone()
                    .ok_or(ActionError::NotConfigured("WAKE_WEBHOOK_URL"))?;
                Ok(PlannedRequest {
                    method: Method::Post,
                    url,
                    plex_token: None,
                })
            }
            Action::RefreshLibrary => {
                let (base, token) = self.plex()?;
                Ok(PlannedRequest {
                    method: Method::Get,
                    url: format!("{base}/library/sections/all/refresh"),
                    plex_token: Some(token),
                })
            }
            Action::MarkWatched { rating_key } => {
                let key = rating_key.trim();
                if key.is_empty() {
                    return Err(ActionError::MissingRatingKey);
                }
                let (base, token) = self.plex()?;
                Ok(PlannedRequest {
                    method: Method::Get,
                    url: format!(
                        "{base}/:/scrobble?identifier=com.plexapp.plugins.library&key={key}"
                    ),
                    plex_token: Some(token),
                })
            }
        }
    }

    fn plex(&self) -> Result<(String, String), ActionError> {
        let base = self
            .plex_url
            .clone()
            .ok_or(ActionError::NotConfigured("PLEX_URL"))?;
        let token = self
            .plex_token
            .clone()
            .ok_or(ActionError::NotConfigured("PLEX_TOKEN"))?;
        Ok((base, token))
    }
}

/// Sends one request per action. Failures come back as a negative ack, never retried.
#[derive(Clone)]
pub struct ActionDispatcher {
    targets: ActionTargets,
    client: reqwest::Client,
}

impl ActionDispatcher {
    pub fn new(targets: ActionTargets, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("seriesdash")
            .timeout(timeout)
            .build()
            .context("build action client")?;
        Ok(Self { targets, client })
    }

    pub async fn dispatch(&self, action: Action) -> ActionAck {
        let label = action.label();
        let planned = match self.targets.plan(&action) {
            Ok(planned) => planned,
            Err(err) => {
                tracing::warn!("{label} not sent: {err}");
                return ActionAck {
                    ok: false,
                    message: format!("{label} failed: {err}"),
                };
            }
        };

        match self.send(&planned).await {
            Ok(()) => {
                tracing::info!("{label} sent to {}", redact(&planned.url));
                ActionAck {
                    ok: true,
                    message: format!("{label} sent successfully."),
                }
            }
            Err(err) => {
                tracing::warn!("{label} failed: {err:?}");
                ActionAck {
                    ok: false,
                    message: format!("{label} failed: {err}"),
                }
            }
        }
    }

    async fn send(&self, planned: &PlannedRequest) -> Result<()> {
        let mut request = match planned.method {
            Method::Get => self.client.get(&planned.url),
            Method::Post => self.client.post(&planned.url),
        };
        if let Some(token) = &planned.plex_token {
            request = request.header("X-Plex-Token", token);
        }
        request
            .send()
            .await
            .context("request not delivered")?
            .error_for_status()
            .context("unexpected response")?;
        Ok(())
    }
}

fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> ActionTargets {
        ActionTargets {
            wake_webhook_url: Some("http://ha.local:8123/api/webhook/wakeoffice".into()),
            plex_url: Some("http://plex:32400".into()),
            plex_token: Some("tok".into()),
        }
    }

    #[test]
    fn plans_wake_as_post() {
        let planned = targets().plan(&Action::WakeDevice).unwrap();
        assert_eq!(planned.method, Method::Post);
        assert_eq!(planned.url, "http://ha.local:8123/api/webhook/wakeoffice");
        assert_eq!(planned.plex_token, None);
    }

    #[test]
    fn plans_plex_requests_with_token() {
        let refresh = targets().plan(&Action::RefreshLibrary).unwrap();
        assert_eq!(refresh.url, "http://plex:32400/library/sections/all/refresh");
        assert_eq!(refresh.plex_token.as_deref(), Some("tok"));

        let watched = targets()
            .plan(&Action::MarkWatched {
                rating_key: " 4242 ".into(),
            })
            .unwrap();
        assert_eq!(
            watched.url,
            "http://plex:32400/:/scrobble?identifier=com.plexapp.plugins.library&key=4242"
        );
    }

    #[test]
    fn missing_targets_are_reported() {
        let empty = ActionTargets::default();
        assert_eq!(
            empty.plan(&Action::WakeDevice),
            Err(ActionError::NotConfigured("WAKE_WEBHOOK_URL"))
        );
        assert_eq!(
            empty.plan(&Action::RefreshLibrary),
            Err(ActionError::NotConfigured("PLEX_URL"))
        );
        assert_eq!(
            targets().plan(&Action::MarkWatched {
                rating_key: "".into()
            }),
            Err(ActionError::MissingRatingKey)
        );
    }

    #[tokio::test]
    async fn unconfigured_dispatch_acks_failure() {
        let dispatcher =
            ActionDispatcher::new(ActionTargets::default(), Duration::from_secs(1)).unwrap();
        let ack = dispatcher.dispatch(Action::WakeDevice).await;
        assert!(!ack.ok);
        assert_eq!(
            ack.message,
            "Wake request failed: WAKE_WEBHOOK_URL is not configured"
        );
    }

    #[tokio::test]
    async fn unreachable_target_acks_failure() {
        let dispatcher = ActionDispatcher::new(
            ActionTargets {
                wake_webhook_url: Some("http://127.0.0.1:9/wake".into()),
                ..ActionTargets::default()
            },
            Duration::from_secs(2),
        )
        .unwrap();
        let ack = dispatcher.dispatch(Action::WakeDevice).await;
        assert!(!ack.ok);
        assert!(ack.message.starts_with("Wake request failed"));
    }

    #[test]
    fn query_strings_are_not_logged() {
        assert_eq!(redact("http://plex/:/scrobble?key=1"), "http://plex/:/scrobble");
    }
}
