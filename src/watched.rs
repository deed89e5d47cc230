//! Watched-episode handling.
//!
//! A media server webhook reports a finished episode. The series' rule then
//! decides which following episodes Sonarr should monitor and search, whether
//! the watched one stays monitored, and which older files get deleted.

use crate::rules::{Rule, RulesConfig};
use crate::sonarr::{SonarrClient, SonarrEpisode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Payload posted by the webhook; numbers may arrive as strings.
#[derive(Clone, Debug, Deserialize)]
pub struct WatchedEvent {
    pub plex_title: String,
    #[serde(deserialize_with = "lenient_number")]
    pub plex_season_num: i64,
    #[serde(deserialize_with = "lenient_number")]
    pub plex_ep_num: i64,
}

#[derive(Debug, Error)]
pub enum WatchedError {
    #[error("series '{0}' not found in Sonarr")]
    SeriesNotFound(String),
    #[error("no rule applies to '{0}'")]
    NoRule(String),
    #[error("sonarr request failed: {0:#}")]
    Sonarr(anyhow::Error),
}

/// Episode ids (file ids for deletions) to change in Sonarr.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WatchedPlan {
    pub unmonitor: Vec<i64>,
    pub monitor: Vec<i64>,
    pub search: Vec<i64>,
    pub delete_files: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct WatchedOutcome {
    pub series: String,
    pub rule: String,
    pub plan: WatchedPlan,
    pub failures: Vec<String>,
}

/// Decides the changes for `watched` within one season's episodes.
///
/// `get_option` is a count of following episodes, or `season`/`all` for the
/// rest of the season. `keep_watched` is how many episodes before the watched
/// one keep their files, or `season`/`all` to keep everything.
pub fn plan_watched(rule: &Rule, episodes: &[SonarrEpisode], watched: i64) -> WatchedPlan {
    let mut sorted: Vec<&SonarrEpisode> = episodes.iter().collect();
    sorted.sort_by_key(|ep| ep.episode_number);

    let wanted = match rule.get_option.trim() {
        "season" | "all" => usize::MAX,
        count => count.parse().unwrap_or(1),
    };
    let next: Vec<&SonarrEpisode> = sorted
        .iter()
        .copied()
        .filter(|ep| ep.episode_number > watched)
        .take(wanted)
        .collect();

    let search = if rule.action_option == "search" {
        next.iter().filter(|ep| !ep.has_file).map(|ep| ep.id).collect()
    } else {
        Vec::new()
    };

    let unmonitor = if rule.monitor_watched {
        Vec::new()
    } else {
        sorted
            .iter()
            .filter(|ep| ep.episode_number == watched && ep.monitored)
            .map(|ep| ep.id)
            .collect()
    };

    let delete_files = match rule.keep_watched.trim() {
        "season" | "all" => Vec::new(),
        keep => match keep.parse::<i64>() {
            Ok(keep) => sorted
                .iter()
                .filter(|ep| ep.episode_number < watched - keep && ep.episode_file_id > 0)
                .map(|ep| ep.episode_file_id)
                .collect(),
            Err(_) => {
                tracing::warn!("Unrecognised keep_watched '{keep}', keeping files");
                Vec::new()
            }
        },
    };

    WatchedPlan {
        unmonitor,
        monitor: next.iter().map(|ep| ep.id).collect(),
        search,
        delete_files,
    }
}

/// Looks up the series and its rule, then applies the plan step by step.
///
/// A failing step is recorded in `failures` and the remaining steps still run.
pub async fn handle_watched(
    client: &SonarrClient,
    config: &RulesConfig,
    event: &WatchedEvent,
) -> Result<WatchedOutcome, WatchedError> {
    let series = client
        .find_series(&event.plex_title)
        .await
        .map_err(WatchedError::Sonarr)?
        .ok_or_else(|| WatchedError::SeriesNotFound(event.plex_title.clone()))?;
    let (rule_name, rule) = config
        .effective_rule(series.id)
        .ok_or_else(|| WatchedError::NoRule(series.title.clone()))?;
    let episodes = client
        .season_episodes(series.id, event.plex_season_num)
        .await
        .map_err(WatchedError::Sonarr)?;

    let plan = plan_watched(rule, &episodes, event.plex_ep_num);
    tracing::info!(
        "{} S{}E{} watched, rule '{rule_name}': {plan:?}",
        series.title,
        event.plex_season_num,
        event.plex_ep_num
    );

    let mut failures = Vec::new();
    let mut record = |step: &str, result: anyhow::Result<()>| {
        if let Err(err) = result {
            tracing::warn!("{step} failed for {}: {err:#}", series.title);
            failures.push(format!("{step}: {err:#}"));
        }
    };
    if !plan.unmonitor.is_empty() {
        record("unmonitor", client.set_monitored(&plan.unmonitor, false).await);
    }
    if !plan.monitor.is_empty() {
        record("monitor", client.set_monitored(&plan.monitor, true).await);
    }
    if !plan.search.is_empty() {
        record("search", client.search_episodes(&plan.search).await);
    }
    for file_id in &plan.delete_files {
        record("delete", client.delete_episode_file(*file_id).await);
    }

    Ok(WatchedOutcome {
        series: series.title.clone(),
        rule: rule_name.to_string(),
        plan,
        failures,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom("expected an integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sonarr::mock;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post, put};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn rule(get: &str, action: &str, keep: &str, monitor_watched: bool) -> Rule {
        Rule {
            get_option: get.into(),
            action_option: action.into(),
            keep_watched: keep.into(),
            monitor_watched,
            series: Vec::new(),
        }
    }

    fn episode(number: i64, monitored: bool, file_id: i64) -> SonarrEpisode {
        SonarrEpisode {
            id: 10 + number,
            season_number: 1,
            episode_number: number,
            title: format!("Episode {number}"),
            monitored,
            has_file: file_id > 0,
            episode_file_id: file_id,
        }
    }

    fn season() -> Vec<SonarrEpisode> {
        vec![
            episode(4, false, 0),
            episode(1, true, 101),
            episode(3, true, 103),
            episode(2, true, 102),
            episode(5, false, 0),
        ]
    }

    #[test]
    fn default_rule_advances_one_episode() {
        let plan = plan_watched(&rule("1", "search", "1", false), &season(), 3);
        assert_eq!(
            plan,
            WatchedPlan {
                unmonitor: vec![13],
                monitor: vec![14],
                search: vec![14],
                delete_files: vec![101],
            }
        );
    }

    #[test]
    fn season_option_monitors_the_rest_without_searching() {
        let plan = plan_watched(&rule("season", "monitor", "all", true), &season(), 2);
        assert_eq!(plan.monitor, vec![13, 14, 15]);
        assert!(plan.search.is_empty());
        assert!(plan.unmonitor.is_empty());
        assert!(plan.delete_files.is_empty());
    }

    #[test]
    fn searches_skip_downloaded_episodes() {
        let plan = plan_watched(&rule("2", "search", "season", false), &season(), 2);
        assert_eq!(plan.monitor, vec![13, 14]);
        assert_eq!(plan.search, vec![14]);
    }

    #[test]
    fn season_finale_has_nothing_to_fetch() {
        let plan = plan_watched(&rule("3", "search", "0", false), &season(), 5);
        assert!(plan.monitor.is_empty());
        assert!(plan.unmonitor.is_empty());
        assert_eq!(plan.delete_files, vec![101, 102, 103]);
    }

    #[test]
    fn webhook_numbers_may_be_strings() {
        let event: WatchedEvent = serde_json::from_str(
            r#"{"plex_title": "Andor", "plex_season_num": "1", "plex_ep_num": 3}"#,
        )
        .unwrap();
        assert_eq!((event.plex_season_num, event.plex_ep_num), (1, 3));
        assert!(
            serde_json::from_str::<WatchedEvent>(
                r#"{"plex_title": "Andor", "plex_season_num": "one", "plex_ep_num": 3}"#
            )
            .is_err()
        );
    }

    type Calls = Arc<Mutex<Vec<String>>>;

    async fn record_monitor(State(calls): State<Calls>, Json(body): Json<Value>) -> StatusCode {
        calls.lock().unwrap().push(format!("monitor {body}"));
        StatusCode::ACCEPTED
    }

    async fn record_command(State(calls): State<Calls>, Json(body): Json<Value>) -> StatusCode {
        calls.lock().unwrap().push(format!("command {body}"));
        StatusCode::CREATED
    }

    async fn record_delete(
        State(calls): State<Calls>,
        axum::extract::Path(id): axum::extract::Path<i64>,
    ) -> StatusCode {
        calls.lock().unwrap().push(format!("delete {id}"));
        StatusCode::OK
    }

    fn sonarr_double(calls: Calls) -> Router {
        let episodes = json!([
            {"id": 11, "seasonNumber": 1, "episodeNumber": 1, "monitored": true, "hasFile": true, "episodeFileId": 101},
            {"id": 12, "seasonNumber": 1, "episodeNumber": 2, "monitored": true, "hasFile": true, "episodeFileId": 102},
            {"id": 13, "seasonNumber": 1, "episodeNumber": 3, "monitored": true, "hasFile": true, "episodeFileId": 103},
            {"id": 14, "seasonNumber": 1, "episodeNumber": 4, "monitored": false, "hasFile": false, "episodeFileId": 0}
        ]);
        Router::new()
            .route(
                "/api/v3/series",
                get(|| async { Json(json!([{"id": 5, "title": "Andor", "titleSlug": "andor"}])) }),
            )
            .route("/api/v3/episode", get(move || async move { Json(episodes) }))
            .route("/api/v3/episode/monitor", put(record_monitor))
            .route("/api/v3/command", post(record_command))
            .route("/api/v3/episodefile/:id", delete(record_delete))
            .with_state(calls)
    }

    #[tokio::test]
    async fn watched_event_drives_sonarr() {
        let calls: Calls = Arc::default();
        let base = mock::serve(sonarr_double(calls.clone())).await;
        let client = SonarrClient::new(base, "key".into(), Duration::from_secs(5)).unwrap();
        let event = WatchedEvent {
            plex_title: "andor".into(),
            plex_season_num: 1,
            plex_ep_num: 3,
        };

        let outcome = handle_watched(&client, &RulesConfig::default(), &event)
            .await
            .unwrap();

        assert_eq!(outcome.series, "Andor");
        assert_eq!(outcome.rule, "default");
        assert!(outcome.failures.is_empty());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                r#"monitor {"episodeIds":[13],"monitored":false}"#.to_string(),
                r#"monitor {"episodeIds":[14],"monitored":true}"#.to_string(),
                r#"command {"episodeIds":[14],"name":"EpisodeSearch"}"#.to_string(),
                "delete 101".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_titles_are_reported() {
        let base = mock::serve(sonarr_double(Arc::default())).await;
        let client = SonarrClient::new(base, "key".into(), Duration::from_secs(5)).unwrap();
        let event = WatchedEvent {
            plex_title: "Severance".into(),
            plex_season_num: 1,
            plex_ep_num: 1,
        };
        let err = handle_watched(&client, &RulesConfig::default(), &event)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchedError::SeriesNotFound(_)));
    }
}
