use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::{self, well_known::Rfc3339};

/// How many recently watched series the current panel shows.
pub const CURRENT_LIMIT: usize = 7;

const AIRING_FORMAT: &str =
    "[year]-[month padding:zero]-[day padding:zero] at [hour padding:zero]:[minute padding:zero]";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrSeries {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub title_slug: String,
    #[serde(default)]
    pub next_airing: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrEpisode {
    pub id: i64,
    pub season_number: i64,
    pub episode_number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub episode_file_id: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SonarrEpisodeFile {
    date_added: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CurrentSeries {
    pub name: String,
    pub latest_episode: String,
    pub artwork_url: String,
    pub series_url: String,
    #[serde(skip)]
    pub date_added: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Premiere {
    pub name: String,
    pub next_airing: String,
    pub artwork_url: String,
    pub series_url: String,
    #[serde(skip)]
    pub airs_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct SonarrClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SonarrClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("seriesdash")
            .timeout(timeout)
            .build()
            .context("build sonarr client")?;
        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?
            .error_for_status()
            .with_context(|| format!("GET {path} status"))?
            .json()
            .await
            .with_context(|| format!("decode {path}"))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("X-Api-Key", &self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request
            .send()
            .await
            .with_context(|| format!("{method} {path}"))?
            .error_for_status()
            .with_context(|| format!("{method} {path} status"))?;
        Ok(())
    }

    pub async fn list_series(&self) -> Result<Vec<SonarrSeries>> {
        self.get_json("/api/v3/series", &[]).await
    }

    /// Case-insensitive title lookup over the full series list.
    pub async fn find_series(&self, title: &str) -> Result<Option<SonarrSeries>> {
        let wanted = title.trim().to_lowercase();
        Ok(self
            .list_series()
            .await?
            .into_iter()
            .find(|show| show.title.to_lowercase() == wanted))
    }

    pub async fn season_episodes(&self, series_id: i64, season: i64) -> Result<Vec<SonarrEpisode>> {
        self.get_json(
            "/api/v3/episode",
            &[
                ("seriesId", series_id.to_string()),
                ("seasonNumber", season.to_string()),
            ],
        )
        .await
    }

    pub async fn set_monitored(&self, episode_ids: &[i64], monitored: bool) -> Result<()> {
        self.send(
            reqwest::Method::PUT,
            "/api/v3/episode/monitor",
            Some(json!({ "episodeIds": episode_ids, "monitored": monitored })),
        )
        .await
    }

    pub async fn search_episodes(&self, episode_ids: &[i64]) -> Result<()> {
        self.send(
            reqwest::Method::POST,
            "/api/v3/command",
            Some(json!({ "name": "EpisodeSearch", "episodeIds": episode_ids })),
        )
        .await
    }

    pub async fn delete_episode_file(&self, file_id: i64) -> Result<()> {
        self.send(
            reqwest::Method::DELETE,
            &format!("/api/v3/episodefile/{file_id}"),
            None,
        )
        .await
    }

    /// Series with a downloaded monitored episode, most recently added first.
    ///
    /// A series whose episodes cannot be fetched is skipped; the rest of the
    /// panel still renders.
    pub async fn current_series(
        &self,
        series: &[SonarrSeries],
        limit: usize,
    ) -> Result<Vec<CurrentSeries>> {
        let mut current = Vec::new();
        for show in series {
            let episodes: Vec<SonarrEpisode> = match self
                .get_json("/api/v3/episode", &[("seriesId", show.id.to_string())])
                .await
            {
                Ok(episodes) => episodes,
                Err(err) => {
                    tracing::warn!("Skipping episodes for {}: {err:?}", show.title);
                    continue;
                }
            };
            let Some(episode) = episodes.iter().find(|ep| ep.monitored && ep.has_file) else {
                continue;
            };
            let file: SonarrEpisodeFile = match self
                .get_json(
                    &format!("/api/v3/episodefile/{}", episode.episode_file_id),
                    &[],
                )
                .await
            {
                Ok(file) => file,
                Err(err) => {
                    tracing::debug!("Skipping episode file for {}: {err:?}", show.title);
                    continue;
                }
            };
            let Some(date_added) = file.date_added.as_deref().and_then(parse_timestamp) else {
                continue;
            };
            current.push(CurrentSeries {
                name: show.title.clone(),
                latest_episode: format!(
                    "S{}E{} - {}",
                    episode.season_number, episode.episode_number, episode.title
                ),
                artwork_url: self.artwork_url(show.id),
                series_url: self.series_url(&show.title_slug),
                date_added,
            });
        }
        current.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        current.truncate(limit);
        Ok(current)
    }

    pub fn upcoming_premieres(&self, series: &[SonarrSeries]) -> Vec<Premiere> {
        upcoming_premieres(series, |id| self.artwork_url(id), |slug| self.series_url(slug))
    }

    fn artwork_url(&self, id: i64) -> String {
        format!(
            "{}/api/v3/mediacover/{id}/poster.jpg?apikey={}",
            self.base_url, self.api_key
        )
    }

    fn series_url(&self, slug: &str) -> String {
        format!("{}/series/{slug}", self.base_url)
    }
}

/// Series with a known next airing date, soonest first.
pub fn upcoming_premieres(
    series: &[SonarrSeries],
    artwork: impl Fn(i64) -> String,
    link: impl Fn(&str) -> String,
) -> Vec<Premiere> {
    let mut out: Vec<Premiere> = series
        .iter()
        .filter_map(|show| {
            let airs_at = show.next_airing.as_deref().and_then(parse_timestamp)?;
            Some(Premiere {
                name: show.title.clone(),
                next_airing: format_airing(airs_at)?,
                artwork_url: artwork(show.id),
                series_url: link(&show.title_slug),
                airs_at,
            })
        })
        .collect();
    out.sort_by(|a, b| a.airs_at.cmp(&b.airs_at));
    out
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

fn format_airing(at: OffsetDateTime) -> Option<String> {
    let format = format_description::parse(AIRING_FORMAT).ok()?;
    at.format(format.as_slice()).ok()
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::collections::HashMap;

    fn show(id: i64, title: &str, next: Option<&str>) -> SonarrSeries {
        SonarrSeries {
            id,
            title: title.into(),
            title_slug: title.to_lowercase().replace(' ', "-"),
            next_airing: next.map(str::to_string),
        }
    }

    #[test]
    fn premieres_are_sorted_and_filtered() {
        let series = vec![
            show(1, "Later Show", Some("2026-11-02T01:00:00Z")),
            show(2, "No Date", None),
            show(3, "Soon Show", Some("2026-10-20T21:30:00Z")),
            show(4, "Bad Date", Some("tomorrow")),
        ];
        let out = upcoming_premieres(&series, |id| format!("art/{id}"), |slug| format!("s/{slug}"));
        let names: Vec<&str> = out.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Soon Show", "Later Show"]);
        assert_eq!(out[0].next_airing, "2026-10-20 at 21:30");
        assert_eq!(out[0].artwork_url, "art/3");
        assert_eq!(out[0].series_url, "s/soon-show");
    }

    #[test]
    fn airing_times_are_zero_padded() {
        let at = parse_timestamp("2027-01-05T04:07:00Z").unwrap();
        assert_eq!(format_airing(at).as_deref(), Some("2027-01-05 at 04:07"));
    }

    #[test]
    fn series_list_decodes_sonarr_fields() {
        let raw = r#"[{"id": 5, "title": "Andor", "titleSlug": "andor", "nextAiring": "2026-10-20T21:30:00Z", "monitored": true}]"#;
        let series: Vec<SonarrSeries> = serde_json::from_str(raw).unwrap();
        assert_eq!(series[0].title_slug, "andor");
        assert!(series[0].next_airing.is_some());
    }

    #[test]
    fn client_builds_media_links() {
        let client = SonarrClient::new(
            "http://sonarr:8989".into(),
            "key".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.artwork_url(9),
            "http://sonarr:8989/api/v3/mediacover/9/poster.jpg?apikey=key"
        );
        assert_eq!(client.series_url("andor"), "http://sonarr:8989/series/andor");
    }

    async fn episodes(
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        if query.get("seriesId").map(String::as_str) == Some("1") {
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        Ok(Json(json!([{
            "id": 30,
            "seasonNumber": 1,
            "episodeNumber": 3,
            "title": "Pilot",
            "monitored": true,
            "hasFile": true,
            "episodeFileId": 7
        }])))
    }

    async fn episode_file(Path(_id): Path<i64>) -> Json<serde_json::Value> {
        Json(json!({ "dateAdded": "2026-10-01T10:00:00Z" }))
    }

    #[tokio::test]
    async fn one_failing_series_does_not_empty_the_current_panel() {
        let base = mock::serve(
            axum::Router::new()
                .route("/api/v3/episode", get(episodes))
                .route("/api/v3/episodefile/:id", get(episode_file)),
        )
        .await;
        let client = SonarrClient::new(base, "key".into(), Duration::from_secs(5)).unwrap();
        let series = vec![show(1, "Broken", None), show(2, "Healthy", None)];

        let current = client.current_series(&series, CURRENT_LIMIT).await.unwrap();

        let names: Vec<&str> = current.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Healthy"]);
        assert_eq!(current[0].latest_episode, "S1E3 - Pilot");
    }
}
