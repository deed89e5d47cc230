use crate::actions::{Action, ActionAck, ActionDispatcher};
use crate::config::AppConfig;
use crate::grouping::{self, RenderTree};
use crate::logs;
use crate::rules::{ADD_NEW, ConfigStore, DEFAULT_RULE, RuleEditError, RuleSettings, RulesConfig};
use crate::sonarr::{self, CurrentSeries, Premiere, SonarrClient, SonarrSeries};
use crate::ui::{self, DashboardProps};
use crate::watched::{self, WatchedError, WatchedEvent, WatchedOutcome};
use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<ConfigStore>,
    pub sonarr: Option<SonarrClient>,
    pub dispatcher: ActionDispatcher,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/assets/dashboard.css", get(stylesheet))
        .route("/assets/dashboard.js", get(script))
        .route("/api/config", get(config_snapshot))
        .route("/api/groups", get(groups))
        .route("/api/rules", post(upsert_rule))
        .route("/api/rules/delete", post(delete_rule))
        .route("/api/assign", post(assign_rules))
        .route("/api/actions/wake", post(wake))
        .route("/api/actions/refresh", post(refresh))
        .route("/api/actions/mark-watched", post(mark_watched))
        .route("/api/logs", get(missing_log))
        .route("/webhook", post(watched_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = state.config.http_bind.parse()?;
    let router = router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("UI listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(graceful_shutdown())
        .await?;

    Ok(())
}

async fn graceful_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down http server");
}

async fn stylesheet() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], ui::STYLES)
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        ui::SCRIPT,
    )
}

#[derive(Deserialize, Default)]
struct IndexQuery {
    section: Option<String>,
    message: Option<String>,
    selected: Option<String>,
}

#[derive(Default)]
struct SeriesData {
    all: Vec<SonarrSeries>,
    current: Vec<CurrentSeries>,
    upcoming: Vec<Premiere>,
    warning: Option<String>,
}

async fn load_series(state: &AppState) -> SeriesData {
    let Some(client) = state.sonarr.as_ref() else {
        return SeriesData {
            warning: Some("Sonarr is not configured (set SONARR_URL and SONARR_API_KEY).".into()),
            ..SeriesData::default()
        };
    };
    let all = match client.list_series().await {
        Ok(all) => all,
        Err(err) => {
            tracing::warn!("Unable to fetch series from Sonarr: {err:?}");
            return SeriesData {
                warning: Some(format!("Unable to reach Sonarr: {err}")),
                ..SeriesData::default()
            };
        }
    };
    let upcoming = client.upcoming_premieres(&all);
    let (current, warning) = match client.current_series(&all, sonarr::CURRENT_LIMIT).await {
        Ok(current) => (current, None),
        Err(err) => {
            tracing::warn!("Unable to fetch current series: {err:?}");
            (Vec::new(), Some(format!("Unable to load current series: {err}")))
        }
    };
    SeriesData {
        all,
        current,
        upcoming,
        warning,
    }
}

/// Requested rule when it exists, else the default rule, else the first rule.
fn resolve_selected(config: &RulesConfig, requested: Option<&str>) -> Option<String> {
    requested
        .filter(|name| config.rules.contains_key(*name))
        .or_else(|| {
            config
                .rules
                .contains_key(DEFAULT_RULE)
                .then_some(DEFAULT_RULE)
        })
        .or_else(|| config.rules.keys().next().map(String::as_str))
        .map(str::to_string)
}

fn resolve_section(requested: Option<&str>) -> String {
    requested
        .filter(|section| ui::SECTIONS.contains(section))
        .unwrap_or(ui::SECTIONS[0])
        .to_string()
}

fn build_tree(config: &RulesConfig, series: &[SonarrSeries], selected: Option<&str>) -> RenderTree {
    let assignments =
        config.assignments(series.iter().map(|show| (show.id, show.title.as_str())));
    grouping::render_groups(&assignments, &config.rules, selected)
}

async fn index(State(state): State<AppState>, Query(params): Query<IndexQuery>) -> Response {
    let config = match state.store.load().await {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Render aborted: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(ui::render_error_html(&err.to_string())),
            )
                .into_response();
        }
    };
    let series = load_series(&state).await;
    let selected = resolve_selected(&config, params.selected.as_deref());
    let tree = build_tree(&config, &series.all, selected.as_deref());
    tracing::debug!(
        "Rendering {} series in {} groups",
        tree.row_count(),
        tree.groups.len()
    );

    Html(ui::render_html(DashboardProps {
        section: resolve_section(params.section.as_deref()),
        message: params.message.filter(|m| !m.is_empty()),
        warning: series.warning,
        selected,
        rules: config.rules,
        tree,
        current: series.current,
        upcoming: series.upcoming,
    }))
    .into_response()
}

#[derive(Serialize)]
struct ConfigResponse {
    default_rule: &'static str,
    rules: BTreeMap<String, crate::rules::Rule>,
}

async fn config_snapshot(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let config = state.store.load().await.map_err(internal)?;
    Ok(Json(ConfigResponse {
        default_rule: DEFAULT_RULE,
        rules: config.rules,
    }))
}

#[derive(Deserialize)]
struct GroupsQuery {
    selected: Option<String>,
}

async fn groups(
    State(state): State<AppState>,
    Query(params): Query<GroupsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let config = state.store.load().await.map_err(internal)?;
    let series = load_series(&state).await;
    if let Some(warning) = &series.warning {
        tracing::debug!("Groups built without full series data: {warning}");
    }
    let selected = resolve_selected(&config, params.selected.as_deref());
    Ok(Json(build_tree(&config, &series.all, selected.as_deref())))
}

#[derive(Deserialize)]
struct UpsertRuleRequest {
    rule_name: String,
    #[serde(default)]
    new_rule_name: Option<String>,
    #[serde(flatten)]
    settings: RuleSettings,
}

impl UpsertRuleRequest {
    fn target_name(&self) -> &str {
        if self.rule_name == ADD_NEW {
            self.new_rule_name.as_deref().unwrap_or_default()
        } else {
            &self.rule_name
        }
    }
}

#[derive(Serialize)]
struct RuleResponse {
    rule_name: String,
}

async fn upsert_rule(
    State(state): State<AppState>,
    Json(body): Json<UpsertRuleRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let name = body.target_name().to_string();
    let settings = body.settings;
    let rule_name = state
        .store
        .update(|config| config.upsert_rule(&name, settings))
        .await
        .map_err(edit_error)?;
    tracing::info!("Saved rule '{rule_name}'");
    Ok(Json(RuleResponse { rule_name }))
}

#[derive(Deserialize)]
struct DeleteRuleRequest {
    rule_name: String,
}

async fn delete_rule(
    State(state): State<AppState>,
    Json(body): Json<DeleteRuleRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .store
        .update(|config| config.delete_rule(&body.rule_name))
        .await
        .map_err(edit_error)?;
    tracing::info!("Deleted rule '{}'", body.rule_name);
    Ok(Json(RuleResponse {
        rule_name: body.rule_name,
    }))
}

#[derive(Deserialize)]
struct AssignRequest {
    rule_name: String,
    series_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
struct AssignResponse {
    rule_name: String,
    assigned: usize,
}

async fn assign_rules(
    State(state): State<AppState>,
    Json(body): Json<AssignRequest>,
) -> Result<Json<AssignResponse>, (StatusCode, String)> {
    let assigned = state
        .store
        .update(|config| config.assign(&body.rule_name, &body.series_ids))
        .await
        .map_err(edit_error)?;
    tracing::info!("Assigned {assigned} series to rule '{}'", body.rule_name);
    Ok(Json(AssignResponse {
        assigned,
        rule_name: body.rule_name,
    }))
}

async fn wake(State(state): State<AppState>) -> Json<ActionAck> {
    Json(state.dispatcher.dispatch(Action::WakeDevice).await)
}

async fn refresh(State(state): State<AppState>) -> Json<ActionAck> {
    Json(state.dispatcher.dispatch(Action::RefreshLibrary).await)
}

#[derive(Deserialize)]
struct MarkWatchedRequest {
    rating_key: String,
}

async fn mark_watched(
    State(state): State<AppState>,
    Json(body): Json<MarkWatchedRequest>,
) -> Json<ActionAck> {
    Json(
        state
            .dispatcher
            .dispatch(Action::MarkWatched {
                rating_key: body.rating_key,
            })
            .await,
    )
}

#[derive(Serialize)]
struct LogResponse {
    content: String,
}

async fn missing_log(State(state): State<AppState>) -> Json<LogResponse> {
    Json(LogResponse {
        content: logs::read_missing_log(&state.config.missing_log_path).await,
    })
}

async fn watched_webhook(
    State(state): State<AppState>,
    Json(event): Json<WatchedEvent>,
) -> Result<Json<WatchedOutcome>, (StatusCode, String)> {
    let Some(client) = state.sonarr.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Sonarr is not configured".to_string(),
        ));
    };
    let config = state.store.load().await.map_err(internal)?;
    let outcome = watched::handle_watched(client, &config, &event)
        .await
        .map_err(watched_error)?;
    Ok(Json(outcome))
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("{err}");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn edit_error(err: RuleEditError) -> (StatusCode, String) {
    let status = match &err {
        RuleEditError::MissingName | RuleEditError::ProtectedRule => StatusCode::BAD_REQUEST,
        RuleEditError::UnknownRule(_) => StatusCode::NOT_FOUND,
        RuleEditError::Config(source) => {
            tracing::error!("{source}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

fn watched_error(err: WatchedError) -> (StatusCode, String) {
    let status = match &err {
        WatchedError::SeriesNotFound(_) | WatchedError::NoRule(_) => StatusCode::NOT_FOUND,
        WatchedError::Sonarr(source) => {
            tracing::error!("{source:#}");
            StatusCode::BAD_GATEWAY
        }
    };
    (status, err.to_string())
}
