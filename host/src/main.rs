//! ==============================================================================
//! main.rs - dashboard client entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the feed synchronization engine against the monitoring backend
//!     and serves the derived dashboard view on a local port.
//!
//! responsibilities:
//!     - load configuration and initialize logging
//!     - start polling the configured zone (scheduler.rs)
//!     - serve the view model and citizen report actions over http
//!     - restart polling when the zone changes or on manual retry
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    dashboard client (this file)             │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ scheduler   │  │ web server  │  │ citizen reports     │  │
//!     │  │ (5s / 10s)  │  │ (port 3000) │  │ (submit / list)     │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │ writes         │ reads              │             │
//!     │         ▼                ▼                    │             │
//!     │    ┌──────────────────────────┐               │             │
//!     │    │ view model store         │               │             │
//!     │    │ (+ forecast, timeline)   │               │             │
//!     │    └──────────────────────────┘               │             │
//!     └─────────┬─────────────────────────────────────┼─────────────┘
//!               │ json over http                      │
//!               ▼                                     ▼
//!        ┌──────────────────────────────────────────────────┐
//!        │              monitoring backend                  │
//!        └──────────────────────────────────────────────────┘
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use enviro_dash::citizen::{
    PhotoAttachment, ReportDraft, ReportListing, ReportSubmitter, SubmitOutcome,
};
use enviro_dash::config::DashboardConfig;
use enviro_dash::domain::{ReportType, StatusFilter, Zone};
use enviro_dash::feeds::HttpFeedClient;
use enviro_dash::scheduler::PollScheduler;
use enviro_dash::store::ViewModelStore;
use enviro_dash::view::{DashboardView, LoadStatus};

// ==============================================================================
// shared state
// ==============================================================================
// cloned into every handler. the scheduler sits behind a mutex because zone
// changes must stop and restart it as one step.

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Mutex<PollScheduler>>,
    store: ViewModelStore,
    listing: Arc<ReportListing>,
    submitter: Arc<ReportSubmitter>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    println!("===========================================================");
    println!("  Environmental Monitoring Dashboard Client");
    println!("===========================================================");

    // step 1: load configuration
    let config = DashboardConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    // step 3: backend client shared by every feed
    let client = Arc::new(HttpFeedClient::new(
        config.backend.base_url.clone(),
        config.request_timeout(),
    )?);

    // step 4: store, scheduler and citizen flows
    let zone = config.zone.default;
    let store = ViewModelStore::new(zone);
    let mut scheduler = PollScheduler::new(client.clone(), store.clone(), config.cadence());
    scheduler.start(zone).await;

    let listing = Arc::new(ReportListing::new(client.clone(), zone, config.citizen.report_limit));
    let submitter = Arc::new(ReportSubmitter::new(client, config.submission_delays()));
    {
        let listing = listing.clone();
        tokio::spawn(async move { listing.refresh().await });
    }

    let state = AppState {
        scheduler: Arc::new(Mutex::new(scheduler)),
        store,
        listing,
        submitter,
    };

    // step 5: serve until ctrl-c
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "dashboard live");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // stop timers before exiting
    state.scheduler.lock().await.stop();
    tracing::info!("shutdown complete");
    Ok(())
}

// ==============================================================================
// web server
// ==============================================================================

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/zone", post(zone_handler))
        .route("/api/retry", post(retry_handler))
        .route("/api/citizen", get(citizen_handler))
        .route("/api/citizen/filter", post(filter_handler))
        .route("/api/citizen/vote", post(vote_handler))
        .route("/api/citizen/report", post(report_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// json api endpoint for programmatic access
async fn api_handler(State(state): State<AppState>) -> Json<DashboardView> {
    Json(DashboardView::from_state(&state.store.state().await))
}

#[derive(Deserialize)]
struct ZoneParams {
    name: String,
}

/// POST /api/zone?name=Kollam
async fn zone_handler(
    State(state): State<AppState>,
    Query(params): Query<ZoneParams>,
) -> impl IntoResponse {
    let zone: Zone = match params.name.parse() {
        Ok(zone) => zone,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let epoch = state.scheduler.lock().await.start(zone).await;
    let listing = state.listing.clone();
    tokio::spawn(async move { listing.set_zone(zone).await });

    (StatusCode::OK, Json(serde_json::json!({ "zone": zone, "generation": epoch.generation })))
}

/// manual retry after a connection error
async fn retry_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.lock().await.retry().await {
        Some(epoch) => (StatusCode::OK, Json(serde_json::json!({ "zone": epoch.zone }))),
        None => error_response(StatusCode::CONFLICT, "polling is not running".to_string()),
    }
}

async fn citizen_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "listing": state.listing.state().await,
        "submission": state.submitter.state(),
    }))
}

#[derive(Deserialize)]
struct FilterParams {
    status: String,
}

async fn filter_handler(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> impl IntoResponse {
    let filter: StatusFilter = match params.status.parse() {
        Ok(filter) => filter,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    state.listing.set_filter(filter).await;
    (StatusCode::OK, Json(serde_json::json!({ "filter": filter })))
}

#[derive(Deserialize)]
struct VoteParams {
    id: i64,
    upvote: bool,
}

async fn vote_handler(
    State(state): State<AppState>,
    Query(params): Query<VoteParams>,
) -> StatusCode {
    state.listing.vote(params.id, params.upvote).await;
    StatusCode::NO_CONTENT
}

/// report form body; the photo arrives as raw base64 plus its mime type
#[derive(Deserialize)]
struct ReportBody {
    report_type: ReportType,
    severity: u8,
    description: String,
    #[serde(default)]
    citizen_name: Option<String>,
    #[serde(default)]
    citizen_contact: Option<String>,
    #[serde(default)]
    photo_base64: Option<String>,
    #[serde(default)]
    photo_mime: Option<String>,
}

/// POST /api/citizen/report - starts the submission flow in the background
async fn report_handler(
    State(state): State<AppState>,
    Json(body): Json<ReportBody>,
) -> impl IntoResponse {
    let photo = match body.photo_base64.as_deref().map(|raw| STANDARD.decode(raw)) {
        None => None,
        Some(Ok(bytes)) => Some(PhotoAttachment {
            mime: body.photo_mime.unwrap_or_else(|| "image/jpeg".to_string()),
            bytes,
        }),
        Some(Err(e)) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid photo encoding: {e}"))
        }
    };

    let draft = ReportDraft {
        report_type: body.report_type,
        severity: body.severity,
        description: body.description,
        citizen_name: body.citizen_name,
        citizen_contact: body.citizen_contact,
        photo,
    };
    if let Err(e) = draft.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
    }

    let zone = state.store.active_epoch().await.zone;
    let submitter = state.submitter.clone();
    let listing = state.listing.clone();
    tokio::spawn(async move {
        let refresh = listing.clone();
        let on_success = move || {
            tokio::spawn(async move { refresh.refresh().await });
        };
        match submitter.submit(zone, &draft, on_success).await {
            Ok(SubmitOutcome::Busy) => tracing::info!("submission already in progress"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "report draft rejected"),
        }
    });

    (StatusCode::ACCEPTED, Json(serde_json::json!({ "zone": zone })))
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "status": "error", "message": message })))
}

/// minimal html summary of the current view
async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    let view = DashboardView::from_state(&state.store.state().await);

    let body = match &view.status {
        LoadStatus::Loading => format!("<h2>Loading {}...</h2>", html_escape(view.zone.name())),
        LoadStatus::ConnectionError { message } => format!(
            r#"<h2>Connection Error</h2><p>{}</p>
<form method="post" action="/api/retry"><button>Retry Connection</button></form>"#,
            html_escape(message)
        ),
        LoadStatus::Ready => {
            let gauges: String = view
                .gauges
                .iter()
                .map(|g| {
                    let value = g.value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "—".into());
                    format!(
                        "<li>{}: {} {} ({:?})</li>",
                        g.label,
                        value,
                        html_escape(g.unit),
                        g.level
                    )
                })
                .collect();
            let forecast: String = view
                .forecast
                .iter()
                .map(|p| {
                    format!(
                        "<li>{} {} {} - {} ({})</li>",
                        p.time,
                        p.metric,
                        html_escape(&p.value),
                        html_escape(&p.status),
                        p.confidence
                    )
                })
                .collect();
            let timeline: String = view
                .timeline
                .iter()
                .map(|e| format!("<li>{} [{:?}] {}</li>", e.time, e.severity, html_escape(&e.message)))
                .collect();
            format!(
                "<h2>{}</h2><ul>{gauges}</ul><h3>Forecast</h3><ul>{forecast}</ul><h3>Timeline</h3><ul>{timeline}</ul>",
                html_escape(view.zone.name())
            )
        }
    };

    Html(format!(
        r#"<!doctype html>
<html>
<head><title>environmental monitoring</title><meta http-equiv="refresh" content="5"></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
{body}
</body>
</html>"#
    ))
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
