mod applier;
mod classifier;
mod config;
mod control;
mod dispatch;
mod eligibility;
mod error;
mod page;
mod pipeline;
mod prefs;
mod registry;
mod render;
mod scheduler;

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use rusqlite::Connection;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::classifier::HttpClassifier;
use crate::config::{default_site_profiles, load_site_profiles, FilterConfig};
use crate::control::{Controller, TriggerMessage};
use crate::eligibility::SiteTable;
use crate::page::{Page, EMPTY_DOCUMENT};
use crate::pipeline::MoodFilter;
use crate::prefs::{PreferenceStore, PreferencesUpdate};
use crate::scheduler::{AutoFilter, Debouncer};

const DEFAULT_PORT: u16 = 17610;

#[derive(Parser, Debug)]
#[command(name = "moodlens_core", version)]
struct Args {
    /// Listen address for the control surface (ip:port or ip).
    #[arg(long, default_value = "127.0.0.1:17610")]
    listen: String,

    /// SQLite database holding the user's preferences.
    #[arg(long, default_value = "./data/moodlens.db")]
    db: PathBuf,

    /// HTML file to load as the initial document. Empty document if omitted.
    #[arg(long)]
    page: Option<PathBuf>,

    /// Location of the initial document; picks the site profile.
    #[arg(long, default_value = "about:blank")]
    page_url: String,

    /// JSON site profile table replacing the built-in one.
    #[arg(long)]
    sites: Option<PathBuf>,

    /// Bulk classification endpoint.
    #[arg(long, default_value = config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Minimum score for a selected mood to hide content.
    #[arg(long, default_value_t = config::DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Auto-filter tick period (milliseconds).
    #[arg(long, default_value_t = config::DEFAULT_TICK_MS)]
    tick_ms: u64,

    /// Debounce window for all triggers (milliseconds).
    #[arg(long, default_value_t = config::DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,

    /// Let pointer input reach suppressed content through the overlay.
    #[arg(long, default_value_t = false)]
    overlay_passthrough: bool,

    /// Only scan with site profile selectors; never fall back to generic tags.
    #[arg(long, default_value_t = false)]
    site_only: bool,
}

impl Args {
    fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            endpoint: self.endpoint.clone(),
            threshold: self.threshold,
            tick_ms: self.tick_ms,
            debounce_ms: self.debounce_ms,
            include_generic_fallback: !self.site_only,
            generic_with_site_profile: !self.site_only,
            overlay_blocks_interaction: !self.overlay_passthrough,
            ..FilterConfig::default()
        }
    }
}

#[derive(Clone)]
struct AppState {
    controller: Arc<Controller>,
    filter: Arc<MoodFilter>,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

#[derive(Deserialize)]
struct PageLoad {
    url: String,
    html: String,
}

#[derive(Deserialize)]
struct PageAppend {
    html: String,
}

#[derive(Deserialize)]
struct PageRemove {
    selector: String,
}

#[derive(Serialize)]
struct Count {
    count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodlens_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.filter_config();

    let profiles = match &args.sites {
        Some(path) => load_site_profiles(path)?,
        None => default_site_profiles(),
    };
    let sites = SiteTable::compile(&profiles, &config.generic_selectors)?;

    let markup = match &args.page {
        Some(path) => std::fs::read_to_string(path)?,
        None => EMPTY_DOCUMENT.to_string(),
    };
    let page = Page::parse(args.page_url.clone(), &markup);

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&args.db)?;
    let prefs = Arc::new(PreferenceStore::open(conn)?);

    let classifier = Arc::new(HttpClassifier::new(
        config.endpoint.clone(),
        config.request_timeout(),
    )?);
    info!("Classifier endpoint: {}", classifier.endpoint());

    let filter = Arc::new(MoodFilter::new(page, classifier, sites, config.clone()));
    let debouncer = Arc::new(Debouncer::new(config.debounce_window(), filter.clone()));
    let auto_filter = AutoFilter::new(config.tick_period(), debouncer);
    let controller = Arc::new(Controller::new(prefs, auto_filter));

    controller.sync_auto_filter().await;
    let _watcher = controller.spawn_preference_watcher();

    let state = AppState {
        controller: controller.clone(),
        filter,
    };

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .route("/message", post(post_message).options(options_ok))
        .route(
            "/settings",
            get(get_settings).post(post_settings).options(options_ok),
        )
        .route("/page", get(get_page).put(put_page).options(options_ok))
        .route("/page/append", post(post_page_append).options(options_ok))
        .route("/page/remove", post(post_page_remove).options(options_ok))
        .with_state(state)
        .layer(cors);

    let addr = parse_listen(&args.listen)?;
    info!("MoodLens listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    controller.shutdown().await;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        if host == "localhost" {
            let port: u16 = port_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                    input,
                    DEFAULT_PORT
                )
            })?;
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
        }
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

fn bad_request(error: &'static str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrResponse { ok: false, error }),
    )
        .into_response()
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
    auto_filter_running: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "moodlens_core",
            version: env!("CARGO_PKG_VERSION"),
            auto_filter_running: state.controller.auto_filter_running().await,
        }),
    })
}

async fn post_message(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let msg: TriggerMessage = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return bad_request("invalid_message"),
    };
    state.controller.handle(msg).await;
    Json(OkResponse::<()> {
        ok: true,
        data: None,
    })
    .into_response()
}

async fn get_settings(State(state): State<AppState>) -> Response {
    let prefs = state.controller.prefs().get().await;
    Json(OkResponse {
        ok: true,
        data: Some(prefs),
    })
    .into_response()
}

async fn post_settings(State(state): State<AppState>, Json(req): Json<PreferencesUpdate>) -> Response {
    // An explicit list made only of blanks is a client bug, not "clear selection".
    if let Some(moods) = &req.moods {
        if !moods.is_empty() && moods.iter().all(|m| m.trim().is_empty()) {
            return bad_request("invalid_moods");
        }
    }
    match state.controller.prefs().update(req).await {
        Ok(prefs) => Json(OkResponse {
            ok: true,
            data: Some(prefs),
        })
        .into_response(),
        Err(err) => {
            error!("saving preferences failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrResponse {
                    ok: false,
                    error: "db_error",
                }),
            )
                .into_response()
        }
    }
}

async fn get_page(State(state): State<AppState>) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(state.filter.snapshot().await),
    })
    .into_response()
}

async fn put_page(State(state): State<AppState>, Json(req): Json<PageLoad>) -> Response {
    state.filter.navigate(&req.url, &req.html).await;
    info!("navigated to {}", req.url);
    Json(OkResponse::<()> {
        ok: true,
        data: None,
    })
    .into_response()
}

async fn post_page_append(State(state): State<AppState>, Json(req): Json<PageAppend>) -> Response {
    let count = state.filter.append_content(&req.html).await;
    Json(OkResponse {
        ok: true,
        data: Some(Count { count }),
    })
    .into_response()
}

async fn post_page_remove(State(state): State<AppState>, Json(req): Json<PageRemove>) -> Response {
    let selector = match Selector::parse(&req.selector) {
        Ok(s) => s,
        Err(_) => return bad_request("invalid_selector"),
    };
    let count = state.filter.remove_content(&selector).await;
    Json(OkResponse {
        ok: true,
        data: Some(Count { count }),
    })
    .into_response()
}
