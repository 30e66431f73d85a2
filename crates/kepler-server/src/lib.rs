//! HTTP export surface for the power monitor: Prometheus `/metrics`,
//! `/healthz`, and a minimal `/` index.

pub mod render;

use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, response::Html, routing::get};
use tower_http::trace::TraceLayer;

use kepler_core::monitor::MonitorState;
use kepler_core::{MonitorError, PowerMonitor};

/// Shared server state: just the monitor, since every read goes through its
/// lock-free snapshot.
struct AppState {
    monitor: Arc<PowerMonitor>,
    node_name: String,
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    match state.monitor.snapshot() {
        Ok(snapshot) => Ok(render::render(&snapshot, &state.node_name, state.monitor.config())),
        Err(MonitorError::NotReady) => Err((StatusCode::SERVICE_UNAVAILABLE, "no snapshot published yet".to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn handle_healthz(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.monitor.state() {
        MonitorState::Ready => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Html<String> {
    let zones = state
        .monitor
        .zones()
        .iter()
        .map(|z| z.label())
        .collect::<Vec<_>>()
        .join(", ");
    Html(format!(
        "<html><head><title>kepler</title></head><body>\
         <h1>kepler-engine</h1>\
         <p>node: {}</p>\
         <p>zones: {}</p>\
         <p><a href=\"{}\">metrics</a> &middot; <a href=\"/healthz\">healthz</a></p>\
         </body></html>",
        state.node_name,
        zones,
        state.monitor.config().metrics_path,
    ))
}

/// Build the axum router for `monitor`, serving metrics under
/// `monitor.config().metrics_path`.
pub fn build_router(monitor: Arc<PowerMonitor>, node_name: String) -> Router {
    let metrics_path = monitor.config().metrics_path.clone();
    let state = Arc::new(AppState { monitor, node_name });

    Router::new()
        .route("/", get(handle_index))
        .route(&metrics_path, get(handle_metrics))
        .route("/healthz", get(handle_healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the router until the listener is dropped or the process
/// is signalled to stop (the caller wires cancellation into the monitor's
/// tick loop, which is a separate task from this one).
pub async fn run_server(monitor: Arc<PowerMonitor>, node_name: String) -> std::io::Result<()> {
    let bind_addr = monitor.config().bind_addr;
    let app = build_router(monitor, node_name);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log::info!("kepler-server listening on {bind_addr}");
    axum::serve(listener, app).await
}
