/**
 * API REST SUPDASH - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose le rapport d'état agrégé, les actions de contrôle et le CRUD du registre.
 * Couche de présentation uniquement : toute la logique vit dans agrégateur/dispatcher/registre.
 *
 * ROUTES :
 * - GET  /health, /system/health
 * - GET  /            page HTML (tableau d'état, boutons start/stop/restart)
 * - GET  /status      même rapport en JSON, horodatages en heure locale
 * - POST /daemons/{host}/processes/{name}/{action}
 * - GET  /daemons, GET|PUT|DELETE /daemons/{host}
 *
 * CODES :
 * 404 hôte inconnu, 400 action/endpoint invalide, 502 fault/refus/démon injoignable, 504 timeout
 */

use crate::aggregator::StatusAggregator;
use crate::dispatcher::{ControlDispatcher, DispatchError};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{AggregateReport, ControlAction, Daemon, ProcessEntry};
use crate::registry::{Registry, RegistryError, Upserted};
use crate::rpc::RpcError;
use crate::timefmt::LocalClock;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use url::Url;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub aggregator: Arc<StatusAggregator>,
    pub dispatcher: Arc<ControlDispatcher>,
    pub clock: Arc<dyn LocalClock>,
    pub health_tracker: HealthTracker,
}

#[derive(Serialize)]
struct ReportView {
    generated_at: String,
    daemons: Vec<DaemonStatusView>,
}

#[derive(Serialize)]
struct DaemonStatusView {
    host: String,
    url: String,
    processes: Vec<EntryView>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EntryView {
    Status {
        name: String,
        state: String,
        start: String,
        stop: Option<String>, // None = jamais arrêté
        now: String,
        pid: Option<u32>,
        description: Option<String>,
    },
    Error {
        error: String,
    },
}

#[derive(Serialize)]
struct DaemonView {
    host: String,
    endpoint: String, // mot de passe masqué
    processes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DaemonBody {
    endpoint: String,
    #[serde(default)]
    processes: Vec<String>,
}

fn to_view(report: &AggregateReport, clock: &dyn LocalClock) -> ReportView {
    let daemons = report
        .daemons
        .iter()
        .map(|r| DaemonStatusView {
            host: r.daemon.host.clone(),
            url: r.daemon.display_endpoint(),
            processes: r
                .entries
                .iter()
                .map(|entry| match entry {
                    ProcessEntry::Status(s) => EntryView::Status {
                        name: s.name.clone(),
                        state: s.state.label().to_string(),
                        start: clock.render(s.start),
                        stop: s.stop.map(|t| clock.render(t)),
                        now: clock.render(s.now),
                        pid: s.pid,
                        description: s.description.clone(),
                    },
                    ProcessEntry::Error { message } => EntryView::Error { error: message.clone() },
                })
                .collect(),
        })
        .collect();

    ReportView {
        generated_at: report.generated_at.format(&Rfc3339).unwrap_or_default(),
        daemons,
    }
}

fn daemon_view(d: &Daemon) -> DaemonView {
    DaemonView { host: d.host.clone(), endpoint: d.display_endpoint(), processes: d.processes.clone() }
}

fn error_reply<S: Into<String>>(code: StatusCode, msg: S) -> (StatusCode, Json<serde_json::Value>) {
    (code, Json(serde_json::json!({ "ok": false, "error": msg.into() })))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/", get(status_page))
        .route("/status", get(get_status))
        .route("/daemons", get(list_daemons))
        .route("/daemons/{host}", get(get_daemon).put(put_daemon).delete(delete_daemon))
        .route("/daemons/{host}/processes/{name}/{action}", post(control_process))
        .with_state(app_state)
}

async fn aggregate(app: &AppState) -> ReportView {
    let report = app.aggregator.aggregate().await;
    app.health_tracker.record_aggregation(&report);
    to_view(&report, app.clock.as_ref())
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<ReportView> {
    Json(aggregate(&app).await)
}

// GET /
async fn status_page(State(app): State<AppState>) -> Html<String> {
    Html(render_page(&aggregate(&app).await))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.registry))
}

// POST /daemons/{host}/processes/{name}/{action}
async fn control_process(
    State(app): State<AppState>,
    Path((host, name, action)): Path<(String, String, String)>,
) -> (StatusCode, Json<serde_json::Value>) {
    let action: ControlAction = match action.parse() {
        Ok(a) => a,
        Err(e) => return error_reply(StatusCode::BAD_REQUEST, e),
    };

    match app.dispatcher.dispatch(&host, &name, action).await {
        Ok(outcome) => {
            app.health_tracker.record_dispatch(true);
            (StatusCode::OK, Json(serde_json::json!({ "ok": true, "outcome": outcome })))
        }
        Err(err) => {
            app.health_tracker.record_dispatch(false);
            let code = match &err {
                DispatchError::UnknownHost(_) => StatusCode::NOT_FOUND,
                DispatchError::Connection { source: RpcError::Timeout(_), .. } => StatusCode::GATEWAY_TIMEOUT,
                DispatchError::Connection { .. } | DispatchError::Remote { .. } | DispatchError::Rejected { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            };
            (
                code,
                Json(serde_json::json!({ "ok": false, "error": err.to_string(), "endpoint": err.endpoint() })),
            )
        }
    }
}

// GET /daemons
async fn list_daemons(State(app): State<AppState>) -> Json<Vec<DaemonView>> {
    Json(app.registry.list_daemons().iter().map(daemon_view).collect())
}

// GET /daemons/{host}
async fn get_daemon(State(app): State<AppState>, Path(host): Path<String>) -> Result<Json<DaemonView>, StatusCode> {
    match app.registry.find_by_host(&host) {
        Ok(d) => Ok(Json(daemon_view(&d))),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

// PUT /daemons/{host} (upsert)
async fn put_daemon(
    State(app): State<AppState>,
    Path(host): Path<String>,
    Json(body): Json<DaemonBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    let endpoint = match Url::parse(body.endpoint.trim()) {
        Ok(url) => url,
        Err(e) => return error_reply(StatusCode::BAD_REQUEST, format!("invalid endpoint: {e}")),
    };

    match app.registry.upsert(Daemon::new(host, endpoint, body.processes)) {
        Ok(Upserted::Created) => (StatusCode::CREATED, Json(serde_json::json!({ "ok": true, "status": "created" }))),
        Ok(Upserted::Updated) => (StatusCode::OK, Json(serde_json::json!({ "ok": true, "status": "updated" }))),
        Err(e @ RegistryError::Invalid { .. }) => error_reply(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// DELETE /daemons/{host}
async fn delete_daemon(State(app): State<AppState>, Path(host): Path<String>) -> (StatusCode, Json<serde_json::Value>) {
    match app.registry.remove(&host) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true, "status": "deleted" }))),
        Err(e @ RegistryError::NotFound(_)) => error_reply(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn action_path(host: &str, process: &str, action: ControlAction) -> String {
    format!(
        "/daemons/{}/processes/{}/{action}",
        utf8_percent_encode(host, NON_ALPHANUMERIC),
        utf8_percent_encode(process, NON_ALPHANUMERIC),
    )
}

fn render_page(view: &ReportView) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Process status</title>\
         <style>table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:4px 8px}\
         .error{color:#b00}form{display:inline}</style></head><body>\n<h1>Process status</h1>\n",
    );
    let _ = writeln!(html, "<p>Generated at {}</p>", escape(view.generated_at.as_str()));
    html.push_str(
        "<table>\n<tr><th>Host</th><th>URL</th><th>Name</th><th>Start</th><th>Stop</th>\
         <th>Now</th><th>State</th><th></th></tr>\n",
    );

    for daemon in &view.daemons {
        let host = escape(daemon.host.as_str());
        let url = escape(daemon.url.as_str());
        if daemon.processes.is_empty() {
            let _ = writeln!(
                html,
                "<tr class=\"error\"><td>{host}</td><td>{url}</td><td colspan=\"6\">no tracked processes</td></tr>"
            );
        }
        for entry in &daemon.processes {
            match entry {
                EntryView::Status { name, state, start, stop, now, .. } => {
                    let _ = write!(
                        html,
                        "<tr><td>{host}</td><td>{url}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>",
                        escape(name.as_str()),
                        escape(start.as_str()),
                        escape(stop.as_deref().unwrap_or("-")),
                        escape(now.as_str()),
                        escape(state.as_str()),
                    );
                    for action in [ControlAction::Start, ControlAction::Stop, ControlAction::Restart] {
                        let _ = write!(
                            html,
                            "<form method=\"post\" action=\"{}\"><button>{action}</button></form>",
                            escape(action_path(&daemon.host, name, action).as_str()),
                        );
                    }
                    html.push_str("</td></tr>\n");
                }
                EntryView::Error { error } => {
                    let _ = writeln!(
                        html,
                        "<tr class=\"error\"><td>{host}</td><td>{url}</td><td colspan=\"6\">{}</td></tr>",
                        escape(error.as_str()),
                    );
                }
            }
        }
    }

    html.push_str("</table>\n</body></html>\n");
    html
}
