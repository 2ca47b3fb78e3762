/*!
Faux supervisord pour tests sans démon réel

Sert `POST /RPC2` sur 127.0.0.1 (port éphémère) et répond à
`supervisor.getProcessInfo`, `supervisor.startProcess`, `supervisor.stopProcess`
avec les mêmes codes de fault que supervisord :
- 10 BAD_NAME (processus inconnu)
- 60 ALREADY_STARTED
- 70 NOT_RUNNING

Tous les appels sont enregistrés. On peut injecter un fault, une latence ou un statut HTTP.
*/

use crate::xmlrpc::{bool_response, fault_response, parse_call, struct_response, Member};
use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const BAD_NAME: i64 = 10;
pub const ALREADY_STARTED: i64 = 60;
pub const NOT_RUNNING: i64 = 70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeProcess {
    group: String,
    statename: String,
    start: i64,
    stop: i64,
    pid: i64,
}

#[derive(Default)]
struct FakeState {
    processes: HashMap<String, FakeProcess>,
    calls: Vec<RecordedCall>,
    faults: HashMap<(String, String), (i64, String)>,
    delay: Option<Duration>,
    http_status: Option<StatusCode>,
    next_pid: i64,
}

type Shared = Arc<Mutex<FakeState>>;

/// Serveur XML-RPC factice, arrêté quand on le drop
pub struct FakeSupervisor {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl FakeSupervisor {
    /// Démarre un faux démon avec des processus `(nom, STATENAME)`
    pub async fn spawn(processes: &[(&str, &str)]) -> Result<Self> {
        let now = chrono::Utc::now().timestamp();
        let mut state = FakeState { next_pid: 1000, ..Default::default() };
        for (name, statename) in processes {
            let running = *statename == "RUNNING";
            let pid = if running {
                state.next_pid += 1;
                state.next_pid
            } else {
                0
            };
            state.processes.insert(
                name.to_string(),
                FakeProcess {
                    group: name.to_string(),
                    statename: statename.to_string(),
                    start: now - 60,
                    stop: if running { 0 } else { now - 30 },
                    pid,
                },
            );
        }

        let state: Shared = Arc::new(Mutex::new(state));
        let app = Router::new().route("/RPC2", post(handle_rpc)).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("fake supervisor stopped: {}", e);
            }
        });

        log::info!("fake supervisor listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/RPC2", self.addr)
    }

    /// Tous les appels reçus, dans l'ordre
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Appels sous forme courte "method(name)", ex: "stopProcess(web)"
    pub fn call_log(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| {
                let method = c.method.trim_start_matches("supervisor.");
                format!("{}({})", method, c.params.first().cloned().unwrap_or_default())
            })
            .collect()
    }

    pub fn statename(&self, process: &str) -> Option<String> {
        self.state.lock().unwrap().processes.get(process).map(|p| p.statename.clone())
    }

    /// Force un fault pour `method` (sans préfixe "supervisor.") sur un processus
    pub fn fail_with(&self, method: &str, process: &str, code: i64, message: &str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert((format!("supervisor.{method}"), process.to_string()), (code, message.to_string()));
    }

    /// Latence ajoutée avant chaque réponse
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Répond avec ce statut HTTP au lieu d'XML-RPC
    pub fn set_http_status(&self, status: Option<StatusCode>) {
        self.state.lock().unwrap().http_status = status;
    }
}

impl Drop for FakeSupervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_rpc(State(state): State<Shared>, body: String) -> Response {
    let (delay, http_status) = {
        let s = state.lock().unwrap();
        (s.delay, s.http_status)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = http_status {
        return (status, "unavailable").into_response();
    }

    let xml = match parse_call(&body) {
        Ok((method, params)) => {
            let mut s = state.lock().unwrap();
            s.calls.push(RecordedCall { method: method.clone(), params: params.clone() });
            respond(&mut s, &method, &params)
        }
        Err(e) => fault_response(1, &format!("UNKNOWN_METHOD: {e}")),
    };
    ([(header::CONTENT_TYPE, "text/xml")], xml).into_response()
}

fn respond(state: &mut FakeState, method: &str, params: &[String]) -> String {
    let name = params.first().cloned().unwrap_or_default();
    if let Some((code, message)) = state.faults.get(&(method.to_string(), name.clone())) {
        return fault_response(*code, message);
    }

    let now = chrono::Utc::now().timestamp();
    let next_pid = state.next_pid + 1;
    let Some(process) = state.processes.get_mut(&name) else {
        return fault_response(BAD_NAME, &format!("BAD_NAME: {name}"));
    };

    match method {
        "supervisor.getProcessInfo" => struct_response(&[
            ("name", Member::Str(name.clone())),
            ("group", Member::Str(process.group.clone())),
            ("start", Member::Int(process.start)),
            ("stop", Member::Int(process.stop)),
            ("now", Member::Int(now)),
            ("statename", Member::Str(process.statename.clone())),
            ("pid", Member::Int(process.pid)),
            ("description", Member::Str(if process.pid > 0 { format!("pid {}", process.pid) } else { String::new() })),
        ]),
        "supervisor.startProcess" => {
            if process.statename == "RUNNING" {
                return fault_response(ALREADY_STARTED, &format!("ALREADY_STARTED: {name}"));
            }
            process.statename = "RUNNING".into();
            process.start = now;
            process.pid = next_pid;
            state.next_pid = next_pid;
            bool_response(true)
        }
        "supervisor.stopProcess" => {
            if process.statename != "RUNNING" {
                return fault_response(NOT_RUNNING, &format!("NOT_RUNNING: {name}"));
            }
            process.statename = "STOPPED".into();
            process.stop = now;
            process.pid = 0;
            bool_response(true)
        }
        other => fault_response(1, &format!("UNKNOWN_METHOD: {other}")),
    }
}
