/**
 * DISPATCHER DE CONTRÔLE - start / stop / restart d'un processus distant
 *
 * RÔLE :
 * Résout un label d'hôte via le registre puis envoie une action de contrôle au
 * démon correspondant, avec un résultat définitif (succès ou échec) qui nomme l'endpoint.
 *
 * POLITIQUE RESTART :
 * Restart = Stop puis Start sur la même session, en séquence. Si Stop échoue,
 * Start est tenté quand même (best effort) et le résultat global est celui de Start.
 * L'échec du Stop est conservé dans `steps` et journalisé.
 *
 * ÉTAT DÉJÀ ATTEINT :
 * ALREADY_STARTED sur Start et NOT_RUNNING sur Stop comptent comme succès
 * (`StepResult::AlreadyInState`), sans nouvel appel : Stop deux fois est sans risque.
 *
 * Pas d'idempotence masquée : chaque restart a un effet observable côté démon.
 */

use crate::models::ControlAction;
use crate::registry::{Registry, RegistryError};
use crate::rpc::{with_deadline, Connector, RpcError, ALREADY_STARTED, NOT_RUNNING};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Appel distant élémentaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCall {
    Start,
    Stop,
}

impl ControlCall {
    /// Fault signifiant que le processus est déjà dans l'état visé
    fn already_in_state(self, code: i64) -> bool {
        match self {
            Self::Start => code == ALREADY_STARTED,
            Self::Stop => code == NOT_RUNNING,
        }
    }
}

impl fmt::Display for ControlCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResult {
    Accepted,
    /// Le démon a répondu `false`
    Rejected,
    /// Déjà démarré (Start) ou déjà arrêté (Stop)
    AlreadyInState { message: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlStep {
    pub call: ControlCall,
    #[serde(flatten)]
    pub result: StepResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub host: String,
    pub endpoint: String,
    pub process: String,
    pub action: ControlAction,
    pub steps: Vec<ControlStep>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("failed to connect to {endpoint}: {source}")]
    Connection { endpoint: String, source: RpcError },
    #[error("{endpoint}: {call} {process} failed: {source}")]
    Remote { endpoint: String, process: String, call: ControlCall, source: RpcError },
    #[error("{endpoint}: {call} {process} was rejected")]
    Rejected { endpoint: String, process: String, call: ControlCall },
}

impl DispatchError {
    /// Endpoint concerné (aucun pour un hôte inconnu)
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::UnknownHost(_) => None,
            Self::Connection { endpoint, .. } | Self::Remote { endpoint, .. } | Self::Rejected { endpoint, .. } => {
                Some(endpoint)
            }
        }
    }
}

pub struct ControlDispatcher {
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl ControlDispatcher {
    pub fn new(registry: Arc<Registry>, connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { registry, connector, timeout }
    }

    pub async fn dispatch(
        &self,
        host: &str,
        process: &str,
        action: ControlAction,
    ) -> Result<ControlOutcome, DispatchError> {
        let daemon = self.registry.find_by_host(host).map_err(|e| match e {
            RegistryError::NotFound(h) => DispatchError::UnknownHost(h),
            other => DispatchError::UnknownHost(format!("{host} ({other})")),
        })?;
        let endpoint = daemon.display_endpoint();

        let mut session = with_deadline(self.timeout, self.connector.connect(&daemon))
            .await
            .map_err(|source| DispatchError::Connection { endpoint: endpoint.clone(), source })?;

        let calls: &[ControlCall] = match action {
            ControlAction::Start => &[ControlCall::Start],
            ControlAction::Stop => &[ControlCall::Stop],
            ControlAction::Restart => &[ControlCall::Stop, ControlCall::Start],
        };

        let mut steps = Vec::with_capacity(calls.len());
        let mut last: Result<bool, RpcError> = Ok(true);
        for &call in calls {
            let result = match call {
                ControlCall::Start => with_deadline(self.timeout, session.start(process)).await,
                ControlCall::Stop => with_deadline(self.timeout, session.stop(process)).await,
            };
            let step = match &result {
                Ok(true) => StepResult::Accepted,
                Ok(false) => StepResult::Rejected,
                Err(RpcError::Fault { code, message }) if call.already_in_state(*code) => {
                    StepResult::AlreadyInState { message: message.clone() }
                }
                Err(err) => StepResult::Failed { message: err.to_string() },
            };
            match &step {
                StepResult::Accepted => {}
                StepResult::AlreadyInState { message } => {
                    info!(%host, %endpoint, %process, %call, %message, "process already in requested state");
                }
                _ => warn!(%host, %endpoint, %process, %call, ?step, "control call did not succeed"),
            }
            last = match step {
                StepResult::AlreadyInState { .. } => Ok(true),
                _ => result,
            };
            steps.push(ControlStep { call, result: step });
        }
        drop(session);

        let final_call = steps.last().map(|s| s.call).unwrap_or(ControlCall::Start);
        match last {
            Ok(true) => {
                info!(%host, %endpoint, %process, %action, "control action succeeded");
                Ok(ControlOutcome {
                    host: daemon.host,
                    endpoint,
                    process: process.to_string(),
                    action,
                    steps,
                })
            }
            Ok(false) => Err(DispatchError::Rejected { endpoint, process: process.to_string(), call: final_call }),
            Err(source) if source.is_connection() => Err(DispatchError::Connection { endpoint, source }),
            Err(source) => Err(DispatchError::Remote {
                endpoint,
                process: process.to_string(),
                call: final_call,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Daemon;
    use crate::rpc::testing::{reachable, Reply, Script, ScriptedConnector};
    use url::Url;

    fn fault(code: i64, message: &str) -> RpcError {
        RpcError::Fault { code, message: message.to_string() }
    }

    fn dispatcher(connector: ScriptedConnector) -> ControlDispatcher {
        let registry = Registry::in_memory();
        registry
            .load(vec![
                Daemon::new("A", Url::parse("http://a.local:9001/RPC2").unwrap(), vec!["web".into()]),
                Daemon::new("B", Url::parse("http://b.local:9001/RPC2").unwrap(), vec!["db".into()]),
            ])
            .unwrap();
        ControlDispatcher::new(Arc::new(registry), Arc::new(connector), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_unknown_host_makes_no_remote_call() {
        let connector = ScriptedConnector::new();
        let calls = connector.calls.clone();
        let err = dispatcher(connector).dispatch("Z", "web", ControlAction::Stop).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownHost(ref h) if h == "Z"));
        assert!(err.endpoint().is_none());
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_restart_stop_then_start() {
        let connector = ScriptedConnector::new().script(
            "A",
            reachable(&[("web", Reply::Control { start: Ok(true), stop: Ok(true) })]),
        );
        let calls = connector.calls.clone();
        let outcome = dispatcher(connector).dispatch("A", "web", ControlAction::Restart).await.unwrap();

        assert_eq!(outcome.endpoint, "http://a.local:9001/RPC2");
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].call, ControlCall::Stop);
        assert_eq!(outcome.steps[1].call, ControlCall::Start);
        assert_eq!(*calls.lock(), vec!["A:connect", "A:stop:web", "A:start:web"]);
    }

    #[tokio::test]
    async fn test_restart_attempts_start_after_failed_stop() {
        let connector = ScriptedConnector::new().script(
            "A",
            reachable(&[("web", Reply::Control { start: Ok(true), stop: Err(fault(2, "FAILED: web")) })]),
        );
        let outcome = dispatcher(connector).dispatch("A", "web", ControlAction::Restart).await.unwrap();

        assert_eq!(outcome.steps[0].result, StepResult::Failed { message: "FAILED: web".into() });
        assert_eq!(outcome.steps[1].result, StepResult::Accepted);
    }

    #[tokio::test]
    async fn test_restart_reports_start_failure() {
        let connector = ScriptedConnector::new().script(
            "A",
            reachable(&[("web", Reply::Control { start: Err(fault(50, "SPAWN_ERROR: web")), stop: Ok(true) })]),
        );
        let err = dispatcher(connector).dispatch("A", "web", ControlAction::Restart).await.unwrap_err();
        match err {
            DispatchError::Remote { endpoint, call, source, .. } => {
                assert_eq!(endpoint, "http://a.local:9001/RPC2");
                assert_eq!(call, ControlCall::Start);
                assert_eq!(source, fault(50, "SPAWN_ERROR: web"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_in_state_is_success() {
        let connector = ScriptedConnector::new().script(
            "A",
            reachable(&[(
                "web",
                Reply::Control {
                    start: Err(fault(ALREADY_STARTED, "ALREADY_STARTED: web")),
                    stop: Err(fault(NOT_RUNNING, "NOT_RUNNING: web")),
                },
            )]),
        );
        let calls = connector.calls.clone();
        let dispatcher = dispatcher(connector);

        let started = dispatcher.dispatch("A", "web", ControlAction::Start).await.unwrap();
        assert_eq!(started.steps.len(), 1);
        assert_eq!(started.steps[0].result, StepResult::AlreadyInState { message: "ALREADY_STARTED: web".into() });

        let stopped = dispatcher.dispatch("A", "web", ControlAction::Stop).await.unwrap();
        assert_eq!(stopped.steps[0].result, StepResult::AlreadyInState { message: "NOT_RUNNING: web".into() });

        // un seul appel distant par action, aucun appel ajouté
        assert_eq!(*calls.lock(), vec!["A:connect", "A:start:web", "A:connect", "A:stop:web"]);
    }

    #[tokio::test]
    async fn test_already_in_state_code_only_counts_for_matching_call() {
        let connector = ScriptedConnector::new().script(
            "A",
            reachable(&[("web", Reply::Control { start: Err(fault(NOT_RUNNING, "NOT_RUNNING: web")), stop: Ok(true) })]),
        );
        let err = dispatcher(connector).dispatch("A", "web", ControlAction::Start).await.unwrap_err();
        assert!(matches!(err, DispatchError::Remote { call: ControlCall::Start, .. }));
    }

    #[tokio::test]
    async fn test_rejected_and_unreachable() {
        let connector = ScriptedConnector::new()
            .script("A", reachable(&[("web", Reply::Control { start: Ok(false), stop: Ok(true) })]))
            .script("B", Script::Unreachable);
        let dispatcher = dispatcher(connector);

        let err = dispatcher.dispatch("A", "web", ControlAction::Start).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { call: ControlCall::Start, .. }));

        let err = dispatcher.dispatch("B", "db", ControlAction::Stop).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connection { .. }));
        assert_eq!(err.endpoint(), Some("http://b.local:9001/RPC2"));
    }

    #[tokio::test]
    async fn test_unknown_process_is_remote_fault() {
        let connector = ScriptedConnector::new().script("A", reachable(&[]));
        let err = dispatcher(connector).dispatch("A", "ghost", ControlAction::Stop).await.unwrap_err();
        assert!(matches!(err, DispatchError::Remote { source: RpcError::Fault { code: 10, .. }, .. }));
    }
}
