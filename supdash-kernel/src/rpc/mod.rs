/**
 * ADAPTATEUR RPC - Interface commune vers un démon de contrôle de processus
 *
 * RÔLE :
 * Définit le contrat qu'agrégateur et dispatcher consomment, indépendamment du
 * transport : ouvrir une session sur un démon, puis GetStatus / Start / Stop.
 *
 * FONCTIONNEMENT :
 * - Connector = fabrique de sessions (une session par lot d'appels sur un démon)
 * - ControlSession = les trois appels distants, un seul essai chacun (pas de retry)
 * - RpcError distingue panne de connexion (isole le démon) et fault (isole le processus)
 * - La session est libérée au drop, quel que soit le résultat
 */

pub mod supervisor;
pub mod xml;

use crate::models::{Daemon, ProcessStatus};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub use supervisor::SupervisorConnector;

/// Codes de fault supervisord
pub const BAD_NAME: i64 = 10;
pub const ALREADY_STARTED: i64 = 60;
pub const NOT_RUNNING: i64 = 70;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// Transport en échec avant toute réponse protocolaire
    #[error("{0}")]
    Connection(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Fault renvoyé par un démon joignable (ex: BAD_NAME)
    #[error("{message}")]
    Fault { code: i64, message: String },
    /// Réponse reçue mais inexploitable
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Vrai si le démon lui-même est injoignable : inutile d'insister sur les autres processus
    pub fn is_connection(&self) -> bool {
        matches!(self, RpcError::Connection(_) | RpcError::Timeout(_))
    }
}

#[async_trait]
pub trait ControlSession: Send {
    async fn get_status(&mut self, process: &str) -> Result<ProcessStatus, RpcError>;

    /// Retourne le booléen du démon tel quel ; "déjà démarré" reste un fault
    async fn start(&mut self, process: &str) -> Result<bool, RpcError>;

    async fn stop(&mut self, process: &str) -> Result<bool, RpcError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, daemon: &Daemon) -> Result<Box<dyn ControlSession>, RpcError>;
}

/// Borne un appel distant ; l'expiration compte comme panne de connexion
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(limit)),
    }
}

/// Connecteur scripté pour les tests unitaires de l'agrégateur et du dispatcher
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::ProcessState;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use time::OffsetDateTime;

    #[derive(Clone)]
    pub enum Script {
        Unreachable,
        /// Bloque indéfiniment à l'ouverture de session
        Hang,
        Reachable(HashMap<String, Reply>),
    }

    #[derive(Clone)]
    pub enum Reply {
        Status(ProcessState),
        Fault(&'static str),
        /// La connexion tombe pendant l'appel
        Drop,
        Control { start: Result<bool, RpcError>, stop: Result<bool, RpcError> },
    }

    #[derive(Clone, Default)]
    pub struct ScriptedConnector {
        scripts: Arc<Mutex<HashMap<String, Script>>>,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(self, host: &str, script: Script) -> Self {
            self.scripts.lock().insert(host.to_string(), script);
            self
        }
    }

    pub fn reachable(replies: &[(&str, Reply)]) -> Script {
        Script::Reachable(replies.iter().map(|(n, r)| (n.to_string(), r.clone())).collect())
    }

    pub fn status(name: &str, state: ProcessState) -> ProcessStatus {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_100).unwrap();
        ProcessStatus {
            name: name.to_string(),
            group: Some(name.to_string()),
            start: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            stop: None,
            now,
            state,
            pid: Some(4242),
            description: None,
        }
    }

    struct ScriptedSession {
        host: String,
        replies: HashMap<String, Reply>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSession {
        fn reply(&self, op: &str, process: &str) -> Result<Reply, RpcError> {
            self.calls.lock().push(format!("{}:{op}:{process}", self.host));
            self.replies
                .get(process)
                .cloned()
                .ok_or_else(|| RpcError::Fault { code: BAD_NAME, message: format!("BAD_NAME: {process}") })
        }
    }

    #[async_trait]
    impl ControlSession for ScriptedSession {
        async fn get_status(&mut self, process: &str) -> Result<ProcessStatus, RpcError> {
            match self.reply("status", process)? {
                Reply::Status(state) => Ok(status(process, state)),
                Reply::Fault(msg) => Err(RpcError::Fault { code: BAD_NAME, message: msg.to_string() }),
                Reply::Drop => Err(RpcError::Connection("connection reset by peer".into())),
                Reply::Control { .. } => Ok(status(process, ProcessState::Running)),
            }
        }

        async fn start(&mut self, process: &str) -> Result<bool, RpcError> {
            match self.reply("start", process)? {
                Reply::Control { start, .. } => start,
                Reply::Drop => Err(RpcError::Connection("connection reset by peer".into())),
                _ => Ok(true),
            }
        }

        async fn stop(&mut self, process: &str) -> Result<bool, RpcError> {
            match self.reply("stop", process)? {
                Reply::Control { stop, .. } => stop,
                Reply::Drop => Err(RpcError::Connection("connection reset by peer".into())),
                _ => Ok(true),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, daemon: &Daemon) -> Result<Box<dyn ControlSession>, RpcError> {
            self.calls.lock().push(format!("{}:connect", daemon.host));
            let script = self.scripts.lock().get(&daemon.host).cloned();
            match script {
                Some(Script::Reachable(replies)) => Ok(Box::new(ScriptedSession {
                    host: daemon.host.clone(),
                    replies,
                    calls: self.calls.clone(),
                })),
                Some(Script::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Some(Script::Unreachable) | None => Err(RpcError::Connection("connection refused".into())),
            }
        }
    }
}
