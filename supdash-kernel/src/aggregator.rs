/**
 * AGRÉGATEUR D'ÉTAT - Vue consolidée de tous les processus surveillés
 *
 * RÔLE :
 * Interroge chaque démon du registre et produit un AggregateReport ordonné,
 * sans jamais échouer : chaque panne devient une entrée d'erreur du rapport.
 *
 * FONCTIONNEMENT :
 * - Snapshot du registre pris une fois par requête
 * - Fan-out : une session par démon, toutes en parallèle, jointure dans l'ordre du registre
 * - Démon injoignable → une seule entrée "Failed to connect to <endpoint>. <détail>"
 * - Fault sur un processus → une entrée d'erreur pour ce processus, on continue
 * - Panne de connexion en cours de boucle → une entrée d'erreur, on abandonne ce démon
 * - Annulation : abandonner le future libère toutes les sessions ouvertes
 */

use crate::models::{AggregateReport, Daemon, DaemonReport, ProcessEntry};
use crate::registry::Registry;
use crate::rpc::{with_deadline, Connector, RpcError};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub struct StatusAggregator {
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    timeout: Duration,
    fan_out: bool,
}

impl StatusAggregator {
    pub fn new(registry: Arc<Registry>, connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { registry, connector, timeout, fan_out: true }
    }

    pub fn with_fan_out(mut self, fan_out: bool) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub async fn aggregate(&self) -> AggregateReport {
        let daemons = self.registry.list_daemons();

        let reports = if self.fan_out {
            // join_all rend les résultats dans l'ordre d'entrée
            join_all(daemons.iter().map(|d| self.query_daemon(d))).await
        } else {
            let mut reports = Vec::with_capacity(daemons.len());
            for daemon in daemons.iter() {
                reports.push(self.query_daemon(daemon).await);
            }
            reports
        };

        AggregateReport { generated_at: OffsetDateTime::now_utc(), daemons: reports }
    }

    async fn query_daemon(&self, daemon: &Daemon) -> DaemonReport {
        let endpoint = daemon.display_endpoint();

        let mut session = match with_deadline(self.timeout, self.connector.connect(daemon)).await {
            Ok(session) => session,
            Err(err) => {
                warn!(host = %daemon.host, %endpoint, error = %err, "daemon unreachable");
                return DaemonReport {
                    daemon: daemon.clone(),
                    entries: vec![connect_failure(&endpoint, &err)],
                    unreachable: true,
                };
            }
        };

        let mut entries = Vec::with_capacity(daemon.processes.len());
        let mut unreachable = false;
        for process in &daemon.processes {
            match with_deadline(self.timeout, session.get_status(process)).await {
                Ok(status) => entries.push(ProcessEntry::Status(status)),
                Err(err) if err.is_connection() => {
                    warn!(host = %daemon.host, %endpoint, %process, error = %err, "daemon unreachable");
                    entries.push(connect_failure(&endpoint, &err));
                    unreachable = true;
                    break;
                }
                Err(err) => {
                    debug!(host = %daemon.host, %process, error = %err, "process query faulted");
                    entries.push(ProcessEntry::error(err.to_string()));
                }
            }
        }

        DaemonReport { daemon: daemon.clone(), entries, unreachable }
    }
}

pub fn connect_failure(endpoint: &str, err: &RpcError) -> ProcessEntry {
    ProcessEntry::error(format!("Failed to connect to {endpoint}. {err}"))
}
