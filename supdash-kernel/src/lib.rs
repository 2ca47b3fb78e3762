/**
 * SUPDASH KERNEL - Bibliothèque du serveur de supervision
 *
 * RÔLE : Couche d'agrégation et de contrôle des démons supervisord distants.
 * Le binaire `supdash-kernel` ne fait que câbler config, registre, client XML-RPC et HTTP.
 *
 * ARCHITECTURE : Registre (snapshots immuables) → Agrégateur (fan-out par démon)
 * → Adaptateur RPC (sessions par démon) ; Dispatcher pour start/stop/restart.
 */

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod http;
pub mod models;
pub mod registry;
pub mod rpc;
pub mod timefmt;

pub use aggregator::StatusAggregator;
pub use config::{ConfigError, DashConfig};
pub use dispatcher::{ControlDispatcher, ControlOutcome, DispatchError};
pub use models::{AggregateReport, ControlAction, Daemon, DaemonReport, ProcessEntry, ProcessState, ProcessStatus};
pub use registry::{Registry, RegistryError};
pub use rpc::{Connector, ControlSession, RpcError};
