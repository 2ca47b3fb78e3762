use crate::models::{default_host_label, validate_endpoint, Daemon};
use crate::timefmt::FixedOffsetClock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("daemon #{index}: invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { index: usize, endpoint: String, reason: String },
    #[error("daemon #{0}: {1}")]
    InvalidDaemon(usize, String),
    #[error("duplicate host label {0:?}")]
    DuplicateHost(String),
    #[error("no daemons configured and no registry data file")]
    NoDaemons,
    #[error("invalid utc_offset {0:?} (expected +HH:MM)")]
    InvalidOffset(String),
    #[error("invalid listen address {0:?}")]
    InvalidListen(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DashConfig {
    #[serde(default, alias = "supervisors")]
    pub daemons: Vec<DaemonConf>,
    #[serde(default)]
    pub rpc: RpcConf,
    #[serde(default)]
    pub display: DisplayConf,
    #[serde(default)]
    pub http: HttpConf,
    #[serde(default)]
    pub registry: RegistryConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonConf {
    pub host: Option<String>,
    #[serde(alias = "url")]
    pub endpoint: String, // ex: "http://127.0.0.1:9001/RPC2"
    #[serde(default)]
    pub processes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConf {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Désactive le fan-out : un démon après l'autre
    #[serde(default)]
    pub sequential: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DisplayConf {
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RegistryConf {
    /// Persistance JSON des démons (sinon registre en mémoire)
    pub data_file: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_utc_offset() -> String {
    "+09:00".into()
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

impl Default for RpcConf {
    fn default() -> Self {
        Self { timeout_secs: default_timeout_secs(), sequential: false }
    }
}

impl Default for DisplayConf {
    fn default() -> Self {
        Self { utc_offset: default_utc_offset() }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

impl DashConfig {
    /// Parse + validation complète (YAML ou JSON, serde_yaml lit les deux)
    pub fn from_yaml_str(txt: &str) -> Result<Self, ConfigError> {
        let cfg: DashConfig = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemons.is_empty() && self.registry.data_file.is_none() {
            return Err(ConfigError::NoDaemons);
        }
        self.daemon_list()?;
        self.clock()?;
        self.listen_addr()?;
        Ok(())
    }

    /// Démons de la config, dans l'ordre du fichier
    pub fn daemon_list(&self) -> Result<Vec<Daemon>, ConfigError> {
        let mut seen = HashSet::new();
        let mut daemons = Vec::with_capacity(self.daemons.len());

        for (index, conf) in self.daemons.iter().enumerate() {
            let invalid = |reason: String| ConfigError::InvalidEndpoint {
                index,
                endpoint: conf.endpoint.clone(),
                reason,
            };
            let endpoint = Url::parse(conf.endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
            validate_endpoint(&endpoint).map_err(invalid)?;

            let host = match &conf.host {
                Some(h) => h.trim().to_string(),
                None => default_host_label(&endpoint).unwrap_or_default(),
            };
            let daemon = Daemon::new(host, endpoint, conf.processes.clone());
            daemon.validate().map_err(|reason| ConfigError::InvalidDaemon(index, reason))?;

            if !seen.insert(daemon.host.clone()) {
                return Err(ConfigError::DuplicateHost(daemon.host));
            }
            daemons.push(daemon);
        }
        Ok(daemons)
    }

    pub fn clock(&self) -> Result<FixedOffsetClock, ConfigError> {
        FixedOffsetClock::parse(&self.display.utc_offset)
            .map_err(|_| ConfigError::InvalidOffset(self.display.utc_offset.clone()))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.http.listen.clone()))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs.max(1))
    }
}

/// Chemin de config : SUPDASH_CONFIG ou ./supdash.yaml
pub fn config_path() -> PathBuf {
    std::env::var("SUPDASH_CONFIG")
        .unwrap_or_else(|_| "supdash.yaml".into())
        .into()
}

/// Lecture stricte : fichier absent ou invalide = erreur fatale, jamais de registre vide silencieux
pub async fn load_config(path: &Path) -> Result<DashConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    DashConfig::from_yaml_str(&txt)
}
