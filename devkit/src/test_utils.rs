/*!
Test Harness pour le kernel supdash

Compose un parc de démons (faux supervisord vivants ou endpoints injoignables)
et génère la config YAML correspondante, dans l'ordre d'ajout.
*/

use crate::fake_supervisor::FakeSupervisor;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt::Write as _;

struct DaemonEntry {
    host: String,
    endpoint: String,
    processes: Vec<String>,
}

pub struct TestHarness {
    entries: Vec<DaemonEntry>,
    fakes: HashMap<String, FakeSupervisor>,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok(); // logging pour tests

        Self { entries: Vec::new(), fakes: HashMap::new() }
    }

    /// Ajoute un faux démon vivant ; les processus suivis sont ceux déclarés ici
    pub async fn spawn_daemon(&mut self, host: &str, processes: &[(&str, &str)]) -> Result<&FakeSupervisor> {
        let fake = FakeSupervisor::spawn(processes).await?;
        self.entries.push(DaemonEntry {
            host: host.to_string(),
            endpoint: fake.endpoint(),
            processes: processes.iter().map(|(name, _)| name.to_string()).collect(),
        });
        self.fakes.insert(host.to_string(), fake);
        Ok(&self.fakes[host])
    }

    /// Ajoute un processus suivi que le démon ne connaît pas
    pub fn track_extra(&mut self, host: &str, process: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.host == host) {
            entry.processes.push(process.to_string());
        }
    }

    /// Ajoute un démon dont l'endpoint refuse les connexions
    pub async fn add_unreachable(&mut self, host: &str, processes: &[&str]) -> Result<String> {
        let endpoint = unreachable_endpoint().await?;
        self.entries.push(DaemonEntry {
            host: host.to_string(),
            endpoint: endpoint.clone(),
            processes: processes.iter().map(|p| p.to_string()).collect(),
        });
        Ok(endpoint)
    }

    pub fn daemon(&self, host: &str) -> Option<&FakeSupervisor> {
        self.fakes.get(host)
    }

    pub fn endpoint(&self, host: &str) -> Option<&str> {
        self.entries.iter().find(|e| e.host == host).map(|e| e.endpoint.as_str())
    }

    /// Config YAML du parc, avec un timeout RPC court
    pub fn config_yaml(&self, timeout_secs: u64) -> String {
        let mut yaml = String::from("daemons:\n");
        for entry in &self.entries {
            let processes = entry.processes.iter().map(|p| format!("{p:?}")).collect::<Vec<_>>().join(", ");
            let _ = writeln!(yaml, "  - host: {:?}\n    endpoint: {:?}\n    processes: [{}]", entry.host, entry.endpoint, processes);
        }
        let _ = writeln!(yaml, "rpc:\n  timeout_secs: {timeout_secs}");
        yaml
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint sur un port local libéré juste après réservation : connexion refusée
pub async fn unreachable_endpoint() -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}/RPC2"))
}
