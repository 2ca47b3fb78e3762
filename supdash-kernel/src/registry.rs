/**
 * REGISTRE DES DÉMONS - Liste des supervisord surveillés
 *
 * RÔLE :
 * Source unique de la liste des démons (label, endpoint, processus suivis) pour
 * l'agrégateur et le dispatcher. Ne fait aucun appel réseau.
 *
 * FONCTIONNEMENT :
 * - DaemonStore = interface de persistance (list/upsert/delete), mémoire ou fichier JSON
 * - Lectures = snapshots immuables (Arc<[Daemon]>), jamais bloquées par une écriture en cours
 * - Écritures sérialisées : store d'abord, puis remplacement atomique du snapshot
 * - Unicité du label garantie par upsert : un label existant est remplacé sur place
 * - load() est idempotent : recharger la même liste ne crée aucun doublon
 */

use crate::models::Daemon;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown host: {0}")]
    NotFound(String),
    #[error("invalid daemon {host:?}: {reason}")]
    Invalid { host: String, reason: String },
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

/// Bilan d'un chargement
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub created: usize,
    pub updated: usize,
}

/// Interface de persistance des démons
pub trait DaemonStore: Send + Sync {
    /// Démons dans l'ordre d'insertion
    fn list(&self) -> Result<Vec<Daemon>, RegistryError>;

    fn upsert(&self, daemon: &Daemon) -> Result<Upserted, RegistryError>;

    fn delete(&self, host: &str) -> Result<(), RegistryError>;
}

fn upsert_into(daemons: &mut Vec<Daemon>, daemon: &Daemon) -> Upserted {
    match daemons.iter_mut().find(|d| d.host == daemon.host) {
        Some(existing) => {
            *existing = daemon.clone();
            Upserted::Updated
        }
        None => {
            daemons.push(daemon.clone());
            Upserted::Created
        }
    }
}

fn delete_from(daemons: &mut Vec<Daemon>, host: &str) -> Result<(), RegistryError> {
    let before = daemons.len();
    daemons.retain(|d| d.host != host);
    if daemons.len() == before {
        return Err(RegistryError::NotFound(host.to_string()));
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryStore {
    daemons: Mutex<Vec<Daemon>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DaemonStore for MemoryStore {
    fn list(&self) -> Result<Vec<Daemon>, RegistryError> {
        Ok(self.daemons.lock().clone())
    }

    fn upsert(&self, daemon: &Daemon) -> Result<Upserted, RegistryError> {
        Ok(upsert_into(&mut self.daemons.lock(), daemon))
    }

    fn delete(&self, host: &str) -> Result<(), RegistryError> {
        delete_from(&mut self.daemons.lock(), host)
    }
}

/// Store JSON (tableau pretty-printé), cache mémoire + réécriture complète à chaque modif
///
/// La réécriture passe par un fichier temporaire voisin puis un rename : le fichier
/// n'est jamais lu à moitié écrit, même après un crash pendant l'écriture.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Vec<Daemon>>,
}

impl JsonFileStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, RegistryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, "[]")?;
        }

        let content = fs::read_to_string(&path)?;
        let daemons: Vec<Daemon> = if content.trim().is_empty() { Vec::new() } else { serde_json::from_str(&content)? };
        info!(path = %path.display(), daemons = daemons.len(), "daemon store opened");
        Ok(Self { path, cache: Mutex::new(daemons) })
    }

    fn save(&self, daemons: &[Daemon]) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(daemons)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// "daemons.json" -> "daemons.json.tmp", même répertoire (rename sur le même FS)
    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DaemonStore for JsonFileStore {
    fn list(&self) -> Result<Vec<Daemon>, RegistryError> {
        Ok(self.cache.lock().clone())
    }

    fn upsert(&self, daemon: &Daemon) -> Result<Upserted, RegistryError> {
        let mut cache = self.cache.lock();
        let mut next = cache.clone();
        let outcome = upsert_into(&mut next, daemon);
        self.save(&next)?;
        *cache = next;
        Ok(outcome)
    }

    fn delete(&self, host: &str) -> Result<(), RegistryError> {
        let mut cache = self.cache.lock();
        let mut next = cache.clone();
        delete_from(&mut next, host)?;
        self.save(&next)?;
        *cache = next;
        Ok(())
    }
}

pub struct Registry {
    store: Box<dyn DaemonStore>,
    snapshot: RwLock<Arc<[Daemon]>>,
    writes: Mutex<()>,
}

impl Registry {
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            snapshot: RwLock::new(Arc::from(Vec::new())),
            writes: Mutex::new(()),
        }
    }

    pub fn with_store<S: DaemonStore + 'static>(store: S) -> Result<Self, RegistryError> {
        let daemons = store.list()?;
        Ok(Self {
            store: Box::new(store),
            snapshot: RwLock::new(Arc::from(daemons)),
            writes: Mutex::new(()),
        })
    }

    /// Snapshot courant, dans l'ordre du registre
    pub fn list_daemons(&self) -> Arc<[Daemon]> {
        self.snapshot.read().clone()
    }

    pub fn find_by_host(&self, host: &str) -> Result<Daemon, RegistryError> {
        self.list_daemons()
            .iter()
            .find(|d| d.host == host)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(host.to_string()))
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert(&self, daemon: Daemon) -> Result<Upserted, RegistryError> {
        check(&daemon)?;
        let _guard = self.writes.lock();
        let outcome = self.store.upsert(&daemon)?;
        self.refresh()?;
        Ok(outcome)
    }

    pub fn remove(&self, host: &str) -> Result<(), RegistryError> {
        let _guard = self.writes.lock();
        self.store.delete(host)?;
        self.refresh()
    }

    /// Charge une liste externe ; tout est validé avant la première écriture
    pub fn load(&self, daemons: Vec<Daemon>) -> Result<LoadSummary, RegistryError> {
        daemons.iter().try_for_each(check)?;

        let _guard = self.writes.lock();
        let mut summary = LoadSummary::default();
        for daemon in &daemons {
            match self.store.upsert(daemon)? {
                Upserted::Created => summary.created += 1,
                Upserted::Updated => summary.updated += 1,
            }
        }
        self.refresh()?;
        info!(created = summary.created, updated = summary.updated, "daemon list loaded");
        Ok(summary)
    }

    fn refresh(&self) -> Result<(), RegistryError> {
        let daemons = self.store.list()?;
        *self.snapshot.write() = Arc::from(daemons);
        Ok(())
    }
}

fn check(daemon: &Daemon) -> Result<(), RegistryError> {
    daemon.validate().map_err(|reason| RegistryError::Invalid { host: daemon.host.clone(), reason })
}
