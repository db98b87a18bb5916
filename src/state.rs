use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// One service started by `up`, as recorded for `stop` and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedService {
    pub name: String,
    pub pid: u32,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SupervisorState {
    #[serde(default)]
    pub services: Vec<ManagedService>,
}

/// Registry of running service processes, persisted as TOML under
/// `.sentimesh/state/`. Every rewrite holds an exclusive flock on the
/// registry file itself and goes read-modify-write through one handle, so
/// two supervisor invocations cannot lose each other's pids.
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Default state directory relative to the working directory.
    pub fn default_dir(root: &Path) -> PathBuf {
        root.join(".sentimesh").join("state")
    }

    fn registry_file(&self) -> PathBuf {
        self.state_dir.join("supervisor.toml")
    }

    /// Read the registry without taking the lock. Good enough for readers
    /// like `stop`; anything that rewrites entries goes through
    /// `with_registry`.
    pub fn load(&self) -> SupervisorState {
        let path = self.registry_file();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SupervisorState::default();
            }
            Err(e) => {
                warn!(
                    "cannot read service registry {}: {e}, treating as empty",
                    path.display()
                );
                return SupervisorState::default();
            }
        };
        parse_registry(&path, &content)
    }

    /// Lock the registry file, apply `f` to its current contents, and write
    /// the result back through the same locked handle. The flock drops when
    /// the handle does.
    fn with_registry<T>(&self, f: impl FnOnce(&mut SupervisorState) -> T) -> Result<T> {
        std::fs::create_dir_all(&self.state_dir)
            .map_err(|e| Error::State(format!("supervisor state dir unavailable: {e}")))?;

        let path = self.registry_file();
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                Error::State(format!(
                    "cannot open service registry {}: {e}",
                    path.display()
                ))
            })?;

        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
            return Err(Error::State(format!(
                "flock on service registry failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| Error::State(format!("cannot read service registry: {e}")))?;
        let mut state = parse_registry(&path, &content);

        let out = f(&mut state);

        let rendered = toml::to_string(&state)
            .map_err(|e| Error::State(format!("cannot serialize service registry: {e}")))?;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|_| file.write_all(rendered.as_bytes()))
            .map_err(|e| Error::State(format!("cannot rewrite service registry: {e}")))?;

        Ok(out)
    }

    /// Replace the recorded service set.
    pub fn record_services(&self, services: Vec<ManagedService>) -> Result<()> {
        self.with_registry(|state| state.services = services)
    }

    /// Drop entries whose pid no longer belongs to a live process and
    /// return what survives. A supervisor that died without cleanup leaves
    /// stale pids behind; pruning runs under the lock so a concurrent `up`
    /// or `stop` never acts on entries that are already gone.
    pub fn reconcile(&self, is_alive: impl Fn(u32) -> bool) -> Result<Vec<ManagedService>> {
        self.with_registry(|state| {
            let before = state.services.len();
            state.services.retain(|service| is_alive(service.pid));
            let pruned = before - state.services.len();
            if pruned > 0 {
                warn!("dropped {pruned} stale service entries from the registry");
            }
            state.services.clone()
        })
    }

    /// Forget every recorded service.
    pub fn clear(&self) -> Result<()> {
        self.with_registry(|state| state.services.clear())
    }
}

fn parse_registry(path: &Path, content: &str) -> SupervisorState {
    if content.trim().is_empty() {
        return SupervisorState::default();
    }
    match toml::from_str(content) {
        Ok(state) => state,
        Err(e) => {
            warn!(
                "service registry {} is corrupt ({e}), starting over",
                path.display()
            );
            SupervisorState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, StateManager) {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = StateManager::new(tmp.path().join("state"));
        (tmp, mgr)
    }

    fn service(name: &str, pid: u32, port: u16) -> ManagedService {
        ManagedService {
            name: name.to_string(),
            pid,
            port,
        }
    }

    #[test]
    fn test_load_missing_returns_default() {
        let (_tmp, mgr) = manager();
        assert_eq!(mgr.load(), SupervisorState::default());
    }

    #[test]
    fn test_record_and_load_roundtrip() {
        let (_tmp, mgr) = manager();
        let services = vec![
            service("quality", 100, 8001),
            service("coordinator", 101, 8000),
        ];
        mgr.record_services(services.clone()).unwrap();

        let state = mgr.load();
        assert_eq!(state.services, services);
    }

    #[test]
    fn test_record_replaces_previous() {
        let (_tmp, mgr) = manager();
        mgr.record_services(vec![service("quality", 100, 8001)])
            .unwrap();
        mgr.record_services(vec![service("technical", 200, 8005)])
            .unwrap();

        let state = mgr.load();
        assert_eq!(state.services.len(), 1);
        assert_eq!(state.services[0].name, "technical");
    }

    #[test]
    fn test_rewrite_shrinks_file() {
        // A shorter registry must fully replace a longer one, with no
        // trailing bytes from the previous contents.
        let (_tmp, mgr) = manager();
        mgr.record_services(vec![
            service("quality", 100, 8001),
            service("experience", 101, 8002),
            service("coordinator", 102, 8000),
        ])
        .unwrap();
        mgr.record_services(vec![service("quality", 100, 8001)])
            .unwrap();

        let state = mgr.load();
        assert_eq!(state.services.len(), 1);
    }

    #[test]
    fn test_clear() {
        let (_tmp, mgr) = manager();
        mgr.record_services(vec![service("quality", 100, 8001)])
            .unwrap();
        mgr.clear().unwrap();
        assert!(mgr.load().services.is_empty());
    }

    #[test]
    fn test_reconcile_prunes_dead_pids() {
        let (_tmp, mgr) = manager();
        mgr.record_services(vec![
            service("quality", 111, 8001),
            service("technical", 222, 8005),
            service("coordinator", 333, 8000),
        ])
        .unwrap();

        let survivors = mgr.reconcile(|pid| pid == 222).unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].name, "technical");
        // the pruning is persisted
        assert_eq!(mgr.load().services, survivors);
    }

    #[test]
    fn test_reconcile_keeps_all_live() {
        let (_tmp, mgr) = manager();
        let services = vec![service("quality", 111, 8001), service("business", 222, 8004)];
        mgr.record_services(services.clone()).unwrap();

        let survivors = mgr.reconcile(|_| true).unwrap();
        assert_eq!(survivors, services);
    }

    #[test]
    fn test_reconcile_empty_registry() {
        let (_tmp, mgr) = manager();
        assert!(mgr.reconcile(|_| true).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_registry_starts_over() {
        let (_tmp, mgr) = manager();
        std::fs::create_dir_all(mgr.state_dir.clone()).unwrap();
        std::fs::write(mgr.registry_file(), "not [valid toml").unwrap();
        assert_eq!(mgr.load(), SupervisorState::default());
        // a write through the lock replaces the corrupt contents
        mgr.record_services(vec![service("quality", 100, 8001)])
            .unwrap();
        assert_eq!(mgr.load().services.len(), 1);
    }

    #[test]
    fn test_empty_registry_file_is_default() {
        let (_tmp, mgr) = manager();
        std::fs::create_dir_all(mgr.state_dir.clone()).unwrap();
        std::fs::write(mgr.registry_file(), "").unwrap();
        assert_eq!(mgr.load(), SupervisorState::default());
    }

    #[test]
    fn test_default_dir() {
        let dir = StateManager::default_dir(Path::new("/work"));
        assert_eq!(dir, PathBuf::from("/work/.sentimesh/state"));
    }
}
