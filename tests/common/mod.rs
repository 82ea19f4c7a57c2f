#![allow(dead_code)]

use async_trait::async_trait;
use local_nexus::config::Settings;
use local_nexus::{Controller, PortProbe, PortRange, RegistryStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A network view tests can edit: ports in the set answer TCP.
#[derive(Default)]
pub struct FakeProbe {
    busy: Mutex<HashSet<u16>>,
}

impl FakeProbe {
    pub fn with_busy(ports: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            busy: Mutex::new(ports.iter().copied().collect()),
        })
    }

    pub fn occupy(&self, port: u16) {
        self.busy.lock().insert(port);
    }

    pub fn release(&self, port: u16) {
        self.busy.lock().remove(&port);
    }
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn is_in_use(&self, _host: &str, port: u16) -> bool {
        self.busy.lock().contains(&port)
    }
}

/// Settings rooted in a fresh temp dir with the given allocation range.
pub fn settings(dir: &TempDir, range: (u16, u16)) -> Settings {
    let mut settings = Settings::defaults(dir.path());
    settings.port_range = PortRange::new(range.0, range.1).expect("valid range");
    settings.watch_interval = Duration::from_millis(50);
    settings
}

/// A controller over an on-disk registry in `dir` and a fake network.
pub async fn controller(dir: &TempDir, range: (u16, u16), probe: Arc<FakeProbe>) -> Controller {
    Controller::with_probe(settings(dir, range), probe)
        .await
        .expect("open controller")
}

/// Same, over an in-memory registry.
pub async fn memory_controller(range: (u16, u16), probe: Arc<FakeProbe>) -> (TempDir, Controller) {
    let dir = TempDir::new().expect("temp dir");
    let store = RegistryStore::open_in_memory().await.expect("open store");
    let controller = Controller::from_parts(settings(&dir, range), store, probe);
    (dir, controller)
}

