use crate::config::{Settings, LOOPBACK_HOST};
use crate::error::Result;
use crate::import::Importer;
use crate::port::{resolve_conflicts, ConflictResolution, PortAllocator, PortProbe, TcpProbe};
use crate::service::Supervisor;
use crate::state::RegistryStore;
use crate::watch::{BundleWatcher, WatcherHandle};
use std::path::PathBuf;
use std::sync::Arc;

/// The wired-up control plane: one store shared by the allocator, the
/// supervisor, and the importer.
///
/// Built once at startup and cloned into whatever needs it.
#[derive(Clone)]
pub struct Controller {
    pub settings: Settings,
    pub store: RegistryStore,
    pub allocator: PortAllocator,
    pub supervisor: Supervisor,
    pub importer: Importer,
}

impl Controller {
    /// Open the registry named by `settings` and probe ports over TCP.
    pub async fn open(settings: Settings) -> Result<Self> {
        let probe = Arc::new(TcpProbe::new(settings.supervisor_config().probe_timeout));
        Self::with_probe(settings, probe).await
    }

    pub async fn with_probe(settings: Settings, probe: Arc<dyn PortProbe>) -> Result<Self> {
        let store = RegistryStore::open(&settings.db_path).await?;
        Ok(Self::from_parts(settings, store, probe))
    }

    /// Wire components over an already opened store.
    pub fn from_parts(settings: Settings, store: RegistryStore, probe: Arc<dyn PortProbe>) -> Self {
        let allocator = PortAllocator::new(store.clone(), probe, settings.port, settings.port_range);
        let supervisor = Supervisor::new(
            store.clone(),
            allocator.clone(),
            settings.supervisor_config(),
        );
        let importer = Importer::new(store.clone(), allocator.clone());
        Self {
            settings,
            store,
            allocator,
            supervisor,
            importer,
        }
    }

    /// Refresh statuses, then repair port conflicts on the loopback host.
    pub async fn resolve_port_conflicts(&self) -> Result<ConflictResolution> {
        self.supervisor.refresh_all(&Default::default()).await?;
        resolve_conflicts(&self.store, &self.allocator, LOOPBACK_HOST).await
    }

    /// Start a bundle watcher on `folder` at the configured interval.
    pub fn watch_folder(&self, folder: impl Into<PathBuf>) -> WatcherHandle {
        BundleWatcher::new(folder, self.importer.clone(), self.settings.watch_interval).start()
    }
}
