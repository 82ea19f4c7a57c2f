use super::probe::PortProbe;
use crate::config::PortRange;
use crate::error::{Error, Result};
use crate::registry::ServiceStatus;
use crate::state::{PortReservation, RegistryStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Concurrent probes while building a port map. Results keep range order.
const PORT_MAP_CONCURRENCY: usize = 32;

/// One row of the diagnostic port map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub port: u16,
    pub reserved_by_service_id: Option<String>,
    pub reserved_by_service_name: Option<String>,
    pub in_use_on_host: bool,
    /// Reserved, in use, and the reserving service is not running: something
    /// else is squatting on the port.
    pub conflict: bool,
}

/// Hands out ports that are neither reserved in the registry, nor the
/// controller's own port, nor answering TCP on the probe host.
#[derive(Clone)]
pub struct PortAllocator {
    store: RegistryStore,
    probe: Arc<dyn PortProbe>,
    controller_port: u16,
    range: PortRange,
}

impl PortAllocator {
    pub fn new(
        store: RegistryStore,
        probe: Arc<dyn PortProbe>,
        controller_port: u16,
        range: PortRange,
    ) -> Self {
        Self {
            store,
            probe,
            controller_port,
            range,
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn controller_port(&self) -> u16 {
        self.controller_port
    }

    /// The controller's own port plus every port recorded on a service.
    pub async fn reserved_ports(&self) -> Result<BTreeSet<u16>> {
        let mut reserved: BTreeSet<u16> = self
            .store
            .service_ports()
            .await?
            .into_iter()
            .map(|r| r.port)
            .collect();
        reserved.insert(self.controller_port);
        Ok(reserved)
    }

    pub async fn is_port_in_use(&self, host: &str, port: u16) -> bool {
        self.probe.is_in_use(host, port).await
    }

    /// Lowest port in the configured range that is free.
    pub async fn next_available_port(&self, host: &str) -> Result<u16> {
        self.next_available_port_in(host, self.range).await
    }

    /// Lowest free port in `range`, scanning in ascending order.
    pub async fn next_available_port_in(&self, host: &str, range: PortRange) -> Result<u16> {
        let reserved = self.reserved_ports().await?;
        for port in range.iter() {
            if reserved.contains(&port) {
                continue;
            }
            if self.probe.is_in_use(host, port).await {
                debug!("Port {} is answering on {}, skipping", port, host);
                continue;
            }
            debug!("Allocated port {} from range {}", port, range);
            return Ok(port);
        }
        Err(Error::PortRangeExhausted {
            start: range.start,
            end: range.end,
        })
    }

    /// One record per port in `range` (default: the configured range).
    pub async fn port_map(&self, host: &str, range: Option<PortRange>) -> Result<Vec<PortInfo>> {
        let range = range.unwrap_or(self.range);

        // First reservation by creation order wins when several services share a port.
        let mut owners: HashMap<u16, PortReservation> = HashMap::new();
        for reservation in self.store.service_ports().await? {
            owners.entry(reservation.port).or_insert(reservation);
        }

        let probe = Arc::clone(&self.probe);
        let in_use: Vec<bool> = stream::iter(range.iter())
            .map(|port| {
                let probe = Arc::clone(&probe);
                let host = host.to_string();
                async move { probe.is_in_use(&host, port).await }
            })
            .buffered(PORT_MAP_CONCURRENCY)
            .collect()
            .await;

        Ok(range
            .iter()
            .zip(in_use)
            .map(|(port, in_use_on_host)| {
                let owner = owners.get(&port);
                let conflict = in_use_on_host
                    && owner.is_some_and(|o| o.status != ServiceStatus::Running);
                PortInfo {
                    port,
                    reserved_by_service_id: owner.map(|o| o.service_id.clone()),
                    reserved_by_service_name: owner.map(|o| o.service_name.clone()),
                    in_use_on_host,
                    conflict,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceCreate;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct BusyPorts(HashSet<u16>);

    #[async_trait]
    impl PortProbe for BusyPorts {
        async fn is_in_use(&self, _host: &str, port: u16) -> bool {
            self.0.contains(&port)
        }
    }

    async fn allocator_with(busy: &[u16], range: (u16, u16)) -> (RegistryStore, PortAllocator) {
        let store = RegistryStore::open_in_memory().await.unwrap();
        let probe = Arc::new(BusyPorts(busy.iter().copied().collect()));
        let allocator = PortAllocator::new(
            store.clone(),
            probe,
            5010,
            PortRange::new(range.0, range.1).unwrap(),
        );
        (store, allocator)
    }

    #[tokio::test]
    async fn test_reserved_ports_include_controller_port() {
        let (store, allocator) = allocator_with(&[], (3000, 3010)).await;
        store
            .create_service(ServiceCreate::new("api").with_port(3001))
            .await
            .unwrap();

        let reserved = allocator.reserved_ports().await.unwrap();
        assert_eq!(reserved, BTreeSet::from([3001, 5010]));
    }

    #[tokio::test]
    async fn test_controller_port_never_allocated() {
        let (_store, allocator) = allocator_with(&[], (5010, 5011)).await;
        assert_eq!(allocator.next_available_port("127.0.0.1").await.unwrap(), 5011);
    }

    #[tokio::test]
    async fn test_port_map_flags_squatted_reservations() {
        let (store, allocator) = allocator_with(&[3000, 3001], (3000, 3002)).await;
        store
            .create_service(ServiceCreate::new("api").with_port(3000))
            .await
            .unwrap();

        let map = allocator.port_map("127.0.0.1", None).await.unwrap();
        assert_eq!(map.len(), 3);

        assert_eq!(map[0].reserved_by_service_name.as_deref(), Some("api"));
        assert!(map[0].in_use_on_host);
        assert!(map[0].conflict);

        // In use but unreserved is not a conflict.
        assert!(map[1].in_use_on_host);
        assert!(!map[1].conflict);

        assert!(!map[2].in_use_on_host);
        assert!(map[2].reserved_by_service_id.is_none());
    }
}
