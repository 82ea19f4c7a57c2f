//! Bulk repair of port reservations.
//!
//! Two kinds of conflict are fixed, in order:
//!
//! 1. Several services reserving the same port. The running one (with a pid)
//!    keeps it, otherwise the oldest; the rest move to fresh ports.
//! 2. A service that is not running whose port answers TCP on the host.
//!
//! Afterwards, front-end services built with Vite get their
//! `VITE_API_BASE_URL` override pointed at their first dependency's URL.
//!
//! Statuses are read as persisted; refresh them first for accurate results.

use super::allocator::PortAllocator;
use crate::error::Result;
use crate::registry::{Service, ServiceStatus};
use crate::state::{RegistryStore, ServiceFilter};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

pub const VITE_API_BASE_URL: &str = "VITE_API_BASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    DuplicateReservedPort,
    PortInUseOnHost,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::DuplicateReservedPort => write!(f, "duplicate_reserved_port"),
            ConflictReason::PortInUseOnHost => write!(f, "port_in_use_on_host"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortChange {
    pub service_id: String,
    pub name: String,
    pub reason: ConflictReason,
    pub old_port: u16,
    pub new_port: u16,
    pub local_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvUpdate {
    pub service_id: String,
    pub name: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub changes: Vec<PortChange>,
    pub dependent_env_updates: Vec<EnvUpdate>,
}

fn holds_live_process(service: &Service) -> bool {
    service.status == ServiceStatus::Running && service.process_pid.is_some()
}

fn by_creation(mut services: Vec<Service>) -> Vec<Service> {
    services.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
    services
}

async fn reassign(
    store: &RegistryStore,
    allocator: &PortAllocator,
    host: &str,
    mut service: Service,
    reason: ConflictReason,
) -> Result<PortChange> {
    let old_port = service.port.unwrap_or_default();
    let new_port = allocator.next_available_port(host).await?;

    service.port = Some(new_port);
    service.rewrite_url_ports(old_port, new_port);
    if service.local_url.is_none() {
        service.local_url = Some(format!("http://{}:{}", host, new_port));
    }
    let service = store.save_service(&service).await?;

    info!(
        "Moved service '{}' from port {} to {} ({})",
        service.name, old_port, new_port, reason
    );
    Ok(PortChange {
        service_id: service.id,
        name: service.name,
        reason,
        old_port,
        new_port,
        local_url: service.local_url,
    })
}

/// Reassign conflicting reservations and update dependent front-ends.
pub async fn resolve_conflicts(
    store: &RegistryStore,
    allocator: &PortAllocator,
    host: &str,
) -> Result<ConflictResolution> {
    let mut resolution = ConflictResolution::default();
    let mut moved: HashSet<String> = HashSet::new();

    // 1) duplicate reservations
    let services = by_creation(store.list_services(&ServiceFilter::default()).await?);
    let mut by_port: BTreeMap<u16, Vec<Service>> = BTreeMap::new();
    for service in services {
        if let Some(port) = service.port {
            by_port.entry(port).or_default().push(service);
        }
    }

    for owners in by_port.into_values().filter(|o| o.len() > 1) {
        let keeper_id = owners
            .iter()
            .find(|s| holds_live_process(s))
            .unwrap_or(&owners[0])
            .id
            .clone();
        for service in owners.into_iter().filter(|s| s.id != keeper_id) {
            let change = reassign(
                store,
                allocator,
                host,
                service,
                ConflictReason::DuplicateReservedPort,
            )
            .await?;
            moved.insert(change.service_id.clone());
            resolution.changes.push(change);
        }
    }

    // 2) squatted ports
    let services = by_creation(store.list_services(&ServiceFilter::default()).await?);
    for service in services {
        let Some(port) = service.port else { continue };
        if holds_live_process(&service) || moved.contains(&service.id) {
            continue;
        }
        if allocator.is_port_in_use(host, port).await {
            let change =
                reassign(store, allocator, host, service, ConflictReason::PortInUseOnHost).await?;
            resolution.changes.push(change);
        }
    }

    // 3) dependent Vite front-ends
    let services = store.list_services(&ServiceFilter::default()).await?;
    let urls: HashMap<String, Option<String>> = services
        .iter()
        .map(|s| (s.name.clone(), s.local_url.clone()))
        .collect();

    for mut service in services {
        if service.dependencies.is_empty() || !is_vite(&service) {
            continue;
        }
        let target = service
            .dependencies
            .iter()
            .find_map(|dep| urls.get(dep).cloned().flatten());
        let Some(target) = target else { continue };

        if service.env_overrides.get(VITE_API_BASE_URL) != Some(&target) {
            service
                .env_overrides
                .insert(VITE_API_BASE_URL.to_string(), target.clone());
            let service = store.save_service(&service).await?;
            resolution.dependent_env_updates.push(EnvUpdate {
                service_id: service.id,
                name: service.name,
                key: VITE_API_BASE_URL.to_string(),
                value: target,
            });
        }
    }

    Ok(resolution)
}

fn is_vite(service: &Service) -> bool {
    service
        .tech_stack
        .iter()
        .any(|t| t.eq_ignore_ascii_case("vite"))
        || service
            .tags
            .iter()
            .any(|t| t.to_ascii_lowercase().contains("vite"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vite_detection() {
        let now = chrono::Utc::now();
        let mut svc = Service {
            id: "1".into(),
            name: "web".into(),
            description: String::new(),
            category: "general".into(),
            tags: vec!["vite-app".into()],
            tech_stack: vec![],
            dependencies: vec![],
            config_paths: vec![],
            port: None,
            local_url: None,
            healthcheck_url: None,
            working_directory: None,
            start_command: String::new(),
            stop_command: String::new(),
            restart_command: String::new(),
            env_overrides: Default::default(),
            status: ServiceStatus::Stopped,
            process_pid: None,
            process_started_at: None,
            last_error: None,
            log_path: None,
            database_id: None,
            database_connection_string: None,
            database_schema_overview: None,
            created_at: now,
            updated_at: now,
        };
        assert!(is_vite(&svc));
        svc.tags.clear();
        svc.tech_stack = vec!["Vite".into()];
        assert!(is_vite(&svc));
        svc.tech_stack = vec!["react".into()];
        assert!(!is_vite(&svc));
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ConflictReason::PortInUseOnHost).unwrap();
        assert_eq!(json, "\"port_in_use_on_host\"");
        assert_eq!(
            ConflictReason::DuplicateReservedPort.to_string(),
            "duplicate_reserved_port"
        );
    }
}
