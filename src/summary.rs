//! Dashboard totals and the `.env.example` key listing.

use crate::config::LOOPBACK_HOST;
use crate::controller::Controller;
use crate::error::Result;
use crate::registry::ServiceStatus;
use crate::state::{RegistryStore, ServiceFilter};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub services: usize,
    pub running: usize,
    pub stopped: usize,
    pub error: usize,
    pub databases: usize,
    pub keys: usize,
    pub ports_reserved: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PortConflict,
    MissingStartCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub service_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub totals: Totals,
    pub alerts: Vec<Alert>,
}

/// Refresh every service and tally the registry.
pub async fn summarize(controller: &Controller) -> Result<Summary> {
    let services = controller
        .supervisor
        .refresh_all(&ServiceFilter::default())
        .await?;
    let counts = controller.store.counts().await?;

    let mut summary = Summary {
        totals: Totals {
            services: services.len(),
            databases: counts.databases,
            keys: counts.keys,
            ..Totals::default()
        },
        alerts: Vec::new(),
    };

    for service in &services {
        match service.status {
            ServiceStatus::Running => summary.totals.running += 1,
            ServiceStatus::Error => summary.totals.error += 1,
            ServiceStatus::Stopped => summary.totals.stopped += 1,
        }

        if let Some(port) = service.port {
            summary.totals.ports_reserved += 1;
            if !service.is_running()
                && controller.allocator.is_port_in_use(LOOPBACK_HOST, port).await
            {
                summary.alerts.push(Alert {
                    kind: AlertKind::PortConflict,
                    message: format!(
                        "Port {} is in use but {} is not running.",
                        port, service.name
                    ),
                    service_id: service.id.clone(),
                });
            }
        }

        if service.start_command.trim().is_empty() {
            summary.alerts.push(Alert {
                kind: AlertKind::MissingStartCommand,
                message: format!("{} has no start_command.", service.name),
                service_id: service.id.clone(),
            });
        }
    }

    Ok(summary)
}

/// A `.env.example` body listing every key reference by service.
///
/// Only variable names and descriptions appear; values are never stored.
pub async fn env_example(store: &RegistryStore) -> Result<String> {
    let names: HashMap<String, String> = store
        .list_services(&ServiceFilter::default())
        .await?
        .into_iter()
        .map(|s| (s.id, s.name))
        .collect();

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in store.list_keys().await? {
        let service = names
            .get(&key.service_id)
            .cloned()
            .unwrap_or_else(|| key.service_id.clone());
        let line = if key.description.trim().is_empty() {
            format!("{}= # {}", key.env_var, key.key_name)
        } else {
            format!("{}= # {} ({})", key.env_var, key.key_name, key.description)
        };
        grouped.entry(service).or_default().push(line);
    }

    let mut out = String::from("# Generated by nexus. Fill in values locally; never commit them.\n");
    for (service, lines) in grouped {
        out.push_str(&format!("\n# {}\n", service));
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}
