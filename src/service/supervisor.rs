use super::log_tail::tail_log;
use super::process::{
    is_process_alive, log_file_path, run_command, spawn_detached, terminate_tree,
};
use super::template::{command_environment, render, requires_port};
use crate::config::{SupervisorConfig, LOOPBACK_HOST};
use crate::error::Result;
use crate::port::PortAllocator;
use crate::registry::{Service, ServiceStatus};
use crate::state::{RegistryStore, ServiceFilter};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const EMPTY_START_COMMAND: &str = "start_command is empty";
pub const MISSING_PORT: &str = "start_command requires {PORT} but service.port is not set";

/// Tail of a service's log file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceLogs {
    pub service_id: String,
    pub log_path: String,
    pub content: String,
}

/// Drives service processes through `stopped → running → stopped`.
///
/// Configuration and OS failures never escape as errors: they land on the
/// service's `status` and `last_error`, and the updated row is returned. Only
/// a missing service, a store failure, or an exhausted port range is an `Err`.
///
/// Operations on the same service are not serialized. Two concurrent starts
/// may both spawn; the last pid written wins.
#[derive(Clone)]
pub struct Supervisor {
    store: RegistryStore,
    allocator: PortAllocator,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(store: RegistryStore, allocator: PortAllocator, config: SupervisorConfig) -> Self {
        Self {
            store,
            allocator,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Reconcile persisted status with the OS and persist any change.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_status(&self, id: &str) -> Result<Service> {
        let service = self.store.require_service(id).await?;
        self.refresh(service).await
    }

    /// Refresh every service matching the category filter, then apply the
    /// status filter to the refreshed rows.
    pub async fn refresh_all(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        let listing = ServiceFilter {
            category: filter.category.clone(),
            status: None,
        };
        let mut refreshed = Vec::new();
        for service in self.store.list_services(&listing).await? {
            refreshed.push(self.refresh(service).await?);
        }
        if let Some(status) = filter.status {
            refreshed.retain(|s| s.status == status);
        }
        Ok(refreshed)
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_service(&self, id: &str) -> Result<Service> {
        let mut service = self.store.require_service(id).await?;

        if service.start_command.trim().is_empty() {
            warn!("Service '{}' has no start command", service.name);
            service.status = ServiceStatus::Error;
            service.last_error = Some(EMPTY_START_COMMAND.to_string());
            return self.store.save_service(&service).await;
        }

        let mut service = self.refresh(service).await?;
        if service.is_running() {
            debug!("Service '{}' is already running", service.name);
            return Ok(service);
        }

        if let Some(port) = service.port {
            if self.port_needs_healing(port).await {
                let new_port = self.allocator.next_available_port(LOOPBACK_HOST).await?;
                info!(
                    "Reassigning service '{}' from port {} to {}",
                    service.name, port, new_port
                );
                service.port = Some(new_port);
                service.rewrite_url_ports(port, new_port);
                service = self.store.save_service(&service).await?;
            }
        }

        if requires_port(&service.start_command) && service.port.is_none() {
            warn!("Service '{}' needs a port but has none", service.name);
            service.status = ServiceStatus::Error;
            service.last_error = Some(MISSING_PORT.to_string());
            service.process_pid = None;
            return self.store.save_service(&service).await;
        }

        let command = render(&service.start_command, service.port);
        let env = self.environment_for(&service);
        let log_path = log_file_path(&self.config.log_dir, &service.name, &service.id);

        match spawn_detached(&command, working_dir(&service), &env, &log_path).await {
            Ok(pid) => {
                info!("Started service '{}' (pid {})", service.name, pid);
                service.log_path = Some(log_path.to_string_lossy().into_owned());
                service.process_pid = Some(pid);
                service.process_started_at = Some(Utc::now());
                service.status = ServiceStatus::Running;
                service.last_error = None;
                if service.local_url.is_none() {
                    if let Some(port) = service.port {
                        service.local_url = Some(format!("http://{}:{}", LOOPBACK_HOST, port));
                    }
                }
            }
            Err(e) => {
                error!("Failed to start service '{}': {}", service.name, e);
                service.process_pid = None;
                service.status = ServiceStatus::Error;
                service.last_error = Some(format!("Failed to start: {}", e));
            }
        }

        self.store.save_service(&service).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn stop_service(&self, id: &str) -> Result<Service> {
        let service = self.store.require_service(id).await?;
        let mut service = self.refresh(service).await?;

        if !service.is_running() && service.process_pid.is_none() {
            if service.status != ServiceStatus::Stopped {
                service.status = ServiceStatus::Stopped;
                return self.store.save_service(&service).await;
            }
            return Ok(service);
        }

        if !service.stop_command.trim().is_empty() {
            let command = render(&service.stop_command, service.port);
            let env = self.environment_for(&service);
            match run_command(
                &command,
                working_dir(&service),
                &env,
                self.config.stop_command_timeout,
            )
            .await
            {
                Ok(status) if !status.success() => warn!(
                    "Stop command for '{}' exited with {}, terminating the process",
                    service.name, status
                ),
                Ok(_) => {}
                Err(e) => warn!(
                    "Stop command for '{}' failed, terminating the process instead: {}",
                    service.name, e
                ),
            }
        }

        if let Some(pid) = service.process_pid {
            if let Err(e) = terminate_tree(pid, &service.name, self.config.terminate_grace).await {
                warn!("Could not terminate '{}' (pid {}): {}", service.name, pid, e);
            }
        }

        info!("Stopped service '{}'", service.name);
        service.process_pid = None;
        service.status = ServiceStatus::Stopped;
        self.store.save_service(&service).await
    }

    /// Run the custom restart command if there is one; when there is none, or
    /// it cannot be spawned or times out, stop then start.
    ///
    /// The restart command's exit status is not inspected, and finishing it
    /// does not imply the service is running afterwards; refresh to find out.
    #[tracing::instrument(skip(self))]
    pub async fn restart_service(&self, id: &str) -> Result<Service> {
        let service = self.store.require_service(id).await?;
        let service = self.refresh(service).await?;

        if !service.restart_command.trim().is_empty() {
            let command = render(&service.restart_command, service.port);
            let env = self.environment_for(&service);
            match run_command(
                &command,
                working_dir(&service),
                &env,
                self.config.restart_command_timeout,
            )
            .await
            {
                Ok(status) => {
                    info!(
                        "Ran restart command for '{}' ({})",
                        service.name, status
                    );
                    return self.store.save_service(&service).await;
                }
                Err(e) => warn!(
                    "Restart command for '{}' failed, falling back to stop and start: {}",
                    service.name, e
                ),
            }
        }

        self.stop_service(id).await?;
        self.start_service(id).await
    }

    /// Last `lines` lines of the service's log file.
    pub async fn service_logs(&self, id: &str, lines: usize) -> Result<ServiceLogs> {
        let service = self.store.require_service(id).await?;
        let path = service
            .log_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| log_file_path(&self.config.log_dir, &service.name, &service.id));
        let content = tail_log(path.clone(), lines).await?;
        Ok(ServiceLogs {
            service_id: service.id,
            log_path: path.to_string_lossy().into_owned(),
            content,
        })
    }

    async fn refresh(&self, service: Service) -> Result<Service> {
        let (service, changed) = reconcile(service).await;
        if changed {
            debug!(
                "Service '{}' reconciled to {} (pid {:?})",
                service.name, service.status, service.process_pid
            );
            return self.store.save_service(&service).await;
        }
        Ok(service)
    }

    /// The controller's own port, or a port something else answers on while
    /// this (non-running) service holds it.
    async fn port_needs_healing(&self, port: u16) -> bool {
        port == self.config.controller_port
            || self.allocator.is_port_in_use(LOOPBACK_HOST, port).await
    }

    fn environment_for(&self, service: &Service) -> HashMap<OsString, OsString> {
        command_environment(std::env::vars_os(), service.port, &service.env_overrides)
    }
}

/// Align `status`/`process_pid` with the OS. Returns whether anything changed.
async fn reconcile(mut service: Service) -> (Service, bool) {
    let before = (service.status, service.process_pid);

    match service.process_pid {
        None => {
            if service.status == ServiceStatus::Running {
                service.status = ServiceStatus::Stopped;
            }
        }
        Some(pid) => {
            if is_process_alive(pid).await {
                service.status = ServiceStatus::Running;
            } else {
                service.process_pid = None;
                if service.status == ServiceStatus::Running {
                    service.status = ServiceStatus::Stopped;
                }
            }
        }
    }

    let changed = before != (service.status, service.process_pid);
    (service, changed)
}

fn working_dir(service: &Service) -> Option<&Path> {
    service
        .working_directory
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(Path::new)
}
