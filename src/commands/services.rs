use crate::output::UserOutput;
use local_nexus::registry::{Service, ServiceStatus};
use local_nexus::state::ServiceFilter;
use local_nexus::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop,
    Restart,
    Refresh,
}

pub async fn run_list(
    controller: &Controller,
    category: Option<String>,
    status: Option<String>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let status = status
        .map(|s| s.parse::<ServiceStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;
    let services = controller
        .supervisor
        .refresh_all(&ServiceFilter { category, status })
        .await?;

    if json {
        out.raw(&serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if services.is_empty() {
        out.status("No services registered. Import one with `nexus import <bundle.json>`.");
        return Ok(());
    }

    out.status(&format!(
        "  {:<28} {:<8} {:>5}  {}",
        "NAME", "STATUS", "PORT", "URL"
    ));
    out.status(&format!("{:-<72}", ""));
    for service in &services {
        out.status(&format!(
            "{} {:<28} {:<8} {:>5}  {}",
            status_icon(service.status),
            service.name,
            service.status,
            service.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            service.local_url.as_deref().unwrap_or("")
        ));
    }
    Ok(())
}

pub async fn run_show(
    controller: &Controller,
    ident: &str,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let service = controller.store.resolve_service(ident).await?;
    let service = controller.supervisor.refresh_status(&service.id).await?;
    let keys = controller.store.keys_for_service(&service.id).await?;

    if json {
        let mut value = serde_json::to_value(&service)?;
        value["keys"] = serde_json::to_value(&keys)?;
        out.raw(&serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    describe(&service, out);
    if !keys.is_empty() {
        out.blank();
        out.status("Keys:");
        for key in keys {
            out.status(&format!("  {:<24} {}", key.env_var, key.key_name));
        }
    }
    Ok(())
}

pub async fn run_lifecycle(
    controller: &Controller,
    action: Lifecycle,
    ident: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let id = controller.store.resolve_service(ident).await?.id;
    let supervisor = &controller.supervisor;
    let service = match action {
        Lifecycle::Start => supervisor.start_service(&id).await?,
        Lifecycle::Stop => supervisor.stop_service(&id).await?,
        Lifecycle::Restart => supervisor.restart_service(&id).await?,
        Lifecycle::Refresh => supervisor.refresh_status(&id).await?,
    };

    if service.status == ServiceStatus::Error {
        let reason = service.last_error.as_deref().unwrap_or("unknown error");
        out.error(&format!("'{}' is in error: {}", service.name, reason));
        anyhow::bail!("{:?} of '{}' failed", action, service.name);
    }

    match (service.status, service.process_pid) {
        (ServiceStatus::Running, Some(pid)) => out.success(&format!(
            "'{}' is running (pid {}){}",
            service.name,
            pid,
            service
                .local_url
                .as_deref()
                .map(|u| format!(" at {}", u))
                .unwrap_or_default()
        )),
        _ => out.success(&format!("'{}' is {}", service.name, service.status)),
    }
    Ok(())
}

pub async fn run_logs(
    controller: &Controller,
    ident: &str,
    lines: usize,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let service = controller.store.resolve_service(ident).await?;
    let logs = controller.supervisor.service_logs(&service.id, lines).await?;
    if logs.content.is_empty() {
        out.status(&format!("No output yet ({})", logs.log_path));
    } else {
        out.raw(&logs.content);
    }
    Ok(())
}

pub async fn run_delete(
    controller: &Controller,
    ident: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let service = controller.store.resolve_service(ident).await?;
    let service = controller.supervisor.refresh_status(&service.id).await?;
    if service.is_running() {
        out.warning(&format!(
            "'{}' is still running (pid {}); it will keep running unsupervised",
            service.name,
            service.process_pid.unwrap_or_default()
        ));
    }
    controller.store.delete_service(&service.id).await?;
    out.success(&format!("Deleted service '{}'", service.name));
    Ok(())
}

fn status_icon(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Running => "+",
        ServiceStatus::Stopped => "o",
        ServiceStatus::Error => "x",
    }
}

fn describe(service: &Service, out: &dyn UserOutput) {
    let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    out.status(&format!("{} ({})", service.name, service.id));
    out.status(&format!("{:-<50}", ""));
    out.status(&format!("  status:      {}", service.status));
    if let Some(pid) = service.process_pid {
        out.status(&format!("  pid:         {}", pid));
    }
    if let Some(error) = &service.last_error {
        out.status(&format!("  last error:  {}", error));
    }
    out.status(&format!("  category:    {}", service.category));
    out.status(&format!(
        "  port:        {}",
        service.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
    ));
    out.status(&format!("  url:         {}", optional(&service.local_url)));
    out.status(&format!("  healthcheck: {}", optional(&service.healthcheck_url)));
    out.status(&format!("  cwd:         {}", optional(&service.working_directory)));
    out.status(&format!("  start:       {}", service.start_command));
    if !service.stop_command.is_empty() {
        out.status(&format!("  stop:        {}", service.stop_command));
    }
    if !service.restart_command.is_empty() {
        out.status(&format!("  restart:     {}", service.restart_command));
    }
    if !service.dependencies.is_empty() {
        out.status(&format!("  depends on:  {}", service.dependencies.join(", ")));
    }
    for (key, value) in &service.env_overrides {
        out.status(&format!("  env:         {}={}", key, value));
    }
    out.status(&format!("  log:         {}", optional(&service.log_path)));
}
