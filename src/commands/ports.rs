use crate::cli::PortsCommands;
use crate::output::UserOutput;
use local_nexus::config::{PortRange, LOOPBACK_HOST};
use local_nexus::Controller;

pub async fn run_ports(
    controller: &Controller,
    cmd: &PortsCommands,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    match cmd {
        PortsCommands::Next => {
            let port = controller.allocator.next_available_port(LOOPBACK_HOST).await?;
            out.raw(&port.to_string());
            Ok(())
        }
        PortsCommands::Map {
            start,
            end,
            busy,
            json,
        } => port_map(controller, *start, *end, *busy, *json, out).await,
        PortsCommands::Resolve { json } => resolve(controller, *json, out).await,
    }
}

async fn port_map(
    controller: &Controller,
    start: Option<u16>,
    end: Option<u16>,
    busy: bool,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let configured = controller.allocator.range();
    let range = PortRange::new(
        start.unwrap_or(configured.start),
        end.unwrap_or(configured.end),
    )?;

    let mut map = controller.allocator.port_map(LOOPBACK_HOST, Some(range)).await?;
    if busy {
        map.retain(|p| p.reserved_by_service_id.is_some() || p.in_use_on_host);
    }

    if json {
        out.raw(&serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    out.status(&format!("Ports {} on {}", range, LOOPBACK_HOST));
    out.status(&format!("{:-<50}", ""));
    let mut shown = 0;
    for info in &map {
        if info.reserved_by_service_id.is_none() && !info.in_use_on_host {
            continue;
        }
        shown += 1;
        let owner = info.reserved_by_service_name.as_deref().unwrap_or("-");
        let state = match (info.conflict, info.in_use_on_host) {
            (true, _) => "CONFLICT",
            (false, true) => "in use",
            (false, false) => "reserved",
        };
        out.status(&format!("  {:>5}  {:<10} {}", info.port, state, owner));
    }
    if shown == 0 {
        out.status("  No ports reserved or in use.");
    }
    Ok(())
}

async fn resolve(controller: &Controller, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let resolution = controller.resolve_port_conflicts().await?;

    if json {
        out.raw(&serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }

    if resolution.changes.is_empty() && resolution.dependent_env_updates.is_empty() {
        out.success("No port conflicts found.");
        return Ok(());
    }
    for change in &resolution.changes {
        out.status(&format!(
            "  {}: {} -> {} ({})",
            change.name, change.old_port, change.new_port, change.reason
        ));
    }
    for update in &resolution.dependent_env_updates {
        out.status(&format!("  {}: {}={}", update.name, update.key, update.value));
    }
    out.success(&format!(
        "Reassigned {} service(s), updated {} dependent(s)",
        resolution.changes.len(),
        resolution.dependent_env_updates.len()
    ));
    Ok(())
}
