use crate::cli::{DbCommands, KeysCommands};
use crate::output::UserOutput;
use local_nexus::registry::KeyRefCreate;
use local_nexus::summary::{env_example, summarize};
use local_nexus::Controller;

pub async fn run_db(
    controller: &Controller,
    cmd: &DbCommands,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let store = &controller.store;
    match cmd {
        DbCommands::List { json } => {
            let databases = store.list_databases().await?;
            if *json {
                out.raw(&serde_json::to_string_pretty(&databases)?);
            } else if databases.is_empty() {
                out.status("No databases registered.");
            } else {
                for db in databases {
                    out.status(&format!(
                        "  {:<28} {:<10} {}",
                        db.database_name,
                        db.db_type,
                        db.host.as_deref().unwrap_or("-")
                    ));
                }
            }
        }
        DbCommands::Show { database } => {
            let db = store.resolve_database(database).await?;
            let linked = store.linked_services(&db.id).await?;
            out.status(&format!("{} ({})", db.database_name, db.id));
            out.status(&format!("{:-<50}", ""));
            out.status(&format!("  type:     {}", db.db_type));
            out.status(&format!(
                "  host:     {}{}",
                db.host.as_deref().unwrap_or("-"),
                db.port.map(|p| format!(":{}", p)).unwrap_or_default()
            ));
            if let Some(user) = &db.username_env {
                out.status(&format!("  user env: {}", user));
            }
            if let Some(password) = &db.password_env {
                out.status(&format!("  pass env: {}", password));
            }
            if linked.is_empty() {
                out.status("  no linked services");
            }
            for service in linked {
                out.status(&format!("  used by:  {} ({})", service.name, service.status));
            }
        }
        DbCommands::Delete { database } => {
            let db = store.resolve_database(database).await?;
            store.delete_database(&db.id).await?;
            out.success(&format!("Deleted database '{}'", db.database_name));
        }
    }
    Ok(())
}

pub async fn run_keys(
    controller: &Controller,
    cmd: &KeysCommands,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let store = &controller.store;
    match cmd {
        KeysCommands::List { service } => {
            let keys = match service {
                Some(ident) => {
                    let service = store.resolve_service(ident).await?;
                    store.keys_for_service(&service.id).await?
                }
                None => store.list_keys().await?,
            };
            if keys.is_empty() {
                out.status("No key references recorded.");
            }
            for key in keys {
                out.status(&format!("  {}  {:<24} {}", key.id, key.env_var, key.key_name));
            }
        }
        KeysCommands::Add {
            service,
            key_name,
            env_var,
            description,
        } => {
            let service = store.resolve_service(service).await?;
            let mut payload = KeyRefCreate::new(key_name.as_str(), env_var.as_str());
            payload.description = description.clone();
            let key = store.create_key(&service.id, payload).await?;
            out.success(&format!(
                "Recorded {} for '{}' ({})",
                key.env_var, service.name, key.id
            ));
        }
        KeysCommands::Remove { id } => {
            store.delete_key(id).await?;
            out.success(&format!("Removed key reference {}", id));
        }
    }
    Ok(())
}

pub async fn run_summary(
    controller: &Controller,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let summary = summarize(controller).await?;
    if json {
        out.raw(&serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let t = &summary.totals;
    out.status(&format!(
        "Services: {} ({} running, {} stopped, {} error)",
        t.services, t.running, t.stopped, t.error
    ));
    out.status(&format!("Databases: {}", t.databases));
    out.status(&format!("Keys: {}", t.keys));
    out.status(&format!("Ports reserved: {}", t.ports_reserved));
    if !summary.alerts.is_empty() {
        out.blank();
        for alert in &summary.alerts {
            out.warning(&alert.message);
        }
    }
    Ok(())
}

pub async fn run_env_example(controller: &Controller, out: &dyn UserOutput) -> anyhow::Result<()> {
    out.raw(&env_example(&controller.store).await?);
    Ok(())
}
