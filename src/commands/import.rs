use crate::output::UserOutput;
use anyhow::Context;
use local_nexus::registry::ImportBundle;
use local_nexus::Controller;
use std::path::Path;

pub async fn run_import(
    controller: &Controller,
    file: &Path,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading bundle {}", file.display()))?;
    let bundle: ImportBundle = serde_json::from_str(&text)
        .with_context(|| format!("parsing bundle {}", file.display()))?;
    let name = bundle.service.name.clone();

    let outcome = controller.importer.import_bundle(bundle).await?;

    for warning in &outcome.warnings {
        out.warning(warning);
    }
    out.success(&format!("Imported '{}' ({})", name, outcome.service_id));
    if let Some(database_id) = &outcome.database_id {
        out.status(&format!("  linked database {}", database_id));
    }
    Ok(())
}
