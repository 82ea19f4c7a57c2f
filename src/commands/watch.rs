use crate::output::UserOutput;
use local_nexus::watch::BundleWatcher;
use local_nexus::Controller;
use std::path::PathBuf;
use std::time::Duration;

/// Poll `folder` for bundles until Ctrl+C.
pub async fn run_watch(
    controller: &Controller,
    folder: PathBuf,
    interval: Option<u64>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let interval = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or(controller.settings.watch_interval);

    out.status(&format!(
        "Watching {} every {}s for bundle files (Ctrl+C to stop)",
        folder.display(),
        interval.as_secs()
    ));
    let handle = BundleWatcher::new(folder, controller.importer.clone(), interval).start();

    tokio::signal::ctrl_c().await?;
    out.blank();
    out.status("Stopping watcher...");
    handle.stop().await;
    Ok(())
}
