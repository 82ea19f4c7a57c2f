//! Polling import of bundle files dropped into a folder.
//!
//! Each tick scans the folder for `*.json` files it has not yet handled,
//! parses each as an [`ImportBundle`], and submits it through the same
//! [`Importer`] every other caller uses. A file is marked handled before its
//! import and un-marked if the import fails, so it is retried on the next tick.
//!
//! ```ignore
//! let handle = BundleWatcher::new("inbox", importer, Duration::from_secs(10)).start();
//! // ...
//! handle.stop().await;
//! ```

use crate::error::Result;
use crate::import::Importer;
use crate::registry::{ImportBundle, ImportOutcome};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct BundleWatcher {
    folder: PathBuf,
    importer: Importer,
    interval: Duration,
    processed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BundleWatcher {
    pub fn new(folder: impl Into<PathBuf>, importer: Importer, interval: Duration) -> Self {
        Self {
            folder: folder.into(),
            importer,
            interval,
            processed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Run one scan. Returns the outcome of every successful import.
    ///
    /// A missing folder is not an error; there is simply nothing to import.
    pub async fn scan_once(&self) -> Result<Vec<ImportOutcome>> {
        let mut outcomes = Vec::new();
        for path in self.pending_files().await? {
            if !self.processed.lock().insert(path.clone()) {
                continue;
            }
            debug!("Found new bundle file {}", path.display());

            match self.import_file(&path).await {
                Ok(outcome) => {
                    info!(
                        "Imported bundle {} as service {}",
                        path.display(),
                        outcome.service_id
                    );
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!("Failed to import bundle {}: {}", path.display(), e);
                    self.processed.lock().remove(&path);
                }
            }
        }
        Ok(outcomes)
    }

    /// Spawn the polling loop.
    pub fn start(self) -> WatcherHandle {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let task = tokio::spawn(async move {
            info!(
                "Watching {} for bundles every {:?}",
                self.folder.display(),
                self.interval
            );
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Bundle watcher for {} shutting down", self.folder.display());
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.scan_once().await {
                            warn!("Bundle watcher scan of {} failed: {}", self.folder.display(), e);
                        }
                    }
                }
            }
        });

        WatcherHandle { cancel_token, task }
    }

    async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.folder).await? {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if is_json && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn import_file(&self, path: &Path) -> Result<ImportOutcome> {
        let text = tokio::fs::read_to_string(path).await?;
        let bundle: ImportBundle = serde_json::from_str(&text)?;
        self.importer.import_bundle(bundle).await
    }
}

/// Owner of a running [`BundleWatcher`] loop.
pub struct WatcherHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Token that stops the loop when cancelled, e.g. from a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            warn!("Bundle watcher task ended abnormally: {}", e);
        }
    }

    /// Wait for the loop to exit after its token is cancelled elsewhere.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Bundle watcher task ended abnormally: {}", e);
        }
    }
}
