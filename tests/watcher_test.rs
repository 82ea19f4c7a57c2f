mod common;

use common::{memory_controller, FakeProbe};
use local_nexus::BundleWatcher;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn drop_bundle(folder: &Path, file: &str, service: &str) {
    std::fs::write(
        folder.join(file),
        format!(r#"{{"service": {{"name": "{}", "start_command": "run"}}}}"#, service),
    )
    .unwrap();
}

async fn wait_for_service(controller: &local_nexus::Controller, name: &str) -> bool {
    for _ in 0..40 {
        if controller.store.find_service_by_name(name).await.unwrap().is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_watcher_imports_dropped_bundles() {
    let inbox = TempDir::new().unwrap();
    let (_dir, controller) = memory_controller((3000, 3010), FakeProbe::with_busy(&[])).await;

    let handle = controller.watch_folder(inbox.path());
    drop_bundle(inbox.path(), "api.json", "api");
    assert!(wait_for_service(&controller, "api").await);

    drop_bundle(inbox.path(), "worker.json", "worker");
    assert!(wait_for_service(&controller, "worker").await);

    handle.stop().await;
    assert_eq!(controller.store.counts().await.unwrap().services, 2);
}

#[tokio::test]
async fn test_independent_watchers_share_nothing() {
    let inbox_a = TempDir::new().unwrap();
    let inbox_b = TempDir::new().unwrap();
    let (_dir_a, a) = memory_controller((3000, 3010), FakeProbe::with_busy(&[])).await;
    let (_dir_b, b) = memory_controller((3000, 3010), FakeProbe::with_busy(&[])).await;

    let handle_a =
        BundleWatcher::new(inbox_a.path(), a.importer.clone(), Duration::from_millis(50)).start();
    let handle_b =
        BundleWatcher::new(inbox_b.path(), b.importer.clone(), Duration::from_millis(50)).start();

    drop_bundle(inbox_a.path(), "one.json", "only-in-a");
    assert!(wait_for_service(&a, "only-in-a").await);

    // Stopping one leaves the other polling.
    handle_a.stop().await;
    drop_bundle(inbox_b.path(), "two.json", "only-in-b");
    assert!(wait_for_service(&b, "only-in-b").await);
    handle_b.stop().await;

    assert!(b.store.find_service_by_name("only-in-a").await.unwrap().is_none());
    assert!(a.store.find_service_by_name("only-in-b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reimport_through_watcher_is_idempotent() {
    let inbox = TempDir::new().unwrap();
    let (_dir, controller) = memory_controller((3000, 3010), FakeProbe::with_busy(&[])).await;
    drop_bundle(inbox.path(), "api.json", "api");
    drop_bundle(inbox.path(), "api-copy.json", "api");

    let watcher = BundleWatcher::new(
        inbox.path(),
        controller.importer.clone(),
        Duration::from_secs(60),
    );
    let outcomes = watcher.scan_once().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].service_id, outcomes[1].service_id);
    assert_eq!(controller.store.counts().await.unwrap().services, 1);
}
