//! Service start with an inherited environment that is not valid UTF-8.

mod common;

use common::{memory_controller, FakeProbe};
use local_nexus::registry::{ServiceCreate, ServiceStatus};
use local_nexus::service::process::is_process_alive;
use std::time::Duration;

async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..50 {
        if !is_process_alive(pid).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_non_utf8_environment_does_not_break_start() {
    use std::os::unix::ffi::OsStringExt;

    // Alone in this binary: nothing else reads the environment concurrently.
    std::env::set_var(
        "LOCAL_NEXUS_TEST_RAW_BYTES",
        std::ffi::OsString::from_vec(vec![0xff, 0xfe]),
    );

    let (_dir, controller) = memory_controller((3000, 3010), FakeProbe::with_busy(&[])).await;
    let svc = controller
        .store
        .create_service(
            ServiceCreate::new("raw-env")
                .with_start_command("printf '%s' \"$LOCAL_NEXUS_TEST_RAW_BYTES\" | wc -c"),
        )
        .await
        .unwrap();

    let started = controller.supervisor.start_service(&svc.id).await.unwrap();
    assert_eq!(started.status, ServiceStatus::Running);
    assert!(wait_until_dead(started.process_pid.unwrap()).await);

    let logs = controller.supervisor.service_logs(&svc.id, 5).await.unwrap();
    assert_eq!(logs.content.trim(), "2");

    let stopped = controller.supervisor.stop_service(&svc.id).await.unwrap();
    assert_eq!(stopped.status, ServiceStatus::Stopped);
    std::env::remove_var("LOCAL_NEXUS_TEST_RAW_BYTES");
}
