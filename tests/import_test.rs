mod common;

use common::{memory_controller, FakeProbe};
use local_nexus::registry::{
    DatabaseCreate, ImportBundle, KeyRefCreate, ServiceCreate, ServiceStatus,
};
use local_nexus::state::ServiceFilter;

fn api_bundle() -> ImportBundle {
    let mut bundle = ImportBundle::new(ServiceCreate::new("api").with_start_command("run --port {PORT}"));
    bundle.requested_port = Some(4000);
    bundle.auto_assign_port = true;
    bundle
}

#[tokio::test]
async fn test_first_import_takes_requested_port_without_warnings() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let outcome = controller.importer.import_bundle(api_bundle()).await.unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert!(outcome.database_id.is_none());

    let api = controller.store.require_service(&outcome.service_id).await.unwrap();
    assert_eq!(api.port, Some(4000));
    assert_eq!(api.status, ServiceStatus::Stopped);
}

#[tokio::test]
async fn test_second_service_on_same_port_warns_but_imports() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;
    controller.importer.import_bundle(api_bundle()).await.unwrap();

    let mut worker = ImportBundle::new(ServiceCreate::new("worker"));
    worker.requested_port = Some(4000);
    let outcome = controller.importer.import_bundle(worker).await.unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("'api'"));
    assert!(outcome.warnings[0].contains("4000"));

    let worker = controller.store.require_service(&outcome.service_id).await.unwrap();
    assert_eq!(worker.port, Some(4000));
}

#[tokio::test]
async fn test_port_in_use_on_host_warns() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[4000])).await;

    let outcome = controller.importer.import_bundle(api_bundle()).await.unwrap();
    assert_eq!(
        outcome.warnings,
        vec!["Port 4000 appears to be in use on 127.0.0.1.".to_string()]
    );
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let first = controller.importer.import_bundle(api_bundle()).await.unwrap();

    let mut changed = api_bundle();
    changed.service.description = "HTTP API".to_string();
    let second = controller.importer.import_bundle(changed).await.unwrap();

    assert_eq!(first.service_id, second.service_id);
    // Re-importing our own port is not a conflict with ourselves.
    assert!(second.warnings.is_empty());

    let services = controller
        .store
        .list_services(&ServiceFilter::default())
        .await
        .unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].description, "HTTP API");
}

#[tokio::test]
async fn test_reimport_keeps_live_state() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;
    let outcome = controller.importer.import_bundle(api_bundle()).await.unwrap();

    let mut api = controller.store.require_service(&outcome.service_id).await.unwrap();
    api.status = ServiceStatus::Error;
    api.last_error = Some("boom".to_string());
    controller.store.save_service(&api).await.unwrap();

    controller.importer.import_bundle(api_bundle()).await.unwrap();
    let api = controller.store.require_service(&outcome.service_id).await.unwrap();
    assert_eq!(api.status, ServiceStatus::Error);
    assert_eq!(api.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_empty_key_list_clears_prior_keys() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let mut bundle = api_bundle();
    bundle.keys = vec![
        KeyRefCreate::new("OpenAI", "OPENAI_API_KEY"),
        KeyRefCreate::new("Sentry", "SENTRY_DSN"),
    ];
    let outcome = controller.importer.import_bundle(bundle).await.unwrap();
    assert_eq!(
        controller
            .store
            .keys_for_service(&outcome.service_id)
            .await
            .unwrap()
            .len(),
        2
    );

    controller.importer.import_bundle(api_bundle()).await.unwrap();
    assert!(controller
        .store
        .keys_for_service(&outcome.service_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_database_upserted_by_name_and_linked() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let mut bundle = api_bundle();
    bundle.database = Some(DatabaseCreate::new("api_db"));
    let first = controller.importer.import_bundle(bundle.clone()).await.unwrap();
    let second = controller.importer.import_bundle(bundle).await.unwrap();

    assert!(first.database_id.is_some());
    assert_eq!(first.database_id, second.database_id);
    assert_eq!(controller.store.list_databases().await.unwrap().len(), 1);

    let linked = controller
        .store
        .linked_services(first.database_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].name, "api");
}

#[tokio::test]
async fn test_bundle_from_json() {
    let (_dir, controller) = memory_controller((3000, 3002), FakeProbe::with_busy(&[3000])).await;

    let bundle: ImportBundle = serde_json::from_str(
        r#"{
            "service": {"name": "web", "tags": ["vite"], "start_command": "npm run dev -- --port {PORT}"},
            "keys": [{"key_name": "Maps", "env_var": "MAPS_KEY"}],
            "meta": {"source": "folder-scan"}
        }"#,
    )
    .unwrap();
    let outcome = controller.importer.import_bundle(bundle).await.unwrap();

    let web = controller.store.require_service(&outcome.service_id).await.unwrap();
    assert_eq!(web.port, Some(3001));
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn test_env_var_is_free_form_naming() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let mut bundle = api_bundle();
    bundle.database = Some(DatabaseCreate::new("api_db"));
    bundle.keys = vec![KeyRefCreate::new("Stripe", "stripe-secret-key")];
    let outcome = controller.importer.import_bundle(bundle).await.unwrap();

    let keys = controller
        .store
        .keys_for_service(&outcome.service_id)
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].env_var, "stripe-secret-key");
}

#[tokio::test]
async fn test_rejected_bundle_writes_nothing() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let mut bundle = api_bundle();
    bundle.database = Some(DatabaseCreate::new("api_db"));
    bundle.keys = vec![
        KeyRefCreate::new("OpenAI", "OPENAI_API_KEY"),
        KeyRefCreate::new("Stripe", "  "),
    ];
    assert!(controller.importer.import_bundle(bundle).await.is_err());

    let counts = controller.store.counts().await.unwrap();
    assert_eq!(counts.services, 0);
    assert_eq!(counts.databases, 0);
    assert_eq!(counts.keys, 0);
}

#[tokio::test]
async fn test_rejected_reimport_keeps_previous_rows() {
    let (_dir, controller) = memory_controller((3000, 3999), FakeProbe::with_busy(&[])).await;

    let mut bundle = api_bundle();
    bundle.keys = vec![KeyRefCreate::new("OpenAI", "OPENAI_API_KEY")];
    let first = controller.importer.import_bundle(bundle).await.unwrap();

    let mut broken = api_bundle();
    broken.service.description = "changed".to_string();
    broken.database = Some(DatabaseCreate::new("api_db"));
    broken.keys = vec![KeyRefCreate::new("", "SENTRY_DSN")];
    assert!(controller.importer.import_bundle(broken).await.is_err());

    let api = controller.store.require_service(&first.service_id).await.unwrap();
    assert_eq!(api.description, "");
    assert!(api.database_id.is_none());
    assert!(controller.store.list_databases().await.unwrap().is_empty());
    let keys = controller.store.keys_for_service(&api.id).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].env_var, "OPENAI_API_KEY");
}
