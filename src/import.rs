//! Merging [`ImportBundle`]s into the registry.

use crate::config::LOOPBACK_HOST;
use crate::error::Result;
use crate::port::PortAllocator;
use crate::registry::{ImportBundle, ImportOutcome};
use crate::state::RegistryStore;
use tracing::{debug, info, warn};

/// Upserts bundles by service name so repeated imports of the same project
/// are idempotent.
#[derive(Clone)]
pub struct Importer {
    store: RegistryStore,
    allocator: PortAllocator,
    host: String,
}

impl Importer {
    pub fn new(store: RegistryStore, allocator: PortAllocator) -> Self {
        Self {
            store,
            allocator,
            host: LOOPBACK_HOST.to_string(),
        }
    }

    /// Host used for "in use" probes and port auto-assignment.
    pub fn with_probe_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Merge one bundle.
    ///
    /// Port conflicts are advisory: they come back as warnings and the import
    /// still succeeds. The bundle's key list replaces the service's keys
    /// wholesale, so an empty list clears them. The registry writes happen in
    /// one transaction; a rejected bundle leaves the registry untouched.
    #[tracing::instrument(skip(self, bundle), fields(service = %bundle.service.name))]
    pub async fn import_bundle(&self, bundle: ImportBundle) -> Result<ImportOutcome> {
        let mut warnings = Vec::new();

        let mut service = bundle.service;
        let mut port = bundle.requested_port.or(service.port);
        if port.is_none() && bundle.auto_assign_port {
            port = Some(self.allocator.next_available_port(&self.host).await?);
        }

        if let Some(port) = port {
            if let Some(owner) = self
                .store
                .find_port_owner(port, Some(&service.name))
                .await?
            {
                warnings.push(format!(
                    "Port {} is already reserved in the registry (by '{}').",
                    port, owner.service_name
                ));
            }
            if self.allocator.is_port_in_use(&self.host, port).await {
                warnings.push(format!("Port {} appears to be in use on {}.", port, self.host));
            }
        }
        service.port = port;

        let database = if bundle.auto_create_db {
            bundle.database
        } else {
            None
        };
        let rows = self
            .store
            .apply_import(database, service, bundle.keys)
            .await?;
        let service = rows.service;
        let created = rows.created;
        let database_id = rows.database.map(|db| {
            debug!("Linked database '{}'", db.database_name);
            db.id
        });

        for warning in &warnings {
            warn!("{}", warning);
        }
        info!(
            "{} service '{}' ({})",
            if created { "Imported" } else { "Updated" },
            service.name,
            service.id
        );

        Ok(ImportOutcome {
            service_id: service.id,
            database_id,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortRange;
    use crate::port::PortProbe;
    use crate::registry::{DatabaseCreate, KeyRefCreate, ServiceCreate};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Quiet;

    #[async_trait]
    impl PortProbe for Quiet {
        async fn is_in_use(&self, _host: &str, _port: u16) -> bool {
            false
        }
    }

    async fn importer() -> (RegistryStore, Importer) {
        let store = RegistryStore::open_in_memory().await.unwrap();
        let allocator = PortAllocator::new(
            store.clone(),
            Arc::new(Quiet),
            5010,
            PortRange::new(3000, 3010).unwrap(),
        );
        (store.clone(), Importer::new(store, allocator))
    }

    #[tokio::test]
    async fn test_auto_assigns_lowest_free_port() {
        let (store, importer) = importer().await;
        let outcome = importer
            .import_bundle(ImportBundle::new(ServiceCreate::new("api")))
            .await
            .unwrap();

        let svc = store.require_service(&outcome.service_id).await.unwrap();
        assert_eq!(svc.port, Some(3000));
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_no_port_without_auto_assign() {
        let (store, importer) = importer().await;
        let mut bundle = ImportBundle::new(ServiceCreate::new("cli-tool"));
        bundle.auto_assign_port = false;

        let outcome = importer.import_bundle(bundle).await.unwrap();
        let svc = store.require_service(&outcome.service_id).await.unwrap();
        assert_eq!(svc.port, None);
    }

    #[tokio::test]
    async fn test_descriptor_port_used_as_is() {
        let (store, importer) = importer().await;
        let outcome = importer
            .import_bundle(ImportBundle::new(ServiceCreate::new("api").with_port(8080)))
            .await
            .unwrap();
        let svc = store.require_service(&outcome.service_id).await.unwrap();
        assert_eq!(svc.port, Some(8080));
    }

    #[tokio::test]
    async fn test_database_linked_only_when_auto_create() {
        let (store, importer) = importer().await;

        let mut bundle = ImportBundle::new(ServiceCreate::new("api"));
        bundle.database = Some(DatabaseCreate::new("api_db"));
        bundle.auto_create_db = false;
        let outcome = importer.import_bundle(bundle.clone()).await.unwrap();
        assert!(outcome.database_id.is_none());
        assert!(store.list_databases().await.unwrap().is_empty());

        bundle.auto_create_db = true;
        let outcome = importer.import_bundle(bundle).await.unwrap();
        let db_id = outcome.database_id.unwrap();
        let svc = store.require_service(&outcome.service_id).await.unwrap();
        assert_eq!(svc.database_id.as_deref(), Some(db_id.as_str()));
    }

    #[tokio::test]
    async fn test_keys_are_replaced() {
        let (store, importer) = importer().await;
        let mut bundle = ImportBundle::new(ServiceCreate::new("api"));
        bundle.keys = vec![
            KeyRefCreate::new("OpenAI", "OPENAI_API_KEY"),
            KeyRefCreate::new("Stripe", "STRIPE_KEY"),
        ];
        let outcome = importer.import_bundle(bundle.clone()).await.unwrap();
        assert_eq!(store.keys_for_service(&outcome.service_id).await.unwrap().len(), 2);

        bundle.keys = vec![KeyRefCreate::new("Stripe", "STRIPE_KEY")];
        importer.import_bundle(bundle).await.unwrap();
        let keys = store.keys_for_service(&outcome.service_id).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].env_var, "STRIPE_KEY");
    }
}
