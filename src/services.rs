//! Composition roots for the two libris services.
//!
//! Every collaborator is built here and handed to the modules that use it;
//! nothing is reached through global state.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use libris_db::DbModule;
use libris_events::{AmqpPublisher, AmqpSubscriber, EventsModule};
use libris_http::ServiceInfo;
use libris_index::{ElasticIndex, IndexModule};
use libris_kernel::{settings::Settings, InitCtx, ModuleRegistry};

use crate::modules::catalog::{CatalogConfig, CatalogModule, CatalogService, MongoCatalogStore};
use crate::modules::search::{
    CoreApiClient, IndexConsumer, ReindexReport, SearchModule, SearchService,
};

pub const CORE_SERVICE: ServiceInfo = ServiceInfo {
    title: "Library Core Service",
    description: "Books and authors with creation events",
    liveness_message: "Core Service is running!",
};

pub const SEARCH_SERVICE: ServiceInfo = ServiceInfo {
    title: "Library Search Service",
    description: "Full-text search over the library catalog",
    liveness_message: "Search Service is ready!",
};

/// A fully wired service, ready to [`run`].
pub struct Service {
    pub registry: ModuleRegistry,
    pub info: ServiceInfo,
}

/// Core API: document store, event publisher and the catalog module.
pub async fn core_service(settings: &Settings) -> anyhow::Result<Service> {
    let db = DbModule::connect(&settings.database)
        .await
        .context("failed to configure the document store")?;
    let publisher = Arc::new(AmqpPublisher::new(settings.broker.url.clone()));

    let store = MongoCatalogStore::new(&db.database());
    let catalog = CatalogService::new(
        Arc::new(store),
        publisher.clone(),
        CatalogConfig::from_settings(&settings.broker, &settings.catalog),
    );

    let mut registry = ModuleRegistry::new();
    registry.register_core(Arc::new(db));
    registry.register_core(Arc::new(EventsModule::new(publisher)));
    registry.register_custom(Arc::new(CatalogModule::new(Arc::new(catalog))));

    Ok(Service {
        registry,
        info: CORE_SERVICE,
    })
}

fn search_components(settings: &Settings) -> anyhow::Result<(Arc<ElasticIndex>, SearchService)> {
    let index = Arc::new(
        ElasticIndex::new(&settings.search.url).context("failed to configure the search index")?,
    );
    let core_api =
        CoreApiClient::new(&settings.core_api.base_url).context("failed to configure the core api client")?;
    let service = SearchService::new(index.clone(), Arc::new(core_api));
    Ok((index, service))
}

/// Search API: index client, event subscription and the search module.
pub fn search_service(settings: &Settings) -> anyhow::Result<Service> {
    let (index, service) = search_components(settings)?;
    let subscriber = AmqpSubscriber::new(settings.broker.url.clone());

    let mut registry = ModuleRegistry::new();
    registry.register_core(Arc::new(IndexModule::new(index.clone())));
    registry.register_custom(Arc::new(SearchModule::new(
        Arc::new(service),
        Arc::new(subscriber),
        IndexConsumer::new(index),
    )));

    Ok(Service {
        registry,
        info: SEARCH_SERVICE,
    })
}

/// Start every module, serve HTTP until `shutdown` resolves, then stop the
/// modules in reverse order.
pub async fn run<F>(service: Service, settings: &Settings, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ctx = InitCtx { settings };
    service.registry.start_all(&ctx).await?;

    let served =
        libris_http::start_server(&service.registry, settings, &service.info, shutdown).await;

    if let Err(error) = service.registry.stop_all().await {
        tracing::error!(%error, "module shutdown failed");
    }
    served
}

/// Rebuild the search indices from the core API once, without serving.
pub async fn reindex_once(settings: &Settings) -> anyhow::Result<ReindexReport> {
    let (_, service) = search_components(settings)?;
    service.reindex().await.context("reindex failed")
}
