//! HTTP server facade for libris services with Axum, error handling, and OpenAPI support.

use std::future::Future;

use anyhow::Context;
use axum::{extract::Request, http::HeaderValue, routing::get, Json, Router};
use serde_json::json;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::{Timestamp, Uuid};

use libris_kernel::ModuleRegistry;

pub mod error;
pub mod router;

use router::RouterBuilder;

/// Identity of the service being served.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Title used in the OpenAPI document
    pub title: &'static str,
    /// Description used in the OpenAPI document
    pub description: &'static str,
    /// Message returned by `GET /`
    pub liveness_message: &'static str,
}

/// Start the HTTP server with the given module registry.
///
/// Returns once `shutdown` resolves and in-flight requests have finished.
pub async fn start_server<F>(
    registry: &ModuleRegistry,
    settings: &libris_kernel::settings::Settings,
    service: &ServiceInfo,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(
        service = service.title,
        "starting HTTP server on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Build the main router
    let app = build_router(registry, settings, service);

    // Create the server
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", settings.server.host, settings.server.port))
            .await
            .context("failed to bind to address")?;

    tracing::info!(
        "HTTP server listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    // Start serving
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    tracing::info!(service = service.title, "HTTP server stopped");
    Ok(())
}

/// Build the main HTTP router with all module routes mounted
pub fn build_router(
    registry: &ModuleRegistry,
    settings: &libris_kernel::settings::Settings,
    service: &ServiceInfo,
) -> Router {
    let mut router_builder = RouterBuilder::new();

    let message = service.liveness_message;
    router_builder = router_builder
        .route("/", get(move || async move { Json(json!({ "message": message })) }))
        .route("/healthz", get(health_check));

    // Mount module routes
    for module in registry.modules() {
        tracing::info!(module = module.name(), "mounting module routes");
        router_builder = router_builder.mount_module(module.routes());
    }

    // Add OpenAPI documentation
    router_builder = router_builder
        .with_openapi(registry, service)
        .with_not_found_fallback();

    // Global middlewares wrap everything mounted above
    router_builder
        .with_timeout(settings.server.request_timeout_ms)
        .with_request_id()
        .with_cors()
        .with_tracing()
        .build()
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Request ID generator producing time-ordered UUIDs
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let timestamp = Timestamp::now(uuid::NoContext);
        let request_id = Uuid::new_v7(timestamp)
            .to_string()
            .parse::<HeaderValue>()
            .ok()?;
        Some(RequestId::new(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
    };
    use libris_kernel::settings::Settings;
    use tower::ServiceExt;

    const SERVICE: ServiceInfo = ServiceInfo {
        title: "Test Service",
        description: "service under test",
        liveness_message: "Test service is running",
    };

    #[tokio::test]
    async fn root_returns_liveness_message() {
        let app = build_router(&ModuleRegistry::new(), &Settings::default(), &SERVICE);

        let response = app
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Test service is running");
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = build_router(&ModuleRegistry::new(), &Settings::default(), &SERVICE);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
