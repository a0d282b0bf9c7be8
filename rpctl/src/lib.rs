//! # rpctl: a resource-provider runtime for asynchronous operations
//!
//! `rpctl` implements the resource-provider side of the ARM-style
//! long-running-operation protocol. A client submits a mutating request
//! (create, update, delete, or a custom action) against a typed resource;
//! the runtime accepts it synchronously, persists an operation-status
//! record, enqueues a work item, and drives the work to completion in the
//! background with bounded concurrency, lease extension, per-operation
//! timeouts, retry, and cancellation. Clients poll the operation-status and
//! operation-result endpoints until the operation reaches a terminal state.
//!
//! ## Request flow
//!
//! Inbound requests pass through the context middleware
//! ([`middleware::request_context_middleware`]), which parses headers, the
//! routed path, and query parameters into a [`ctx::RequestContext`] and
//! assigns a fresh operation id. The dispatch handler resolves the
//! canonical operation type from the parsed resource id and HTTP method,
//! looks up a synchronous controller in the frontend registry, and runs it.
//! Mutating controllers persist the desired state, hand the operation to
//! the [`status::StatusManager`] (status record + queued work request,
//! atomic in effect), and answer `202 Accepted` with `Location` and
//! `Azure-AsyncOperation` polling URLs.
//!
//! The [`worker::AsyncWorker`] dequeues work requests, resolves an
//! asynchronous controller through the backend registry (dynamic resource
//! types dispatch per-request on their catalog capabilities), invokes it
//! under a cancellable context while keeping the queue lease extended, and
//! writes the terminal state to both the resource document and the
//! operation-status record.
//!
//! Storage and queueing are pluggable through the `sluice` crate: an
//! ETag-guarded object store and an at-least-once leased queue, with
//! in-memory and (feature-gated) PostgreSQL backends.

pub mod catalog;
pub mod config;
pub mod controllers;
pub mod ctx;
pub mod errors;
pub mod frontend;
pub mod middleware;
pub mod recipes;
pub mod registry;
pub mod resources;
pub mod status;
pub mod telemetry;
pub mod worker;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bon::Builder;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sluice::{InMemoryQueue, InMemoryStore, QueueClient, StoreClient};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::{CatalogClient, StaticCatalog};
use crate::controllers::{AsyncController, ControllerOptions};
use crate::controllers::dynamic::DynamicResourceController;
use crate::ctx::RequestContext;
use crate::errors::{Error, Result};
use crate::frontend::{
    AsyncDeleteController, AsyncPutController, FrontendController, GetOperationResultController,
    GetOperationStatusController, GetResourceController, ListOperationStatusesController,
    ListResourcesController,
};
use crate::middleware::RequestCtxOptions;
use crate::recipes::RecipeEngine;
use crate::registry::ControllerRegistry;
use crate::resources::{OperationMethod, OperationType};
use crate::status::StatusManager;
use crate::worker::AsyncWorker;

pub use config::Config;

/// Largest accepted request body.
const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Application state shared across request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn StoreClient>,
    pub queue: Arc<dyn QueueClient>,
    pub status_manager: StatusManager,
    pub frontend: Arc<ControllerRegistry<dyn FrontendController>>,
    pub backend: Arc<ControllerRegistry<dyn AsyncController>>,
    pub ctx_options: RequestCtxOptions,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Pluggable collaborators for [`Application::with_components`]. Anything
/// left unset falls back to the in-memory implementation (store, queue,
/// config-driven catalog) or stays absent (recipe engine).
#[derive(Default)]
pub struct Components {
    pub store: Option<Arc<dyn StoreClient>>,
    pub queue: Option<Arc<dyn QueueClient>>,
    pub catalog: Option<Arc<dyn CatalogClient>>,
    pub recipes: Option<Arc<dyn RecipeEngine>>,
}

/// Resolve the canonical operation for a request: the addressed resource
/// (actions target the id above the action segment) and the operation type
/// the registries key on.
fn resolve_operation(ctx: &RequestContext) -> Result<(RequestContext, OperationType)> {
    let resource_id = ctx.resource_id.clone().ok_or_else(|| Error::BadRequest {
        message: "the request URL is not a valid resource id".to_string(),
    })?;

    let (target, method) = match ctx.http_method.as_str() {
        "GET" => {
            let method = if resource_id.is_collection() {
                OperationMethod::List
            } else {
                OperationMethod::Get
            };
            (resource_id, method)
        }
        "PUT" => (resource_id, OperationMethod::Put),
        "PATCH" => (resource_id, OperationMethod::Patch),
        "DELETE" => (resource_id, OperationMethod::Delete),
        "POST" => {
            // Custom action: `.../{resource}/{action}`. The trailing action
            // segment parses as a nameless type segment.
            let action = resource_id
                .last_type_segment()
                .filter(|_| resource_id.is_collection())
                .map(str::to_string)
                .ok_or_else(|| Error::BadRequest {
                    message: format!("POST requires an action URL, got {resource_id}"),
                })?;
            let target = resource_id.truncate().ok_or_else(|| Error::BadRequest {
                message: format!("POST requires an action on a named resource, got {resource_id}"),
            })?;
            (target, OperationMethod::action(&action))
        }
        other => {
            return Err(Error::BadRequest {
                message: format!("unsupported HTTP method: {other}"),
            });
        }
    };

    let operation_type = OperationType::new(&target.type_name(), method);
    let mut ctx = ctx.with_operation_type(operation_type.clone());
    ctx.resource_id = Some(target);
    Ok((ctx, operation_type))
}

async fn handle_arm_request(
    state: &AppState,
    ctx: &RequestContext,
    body: axum::body::Body,
) -> Result<Response> {
    if ctx.api_version.is_empty() {
        return Err(Error::InvalidApiVersion {
            message: "the api-version query parameter is required".to_string(),
        });
    }

    let (ctx, operation_type) = resolve_operation(ctx)?;
    let controller = state
        .frontend
        .get(&operation_type)?
        .ok_or_else(|| Error::UnsupportedResourceType {
            type_name: operation_type.to_string(),
        })?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|_| Error::BadRequest {
            message: "failed to read the request body".to_string(),
        })?;
    let body = if bytes.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&bytes).map_err(|e| Error::BadRequest {
                message: format!("the request body is not valid JSON: {e}"),
            })?,
        )
    };

    controller.run(&ctx, body).await
}

/// Catch-all ARM handler. Routing is per-request through the frontend
/// registry rather than a static route table, because dynamic resource
/// types are not known at startup.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = RequestContext::require(&parts.extensions);
    match handle_arm_request(&state, &ctx, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn healthz() -> &'static str {
    "OK"
}

/// Build the HTTP router: health and metrics endpoints, and the ARM
/// surface behind the request-context middleware.
pub fn build_router(state: &AppState) -> Router {
    let mut router = Router::new().route("/healthz", get(healthz));
    if let Some(handle) = state.metrics_handle.clone() {
        router = router.route(
            "/internal/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    let arm = Router::new().fallback(dispatch).layer(
        axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_context_middleware,
        ),
    );

    router
        .merge(arm)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone())
}

/// The assembled runtime: HTTP router plus async worker over shared
/// storage and queueing.
pub struct Application {
    router: Router,
    state: AppState,
    worker: AsyncWorker,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Create an application with in-memory collaborators.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_components(config, Components::default()).await
    }

    /// Create an application with explicit collaborators (external store,
    /// queue, catalog, or recipe engine).
    pub async fn with_components(config: Config, components: Components) -> anyhow::Result<Self> {
        config.validate()?;

        let store: Arc<dyn StoreClient> = components
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let queue: Arc<dyn QueueClient> = components
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryQueue::new((&config.queue).into())));
        let catalog: Arc<dyn CatalogClient> = components
            .catalog
            .unwrap_or_else(|| Arc::new(StaticCatalog::new(config.resource_types.clone())));
        let status_manager = StatusManager::new(store.clone(), queue.clone(), &config.location);

        let base_options = {
            let builder = ControllerOptions::builder()
                .store(store.clone())
                .status_manager(status_manager.clone())
                .catalog(catalog)
                .retry_after(config.retry_after);
            match components.recipes {
                Some(recipes) => builder.recipes(recipes).build(),
                None => builder.build(),
            }
        };

        let frontend: Arc<ControllerRegistry<dyn FrontendController>> =
            Arc::new(ControllerRegistry::new());
        frontend.register_default(default_frontend_factory, base_options.clone())?;
        for namespace in &config.provider_namespaces {
            frontend.register(
                &format!("{namespace}/locations/operationStatuses"),
                OperationMethod::Get,
                |options| Ok(Arc::new(GetOperationStatusController::new(options)) as _),
                base_options.clone(),
            )?;
            frontend.register(
                &format!("{namespace}/locations/operationStatuses"),
                OperationMethod::List,
                |options| Ok(Arc::new(ListOperationStatusesController::new(options)) as _),
                base_options.clone(),
            )?;
            frontend.register(
                &format!("{namespace}/locations/operationResults"),
                OperationMethod::Get,
                |options| Ok(Arc::new(GetOperationResultController::new(options)) as _),
                base_options.clone(),
            )?;
        }

        let backend: Arc<ControllerRegistry<dyn AsyncController>> =
            Arc::new(ControllerRegistry::new());
        backend.register_default(
            |options| Ok(Arc::new(DynamicResourceController::new(options)) as _),
            base_options.clone(),
        )?;

        let metrics_handle = if config.enable_metrics {
            match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!("Failed to install metrics recorder: {e}");
                    None
                }
            }
        } else {
            None
        };

        let ctx_options = RequestCtxOptions::new(&config.path_base, &config.location);
        let state = AppState::builder()
            .config(config.clone())
            .store(store.clone())
            .queue(queue.clone())
            .status_manager(status_manager.clone())
            .frontend(frontend)
            .backend(backend.clone())
            .ctx_options(ctx_options)
            .maybe_metrics_handle(metrics_handle)
            .build();

        let router = build_router(&state);
        let worker = AsyncWorker::new(
            (&config.worker).into(),
            store,
            status_manager,
            backend,
            queue,
        );

        Ok(Self {
            router,
            state,
            worker,
            shutdown_token: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Register an asynchronous controller for a compiled-in resource type.
    pub fn register_async_controller(
        &self,
        resource_type: &str,
        method: OperationMethod,
        factory: impl Fn(ControllerOptions) -> Result<Arc<dyn AsyncController>> + Send + Sync + 'static,
    ) -> Result<()> {
        let options = ControllerOptions::builder()
            .store(self.state.store.clone())
            .status_manager(self.state.status_manager.clone())
            .retry_after(self.state.config.retry_after)
            .build();
        self.state
            .backend
            .register(resource_type, method, factory, options)
    }

    /// Spawn the async worker on the runtime.
    pub fn spawn_worker(&self) -> tokio::task::JoinHandle<Result<()>> {
        let worker = self.worker.clone();
        let token = self.shutdown_token.clone();
        tokio::spawn(async move { worker.start(token).await })
    }

    /// Signal the worker to stop; in-flight messages are left for
    /// redelivery.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Serve HTTP and the worker until `shutdown` resolves, then stop the
    /// worker and drain.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.state.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Resource provider listening on http://{bind_addr}");

        let mut worker_task = self.spawn_worker();

        let server_error: Option<anyhow::Error> = tokio::select! {
            result = axum::serve(listener, self.router.into_make_service())
                .with_graceful_shutdown(shutdown) =>
            {
                result.err().map(Into::into)
            }
            result = &mut worker_task => {
                // The worker only stops when told to; an early exit is a
                // failure worth restarting over.
                Some(match result {
                    Ok(Ok(())) => anyhow::anyhow!("async worker stopped unexpectedly"),
                    Ok(Err(e)) => anyhow::Error::new(e),
                    Err(join_error) => anyhow::anyhow!("async worker panicked: {join_error}"),
                })
            }
        };

        info!("Shutting down async worker...");
        self.shutdown_token.cancel();
        if !worker_task.is_finished() {
            let _ = worker_task.await;
        }

        if let Some(e) = server_error {
            return Err(e);
        }
        Ok(())
    }
}

fn default_frontend_factory(options: ControllerOptions) -> Result<Arc<dyn FrontendController>> {
    match options.method.clone() {
        Some(OperationMethod::Put) => Ok(Arc::new(AsyncPutController::new(options))),
        Some(OperationMethod::Delete) => Ok(Arc::new(AsyncDeleteController::new(options))),
        Some(OperationMethod::Get) => Ok(Arc::new(GetResourceController::new(options))),
        Some(OperationMethod::List) | Some(OperationMethod::ListPlaneScope) => {
            Ok(Arc::new(ListResourcesController::new(options)))
        }
        Some(method) => Err(Error::BadRequest {
            message: format!(
                "unsupported operation type: {}",
                OperationType::new(&options.resource_type, method)
            ),
        }),
        None => Err(Error::Internal {
            operation: "construct a default controller without a method".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request as HttpRequest};

    const RESOURCE: &str =
        "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/r1";

    fn ctx(method: Method, uri: &str) -> RequestContext {
        let (parts, _) = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        RequestContext::from_parts(&parts, "", "global").unwrap()
    }

    #[test]
    fn get_on_an_instance_resolves_to_get() {
        let (resolved, operation_type) = resolve_operation(&ctx(Method::GET, RESOURCE)).unwrap();
        assert_eq!(
            operation_type.to_string(),
            "APPLICATIONS.TEST/EXAMPLERESOURCES|GET"
        );
        assert_eq!(resolved.resource_id.unwrap().to_string(), RESOURCE);
    }

    #[test]
    fn get_on_a_collection_resolves_to_list() {
        let collection = RESOURCE.trim_end_matches("/r1");
        let (_, operation_type) = resolve_operation(&ctx(Method::GET, collection)).unwrap();
        assert_eq!(
            operation_type.to_string(),
            "APPLICATIONS.TEST/EXAMPLERESOURCES|LIST"
        );
    }

    #[test]
    fn put_and_delete_resolve_to_their_methods() {
        let (_, put) = resolve_operation(&ctx(Method::PUT, RESOURCE)).unwrap();
        assert_eq!(put.method, OperationMethod::Put);
        let (_, delete) = resolve_operation(&ctx(Method::DELETE, RESOURCE)).unwrap();
        assert_eq!(delete.method, OperationMethod::Delete);
    }

    #[test]
    fn post_resolves_to_an_action_on_the_parent_resource() {
        let (resolved, operation_type) =
            resolve_operation(&ctx(Method::POST, &format!("{RESOURCE}/restart"))).unwrap();
        assert_eq!(
            operation_type.to_string(),
            "APPLICATIONS.TEST/EXAMPLERESOURCES|ACTIONRESTART"
        );
        assert_eq!(resolved.resource_id.unwrap().to_string(), RESOURCE);
    }

    #[test]
    fn post_without_an_action_segment_is_rejected() {
        let err = resolve_operation(&ctx(Method::POST, RESOURCE)).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[test]
    fn unparsable_urls_are_rejected() {
        let err = resolve_operation(&ctx(Method::GET, "/not-an-arm-url")).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
