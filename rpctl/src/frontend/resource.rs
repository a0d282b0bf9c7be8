//! Default resource controllers: asynchronous PUT/DELETE that hand off to
//! the worker, plus synchronous GET/LIST straight from the store.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sluice::StoreClient;

use crate::controllers::ControllerOptions;
use crate::ctx::RequestContext;
use crate::errors::{Error, Result};
use crate::resources::{ProvisioningState, ResourceId};
use crate::status::QueueOperationOptions;

use super::{accepted_response, FrontendController};

fn require_resource<'a>(ctx: &'a RequestContext) -> Result<&'a ResourceId> {
    let resource_id = ctx.resource_id.as_ref().ok_or_else(|| Error::BadRequest {
        message: "the request URL is not a valid resource id".to_string(),
    })?;
    if !resource_id.is_provider_resource() {
        return Err(Error::BadRequest {
            message: format!("{resource_id} does not address a provider resource"),
        });
    }
    Ok(resource_id)
}

fn if_match<'a>(ctx: &'a RequestContext) -> Option<&'a str> {
    match ctx.if_match.as_str() {
        "" | "*" => None,
        etag => Some(etag),
    }
}

/// Accepts a desired resource state, persists it as `Accepted`, and queues
/// the asynchronous PUT.
pub struct AsyncPutController {
    options: ControllerOptions,
}

impl AsyncPutController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for AsyncPutController {
    #[tracing::instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    async fn run(&self, ctx: &RequestContext, body: Option<serde_json::Value>) -> Result<Response> {
        let resource_id = require_resource(ctx)?;
        if resource_id.is_collection() {
            return Err(Error::BadRequest {
                message: format!("PUT requires a named resource, got {resource_id}"),
            });
        }
        let mut document = body.ok_or_else(|| Error::BadRequest {
            message: "a request body is required".to_string(),
        })?;
        let root = document.as_object_mut().ok_or_else(|| Error::BadRequest {
            message: "the request body must be a JSON object".to_string(),
        })?;

        root.insert("id".to_string(), json!(resource_id.to_string()));
        root.insert("name".to_string(), json!(resource_id.name()));
        root.insert("type".to_string(), json!(resource_id.type_name()));
        let properties = root
            .entry("properties")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| Error::BadRequest {
                message: "'properties' must be a JSON object".to_string(),
            })?;
        properties.insert(
            "provisioningState".to_string(),
            json!(ProvisioningState::Accepted.as_str()),
        );

        self.options
            .store
            .save(&resource_id.to_string(), &document, if_match(ctx))
            .await
            .map_err(|e| match e {
                e if e.is_concurrency() => Error::PreconditionFailed {
                    message: format!("the If-Match condition on {resource_id} was not met"),
                },
                e => e.into(),
            })?;

        self.options
            .status_manager
            .queue_async_operation(
                ctx,
                QueueOperationOptions {
                    operation_timeout: self.options.operation_timeout,
                    retry_after: Some(self.options.retry_after),
                },
            )
            .await?;

        accepted_response(
            ctx,
            ctx.operation_id,
            self.options.retry_after.as_secs(),
            document,
        )
    }
}

/// Marks the resource as `Deleting` and queues the asynchronous DELETE.
pub struct AsyncDeleteController {
    options: ControllerOptions,
}

impl AsyncDeleteController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for AsyncDeleteController {
    #[tracing::instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    async fn run(
        &self,
        ctx: &RequestContext,
        _body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let resource_id = require_resource(ctx)?;

        let object = match self.options.store.get(&resource_id.to_string()).await {
            Ok(object) => object,
            // Nothing to delete; report success synchronously.
            Err(e) if e.is_not_found() => {
                return Ok(StatusCode::NO_CONTENT.into_response());
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(expected) = if_match(ctx) {
            if expected != object.etag {
                return Err(Error::PreconditionFailed {
                    message: format!("the If-Match condition on {resource_id} was not met"),
                });
            }
        }

        let mut document = object.data.clone();
        if let Some(properties) = document
            .get_mut("properties")
            .and_then(|p| p.as_object_mut())
        {
            properties.insert(
                "provisioningState".to_string(),
                json!(ProvisioningState::Deleting.as_str()),
            );
        }
        self.options
            .store
            .save(&resource_id.to_string(), &document, Some(&object.etag))
            .await?;

        self.options
            .status_manager
            .queue_async_operation(
                ctx,
                QueueOperationOptions {
                    operation_timeout: self.options.operation_timeout,
                    retry_after: Some(self.options.retry_after),
                },
            )
            .await?;

        accepted_response(
            ctx,
            ctx.operation_id,
            self.options.retry_after.as_secs(),
            document,
        )
    }
}

/// Serves a single resource document.
pub struct GetResourceController {
    options: ControllerOptions,
}

impl GetResourceController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for GetResourceController {
    async fn run(
        &self,
        ctx: &RequestContext,
        _body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let resource_id = require_resource(ctx)?;
        let object = self
            .options
            .store
            .get(&resource_id.to_string())
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => Error::NotFound {
                    resource: resource_id.to_string(),
                },
                e => e.into(),
            })?;
        Ok(axum::Json(object.data).into_response())
    }
}

/// Serves a resource collection, bounded by the request's `top`.
pub struct ListResourcesController {
    options: ControllerOptions,
}

impl ListResourcesController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for ListResourcesController {
    async fn run(
        &self,
        ctx: &RequestContext,
        _body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let resource_id = require_resource(ctx)?;
        if !resource_id.is_collection() {
            return Err(Error::BadRequest {
                message: format!("LIST requires a collection URL, got {resource_id}"),
            });
        }

        let prefix = format!("{resource_id}/");
        let objects = self.options.store.query(&prefix).await?;
        let value: Vec<serde_json::Value> = objects
            .into_iter()
            .take(ctx.top)
            .map(|object| object.data)
            .collect();
        Ok(axum::Json(json!({ "value": value })).into_response())
    }
}
