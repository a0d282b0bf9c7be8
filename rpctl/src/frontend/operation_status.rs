//! Operation-status and operation-result controllers.
//!
//! Clients poll these two endpoints after a `202 Accepted`. The status
//! endpoint returns the record itself for as long as it exists; the result
//! endpoint mirrors the operation outcome: `202` while running, `204` on
//! terminal success, and the recorded error (with a mapped HTTP status) on
//! terminal failure. The status collection under a location scope is also
//! listable, bounded by the request's `top`.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sluice::StoreClient;

use crate::controllers::ControllerOptions;
use crate::ctx::RequestContext;
use crate::errors::{codes, Error, ErrorDetails, ErrorResponse, Result};
use crate::resources::ResourceId;
use crate::status::AsyncOperationStatus;

use super::FrontendController;

fn require_resource<'a>(ctx: &'a RequestContext) -> Result<&'a ResourceId> {
    ctx.resource_id.as_ref().ok_or_else(|| Error::BadRequest {
        message: "the request URL is not a valid resource id".to_string(),
    })
}

/// The store key for the status record behind a status or result URL. Both
/// URL shapes differ only in the trailing collection segment; store ids are
/// compared lowercased.
fn status_record_id(resource_id: &ResourceId) -> String {
    resource_id
        .to_string()
        .to_lowercase()
        .replace("/operationresults/", "/operationstatuses/")
}

async fn load_status(
    options: &ControllerOptions,
    resource_id: &ResourceId,
) -> Result<AsyncOperationStatus> {
    let object = options
        .store
        .get(&status_record_id(resource_id))
        .await
        .map_err(|e| match e {
            e if e.is_not_found() => Error::NotFound {
                resource: resource_id.to_string(),
            },
            e => e.into(),
        })?;
    Ok(object.as_type::<AsyncOperationStatus>()?)
}

/// HTTP status carried by a failed operation's recorded error.
fn status_for_error(details: &ErrorDetails) -> StatusCode {
    match details.code.as_str() {
        codes::BAD_REQUEST
        | codes::INVALID_REQUEST_CONTENT
        | codes::INVALID_PROPERTIES
        | codes::INVALID_API_VERSION_PARAMETER
        | codes::INVALID_RESOURCE_TYPE
        | codes::PAYLOAD_VALIDATION_FAILED => StatusCode::BAD_REQUEST,
        codes::NOT_FOUND => StatusCode::NOT_FOUND,
        codes::CONFLICT | codes::OPERATION_CANCELED => StatusCode::CONFLICT,
        codes::PRECONDITION_FAILED => StatusCode::PRECONDITION_FAILED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Serves the operation-status document.
pub struct GetOperationStatusController {
    options: ControllerOptions,
}

impl GetOperationStatusController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for GetOperationStatusController {
    async fn run(
        &self,
        ctx: &RequestContext,
        _body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let resource_id = require_resource(ctx)?;
        let status = load_status(&self.options, resource_id).await?;
        Ok(axum::Json(status).into_response())
    }
}

/// Serves the operation-status records under a location scope.
pub struct ListOperationStatusesController {
    options: ControllerOptions,
}

impl ListOperationStatusesController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for ListOperationStatusesController {
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

        let prefix = format!("{}/", status_record_id(resource_id));
        let objects = self.options.store.query(&prefix).await?;
        let value: Vec<AsyncOperationStatus> = objects
            .into_iter()
            .filter_map(|object| match object.as_type::<AsyncOperationStatus>() {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::error!(id = %object.id, error = %e, "Skipping malformed operation-status record");
                    None
                }
            })
            .take(ctx.top)
            .collect();
        Ok(axum::Json(serde_json::json!({ "value": value })).into_response())
    }
}

/// Serves the operation result derived from the status record.
pub struct GetOperationResultController {
    options: ControllerOptions,
}

impl GetOperationResultController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl FrontendController for GetOperationResultController {
    async fn run(
        &self,
        ctx: &RequestContext,
        _body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let resource_id = require_resource(ctx)?;
        let status = load_status(&self.options, resource_id).await?;

        if !status.status.is_terminal() {
            let response = Response::builder()
                .status(StatusCode::ACCEPTED)
                .header("Location", ctx.original_url.clone())
                .header("Retry-After", status.retry_after.to_string())
                .body(axum::body::Body::empty())
                .map_err(|e| Error::Other(e.into()))?;
            return Ok(response);
        }

        match status.error {
            None => Ok(StatusCode::NO_CONTENT.into_response()),
            Some(details) => {
                let http_status = status_for_error(&details);
                Ok((http_status, axum::Json(ErrorResponse { error: details })).into_response())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{OperationMethod, OperationType, ProvisioningState};
    use crate::status::StatusManager;
    use axum::http::{Method, Request};
    use chrono::Utc;
    use sluice::{InMemoryQueue, InMemoryStore, StoreClient};
    use std::sync::Arc;
    use uuid::Uuid;

    const STATUS_URL: &str =
        "/planes/radius/local/providers/Applications.Test/locations/global/operationStatuses";
    const RESULT_URL: &str =
        "/planes/radius/local/providers/Applications.Test/locations/global/operationResults";

    fn options() -> (Arc<InMemoryStore>, ControllerOptions) {
        let store = Arc::new(InMemoryStore::new());
        let status_manager =
            StatusManager::new(store.clone(), Arc::new(InMemoryQueue::default()), "global");
        let options = ControllerOptions::builder()
            .store(store.clone())
            .status_manager(status_manager)
            .resource_type("Applications.Test/locations/operationStatuses".to_string())
            .build();
        (store, options)
    }

    async fn save_status(
        store: &InMemoryStore,
        operation_id: Uuid,
        state: ProvisioningState,
        error: Option<ErrorDetails>,
    ) {
        let id = format!(
            "/planes/radius/local/providers/applications.test/locations/global/operationstatuses/{operation_id}"
        );
        let now = Utc::now();
        let status = AsyncOperationStatus {
            id: id.clone(),
            name: operation_id.to_string(),
            status: state,
            start_time: now,
            end_time: state.is_terminal().then_some(now),
            last_updated_time: now,
            error,
            linked_resource_id: "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/r1".into(),
            location: "global".into(),
            home_tenant_id: String::new(),
            client_object_id: String::new(),
            retry_after: 60,
        };
        store
            .save(&id, &serde_json::to_value(&status).unwrap(), None)
            .await
            .unwrap();
    }

    fn ctx(url: &str, type_suffix: &str) -> RequestContext {
        let (parts, _) = Request::builder()
            .method(Method::GET)
            .uri(format!("{url}?api-version=2024-01-01"))
            .body(())
            .unwrap()
            .into_parts();
        RequestContext::from_parts(&parts, "", "global")
            .unwrap()
            .with_operation_type(OperationType::new(
                &format!("Applications.Test/locations/{type_suffix}"),
                OperationMethod::Get,
            ))
    }

    #[tokio::test]
    async fn status_endpoint_serves_the_record() {
        let (store, options) = options();
        let operation_id = Uuid::new_v4();
        save_status(&store, operation_id, ProvisioningState::Accepted, None).await;

        let controller = GetOperationStatusController::new(options);
        let response = controller
            .run(&ctx(&format!("{STATUS_URL}/{operation_id}"), "operationStatuses"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "Accepted");
        assert_eq!(json["name"], operation_id.to_string());
    }

    #[tokio::test]
    async fn missing_status_is_not_found() {
        let (_store, options) = options();
        let controller = GetOperationStatusController::new(options);
        let err = controller
            .run(
                &ctx(&format!("{STATUS_URL}/{}", Uuid::new_v4()), "operationStatuses"),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_collection_is_listable() {
        let (store, options) = options();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        save_status(&store, first, ProvisioningState::Accepted, None).await;
        save_status(&store, second, ProvisioningState::Succeeded, None).await;
        // Documents outside the status scope stay out of the listing.
        store
            .save(
                "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/r1",
                &serde_json::json!({"properties": {}}),
                None,
            )
            .await
            .unwrap();

        let controller = ListOperationStatusesController::new(options);
        let response = controller
            .run(&ctx(STATUS_URL, "operationStatuses"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let value = json["value"].as_array().unwrap();
        assert_eq!(value.len(), 2);
        let names: Vec<&str> = value.iter().map(|s| s["name"].as_str().unwrap()).collect();
        assert!(names.contains(&first.to_string().as_str()));
        assert!(names.contains(&second.to_string().as_str()));
    }

    #[tokio::test]
    async fn status_listing_is_bounded_by_top() {
        let (store, options) = options();
        for _ in 0..12 {
            save_status(&store, Uuid::new_v4(), ProvisioningState::Accepted, None).await;
        }

        let (parts, _) = Request::builder()
            .method(Method::GET)
            .uri(format!("{STATUS_URL}?api-version=2024-01-01&top=5"))
            .body(())
            .unwrap()
            .into_parts();
        let ctx = RequestContext::from_parts(&parts, "", "global")
            .unwrap()
            .with_operation_type(OperationType::new(
                "Applications.Test/locations/operationStatuses",
                OperationMethod::List,
            ));

        let controller = ListOperationStatusesController::new(options);
        let response = controller.run(&ctx, None).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["value"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn listing_an_instance_url_is_rejected() {
        let (_store, options) = options();
        let controller = ListOperationStatusesController::new(options);
        let err = controller
            .run(
                &ctx(&format!("{STATUS_URL}/{}", Uuid::new_v4()), "operationStatuses"),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn running_operation_result_is_accepted() {
        let (store, options) = options();
        let operation_id = Uuid::new_v4();
        save_status(&store, operation_id, ProvisioningState::Provisioning, None).await;

        let controller = GetOperationResultController::new(options);
        let response = controller
            .run(&ctx(&format!("{RESULT_URL}/{operation_id}"), "operationResults"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["Retry-After"], "60");
    }

    #[tokio::test]
    async fn succeeded_operation_result_is_no_content() {
        let (store, options) = options();
        let operation_id = Uuid::new_v4();
        save_status(&store, operation_id, ProvisioningState::Succeeded, None).await;

        let controller = GetOperationResultController::new(options);
        let response = controller
            .run(&ctx(&format!("{RESULT_URL}/{operation_id}"), "operationResults"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn failed_operation_result_serves_the_recorded_error() {
        let (store, options) = options();
        let operation_id = Uuid::new_v4();
        save_status(
            &store,
            operation_id,
            ProvisioningState::Failed,
            Some(ErrorDetails::new(codes::INTERNAL, "recipe engine exploded")),
        )
        .await;

        let controller = GetOperationResultController::new(options);
        let response = controller
            .run(&ctx(&format!("{RESULT_URL}/{operation_id}"), "operationResults"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "Internal");
    }

    #[tokio::test]
    async fn canceled_operation_result_maps_to_conflict() {
        let (store, options) = options();
        let operation_id = Uuid::new_v4();
        save_status(
            &store,
            operation_id,
            ProvisioningState::Canceled,
            Some(ErrorDetails::new(codes::OPERATION_CANCELED, "timed out")),
        )
        .await;

        let controller = GetOperationResultController::new(options);
        let response = controller
            .run(&ctx(&format!("{RESULT_URL}/{operation_id}"), "operationResults"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
