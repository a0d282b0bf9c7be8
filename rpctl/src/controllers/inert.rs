//! Inert controllers: pure database mutations with no external side
//! effects. The desired state was already persisted by the frontend, so PUT
//! only has to confirm the document and let the completion rule advance its
//! provisioning state; DELETE removes the document.

use async_trait::async_trait;
use sluice::StoreClient;
use tokio_util::sync::CancellationToken;

use crate::errors::{codes, ErrorDetails, Result};
use crate::resources::ResourceId;
use crate::status::WorkRequest;

use super::{AsyncController, ControllerOptions, OperationResult};

pub struct InertPutController {
    options: ControllerOptions,
}

impl InertPutController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl AsyncController for InertPutController {
    async fn run(
        &self,
        _cancel: CancellationToken,
        request: &WorkRequest,
    ) -> Result<OperationResult> {
        let resource_id = ResourceId::parse(&request.resource_id)?;
        match self.options.store.get(&resource_id.to_string()).await {
            Ok(_) => Ok(OperationResult::new()),
            Err(e) if e.is_not_found() => Ok(OperationResult::new_failed(
                ErrorDetails::new(codes::NOT_FOUND, format!("{resource_id} not found"))
                    .with_target(resource_id.to_string()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct InertDeleteController {
    options: ControllerOptions,
}

impl InertDeleteController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl AsyncController for InertDeleteController {
    async fn run(
        &self,
        _cancel: CancellationToken,
        request: &WorkRequest,
    ) -> Result<OperationResult> {
        let resource_id = ResourceId::parse(&request.resource_id)?;
        match self.options.store.delete(&resource_id.to_string()).await {
            Ok(()) => Ok(OperationResult::new()),
            // Already gone: deletes are idempotent under redelivery.
            Err(e) if e.is_not_found() => Ok(OperationResult::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusManager;
    use crate::resources::{OperationMethod, OperationType};
    use serde_json::json;
    use sluice::{InMemoryQueue, InMemoryStore, StoreClient};
    use std::sync::Arc;
    use uuid::Uuid;

    const RESOURCE: &str =
        "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/r1";

    fn options() -> (Arc<InMemoryStore>, ControllerOptions) {
        let store = Arc::new(InMemoryStore::new());
        let status_manager =
            StatusManager::new(store.clone(), Arc::new(InMemoryQueue::default()), "global");
        let options = ControllerOptions::builder()
            .store(store.clone())
            .status_manager(status_manager)
            .resource_type("Applications.Test/exampleResources".to_string())
            .build();
        (store, options)
    }

    fn put_request() -> WorkRequest {
        WorkRequest {
            api_version: "2024-01-01".into(),
            operation_id: Uuid::new_v4(),
            operation_type: OperationType::new(
                "Applications.Test/exampleResources",
                OperationMethod::Put,
            ),
            resource_id: RESOURCE.into(),
            correlation_id: String::new(),
            traceparent_id: String::new(),
            accept_language: String::new(),
            home_tenant_id: String::new(),
            client_object_id: String::new(),
            operation_timeout: None,
        }
    }

    #[tokio::test]
    async fn put_succeeds_when_resource_exists() {
        let (store, options) = options();
        store
            .save(RESOURCE, &json!({"properties": {"provisioningState": "Accepted"}}), None)
            .await
            .unwrap();

        let controller = InertPutController::new(options);
        let result = controller
            .run(CancellationToken::new(), &put_request())
            .await
            .unwrap();
        assert_eq!(
            result.provisioning_state(),
            crate::resources::ProvisioningState::Succeeded
        );
    }

    #[tokio::test]
    async fn put_fails_when_resource_is_missing() {
        let (_store, options) = options();
        let controller = InertPutController::new(options);
        let result = controller
            .run(CancellationToken::new(), &put_request())
            .await
            .unwrap();
        assert_eq!(
            result.provisioning_state(),
            crate::resources::ProvisioningState::Failed
        );
        assert_eq!(result.error.unwrap().code, codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_the_document() {
        let (store, options) = options();
        store.save(RESOURCE, &json!({"properties": {}}), None).await.unwrap();

        let controller = InertDeleteController::new(options);
        let result = controller
            .run(CancellationToken::new(), &put_request())
            .await
            .unwrap();
        assert!(result.error.is_none());
        assert!(store.get(RESOURCE).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_store, options) = options();
        let controller = InertDeleteController::new(options);
        let result = controller
            .run(CancellationToken::new(), &put_request())
            .await
            .unwrap();
        assert!(result.error.is_none());
    }
}
