//! Per-request dispatch for dynamic resource types.
//!
//! Resource types defined at runtime carry their capabilities in the
//! catalog rather than in compiled-in controllers. On each invocation the
//! dispatcher fetches the type's metadata, then selects the concrete
//! controller: recipe-backed types route PUT/DELETE through the recipe
//! engine, everything else gets the inert (pure database) path. The
//! dispatcher itself is stateless; the catalog fetch is per request.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogClient, ResourceTypeMetadata};
use crate::errors::{Error, Result};
use crate::resources::{OperationMethod, ResourceId};
use crate::status::WorkRequest;

use super::inert::{InertDeleteController, InertPutController};
use super::recipe::{RecipeDeleteController, RecipePutController};
use super::{AsyncController, ControllerOptions, OperationResult};

pub struct DynamicResourceController {
    options: ControllerOptions,
}

impl DynamicResourceController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }

    async fn resource_type_metadata(
        &self,
        resource_id: &ResourceId,
    ) -> Result<ResourceTypeMetadata> {
        let catalog = self.options.catalog.as_deref().ok_or_else(|| Error::Internal {
            operation: "dispatch a dynamic resource without a catalog client".to_string(),
        })?;

        let qualified = resource_id.type_name();
        let namespace = resource_id.provider_namespace();
        let type_name = qualified
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(&qualified);

        catalog
            .get_resource_type(&resource_id.plane_scope(), namespace, type_name)
            .await
    }
}

#[async_trait]
impl AsyncController for DynamicResourceController {
    async fn run(
        &self,
        cancel: CancellationToken,
        request: &WorkRequest,
    ) -> Result<OperationResult> {
        let resource_id = ResourceId::parse(&request.resource_id)?;
        let metadata = self.resource_type_metadata(&resource_id).await?;

        let delegate: Box<dyn AsyncController> =
            match (metadata.supports_recipes(), &request.operation_type.method) {
                (true, OperationMethod::Put) => {
                    Box::new(RecipePutController::new(self.options.clone()))
                }
                (true, OperationMethod::Delete) => {
                    Box::new(RecipeDeleteController::new(self.options.clone()))
                }
                (false, OperationMethod::Put) => {
                    Box::new(InertPutController::new(self.options.clone()))
                }
                (false, OperationMethod::Delete) => {
                    Box::new(InertDeleteController::new(self.options.clone()))
                }
                _ => {
                    return Err(Error::BadRequest {
                        message: format!(
                            "unsupported operation type: {}",
                            request.operation_type
                        ),
                    });
                }
            };

        delegate.run(cancel, request).await
    }
}
