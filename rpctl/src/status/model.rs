//! Operation-status record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ErrorDetails;
use crate::resources::{ProvisioningState, ResourceId};

/// Fallback location segment for managers configured without one.
pub const GLOBAL_LOCATION: &str = "global";

/// Persisted record of a single asynchronous operation's progress. This is
/// the document clients poll through the operation-status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperationStatus {
    /// Canonical operation-status resource id; see [`operation_status_id`].
    pub id: String,
    /// The operation id.
    pub name: String,
    pub status: ProvisioningState,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    /// The resource being mutated by this operation.
    pub linked_resource_id: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub home_tenant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_object_id: String,
    /// Advisory polling interval for clients, in seconds.
    pub retry_after: u64,
}

/// Compose the canonical operation-status id:
///
/// ```text
/// <planeScope>/providers/<providerNamespace>/locations/<location>/operationstatuses/<operationId>
/// ```
///
/// The provider namespace is lowercased; an empty `location` becomes
/// [`GLOBAL_LOCATION`].
pub fn operation_status_id(resource_id: &ResourceId, location: &str, operation_id: Uuid) -> String {
    let location = if location.is_empty() {
        GLOBAL_LOCATION
    } else {
        location
    };
    format!(
        "{}/providers/{}/locations/{}/operationstatuses/{}",
        resource_id.plane_scope(),
        resource_id.provider_namespace().to_lowercase(),
        location,
        operation_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_id_format_is_deterministic() {
        let resource_id = ResourceId::parse(
            "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/my-example",
        )
        .unwrap();
        let operation_id = Uuid::nil();
        assert_eq!(
            operation_status_id(&resource_id, "westus", operation_id),
            format!("/planes/radius/local/providers/applications.test/locations/westus/operationstatuses/{operation_id}")
        );
        // Empty location falls back to global.
        assert_eq!(
            operation_status_id(&resource_id, "", operation_id),
            format!("/planes/radius/local/providers/applications.test/locations/global/operationstatuses/{operation_id}")
        );
    }

    #[test]
    fn status_document_wire_shape() {
        let now = Utc::now();
        let status = AsyncOperationStatus {
            id: "/planes/radius/local/providers/applications.test/locations/global/operationstatuses/op".into(),
            name: "op".into(),
            status: ProvisioningState::Accepted,
            start_time: now,
            end_time: None,
            last_updated_time: now,
            error: None,
            linked_resource_id: "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/r".into(),
            location: "global".into(),
            home_tenant_id: String::new(),
            client_object_id: String::new(),
            retry_after: 60,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "Accepted");
        assert_eq!(json["retryAfter"], 60);
        assert!(json.get("endTime").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("homeTenantId").is_none());

        let back: AsyncOperationStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
