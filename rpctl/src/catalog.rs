//! Resource-provider catalog client.
//!
//! Dynamic resource types are not compiled in; their schemas and declared
//! capabilities come from a catalog service. The runtime only needs the
//! capability set, fetched per request by the dynamic dispatcher.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Capability advertised by resource types whose mutations are realized by
/// the recipe engine.
pub const CAPABILITY_SUPPORTS_RECIPES: &str = "SupportsRecipes";

/// Catalog metadata for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeMetadata {
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ResourceTypeMetadata {
    pub fn supports_recipes(&self) -> bool {
        self.capabilities
            .iter()
            .any(|capability| capability == CAPABILITY_SUPPORTS_RECIPES)
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch metadata for `namespace/type_name` within `plane`.
    async fn get_resource_type(
        &self,
        plane: &str,
        namespace: &str,
        type_name: &str,
    ) -> Result<ResourceTypeMetadata>;
}

/// Config-driven catalog mapping fully qualified type names (e.g.
/// `Applications.Test/exampleResources`) to capability sets. Lookups are
/// case-insensitive and ignore the plane.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, ResourceTypeMetadata>,
}

impl StaticCatalog {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(type_name, capabilities)| {
                    (type_name.to_lowercase(), ResourceTypeMetadata { capabilities })
                })
                .collect(),
        }
    }

    pub fn insert(&mut self, type_name: &str, metadata: ResourceTypeMetadata) {
        self.entries.insert(type_name.to_lowercase(), metadata);
    }
}

#[async_trait]
impl CatalogClient for StaticCatalog {
    async fn get_resource_type(
        &self,
        _plane: &str,
        namespace: &str,
        type_name: &str,
    ) -> Result<ResourceTypeMetadata> {
        let key = format!("{namespace}/{type_name}").to_lowercase();
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                resource: format!("resource type {namespace}/{type_name}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let mut catalog = StaticCatalog::default();
        catalog.insert(
            "Applications.Test/recipeResources",
            ResourceTypeMetadata {
                capabilities: vec![CAPABILITY_SUPPORTS_RECIPES.to_string()],
            },
        );

        let metadata = catalog
            .get_resource_type("radius", "applications.test", "RECIPERESOURCES")
            .await
            .unwrap();
        assert!(metadata.supports_recipes());
    }

    #[tokio::test]
    async fn missing_type_is_not_found() {
        let catalog = StaticCatalog::default();
        let err = catalog
            .get_resource_type("radius", "Applications.Test", "unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn capability_match_is_exact() {
        let metadata = ResourceTypeMetadata {
            capabilities: vec!["supportsrecipes".to_string()],
        };
        assert!(!metadata.supports_recipes());
    }
}
