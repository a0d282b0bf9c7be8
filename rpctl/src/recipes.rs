//! Recipe engine interface.
//!
//! Recipe-backed resource types delegate their mutation path to an external
//! execution engine: the engine renders the recipe for the resource, applies
//! it, and reports the infrastructure it created so the runtime can record
//! those output resources on the stored document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// What the engine needs to realize (or tear down) one resource's recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSpec {
    pub resource_id: String,
    /// Fully qualified type, e.g. `Applications.Test/recipeResources`.
    pub resource_type: String,
    /// Recipe configuration is resolved per resource group.
    pub resource_group: Option<String>,
    /// Desired-state properties from the stored resource document.
    pub properties: serde_json::Value,
}

/// Results of a successful recipe execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeOutput {
    /// Ids of the infrastructure resources the recipe created.
    #[serde(default)]
    pub output_resources: Vec<String>,
    /// Values exported by the recipe for consumers of the resource.
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait RecipeEngine: Send + Sync {
    async fn execute(&self, spec: &RecipeSpec) -> Result<RecipeOutput>;

    async fn delete(&self, spec: &RecipeSpec) -> Result<()>;
}
