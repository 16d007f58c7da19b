//! API request/response models.
//!
//! Defines the JSON payloads exchanged by the HTTP API. Plugin-level wire types
//! live in `source_hub_types`.

use serde::{Deserialize, Serialize};
use source_hub_types::PluginStatus;
use utoipa::ToSchema;

/// One registered source with its latest status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SourceInfo {
    pub name: String,
    pub active: bool,
    /// Missing when the source could not report a status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PluginStatus>,
}

/// Response payload for the sources list.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SourcesResponse {
    pub active: Option<String>,
    pub sources: Vec<SourceInfo>,
}

/// Response payload for activate/deactivate.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActiveSourceResponse {
    pub active: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}
