//! OpenAI-compatible model listing

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::VertexConfig;

/// Model IDs served when none are configured
pub const DEFAULT_MODEL_IDS: &[&str] = &[
    "google/gemini-2.5-pro-preview-03-25",
    "google/gemini-2.5-flash-preview-04-17",
];

/// One entry of `GET /v1/models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model ID
    pub id: String,
    /// Always `"model"`
    pub object: String,
    /// Unix timestamp of the listing
    pub created: i64,
    /// Always `"google"`
    pub owned_by: String,
}

/// Body of `GET /v1/models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelList {
    /// Always `"list"`
    pub object: String,
    /// Listed models
    pub data: Vec<Model>,
}

/// Resolved set of advertised model IDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    ids: Vec<String>,
}

impl ModelCatalog {
    /// Resolve the advertised IDs from configuration
    pub fn from_config(vertex: &VertexConfig) -> Self {
        let defaults = || DEFAULT_MODEL_IDS.iter().map(ToString::to_string).collect::<Vec<_>>();

        let Some(raw) = &vertex.available_models else {
            let ids = defaults();
            info!(using_default_models = ?ids, "VERTEXAI_AVAILABLE_MODELS not set");
            return Self { ids };
        };

        let ids: Vec<String> = raw
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();

        if ids.is_empty() {
            let ids = defaults();
            warn!(configured = ?raw, using_default_models = ?ids, "VERTEXAI_AVAILABLE_MODELS set but empty");
            return Self { ids };
        }

        info!(models = ?ids, "Using custom models");
        Self { ids }
    }

    /// Advertised IDs in order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Listing stamped with the current time
    pub fn list(&self) -> ModelList {
        let created = Utc::now().timestamp();
        ModelList {
            object: "list".to_string(),
            data: self
                .ids
                .iter()
                .map(|id| Model {
                    id: id.clone(),
                    object: "model".to_string(),
                    created,
                    owned_by: "google".to_string(),
                })
                .collect(),
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::from_config(&VertexConfig::default())
    }
}
