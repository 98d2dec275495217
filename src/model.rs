//! Language-model invocation seam.
//!
//! The planning core never calls a model; model-backed pipeline stages
//! receive a `ModelInvoker` and treat replies as opaque text.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parameters for a single model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl ModelConfig {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl ModelReply {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            model: None,
        }
    }
}

/// A language-model backend.
///
/// Implementations map their transport failures to `Error::Model`.
pub trait ModelInvoker: Send + Sync {
    fn invoke<'a>(&'a self, prompt: &'a str, config: &'a ModelConfig) -> BoxFuture<'a, Result<ModelReply>>;
}
