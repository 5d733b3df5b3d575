use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::errors::GatewayError;
use crate::messages::Message;
use crate::stream::ModelEvent;
use crate::tools::ToolDefinition;

pub type ModelEventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// Everything the model sees in one round.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ModelRequest {
    pub system: String,
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: None,
        }
    }
}

/// A streaming model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Open one streamed response. Errors returned here happen before any
    /// event was produced; failures after that arrive as `ModelEvent::Error`.
    async fn stream(
        &self,
        request: &ModelRequest,
        options: &StreamOptions,
    ) -> Result<ModelEventStream, GatewayError>;
}
