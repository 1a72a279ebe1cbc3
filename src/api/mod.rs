//! Model broker contract: one streaming completion per round.

mod mock_client;
mod stream;

pub use mock_client::{ScriptedBroker, ScriptedRound};
pub use stream::{RoundAssembler, RoundOutput, ToolCallRequest};

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolDescriptor;
use crate::types::{ApiMessage, TokenUsage};

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ApiMessage>,
    pub tools: Vec<ToolDescriptor>,
}

/// Incremental piece of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    Text(String),
    /// A tool call begins at `index`; its arguments follow as JSON deltas.
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolCallDelta {
        index: usize,
        partial_json: String,
    },
    /// Usage total for the round. A later value replaces an earlier one.
    Usage(TokenUsage),
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, BrokerError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("model transport failed: {0}")]
    Transport(String),

    #[error("model protocol error: {0}")]
    Protocol(String),

    #[error("model broker has no response for round {0}")]
    Exhausted(usize),
}

#[async_trait]
pub trait ModelBroker: Send + Sync {
    /// Open a completion stream for one round. Implementations should stop
    /// producing fragments once `cancel` fires.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, BrokerError>;
}
