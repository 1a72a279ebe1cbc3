use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use super::{BrokerError, CompletionRequest, FragmentStream, ModelBroker, StreamFragment};
use crate::types::TokenUsage;

/// One scripted model response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRound {
    fragments: Vec<Result<StreamFragment, BrokerError>>,
    open_error: Option<BrokerError>,
    hang_after_fragments: bool,
    next_tool_index: usize,
}

impl ScriptedRound {
    pub fn new() -> Self {
        Self::default()
    }

    /// A round that streams `fragments` as text and nothing else.
    pub fn text<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fragments
            .into_iter()
            .fold(Self::new(), |round, fragment| round.with_text(fragment))
    }

    /// A round whose stream cannot even be opened.
    pub fn open_error(error: BrokerError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.fragments.push(Ok(StreamFragment::Text(text.into())));
        self
    }

    /// Append a tool call, streaming its arguments in two halves.
    pub fn with_tool_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> Self {
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        let json = input.to_string();
        let split = json.len() / 2;
        let split = (split..json.len())
            .find(|i| json.is_char_boundary(*i))
            .unwrap_or(json.len());

        self.fragments.push(Ok(StreamFragment::ToolCallStart {
            index,
            id: id.into(),
            name: name.into(),
        }));
        for part in [&json[..split], &json[split..]] {
            if !part.is_empty() {
                self.fragments.push(Ok(StreamFragment::ToolCallDelta {
                    index,
                    partial_json: part.to_string(),
                }));
            }
        }
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.fragments.push(Ok(StreamFragment::Usage(TokenUsage::new(
            input_tokens,
            output_tokens,
        ))));
        self
    }

    /// Fail the stream after the fragments pushed so far.
    pub fn with_error(mut self, error: BrokerError) -> Self {
        self.fragments.push(Err(error));
        self
    }

    /// Keep the stream open (never ending) after the scripted fragments.
    pub fn hanging(mut self) -> Self {
        self.hang_after_fragments = true;
        self
    }
}

/// In-process broker that replays scripted rounds in order and records every
/// request it receives.
#[derive(Clone, Default)]
pub struct ScriptedBroker {
    rounds: Arc<Mutex<VecDeque<ScriptedRound>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedBroker {
    pub fn new(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Arc::new(Mutex::new(rounds.into())),
            requests: Arc::default(),
        }
    }

    pub fn push_round(&self, round: ScriptedRound) {
        self.rounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(round);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining_rounds(&self) -> usize {
        self.rounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ModelBroker for ScriptedBroker {
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, BrokerError> {
        let round_number = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            requests.push(request);
            requests.len()
        };

        let round = self
            .rounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(BrokerError::Exhausted(round_number))?;

        if let Some(error) = round.open_error {
            return Err(error);
        }

        let scripted = stream::iter(round.fragments);
        let fragments: FragmentStream = if round.hang_after_fragments {
            Box::pin(scripted.chain(stream::pending()))
        } else {
            Box::pin(scripted)
        };
        Ok(Box::pin(fragments.take_until(cancel.cancelled_owned())))
    }
}
