use serde_json::Value;
use tracing::warn;

use super::StreamFragment;
use crate::types::TokenUsage;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Everything one round produced once its stream has ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundOutput {
    pub text_fragments: Vec<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

impl RoundOutput {
    pub fn text(&self) -> String {
        self.text_fragments.concat()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

struct PendingToolCall {
    id: String,
    name: String,
    input_json: String,
}

/// Buffers a round's fragments until the outcome (tool calls or not) is known.
#[derive(Default)]
pub struct RoundAssembler {
    text_fragments: Vec<String>,
    tool_calls: Vec<Option<PendingToolCall>>,
    usage: TokenUsage,
}

impl RoundAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: StreamFragment) {
        match fragment {
            StreamFragment::Text(text) => {
                if !text.is_empty() {
                    self.text_fragments.push(text);
                }
            }
            StreamFragment::ToolCallStart { index, id, name } => {
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(None);
                }
                self.tool_calls[index] = Some(PendingToolCall {
                    id,
                    name,
                    input_json: String::new(),
                });
            }
            StreamFragment::ToolCallDelta {
                index,
                partial_json,
            } => match self.tool_calls.get_mut(index) {
                Some(Some(call)) => call.input_json.push_str(&partial_json),
                _ => warn!(index, "tool call delta for unknown index dropped"),
            },
            StreamFragment::Usage(usage) => self.usage = usage,
        }
    }

    pub fn finish(self) -> RoundOutput {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .flatten()
            .map(|call| ToolCallRequest {
                input: parse_tool_input(&call.name, &call.input_json),
                id: call.id,
                name: call.name,
            })
            .collect();

        RoundOutput {
            text_fragments: self.text_fragments,
            tool_calls,
            usage: self.usage,
        }
    }
}

fn parse_tool_input(name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(tool = name, %error, "unparseable tool arguments, using {{}}");
            Value::Object(serde_json::Map::new())
        }
    }
}
