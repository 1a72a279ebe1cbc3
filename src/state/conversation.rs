use crate::api::ToolCallRequest;
use crate::types::{ApiMessage, Content, ContentBlock, Role};
use crate::util::truncate_for_history;

/// Transcript of prior turns plus the turn in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<ApiMessage>,
    max_tool_result_chars: usize,
}

impl Conversation {
    pub fn new(max_tool_result_chars: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_tool_result_chars,
        }
    }

    pub fn with_messages(messages: Vec<ApiMessage>, max_tool_result_chars: usize) -> Self {
        Self {
            messages,
            max_tool_result_chars,
        }
    }

    pub fn messages(&self) -> &[ApiMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Append a user message and return its index.
    pub fn push_user(&mut self, text: impl Into<String>) -> usize {
        self.messages.push(ApiMessage::user_text(text));
        self.messages.len() - 1
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.messages.push(ApiMessage::assistant_text(text));
    }

    /// Record a tool round: the reasoning text followed by its tool calls.
    pub fn push_assistant_tool_round(&mut self, text: &str, tool_calls: &[ToolCallRequest]) {
        let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        blocks.extend(tool_calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }));
        self.messages.push(ApiMessage {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
        });
    }

    /// Record the results of a tool round as one user message.
    pub fn push_tool_results(&mut self, results: Vec<(String, String, bool)>) {
        if results.is_empty() {
            return;
        }
        let blocks = results
            .into_iter()
            .map(|(tool_use_id, content, is_error)| ContentBlock::ToolResult {
                tool_use_id,
                content: truncate_for_history(&content, self.max_tool_result_chars),
                is_error,
            })
            .collect();
        self.messages.push(ApiMessage {
            role: Role::User,
            content: Content::Blocks(blocks),
        });
    }

    /// Drop the oldest messages so at most `max_messages` remain, never
    /// dropping `anchor` or anything after it, and never leaving the history
    /// starting on a tool result. Returns the number of dropped messages; the
    /// caller shifts its anchor by the same amount.
    pub fn prune_preserving(&mut self, max_messages: usize, anchor: usize) -> usize {
        let len = self.messages.len();
        if len <= max_messages {
            return 0;
        }

        let anchor = anchor.min(len.saturating_sub(1));
        let mut keep_start = len.saturating_sub(max_messages).min(anchor);

        while keep_start < anchor {
            let message = &self.messages[keep_start];
            if message.role == Role::User && !message.contains_tool_result() {
                break;
            }
            keep_start += 1;
        }

        if keep_start > 0 {
            self.messages.drain(0..keep_start);
        }
        keep_start
    }

    /// Messages from `start` on, used to hand a finished turn back to the session.
    pub fn messages_since(&self, start: usize) -> &[ApiMessage] {
        &self.messages[start.min(self.messages.len())..]
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ApiMessage>) {
        self.messages.extend(messages);
    }
}
