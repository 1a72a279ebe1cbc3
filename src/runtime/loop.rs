use chrono::Utc;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::{args_or_empty, elapsed_ms, ProgressGate, RunContext};
use super::event::{RunEvent, ToolOutcome};
use super::permission::{PermissionGate, PermissionReply};
use super::RunError;
use crate::api::{CompletionRequest, ModelBroker, RoundAssembler, RoundOutput, ToolCallRequest};
use crate::config::RuntimeConfig;
use crate::hooks::{HookContext, HookOutcome, HookPhase, HookRunner};
use crate::permissions::{PermissionAction, PermissionEngine};
use crate::state::Conversation;
use crate::tools::{ToolContext, ToolDescriptor, ToolRegistry};

/// Everything one run needs, cloned out of the `Runtime` when the run starts.
pub(super) struct RunDriver {
    pub(super) broker: Arc<dyn ModelBroker>,
    pub(super) tools: ToolRegistry,
    pub(super) permissions: Arc<PermissionEngine>,
    pub(super) hooks: Arc<dyn HookRunner>,
    pub(super) config: Arc<RuntimeConfig>,
    pub(super) gate: Arc<PermissionGate>,
    pub(super) history: Arc<Mutex<Conversation>>,
    pub(super) cancel: CancellationToken,
}

impl RunDriver {
    /// Drive the round loop to completion. `Ok(())` covers both a finished
    /// run (ended by `done`) and a cancelled one (no `done`).
    pub(super) async fn run(self, utterance: String, mut ctx: RunContext) -> Result<(), RunError> {
        let mut conversation = self.snapshot_history();
        let mut anchor = conversation.push_user(utterance);
        let descriptors = self.tools.descriptors();
        let mut last_reasoning = String::new();

        info!(tools = descriptors.len(), "run started");

        loop {
            if self.cancel.is_cancelled() {
                info!(rounds = ctx.rounds, "run cancelled");
                return Ok(());
            }

            if ctx.rounds >= self.config.max_iterations {
                warn!(
                    max_iterations = self.config.max_iterations,
                    "iteration cap reached without a final answer"
                );
                let answer = render_loop_limit_answer(&last_reasoning, self.config.max_iterations);
                conversation.push_assistant_text(answer.clone());
                ctx.emit_answer(&[answer.as_str()]);
                self.commit(&conversation, anchor);
                ctx.finish(answer);
                return Ok(());
            }

            let dropped =
                conversation.prune_preserving(self.config.max_transcript_messages, anchor);
            if dropped > 0 {
                anchor -= dropped;
                debug!(dropped, "pruned transcript before round");
                ctx.emit(RunEvent::ContextCleared {
                    dropped_messages: dropped,
                });
            }

            ctx.rounds += 1;
            debug!(round = ctx.rounds, messages = conversation.len(), "streaming round");

            let Some(output) = self.stream_round(&conversation, &descriptors).await? else {
                info!(rounds = ctx.rounds, "run cancelled while streaming");
                return Ok(());
            };
            ctx.usage += output.usage;

            if !output.has_tool_calls() {
                let answer = output.text();
                conversation.push_assistant_text(answer.clone());
                ctx.emit_answer(&output.text_fragments);
                self.commit(&conversation, anchor);
                info!(
                    rounds = ctx.rounds,
                    elapsed_ms = ctx.elapsed_ms(),
                    "run finished"
                );
                ctx.finish(answer);
                return Ok(());
            }

            let reasoning = output.text();
            if !reasoning.is_empty() {
                ctx.emit(RunEvent::Thinking {
                    text: reasoning.clone(),
                });
                last_reasoning = reasoning.clone();
            }
            conversation.push_assistant_tool_round(&reasoning, &output.tool_calls);

            let mut results = Vec::with_capacity(output.tool_calls.len());
            for call in &output.tool_calls {
                let Some(outcome) = self.process_tool_call(call, &mut ctx).await else {
                    info!(tool = %call.name, "run cancelled during tool call");
                    return Ok(());
                };
                results.push((
                    call.id.clone(),
                    outcome.text().to_string(),
                    outcome.is_error(),
                ));
            }
            conversation.push_tool_results(results);
        }
    }

    fn snapshot_history(&self) -> Conversation {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        Conversation::with_messages(
            history.messages().to_vec(),
            self.config.max_tool_result_chars,
        )
    }

    /// Fold this turn into the session history. Cancelled and failed runs
    /// never get here, so their partial turns are discarded.
    fn commit(&self, conversation: &Conversation, anchor: usize) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let turn_start = history.len();
        history.extend(conversation.messages_since(anchor).iter().cloned());
        history.prune_preserving(self.config.max_transcript_messages * 2, turn_start);
    }

    /// Stream one round. `Ok(None)` means the run was cancelled.
    async fn stream_round(
        &self,
        conversation: &Conversation,
        descriptors: &[ToolDescriptor],
    ) -> Result<Option<RoundOutput>, RunError> {
        let request = CompletionRequest {
            system: self.config.system_prompt.clone(),
            messages: conversation.messages().to_vec(),
            tools: descriptors.to_vec(),
        };

        let collect = async {
            let mut stream = self.broker.stream(request, self.cancel.clone()).await?;
            let mut assembler = RoundAssembler::new();
            while let Some(fragment) = stream.next().await {
                assembler.push(fragment?);
            }
            Ok::<_, RunError>(assembler.finish())
        };

        let bounded = async {
            match self.config.round_timeout {
                Some(limit) => match tokio::time::timeout(limit, collect).await {
                    Ok(output) => output,
                    Err(_elapsed) => Err(RunError::RoundTimeout(limit)),
                },
                None => collect.await,
            }
        };

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            output = bounded => output?,
        };

        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(output))
    }

    /// Gate, run and report one tool call. `None` means the run was cancelled.
    async fn process_tool_call(
        &self,
        call: &ToolCallRequest,
        ctx: &mut RunContext,
    ) -> Option<ToolOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            let error = format!("unknown tool: {}", call.name);
            return Some(self.refuse(call, None, error, ctx, started_at, clock));
        };

        let resource = tool.descriptor().resource_from_args(&call.input);
        let evaluation = self.permissions.evaluate(&call.name, resource.as_deref());

        let allowed = match evaluation.action {
            PermissionAction::Allow => true,
            PermissionAction::Deny => false,
            PermissionAction::Ask => {
                ctx.emit(RunEvent::PermissionRequest {
                    tool_id: call.name.clone(),
                    resource: resource.clone(),
                    args: args_or_empty(&call.input),
                    rule: evaluation.rule.clone(),
                });
                let reply = self.await_permission(&call.name).await;
                if self.cancel.is_cancelled() {
                    return None;
                }
                ctx.emit(RunEvent::PermissionResponse {
                    tool_id: call.name.clone(),
                    allowed: reply.allowed,
                    always_allow: reply.always_allow,
                });
                if reply.allowed && reply.always_allow {
                    let installed = self
                        .permissions
                        .always_allow(&call.name, resource.as_deref());
                    if let Err(err) = installed {
                        warn!(
                            tool = %call.name,
                            error = %err,
                            "failed to install always-allow rule"
                        );
                    }
                }
                reply.allowed
            }
        };

        if !allowed {
            info!(tool = %call.name, mode = %evaluation.mode, "tool call denied");
            let error = format!("permission denied: {}", call.name);
            return Some(self.refuse(call, resource, error, ctx, started_at, clock));
        }

        let pre = HookContext {
            phase: HookPhase::PreToolUse,
            tool_id: call.name.clone(),
            call_id: call.id.clone(),
            args: call.input.clone(),
            resource: resource.clone(),
            outcome: None,
        };
        match self.hooks.run(HookPhase::PreToolUse, &pre).await {
            Ok(HookOutcome::Continue) => {}
            Ok(HookOutcome::Block { reason }) => {
                info!(tool = %call.name, %reason, "tool call blocked by hook");
                let error = format!("blocked by hook: {reason}");
                return Some(self.refuse(call, resource, error, ctx, started_at, clock));
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, "pre-tool hook failed; blocking call");
                let error = format!("blocked: {err}");
                return Some(self.refuse(call, resource, error, ctx, started_at, clock));
            }
        }

        ctx.emit(RunEvent::ToolStart {
            tool_id: call.name.clone(),
            call_id: call.id.clone(),
            args: args_or_empty(&call.input),
        });

        let gate = ProgressGate::open();
        let tool_ctx = ToolContext {
            call_id: call.id.clone(),
            cancel: self.cancel.child_token(),
            progress: ctx.progress_reporter(&call.name, gate.clone()),
            config: Arc::clone(&self.config),
        };
        let timeout = self.config.tool_timeout;
        let execution = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(tool.execute(call.input.clone(), &tool_ctx)).catch_unwind(),
        );

        let finished = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            finished = execution => Some(finished),
        };
        gate.close();

        let outcome = match finished? {
            Ok(Ok(Ok(output))) => ToolOutcome::Ok(output),
            Ok(Ok(Err(err))) => ToolOutcome::Error(format!("{err:#}")),
            Ok(Err(_panic)) => ToolOutcome::Error(format!("tool {} panicked", call.name)),
            Err(_elapsed) => ToolOutcome::Error(format!(
                "Tool execution timed out after {}s for {}",
                timeout.as_secs(),
                call.name
            )),
        };
        let duration_ms = elapsed_ms(clock);

        match &outcome {
            ToolOutcome::Ok(result) => {
                debug!(tool = %call.name, duration_ms, "tool finished");
                ctx.emit(RunEvent::ToolEnd {
                    tool_id: call.name.clone(),
                    call_id: call.id.clone(),
                    result: result.clone(),
                    duration_ms,
                });
            }
            ToolOutcome::Error(error) => {
                warn!(tool = %call.name, duration_ms, %error, "tool failed");
                ctx.emit(RunEvent::ToolError {
                    tool_id: call.name.clone(),
                    call_id: call.id.clone(),
                    error: error.clone(),
                });
            }
        }

        let post = HookContext {
            phase: HookPhase::PostToolUse,
            outcome: Some(match &outcome {
                ToolOutcome::Ok(text) => Ok(text.clone()),
                ToolOutcome::Error(text) => Err(text.clone()),
            }),
            ..pre
        };
        if let Err(err) = self.hooks.run(HookPhase::PostToolUse, &post).await {
            warn!(tool = %call.name, error = %err, "post-tool hook failed");
        }

        ctx.record(call, resource, outcome.clone(), started_at, duration_ms);
        Some(outcome)
    }

    /// Suspend until the consumer answers or the run is cancelled. Both a
    /// cancellation and a lost reply read as a denial.
    async fn await_permission(&self, tool_id: &str) -> PermissionReply {
        let (_ticket, reply) = self.gate.register(tool_id);
        debug!(tool = tool_id, "waiting for permission response");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => PermissionReply::DENIED,
            reply = reply => reply.unwrap_or(PermissionReply::DENIED),
        }
    }

    /// Report a call that never reached the tool and synthesize its result.
    fn refuse(
        &self,
        call: &ToolCallRequest,
        resource: Option<String>,
        error: String,
        ctx: &mut RunContext,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
    ) -> ToolOutcome {
        ctx.emit(RunEvent::ToolError {
            tool_id: call.name.clone(),
            call_id: call.id.clone(),
            error: error.clone(),
        });
        let outcome = ToolOutcome::Error(error);
        ctx.record(call, resource, outcome.clone(), started_at, elapsed_ms(clock));
        outcome
    }
}

fn render_loop_limit_answer(last_reasoning: &str, max_iterations: usize) -> String {
    let summary = if last_reasoning.trim().is_empty() {
        "No final answer was produced."
    } else {
        last_reasoning.trim()
    };
    format!(
        "{summary}\n\n[loop guard] Stopped after {max_iterations} rounds \
         to prevent an infinite loop."
    )
}
