use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;

use super::event::{RunEvent, ToolCallRecord, ToolOutcome};
use crate::tools::ProgressReporter;
use crate::types::TokenUsage;

/// Per-run bookkeeping owned by the round loop: the event sink plus every
/// counter `done` reports.
pub(super) struct RunContext {
    tx: mpsc::UnboundedSender<RunEvent>,
    started: Instant,
    pub(super) rounds: usize,
    pub(super) usage: TokenUsage,
    records: Vec<ToolCallRecord>,
    answer_started: bool,
}

impl RunContext {
    pub(super) fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            tx,
            started: Instant::now(),
            rounds: 0,
            usage: TokenUsage::default(),
            records: Vec::new(),
            answer_started: false,
        }
    }

    /// A closed receiver means the consumer dropped the stream, which also
    /// drops this run, so send failures are ignored.
    pub(super) fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit `answer_start` (once per run) and replay `fragments` as deltas.
    pub(super) fn emit_answer<S: AsRef<str>>(&mut self, fragments: &[S]) {
        if !self.answer_started {
            self.answer_started = true;
            self.emit(RunEvent::AnswerStart);
        }
        for fragment in fragments {
            let delta = fragment.as_ref();
            if !delta.is_empty() {
                self.emit(RunEvent::AnswerDelta {
                    delta: delta.to_string(),
                });
            }
        }
    }

    pub(super) fn record(
        &mut self,
        call: &crate::api::ToolCallRequest,
        resource: Option<String>,
        outcome: ToolOutcome,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        self.records.push(ToolCallRecord {
            tool_id: call.name.clone(),
            call_id: call.id.clone(),
            resource,
            args: call.input.clone(),
            outcome,
            started_at,
            duration_ms,
        });
    }

    pub(super) fn finish(&mut self, answer: String) {
        let event = RunEvent::Done {
            answer,
            tool_calls: std::mem::take(&mut self.records),
            iterations: self.rounds,
            total_time_ms: elapsed_ms(self.started),
            token_usage: self.usage,
        };
        self.emit(event);
    }

    pub(super) fn elapsed_ms(&self) -> u64 {
        elapsed_ms(self.started)
    }

    /// Reporter that turns progress into `tool_progress` events while `gate`
    /// is open. The loop closes it once the tool returns so late reports,
    /// including ones from tasks the tool spawned, cannot land after `tool_end`.
    pub(super) fn progress_reporter(&self, tool_id: &str, gate: ProgressGate) -> ProgressReporter {
        let tx = self.tx.clone();
        let tool_id = tool_id.to_string();
        ProgressReporter::new(move |message| {
            // Sending under the lock orders every report before `close`.
            let open = gate.lock();
            if *open {
                let _ = tx.send(RunEvent::ToolProgress {
                    tool_id: tool_id.clone(),
                    message,
                });
            }
        })
    }
}

/// Open/closed flag shared between a tool's progress reporter and the loop.
#[derive(Clone)]
pub(super) struct ProgressGate(Arc<Mutex<bool>>);

impl ProgressGate {
    pub(super) fn open() -> Self {
        Self(Arc::new(Mutex::new(true)))
    }

    /// Waits for an in-flight report to finish sending.
    pub(super) fn close(&self) {
        *self.lock() = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(super) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub(super) fn args_or_empty(args: &Value) -> Value {
    if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_start_is_emitted_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctx = RunContext::new(tx);
        ctx.emit_answer(&["Hello", "", " world"]);
        ctx.emit_answer(&["!"]);
        ctx.rounds = 2;
        ctx.finish("Hello world!".to_string());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events[0], RunEvent::AnswerStart);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, RunEvent::AnswerStart))
                .count(),
            1
        );
        assert_eq!(events.len(), 5);
        assert!(matches!(
            events.last(),
            Some(RunEvent::Done { iterations: 2, .. })
        ));
    }

    #[test]
    fn test_progress_reporter_stops_when_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RunContext::new(tx);
        let gate = ProgressGate::open();
        let reporter = ctx.progress_reporter("fetch", gate.clone());

        reporter.report("10%");
        gate.close();
        reporter.report("late");

        assert_eq!(
            rx.try_recv().ok(),
            Some(RunEvent::ToolProgress {
                tool_id: "fetch".to_string(),
                message: "10%".to_string(),
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reports_from_other_threads_never_follow_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RunContext::new(tx.clone());
        let gate = ProgressGate::open();
        let reporter = ctx.progress_reporter("crawl", gate.clone());

        let worker = std::thread::spawn(move || {
            for i in 0..200 {
                reporter.report(format!("page {i}"));
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(1));
        gate.close();
        let _ = tx.send(RunEvent::ToolEnd {
            tool_id: "crawl".to_string(),
            call_id: "c1".to_string(),
            result: "ok".to_string(),
            duration_ms: 1,
        });
        worker.join().expect("worker");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(RunEvent::ToolEnd { .. })));
    }
}
