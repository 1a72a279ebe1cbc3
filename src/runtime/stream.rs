use futures::future::BoxFuture;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::event::RunEvent;
use super::RunError;

/// Event stream of a single run.
///
/// The run itself is polled inline from `poll_next`: nothing happens before
/// the first poll and dropping the stream abandons the run. Buffered events
/// are drained before a fatal error is yielded, and the stream ends right
/// after it.
pub struct RunStream {
    driver: Option<BoxFuture<'static, Result<(), RunError>>>,
    events: mpsc::UnboundedReceiver<RunEvent>,
    error: Option<RunError>,
}

impl RunStream {
    pub(super) fn new(
        driver: BoxFuture<'static, Result<(), RunError>>,
        events: mpsc::UnboundedReceiver<RunEvent>,
    ) -> Self {
        Self {
            driver: Some(driver),
            events,
            error: None,
        }
    }

    /// True once the run has stopped; buffered events may still be pending.
    pub fn is_terminated(&self) -> bool {
        self.driver.is_none()
    }
}

impl Stream for RunStream {
    type Item = Result<RunEvent, RunError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(driver) = this.driver.as_mut() {
            if let Poll::Ready(result) = driver.as_mut().poll(cx) {
                this.driver = None;
                if let Err(err) = result {
                    this.error = Some(err);
                }
            }
        }

        if let Ok(event) = this.events.try_recv() {
            return Poll::Ready(Some(Ok(event)));
        }

        if this.driver.is_some() {
            // Tools may report progress from other tasks; register for those too.
            return match this.events.poll_recv(cx) {
                Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
                _ => Poll::Pending,
            };
        }

        Poll::Ready(this.error.take().map(Err))
    }
}
