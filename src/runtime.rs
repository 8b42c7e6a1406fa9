//! The invocation loop: poll, invoke, stream, forever.
//!
//! Two states — `Idle` between invocations, `Processing` while one is in
//! flight. The loop is designed to run for the lifetime of the process;
//! no per-invocation failure terminates it. Per iteration exactly one of
//! {response acknowledged, error acknowledged} occurs.
//!
//! The only error that escapes is a poll failure: with no request id in
//! hand there is nothing to report against, so it is an explicit fatal
//! path rather than a guessed recovery. Shutdown happens solely through
//! the cancellation token, which production operation never triggers.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::context::RequestId;
use crate::error::{ErrorPayload, RuntimeError};
use crate::handler::{Handler, HandlerAdapter};
use crate::poller::{Invocation, InvocationPoller};
use crate::reporter::ErrorReporter;
use crate::streamer::ChunkedStreamer;

/// Loop state, tracked for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between invocations, blocked on the poll.
    Idle,
    /// One invocation in flight.
    Processing,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
        }
    }
}

/// Orchestrates poller, handler adapter, streamer, and reporter.
pub struct RuntimeLoop {
    poller: InvocationPoller,
    adapter: HandlerAdapter,
    streamer: ChunkedStreamer,
    reporter: ErrorReporter,
    state: LoopState,
}

impl RuntimeLoop {
    pub fn new(config: RuntimeConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            poller: InvocationPoller::new(config.clone()),
            adapter: HandlerAdapter::new(handler),
            streamer: ChunkedStreamer::new(config.api_base.clone()),
            reporter: ErrorReporter::new(config),
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until cancelled.
    ///
    /// Returns `Ok(())` on cancellation; the only `Err` is a fatal poll
    /// failure.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), RuntimeError> {
        info!("runtime loop starting");
        loop {
            self.transition(LoopState::Idle);

            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("runtime loop cancelled, shutting down");
                    return Ok(());
                }
                polled = self.poller.next() => polled,
            };

            let invocation = match polled {
                Ok(invocation) => invocation,
                Err(RuntimeError::Decode {
                    request_id,
                    message,
                }) => {
                    // The request id exists, so this failure is reportable;
                    // the handler is never invoked for it.
                    self.transition(LoopState::Processing);
                    let err = RuntimeError::Decode {
                        request_id: request_id.clone(),
                        message,
                    };
                    self.report_failure(&request_id, &err).await;
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "poll failed; runtime cannot continue");
                    return Err(err);
                }
            };

            self.transition(LoopState::Processing);
            let request_id = invocation.request_id.clone();
            match self.process(invocation).await {
                Ok(()) => info!(request_id = %request_id, "invocation completed"),
                Err(err) => {
                    error!(request_id = %request_id, error = %err, "invocation failed");
                    self.report_failure(&request_id, &err).await;
                }
            }
        }
    }

    /// One invocation: handler invocation then chunked streaming.
    async fn process(&self, invocation: Invocation) -> Result<(), RuntimeError> {
        let Invocation {
            request_id,
            work_item,
            context,
        } = invocation;

        let chunks = self.adapter.invoke(work_item, &context).await?;
        self.streamer.stream(&request_id, chunks).await
        // `context` is dropped here, never reused across invocations.
    }

    /// Convert a failure to an [`ErrorPayload`] and report it. Best-effort:
    /// a failed report is logged and swallowed so the loop keeps running.
    async fn report_failure(&self, request_id: &RequestId, err: &RuntimeError) {
        let payload = ErrorPayload::from(err);
        if let Err(report_err) = self.reporter.report(request_id, &payload).await {
            warn!(
                request_id = %request_id,
                error = %report_err,
                "error report failed; continuing"
            );
        }
    }

    fn transition(&mut self, to: LoopState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "loop state transition");
            self.state = to;
        }
    }
}
