//! Per-request correlation context.
//!
//! Owns the listener, the response timer and the single-resolution guard
//! for one in-flight request. The message path and the timeout path settle
//! through the same guard, so exactly one of them wins. Whichever wins
//! disarms the timer and deregisters the listener. Dropping an unsettled
//! context (the caller went away) releases both as well.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

use crate::channel::Listener;
use crate::error::RelayError;
use crate::observability::metrics;
use crate::tunnel::correlator::{Completion, CorrelationState, ResponseCorrelator};
use crate::tunnel::message::InboundMessage;

/// Set once by whichever path settles the request first.
#[derive(Debug, Default)]
pub struct ResolutionGuard(AtomicBool);

impl ResolutionGuard {
    /// Claim the resolution. Returns `true` for exactly one caller.
    pub fn try_resolve(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum Event {
    Message(Option<Arc<InboundMessage>>),
    Timeout,
}

/// Everything one request needs while it waits for its response.
pub struct RequestContext {
    correlator: ResponseCorrelator,
    listener: Listener,
    timer: Option<Pin<Box<Sleep>>>,
    guard: Arc<ResolutionGuard>,
    started: Instant,
}

impl RequestContext {
    /// Arm the response timer. `listener` must already be registered so no
    /// frame sent after dispatch can be missed.
    pub fn new(req_id: impl Into<String>, listener: Listener, timeout: Duration) -> Self {
        Self {
            correlator: ResponseCorrelator::new(req_id),
            listener,
            timer: Some(Box::pin(tokio::time::sleep(timeout))),
            guard: Arc::new(ResolutionGuard::default()),
            started: Instant::now(),
        }
    }

    pub fn req_id(&self) -> &str {
        self.correlator.req_id()
    }

    pub fn state(&self) -> CorrelationState {
        self.correlator.state()
    }

    pub fn guard(&self) -> Arc<ResolutionGuard> {
        Arc::clone(&self.guard)
    }

    /// Run `work` under the response timer, so time spent before waiting
    /// (writing onto a stalled channel) counts against the same window.
    pub async fn within_deadline<F: Future>(&mut self, work: F) -> Result<F::Output, RelayError> {
        let Some(timer) = self.timer.as_mut() else {
            return Err(RelayError::ResponseTimeout);
        };
        let finished = tokio::select! {
            output = work => Some(output),
            () = timer => None,
        };
        match finished {
            Some(output) => Ok(output),
            None => Err(self.expire()),
        }
    }

    /// Wait until the response is final or the timer fires.
    pub async fn wait(mut self) -> Result<Completion, RelayError> {
        loop {
            let Some(timer) = self.timer.as_mut() else {
                return Err(RelayError::ResponseTimeout);
            };
            let event = tokio::select! {
                message = self.listener.recv() => Event::Message(message),
                () = timer => Event::Timeout,
            };

            match event {
                Event::Message(Some(message)) => {
                    if let Some(completion) = self.correlator.observe(&message) {
                        if self.settle() {
                            tracing::debug!(
                                request_id = %self.req_id(),
                                mode = completion.mode(),
                                elapsed_ms = self.started.elapsed().as_millis() as u64,
                                "Response correlated"
                            );
                            metrics::record_correlation(completion.mode());
                            return Ok(completion);
                        }
                    }
                }
                Event::Message(None) => {
                    // Inbound side is gone; only the timer can settle now.
                    if let Some(timer) = self.timer.as_mut() {
                        timer.await;
                    }
                    return Err(self.expire());
                }
                Event::Timeout => return Err(self.expire()),
            }
        }
    }

    fn expire(&mut self) -> RelayError {
        if self.settle() {
            self.correlator.time_out();
            tracing::warn!(
                request_id = %self.req_id(),
                state = ?self.correlator.state(),
                "Timed out waiting for tunnel client response"
            );
            metrics::record_correlation("timeout");
        }
        RelayError::ResponseTimeout
    }

    /// Claim the guard, then disarm the timer and deregister the listener.
    fn settle(&mut self) -> bool {
        if !self.guard.try_resolve() {
            return false;
        }
        self.timer = None;
        self.listener.deregister();
        true
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.settle() {
            tracing::debug!(request_id = %self.req_id(), "Request context released before resolution");
            metrics::record_correlation("abandoned");
        }
    }
}
