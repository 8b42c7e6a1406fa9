//! Per-invocation context handed to the handler.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unique invocation identifier assigned by the runtime API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable snapshot of per-invocation metadata.
///
/// Built fresh by the poller for every invocation from the next-invocation
/// response headers plus the deployment metadata captured at startup.
/// Dropped once the invocation's response or error has been acknowledged;
/// never reused across invocations.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Unique request identifier for this invocation.
    pub request_id: RequestId,
    /// Absolute wall-clock deadline in epoch milliseconds. The external
    /// scheduler enforces it; this client only exposes it.
    pub deadline_epoch_ms: u64,
    /// ARN of the invoked function version.
    pub invoked_function_arn: String,
    /// Trace id for downstream propagation, when the scheduler supplied one.
    pub trace_id: Option<String>,
    /// Deployment metadata, sourced once at process start.
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_mb: String,
    pub log_group: String,
    pub log_stream: String,
}

impl InvocationContext {
    /// Wall-clock time left before the deadline, saturating at zero.
    pub fn remaining_time(&self) -> Duration {
        Duration::from_millis(self.deadline_epoch_ms.saturating_sub(now_epoch_ms()))
    }

    /// `remaining_time()` in milliseconds.
    pub fn remaining_time_millis(&self) -> u64 {
        self.remaining_time().as_millis() as u64
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
