//! Blocking poll for the next invocation.

use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::context::{InvocationContext, RequestId};
use crate::error::RuntimeError;

/// Header carrying the unique request id.
const HEADER_REQUEST_ID: &str = "Lambda-Runtime-Aws-Request-Id";
/// Header carrying the absolute deadline in epoch milliseconds.
const HEADER_DEADLINE_MS: &str = "Lambda-Runtime-Deadline-Ms";
/// Header carrying the ARN of the invoked function version.
const HEADER_FUNCTION_ARN: &str = "Lambda-Runtime-Invoked-Function-Arn";
/// Optional header carrying the trace id.
const HEADER_TRACE_ID: &str = "Lambda-Runtime-Trace-Id";

/// Environment variable downstream tracing libraries read. Set per
/// invocation as a compatibility shim; the context carries the same id as
/// the primary mechanism.
const TRACE_ENV_VAR: &str = "_X_AMZN_TRACE_ID";

/// One unit of work delivered by the scheduler.
pub struct Invocation {
    pub request_id: RequestId,
    pub work_item: Value,
    pub context: InvocationContext,
}

/// Long-polls the next-invocation endpoint and assembles the per-invocation
/// context from its response.
pub struct InvocationPoller {
    client: reqwest::Client,
    config: RuntimeConfig,
}

impl InvocationPoller {
    pub fn new(config: RuntimeConfig) -> Self {
        // No client timeout: the protocol defines none and the call may
        // legitimately block until work arrives.
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Block until the scheduler delivers the next invocation.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::Poll`] on transport failure, a non-success status,
    ///   or missing/invalid protocol headers. Fatal to the loop.
    /// - [`RuntimeError::Decode`] when the work-item body is not valid JSON.
    ///   Carries the request id so the loop can report it and continue.
    pub async fn next(&self) -> Result<Invocation, RuntimeError> {
        debug!("polling for next invocation");
        let response = self
            .client
            .get(self.config.next_url())
            .send()
            .await
            .map_err(|e| RuntimeError::Poll(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::Poll(format!(
                "next-invocation endpoint returned {status}"
            )));
        }

        let headers = response.headers();
        let request_id = RequestId::new(required_header(headers, HEADER_REQUEST_ID)?);
        let deadline_epoch_ms: u64 = required_header(headers, HEADER_DEADLINE_MS)?
            .parse()
            .map_err(|_| RuntimeError::Poll(format!("{HEADER_DEADLINE_MS} is not an integer")))?;
        let invoked_function_arn = optional_header(headers, HEADER_FUNCTION_ARN).unwrap_or_default();
        let trace_id = optional_header(headers, HEADER_TRACE_ID);

        if let Some(ref trace) = trace_id {
            // Compatibility shim for unmodified libraries that read the
            // ambient variable; the context is the authoritative carrier.
            std::env::set_var(TRACE_ENV_VAR, trace);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RuntimeError::Poll(e.to_string()))?;
        let work_item: Value = if body.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode {
                request_id: request_id.clone(),
                message: e.to_string(),
            })?
        };

        let context = InvocationContext {
            request_id: request_id.clone(),
            deadline_epoch_ms,
            invoked_function_arn,
            trace_id,
            function_name: self.config.function_name.clone(),
            function_version: self.config.function_version.clone(),
            memory_limit_mb: self.config.memory_limit_mb.clone(),
            log_group: self.config.log_group.clone(),
            log_stream: self.config.log_stream.clone(),
        };

        info!(request_id = %request_id, deadline_epoch_ms, "received invocation");
        Ok(Invocation {
            request_id,
            work_item,
            context,
        })
    }
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, RuntimeError> {
    optional_header(headers, name)
        .ok_or_else(|| RuntimeError::Poll(format!("missing required header {name}")))
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
