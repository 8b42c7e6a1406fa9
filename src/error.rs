//! Runtime error taxonomy with wire-format classification.
//!
//! Every failure in the invocation loop is represented here. Callers can
//! query `is_fatal()` / `error_type()` without string matching.
//!
//! ## Categories
//!
//! | Variant          | Wire `errorType`           | Fatal |
//! |------------------|----------------------------|-------|
//! | Poll             | `PollFailure`              | yes   |
//! | Decode           | `DecodeFailure`            | no    |
//! | Handler          | `HandlerFailure`           | no    |
//! | ChunkType        | `TypeError`                | no    |
//! | StreamTransport  | `StreamTransportFailure`   | no    |
//! | ReportTransport  | `ReportTransportFailure`   | no    |
//!
//! Only `Poll` is fatal: with no request id in hand there is nothing to
//! report an error against, so the loop lets it propagate. Every other
//! variant is caught at the loop boundary, converted to an [`ErrorPayload`],
//! and posted to the error endpoint before the loop polls again.

use serde::Serialize;
use thiserror::Error;

use crate::context::RequestId;

/// Unified error type for all runtime client operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Transport or parse failure on the next-invocation call.
    ///
    /// Fatal: there is no request id yet, so the failure cannot be reported
    /// through the error endpoint.
    #[error("poll failure: {0}")]
    Poll(String),

    /// The work-item body was not valid JSON.
    #[error("work item for {request_id} is not valid JSON: {message}")]
    Decode {
        request_id: RequestId,
        message: String,
    },

    /// The handler capability failed before or during chunk production.
    #[error("handler failure: {0}")]
    Handler(String),

    /// A produced element could not be normalized to bytes.
    #[error("chunk is not byte-convertible: {0}")]
    ChunkType(String),

    /// Connection failure while streaming the response body.
    #[error("stream transport failure: {0}")]
    StreamTransport(String),

    /// The error-reporting call itself failed. Best-effort: logged by the
    /// caller, never raised further.
    #[error("report transport failure: {0}")]
    ReportTransport(String),
}

impl RuntimeError {
    /// The `errorType` string sent to the error endpoint.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Poll(_) => "PollFailure",
            Self::Decode { .. } => "DecodeFailure",
            Self::Handler(_) => "HandlerFailure",
            Self::ChunkType(_) => "TypeError",
            Self::StreamTransport(_) => "StreamTransportFailure",
            Self::ReportTransport(_) => "ReportTransportFailure",
        }
    }

    /// Returns `true` if this error must terminate the runtime loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Poll(_))
    }
}

/// Structured failure payload posted to the error endpoint.
///
/// Wire format: `{"errorMessage": ..., "errorType": ..., "stackTrace": [...]}`.
/// Constructed only on the failure path; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    #[serde(rename = "errorType")]
    pub error_type: String,
    #[serde(rename = "stackTrace")]
    pub stack_trace: Vec<String>,
}

impl ErrorPayload {
    /// Attach an ordered trace (may be empty).
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.stack_trace = trace;
        self
    }
}

impl From<&RuntimeError> for ErrorPayload {
    fn from(err: &RuntimeError) -> Self {
        Self {
            error_message: err.to_string(),
            error_type: err.error_type().to_string(),
            stack_trace: Vec::new(),
        }
    }
}
