//! Streaming-response client for the AWS Lambda Runtime API.
//!
//! A long-running worker process polls the runtime API for work items and
//! streams progressively-produced output back over HTTP/1.1 chunked
//! transfer encoding. Components, leaf-first:
//!
//! - [`streamer::ChunkedStreamer`] — chunked-encodes a lazy byte sequence
//!   onto one outbound connection per response.
//! - [`context::InvocationContext`] — immutable per-invocation metadata.
//! - [`poller::InvocationPoller`] — blocks on the next-invocation endpoint.
//! - [`reporter::ErrorReporter`] — best-effort structured failure reports.
//! - [`handler::HandlerAdapter`] — bridges the external handler capability
//!   to a normalized byte stream.
//! - [`runtime::RuntimeLoop`] — orchestrates the above forever; strictly
//!   one invocation at a time, never terminated by a single failure.

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod poller;
pub mod reporter;
pub mod runtime;
pub mod streamer;
pub mod telemetry;

pub use config::RuntimeConfig;
pub use context::{InvocationContext, RequestId};
pub use error::{ErrorPayload, RuntimeError};
pub use handler::{Chunk, ChunkStream, Handler, HandlerAdapter, HandlerError, WordSplitHandler};
pub use runtime::{LoopState, RuntimeLoop};
