//! Handler capability and the adapter that normalizes its output.
//!
//! A handler maps one work item plus context to a lazy sequence of output
//! chunks. The adapter exposes that sequence unmodified apart from
//! normalization, so production and transmission interleave without any
//! buffering: each element becomes raw bytes at the moment the streamer
//! pulls it, and a failure raised mid-sequence surfaces at the point the
//! sequence would next be consumed. Bytes already handed downstream are
//! never retracted.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;

use crate::context::InvocationContext;
use crate::error::RuntimeError;

/// Failure signaled by the handler capability, before or during chunk
/// production.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One element of the lazy output sequence.
///
/// Chunk boundaries are a streaming-granularity decision made entirely by
/// the handler; the protocol does not require one chunk per logical unit.
/// Zero-length chunks are legal.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Raw bytes, passed through untouched.
    Bytes(Vec<u8>),
    /// Text, encoded as UTF-8 before being handed downstream.
    Text(String),
    /// A JSON value, serialized before being handed downstream.
    Json(Value),
}

impl Chunk {
    /// Normalize to raw bytes.
    ///
    /// # Errors
    ///
    /// A value that cannot be serialized maps to the `TypeError` wire
    /// category and is fatal for the invocation.
    pub fn into_bytes(self) -> Result<Vec<u8>, RuntimeError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Text(text) => Ok(text.into_bytes()),
            Self::Json(value) => {
                serde_json::to_vec(&value).map_err(|e| RuntimeError::ChunkType(e.to_string()))
            }
        }
    }
}

/// Lazy chunk sequence produced by a handler.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, HandlerError>> + Send>>;

/// Normalized byte sequence handed to the streamer.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, RuntimeError>> + Send>>;

/// The external handler capability.
///
/// Implementations receive ownership of the work item for the duration of
/// one invocation and must not retain it afterward. The returned stream is
/// pulled exactly once, in production order.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(
        &self,
        work_item: Value,
        ctx: &InvocationContext,
    ) -> Result<ChunkStream, HandlerError>;
}

/// Adapter over the handler capability.
///
/// Converts handler failures into [`RuntimeError::Handler`] and normalizes
/// every element to bytes, lazily.
pub struct HandlerAdapter {
    inner: Arc<dyn Handler>,
}

impl HandlerAdapter {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }

    /// Invoke the handler and expose its output as a normalized byte stream.
    pub async fn invoke(
        &self,
        work_item: Value,
        ctx: &InvocationContext,
    ) -> Result<ByteStream, RuntimeError> {
        let chunks = self
            .inner
            .invoke(work_item, ctx)
            .await
            .map_err(|e| RuntimeError::Handler(e.to_string()))?;

        Ok(Box::pin(chunks.map(|item| match item {
            Ok(chunk) => chunk.into_bytes(),
            Err(e) => Err(RuntimeError::Handler(e.to_string())),
        })))
    }
}

/// Reference handler: splits `{"sentence": ...}` on whitespace and emits one
/// JSON chunk per word.
///
/// Mirrors the canonical streaming demo this client ships with; also used by
/// the integration tests as a known-output handler.
pub struct WordSplitHandler;

#[async_trait]
impl Handler for WordSplitHandler {
    async fn invoke(
        &self,
        work_item: Value,
        _ctx: &InvocationContext,
    ) -> Result<ChunkStream, HandlerError> {
        let sentence = work_item
            .get("sentence")
            .and_then(Value::as_str)
            .unwrap_or("Hello world")
            .to_owned();

        let words: Vec<Result<Chunk, HandlerError>> = sentence
            .split_whitespace()
            .enumerate()
            .map(|(index, word)| Ok(Chunk::Json(json!({ "word": word, "index": index }))))
            .collect();

        Ok(Box::pin(stream::iter(words)))
    }
}
