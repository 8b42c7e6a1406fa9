//! End-to-end runtime loop tests against an in-process mock runtime API.
//!
//! The mock serves scripted invocations over real TCP: `/next` pops one
//! pending invocation (or holds the connection open, like the real blocking
//! endpoint), `/response` records the raw chunked body and acknowledges once
//! it sees the terminator, `/error` records the JSON payload. No external
//! endpoint required.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use lambda_streaming_runtime::{
    Chunk, ChunkStream, Handler, HandlerError, InvocationContext, RuntimeConfig, RuntimeLoop,
    WordSplitHandler,
};

// ── Mock runtime API ─────────────────────────────────────────────────────────

const ACK: &[u8] = b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

struct PendingInvocation {
    request_id: String,
    deadline_epoch_ms: u64,
    trace_id: Option<String>,
    body: Vec<u8>,
}

struct ResponseRecord {
    /// Raw chunked body as received on the wire.
    body: Vec<u8>,
    /// Whether the terminator arrived and the ack was sent.
    acked: bool,
}

#[derive(Default)]
struct ApiState {
    pending: VecDeque<PendingInvocation>,
    next_polls: usize,
    responses: Vec<ResponseRecord>,
    errors: Vec<Value>,
}

struct MockApi {
    addr: String,
    state: Arc<Mutex<ApiState>>,
}

impl MockApi {
    async fn spawn(invocations: Vec<PendingInvocation>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(ApiState {
            pending: invocations.into(),
            ..Default::default()
        }));

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((conn, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle_conn(conn, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    fn next_polls(&self) -> usize {
        self.state.lock().unwrap().next_polls
    }

    fn response_count(&self) -> usize {
        self.state.lock().unwrap().responses.len()
    }

    fn error_count(&self) -> usize {
        self.state.lock().unwrap().errors.len()
    }

    fn acked_responses(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .responses
            .iter()
            .filter(|r| r.acked)
            .count()
    }
}

async fn handle_conn(mut conn: TcpStream, state: Arc<Mutex<ApiState>>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        match conn.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let path = head.split_whitespace().nth(1).unwrap_or("").to_owned();
    let mut body = buf[head_end + 4..].to_vec();

    if path.ends_with("/invocation/next") {
        let pending = {
            let mut s = state.lock().unwrap();
            s.next_polls += 1;
            s.pending.pop_front()
        };
        match pending {
            Some(inv) => {
                let mut response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Lambda-Runtime-Aws-Request-Id: {}\r\n\
                     Lambda-Runtime-Deadline-Ms: {}\r\n\
                     Lambda-Runtime-Invoked-Function-Arn: arn:aws:lambda:us-east-1:000000000000:function:demo\r\n",
                    inv.request_id, inv.deadline_epoch_ms
                );
                if let Some(trace) = &inv.trace_id {
                    response.push_str(&format!("Lambda-Runtime-Trace-Id: {trace}\r\n"));
                }
                response.push_str(&format!(
                    "Content-Length: {}\r\nConnection: close\r\n\r\n",
                    inv.body.len()
                ));
                let _ = conn.write_all(response.as_bytes()).await;
                let _ = conn.write_all(&inv.body).await;
            }
            // No scripted work left: block like the real endpoint until the
            // client gives up (loop cancellation drops the request).
            None => std::future::pending::<()>().await,
        }
    } else if path.ends_with("/response") {
        let acked = loop {
            if body.ends_with(b"0\r\n\r\n") {
                break true;
            }
            match conn.read(&mut tmp).await {
                Ok(0) | Err(_) => break false,
                Ok(n) => body.extend_from_slice(&tmp[..n]),
            }
        };
        state
            .lock()
            .unwrap()
            .responses
            .push(ResponseRecord { body, acked });
        if acked {
            let _ = conn.write_all(ACK).await;
        }
    } else if path.ends_with("/error") {
        let content_length = content_length(&head);
        while body.len() < content_length {
            match conn.read(&mut tmp).await {
                Ok(0) | Err(_) => break,
                Ok(n) => body.extend_from_slice(&tmp[..n]),
            }
        }
        let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        state.lock().unwrap().errors.push(payload);
        let _ = conn.write_all(ACK).await;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Standard chunked-decoding. Returns ordered payloads and whether the
/// stream reached a zero-size frame.
fn decode_chunked(mut body: &[u8]) -> (Vec<Vec<u8>>, bool) {
    let mut chunks = Vec::new();
    loop {
        let Some(pos) = find(body, b"\r\n") else {
            return (chunks, false);
        };
        let Ok(size) = usize::from_str_radix(&String::from_utf8_lossy(&body[..pos]), 16) else {
            return (chunks, false);
        };
        body = &body[pos + 2..];
        if size == 0 {
            return (chunks, body.starts_with(b"\r\n"));
        }
        if body.len() < size + 2 {
            return (chunks, false);
        }
        chunks.push(body[..size].to_vec());
        body = &body[size + 2..];
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn future_deadline_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
        + 30_000
}

fn invocation(request_id: &str, body: &[u8]) -> PendingInvocation {
    PendingInvocation {
        request_id: request_id.to_owned(),
        deadline_epoch_ms: future_deadline_ms(),
        trace_id: None,
        body: body.to_vec(),
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for {what}");
}

fn start_loop(
    config: RuntimeConfig,
    handler: Arc<dyn Handler>,
) -> (
    CancellationToken,
    tokio::task::JoinHandle<Result<(), lambda_streaming_runtime::RuntimeError>>,
) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut runtime = RuntimeLoop::new(config, handler);
        runtime.run(token).await
    });
    (cancel, task)
}

/// Counts invocations so tests can assert the handler was never called.
struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for CountingHandler {
    async fn invoke(
        &self,
        _work_item: Value,
        _ctx: &InvocationContext,
    ) -> Result<ChunkStream, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(stream::iter(Vec::<Result<Chunk, HandlerError>>::new())))
    }
}

/// Emits two chunks, then fails mid-sequence.
struct FailsAfterTwoHandler;

#[async_trait]
impl Handler for FailsAfterTwoHandler {
    async fn invoke(
        &self,
        _work_item: Value,
        _ctx: &InvocationContext,
    ) -> Result<ChunkStream, HandlerError> {
        Ok(Box::pin(stream::iter(vec![
            Ok(Chunk::Text("chunk-1".into())),
            Ok(Chunk::Text("chunk-2".into())),
            Err(HandlerError::new("handler crashed mid-sequence")),
        ])))
    }
}

/// Captures the context it was invoked with and emits nothing.
struct CapturingHandler {
    seen: Arc<Mutex<Option<InvocationContext>>>,
}

#[async_trait]
impl Handler for CapturingHandler {
    async fn invoke(
        &self,
        _work_item: Value,
        ctx: &InvocationContext,
    ) -> Result<ChunkStream, HandlerError> {
        *self.seen.lock().unwrap() = Some(ctx.clone());
        Ok(Box::pin(stream::iter(Vec::<Result<Chunk, HandlerError>>::new())))
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn word_split_streams_one_frame_per_word_then_terminator() {
    let api = MockApi::spawn(vec![invocation("req-1", br#"{"sentence": "a b"}"#)]).await;
    let (cancel, task) = start_loop(
        RuntimeConfig::for_api(api.addr.clone()),
        Arc::new(WordSplitHandler),
    );

    // Completed response and back to polling.
    wait_for("response + re-poll", || {
        api.response_count() == 1 && api.next_polls() >= 2
    })
    .await;

    {
        let state = api.state.lock().unwrap();
        let record = &state.responses[0];
        assert!(record.acked);

        let (decoded, terminated) = decode_chunked(&record.body);
        assert!(terminated);
        assert_eq!(decoded.len(), 2);
        let first: Value = serde_json::from_slice(&decoded[0]).unwrap();
        let second: Value = serde_json::from_slice(&decoded[1]).unwrap();
        assert_eq!(first["word"], "a");
        assert_eq!(second["word"], "b");

        // Exactly one ack per iteration: the response, never an error too.
        assert!(state.errors.is_empty());
    }

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_work_item_reports_decode_failure_without_invoking_handler() {
    let api = MockApi::spawn(vec![invocation("req-bad", b"{not json")]).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let (cancel, task) = start_loop(
        RuntimeConfig::for_api(api.addr.clone()),
        Arc::new(CountingHandler {
            calls: calls.clone(),
        }),
    );

    wait_for("error report + re-poll", || {
        api.error_count() == 1 && api.next_polls() >= 2
    })
    .await;

    {
        let state = api.state.lock().unwrap();
        assert_eq!(state.errors[0]["errorType"], "DecodeFailure");
        assert!(state.errors[0]["errorMessage"]
            .as_str()
            .unwrap()
            .contains("req-bad"));
        assert!(state.responses.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0, "handler must not run");

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn mid_stream_handler_failure_keeps_flushed_chunks_and_reports() {
    let api = MockApi::spawn(vec![invocation("req-fail", b"{}")]).await;
    let (cancel, task) = start_loop(
        RuntimeConfig::for_api(api.addr.clone()),
        Arc::new(FailsAfterTwoHandler),
    );

    wait_for("aborted response + error report", || {
        api.response_count() == 1 && api.error_count() == 1
    })
    .await;

    {
        let state = api.state.lock().unwrap();
        let record = &state.responses[0];
        assert!(!record.acked, "aborted stream must not be acknowledged");

        let (decoded, terminated) = decode_chunked(&record.body);
        assert!(!terminated, "no terminator after a failed sequence");
        assert_eq!(decoded, vec![b"chunk-1".to_vec(), b"chunk-2".to_vec()]);

        assert_eq!(state.errors[0]["errorType"], "HandlerFailure");
    }
    // Exactly one ack for the iteration: the error, not the response.
    assert_eq!(api.acked_responses(), 0);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_output_sends_exactly_the_terminator_and_context_is_populated() {
    let mut pending = invocation("req-ctx", b"{}");
    pending.trace_id = Some("Root=1-5759e988-bd862e3fe1be46a994272793".to_owned());
    let api = MockApi::spawn(vec![pending]).await;

    let mut config = RuntimeConfig::for_api(api.addr.clone());
    config.function_name = "demo".into();
    config.function_version = "$LATEST".into();
    config.memory_limit_mb = "128".into();

    let seen = Arc::new(Mutex::new(None));
    let (cancel, task) = start_loop(
        config,
        Arc::new(CapturingHandler { seen: seen.clone() }),
    );

    wait_for("acked empty response", || api.acked_responses() == 1).await;

    {
        let state = api.state.lock().unwrap();
        let (decoded, terminated) = decode_chunked(&state.responses[0].body);
        assert!(terminated);
        assert!(decoded.is_empty(), "zero chunks still produce the terminator");
        assert!(state.errors.is_empty());
    }

    let ctx = seen.lock().unwrap().clone().expect("handler saw a context");
    assert_eq!(ctx.request_id.as_str(), "req-ctx");
    assert_eq!(ctx.function_name, "demo");
    assert_eq!(ctx.function_version, "$LATEST");
    assert_eq!(ctx.memory_limit_mb, "128");
    assert_eq!(
        ctx.trace_id.as_deref(),
        Some("Root=1-5759e988-bd862e3fe1be46a994272793")
    );
    assert!(
        ctx.remaining_time() > Duration::ZERO,
        "deadline must be in the future"
    );
    assert_eq!(
        ctx.invoked_function_arn,
        "arn:aws:lambda:us-east-1:000000000000:function:demo"
    );

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_stops_an_idle_loop_cleanly() {
    let api = MockApi::spawn(Vec::new()).await;
    let (cancel, task) = start_loop(
        RuntimeConfig::for_api(api.addr.clone()),
        Arc::new(WordSplitHandler),
    );

    wait_for("first poll", || api.next_polls() >= 1).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop did not stop after cancellation");
    outcome.unwrap().unwrap();
}

#[tokio::test]
async fn sequential_invocations_each_get_exactly_one_ack() {
    let api = MockApi::spawn(vec![
        invocation("req-a", br#"{"sentence": "one"}"#),
        invocation("req-b", b"{not json"),
        invocation("req-c", br#"{"sentence": "three words here"}"#),
    ])
    .await;
    let (cancel, task) = start_loop(
        RuntimeConfig::for_api(api.addr.clone()),
        Arc::new(WordSplitHandler),
    );

    wait_for("all three iterations", || {
        api.acked_responses() == 2 && api.error_count() == 1 && api.next_polls() >= 4
    })
    .await;

    {
        let state = api.state.lock().unwrap();
        let (first, _) = decode_chunked(&state.responses[0].body);
        let (last, _) = decode_chunked(&state.responses[1].body);
        assert_eq!(first.len(), 1);
        assert_eq!(last.len(), 3);
        assert_eq!(state.errors[0]["errorType"], "DecodeFailure");
    }

    cancel.cancel();
    task.await.unwrap().unwrap();
}
