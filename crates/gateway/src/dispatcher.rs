//! HTTP Dispatcher (§4.H): the axum surface. Validates the inbound request,
//! drives normalization → adaptation → upstream call → translation, and
//! renders either an SSE stream or a single JSON body depending on
//! `body.stream`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_serde::Sonic;
use futures::{Stream, StreamExt, stream};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::assembler::Assembler;
use crate::error::GatewayError;
use crate::normalize;
use crate::openai_request;
use crate::resolver::Resolver;
use crate::translator::Translator;
use crate::types::anthropic as a;
use crate::upstream::{UpstreamClient, UpstreamEvent};

const PING_INTERVAL: Duration = Duration::from_secs(1);

/// §5: total request deadline when the client doesn't impose a tighter one
/// (this gateway has no per-request deadline header to read yet, so every
/// request gets the default).
const REQUEST_DEADLINE: Duration = Duration::from_secs(300);

pub struct AppState {
    pub resolver: Arc<dyn Resolver>,
    pub upstream: UpstreamClient,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> axum::http::StatusCode {
    axum::http::StatusCode::OK
}

async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Sonic(request): Sonic<a::Request>,
) -> Result<Response, GatewayError> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    if headers
        .get("anthropic-version")
        .and_then(|v| v.to_str().ok())
        .is_none_or(str::is_empty)
    {
        return Err(GatewayError::InvalidRequest("missing anthropic-version header".into()));
    }

    let model = request.model.clone();
    let wants_stream = request.stream.unwrap_or(false);

    let normalized = normalize::normalize(request)?;
    let mut canonical = normalized.request;

    let route = state
        .resolver
        .resolve(&model)
        .ok_or_else(|| GatewayError::ModelNotFound(format!("no route configured for model {model}")))?;

    if !route.capabilities.supports_tools && !canonical.tools.is_empty() {
        log::warn!(
            target: "gateway::dispatcher",
            "request_id={request_id} model={model} route does not support tools; stripping {} tool definition(s)",
            canonical.tools.len()
        );
        canonical.tools.clear();
        canonical.tool_choice = None;
    }

    let mut adapter = AdapterRegistry::with_default_families().select(&canonical.model);
    let mut payload = openai_request::build(&canonical);
    payload.stream = true; // always stream upstream; the assembler folds it back for non-streaming clients (§4.G)
    payload.stream_options = Some(crate::types::openai::StreamOptions { include_usage: true });
    payload = adapter.prepare_request(payload, &canonical);

    let upstream_events = state.upstream.stream_chat_completion(&route, &payload).await?;

    let input_tokens = estimate_input_tokens(&canonical);
    let translator = Translator::new(canonical.model.clone(), input_tokens, adapter);

    let mut response = if wants_stream {
        let combined = translated_sse_stream(translator, upstream_events);
        let mut res = Sse::new(combined).into_response();
        res.headers_mut().insert(
            "Cache-Control",
            HeaderValue::from_static("no-cache"),
        );
        res
    } else {
        let body = assemble_non_streaming(translator, upstream_events).await;
        axum::Json(body).into_response()
    };

    if !normalized.dropped.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&normalized.dropped.join(", ")) {
            response.headers_mut().insert("X-Dropped-Params", value);
        }
    }

    log::info!(
        target: "gateway::dispatcher",
        "request_id={request_id} model={model} stream={wants_stream} elapsed_ms={}",
        started.elapsed().as_millis()
    );

    Ok(response)
}

/// Rough token estimate for the `message_start.usage.input_tokens` placeholder
/// (§4.F.1: "refined later" — this gateway never calls a tokenizer, so the
/// estimate is what `message_start` carries for the lifetime of the response).
fn estimate_input_tokens(canonical: &crate::types::canonical::CanonicalRequest) -> u32 {
    let mut chars = canonical.system.iter().map(|s| s.len()).sum::<usize>();
    for turn in &canonical.messages {
        for block in &turn.blocks {
            if let crate::types::canonical::Block::Text(text) = block {
                chars += text.len();
            }
        }
    }
    (chars / 4) as u32
}

struct DriveState {
    upstream: Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>>,
    translator: Translator,
    queue: VecDeque<a::StreamEvent>,
    saw_done: bool,
    saw_any_chunk: bool,
    finished: bool,
}

fn translated_sse_stream(
    mut translator: Translator,
    upstream: Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let header_events: VecDeque<a::StreamEvent> = translator.start().into();

    let state = DriveState {
        upstream,
        translator,
        queue: header_events,
        saw_done: false,
        saw_any_chunk: false,
        finished: false,
    };

    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let deadline = tokio::time::Instant::now() + REQUEST_DEADLINE;

    stream::unfold((state, ticker), move |(mut state, mut ticker)| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((to_sse_event(&event), (state, ticker)));
            }
            if state.finished {
                return None;
            }

            tokio::select! {
                next = state.upstream.next() => {
                    match next {
                        Some(UpstreamEvent::Chunk(chunk)) => {
                            state.saw_any_chunk = true;
                            state.queue.extend(state.translator.handle_chunk(chunk));
                        }
                        Some(UpstreamEvent::Done) => {
                            state.saw_done = true;
                            state.queue.extend(state.translator.finish());
                            state.finished = true;
                        }
                        None => {
                            if !state.saw_done {
                                state.queue.extend(state.translator.fail("upstream connection ended unexpectedly".into()));
                            }
                            state.finished = true;
                        }
                    }
                }
                _ = ticker.tick() => {
                    state.queue.push_back(a::StreamEvent::Ping);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    // §5: total request deadline exceeded. If any data had flowed,
                    // close out the response as max_tokens rather than dropping the
                    // connection silently; otherwise surface it as an error event.
                    log::warn!(target: "gateway::dispatcher", "request exceeded {REQUEST_DEADLINE:?} deadline, aborting upstream");
                    if state.saw_any_chunk {
                        state.queue.extend(state.translator.finish_with_reason(crate::types::anthropic::StopReason::MaxTokens));
                    } else {
                        state.queue.extend(state.translator.fail("request exceeded the maximum deadline".into()));
                    }
                    state.finished = true;
                }
            }
        }
    })
    .chain(stream::once(async { Ok(Event::default().data("[DONE]")) }))
}

fn to_sse_event(event: &a::StreamEvent) -> Result<Event, std::convert::Infallible> {
    let json = sonic_rs::to_string(event).unwrap_or_else(|e| {
        log::error!(target: "gateway::dispatcher", "failed to serialize stream event: {e}");
        r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_string()
    });
    Ok(Event::default().event(event.event_name()).data(json))
}

async fn assemble_non_streaming(
    mut translator: Translator,
    mut upstream: Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>>,
) -> a::Response {
    let mut assembler = Assembler::new();
    for event in translator.start() {
        assembler.consume(&event);
    }

    let mut saw_done = false;
    let mut saw_any_chunk = false;
    let deadline = tokio::time::sleep(REQUEST_DEADLINE);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            next = upstream.next() => {
                match next {
                    Some(UpstreamEvent::Chunk(chunk)) => {
                        saw_any_chunk = true;
                        for event in translator.handle_chunk(chunk) {
                            assembler.consume(&event);
                        }
                    }
                    Some(UpstreamEvent::Done) => {
                        saw_done = true;
                        for event in translator.finish() {
                            assembler.consume(&event);
                        }
                        break;
                    }
                    None => break,
                }
            }
            () = &mut deadline => {
                log::warn!(target: "gateway::dispatcher", "request exceeded {REQUEST_DEADLINE:?} deadline, aborting upstream");
                if saw_any_chunk {
                    for event in translator.finish_with_reason(a::StopReason::MaxTokens) {
                        assembler.consume(&event);
                    }
                } else {
                    for event in translator.fail("request exceeded the maximum deadline".into()) {
                        assembler.consume(&event);
                    }
                }
                saw_done = true;
                break;
            }
        }
    }

    if !saw_done {
        for event in translator.fail("upstream connection ended unexpectedly".into()) {
            assembler.consume(&event);
        }
    }

    assembler.finish()
}
