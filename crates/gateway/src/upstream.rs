//! Upstream Client (§4.D): POSTs the translated request to the configured
//! OpenAI-compatible endpoint and exposes the response as a lazy sequence of
//! parsed chunks, mapping non-2xx responses onto the §4.D error table.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt, stream};
use secrecy::ExposeSecret;

use crate::error::GatewayError;
use crate::resolver::ResolvedRoute;
use crate::sse::{ParsedEvent, SseParser};
use crate::types::openai::ChatCompletionRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UpstreamClient {
    http: reqwest::Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("reqwest client builds with static TLS config");
        Self { http }
    }

    /// Sends `body` to `route` and returns its response as a byte-level SSE
    /// stream, translated into [`UpstreamEvent`]s. Always requests a
    /// streaming response upstream, even for a non-streaming client request
    /// (§4.G reuses the translator either way).
    pub async fn stream_chat_completion(
        &self,
        route: &ResolvedRoute,
        body: &ChatCompletionRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>>, GatewayError> {
        let url = format!("{}{}", route.base_url, route.api_path);
        let payload = sonic_rs::to_vec(body)
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to serialize upstream request: {e}")))?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(route.bearer_token.expose_secret())
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| GatewayError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_error_response(status.as_u16(), &body_text));
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream())))
    }
}

fn map_error_response(status: u16, body: &str) -> GatewayError {
    let lowered = body.to_lowercase();
    match status {
        401 | 403 => GatewayError::AuthError(body.to_string()),
        404 if lowered.contains("model") => GatewayError::ModelNotFound(body.to_string()),
        400 if lowered.contains("tool") || lowered.contains("not supported") => {
            GatewayError::CapabilityError(body.to_string())
        }
        429 => GatewayError::RateLimited(body.to_string()),
        500..=599 => GatewayError::UpstreamError(body.to_string()),
        _ => GatewayError::UpstreamError(format!("status {status}: {body}")),
    }
}

#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Chunk(crate::types::openai::ChatCompletionChunk),
    Done,
}

struct ParseState<S> {
    bytes: S,
    parser: SseParser,
    queue: VecDeque<ParsedEvent>,
}

/// Drives a raw upstream byte stream through the SSE parser and yields one
/// decoded chunk (or the `Done` sentinel) at a time. Per-chunk JSON parse
/// errors are logged and skipped (§4.F.5); they never end the stream.
fn parse_sse_stream<S, B, E>(bytes: S) -> impl Stream<Item = UpstreamEvent>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        ParseState {
            bytes,
            parser: SseParser::new(),
            queue: VecDeque::new(),
        },
        |mut state| async move {
            loop {
                while let Some(event) = state.queue.pop_front() {
                    match event {
                        ParsedEvent::Done => return Some((UpstreamEvent::Done, state)),
                        ParsedEvent::Data { data, .. } => match sonic_rs::from_str(&data) {
                            Ok(chunk) => return Some((UpstreamEvent::Chunk(chunk), state)),
                            Err(e) => {
                                log::warn!(target: "gateway::upstream", "skipping malformed SSE chunk: {e}");
                                continue;
                            }
                        },
                    }
                }

                match state.bytes.next().await {
                    Some(Ok(bytes)) => {
                        let events = state.parser.push(bytes.as_ref());
                        state.queue.extend(events);
                    }
                    Some(Err(e)) => {
                        log::warn!(target: "gateway::upstream", "upstream stream read error: {e}");
                        return None;
                    }
                    None => return None,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_401_to_auth_error() {
        assert!(matches!(map_error_response(401, "bad key"), GatewayError::AuthError(_)));
    }

    #[test]
    fn maps_429_to_rate_limited() {
        assert!(matches!(map_error_response(429, "slow down"), GatewayError::RateLimited(_)));
    }

    #[test]
    fn maps_5xx_to_upstream_error() {
        assert!(matches!(map_error_response(503, "down"), GatewayError::UpstreamError(_)));
    }

    #[tokio::test]
    async fn parses_chunks_and_done_sentinel() {
        let raw = b"data: {\"choices\":[]}\n\ndata: [DONE]\n\n".to_vec();
        let source = stream::iter(vec![Ok::<_, std::io::Error>(raw)]);
        let mut parsed = Box::pin(parse_sse_stream(source));
        let first = parsed.next().await.unwrap();
        assert!(matches!(first, UpstreamEvent::Chunk(_)));
        let second = parsed.next().await.unwrap();
        assert!(matches!(second, UpstreamEvent::Done));
    }
}
