//! Model Adapter Registry (§4.C): per-family request tweaks and streaming
//! text post-processing, selected once per request by a first-match scan
//! over model id substrings.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::types::canonical::CanonicalRequest;
use crate::types::openai::{ChatCompletionRequest, ChatMessage, ChatMessageDelta, ChatRole, MessageContent};

/// A tool call synthesized from text content rather than a native
/// `tool_calls` delta (only the XML-extracting adapter produces these).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// One piece of a processed text delta, in emission order. A plain adapter
/// always yields a single `Text` segment; the XML-extracting adapters can
/// yield `Text, ToolCall, Text` once a complete block closes, so the
/// translator opens/closes the right block kind for each segment in turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSegment {
    Text(String),
    ToolCall(ExtractedToolCall),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedText {
    pub segments: Vec<TextSegment>,
}

impl ProcessedText {
    fn plain(text: String) -> Self {
        if text.is_empty() {
            Self::default()
        } else {
            Self {
                segments: vec![TextSegment::Text(text)],
            }
        }
    }
}

/// Capability set a model family implements (§4.C). One instance is
/// constructed per request and owns whatever streaming state its
/// `process_text_content` needs across deltas.
pub trait Adapter: Send {
    fn prepare_request(&mut self, payload: ChatCompletionRequest, canonical: &CanonicalRequest) -> ChatCompletionRequest {
        let _ = canonical;
        payload
    }

    fn process_text_content(&mut self, delta_text: &str) -> ProcessedText {
        ProcessedText::plain(delta_text.to_string())
    }

    /// Pulls reasoning/thinking text out of a delta. Families spell this
    /// field differently (`reasoning_content`, `reasoning`, `thinking`); the
    /// default checks all three so a plain `DefaultAdapter` still sees
    /// whichever one an upstream happens to send. A family-specific adapter
    /// overrides this only if it needs to prefer one field over another.
    fn extract_reasoning<'a>(&self, delta: &'a ChatMessageDelta) -> Option<&'a str> {
        delta
            .reasoning_content
            .as_deref()
            .or(delta.reasoning.as_deref())
            .or(delta.thinking.as_deref())
    }

    /// Whatever text is still held back when the stream ends without the
    /// adapter ever resolving it (e.g. an unclosed `<function_calls>` tag).
    fn flush(&mut self) -> String {
        String::new()
    }

    fn reset(&mut self) {}
}

/// Passthrough adapter; always matches, so it must sort last in the registry.
#[derive(Default)]
pub struct DefaultAdapter;

impl Adapter for DefaultAdapter {}

/// MiniMax: request-side only. `reasoning_split` tells the upstream to keep
/// chain-of-thought out of `content` and in `reasoning_content` instead.
#[derive(Default)]
pub struct MiniMaxAdapter;

impl Adapter for MiniMaxAdapter {
    fn prepare_request(&mut self, mut payload: ChatCompletionRequest, canonical: &CanonicalRequest) -> ChatCompletionRequest {
        if canonical.thinking.is_some() {
            merge_extra(&mut payload.extra, json!({"reasoning_split": true}));
        }
        payload
    }
}

const GROK_SYSTEM_NOTE: &str =
    "Always respond with tool calls in the standard OpenAI function-calling format, never as inline XML.";

/// Grok / x-ai: prepends a system note steering the model away from its
/// tendency to emit tool calls as inline XML, and shares the XML extractor
/// for the cases where it does so anyway.
#[derive(Default)]
pub struct GrokAdapter {
    extractor: XmlToolExtractor,
}

impl Adapter for GrokAdapter {
    fn prepare_request(&mut self, mut payload: ChatCompletionRequest, _canonical: &CanonicalRequest) -> ChatCompletionRequest {
        payload.messages.insert(
            0,
            ChatMessage {
                role: ChatRole::System,
                content: Some(MessageContent::Text(GROK_SYSTEM_NOTE.to_string())),
                tool_calls: None,
                tool_call_id: None,
            },
        );
        payload
    }

    fn process_text_content(&mut self, delta_text: &str) -> ProcessedText {
        self.extractor.process(delta_text)
    }

    fn flush(&mut self) -> String {
        self.extractor.flush_incomplete()
    }

    fn reset(&mut self) {
        self.extractor.reset();
    }
}

/// Generic adapter for families that embed tool calls as
/// `<function_calls><invoke name="...">...</invoke></function_calls>` XML
/// inside otherwise plain text content.
#[derive(Default)]
pub struct XmlToolAdapter {
    extractor: XmlToolExtractor,
}

impl Adapter for XmlToolAdapter {
    fn process_text_content(&mut self, delta_text: &str) -> ProcessedText {
        self.extractor.process(delta_text)
    }

    fn flush(&mut self) -> String {
        self.extractor.flush_incomplete()
    }

    fn reset(&mut self) {
        self.extractor.reset();
    }
}

static FUNCTION_CALLS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function_calls>(.*?)</function_calls>").unwrap());
static INVOKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?s)<invoke\s+name="([^"]*)">(.*?)</invoke>"#).unwrap());
static PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<parameter\s+name="([^"]*)">(.*?)</parameter>"#).unwrap());

/// Streaming-safe `<function_calls>` extraction, shared by [`GrokAdapter`]
/// and [`XmlToolAdapter`]. Buffers text until either a complete block closes
/// or the buffer is provably free of a block opening tag, so a `<function_`
/// marker split across two deltas is never emitted as visible text.
#[derive(Default)]
struct XmlToolExtractor {
    buffer: String,
}

impl XmlToolExtractor {
    fn process(&mut self, delta_text: &str) -> ProcessedText {
        self.buffer.push_str(delta_text);

        if let Some(block) = FUNCTION_CALLS_BLOCK.captures(&self.buffer) {
            let whole = block.get(0).unwrap();
            let inner = block.get(1).unwrap().as_str();
            let before = self.buffer[..whole.start()].to_string();
            let after = self.buffer[whole.end()..].to_string();

            let mut segments = Vec::new();
            if !before.is_empty() {
                segments.push(TextSegment::Text(before));
            }
            for invoke in INVOKE.captures_iter(inner) {
                let name = invoke.get(1).unwrap().as_str().to_string();
                let mut args = serde_json::Map::new();
                for param in PARAMETER.captures_iter(invoke.get(2).unwrap().as_str()) {
                    args.insert(
                        param.get(1).unwrap().as_str().to_string(),
                        Value::String(param.get(2).unwrap().as_str().to_string()),
                    );
                }
                segments.push(TextSegment::ToolCall(ExtractedToolCall {
                    name,
                    arguments: Value::Object(args),
                }));
            }
            if !after.is_empty() {
                segments.push(TextSegment::Text(after));
            }

            self.buffer.clear();
            return ProcessedText { segments };
        }

        if self.buffer.contains("<function_calls") {
            // A block has started but not yet closed; withhold everything
            // until it resolves or the stream ends.
            return ProcessedText::default();
        }

        ProcessedText::plain(std::mem::take(&mut self.buffer))
    }

    /// Surfaces whatever is left in the buffer as plain text (§4.C: "at
    /// stream end, are surfaced as text" for incomplete blocks).
    fn flush_incomplete(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn merge_extra(extra: &mut Value, addition: Value) {
    match (extra, addition) {
        (slot @ Value::Null, addition) => *slot = addition,
        (Value::Object(existing), Value::Object(addition)) => existing.extend(addition),
        _ => {}
    }
}

type Predicate = fn(&str) -> bool;
type Factory = fn() -> Box<dyn Adapter>;

/// Ordered predicate/adapter pairs; `select` returns the first match. The
/// default adapter's predicate always returns `true` and must stay last.
pub struct AdapterRegistry {
    entries: Vec<(Predicate, Factory)>,
}

impl AdapterRegistry {
    pub fn with_default_families() -> Self {
        Self {
            entries: vec![
                (|id: &str| id.contains("minimax"), || Box::new(MiniMaxAdapter) as Box<dyn Adapter>),
                (
                    |id: &str| id.contains("grok") || id.contains("x-ai"),
                    || Box::new(GrokAdapter::default()) as Box<dyn Adapter>,
                ),
                (|_: &str| true, || Box::new(DefaultAdapter) as Box<dyn Adapter>),
            ],
        }
    }

    pub fn select(&self, model_id: &str) -> Box<dyn Adapter> {
        let lowercased = model_id.to_lowercase();
        self.entries
            .iter()
            .find(|(predicate, _)| predicate(&lowercased))
            .map(|(_, factory)| factory())
            .expect("default adapter predicate always matches")
    }
}
