//! Stream Translator (§4.F): the core state machine. Consumes parsed OpenAI
//! chunks (or the `DONE` sentinel, or an upstream failure) and emits
//! Anthropic `StreamEvent`s, one `Translator` per in-flight response.

use uuid::Uuid;

use crate::adapters::{Adapter, TextSegment};
use crate::block_table::BlockTable;
use crate::types::anthropic::{
    BlockDelta, ContentBlockStart, MessageDeltaPayload, MessageDeltaUsage, MessageStartPayload, StopReason,
    StreamErrorPayload, StreamEvent, Usage,
};
use crate::types::openai::{ChatCompletionChunk, FinishReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Streaming,
    Ended,
    Errored,
}

pub struct Translator {
    state: State,
    blocks: BlockTable,
    adapter: Box<dyn Adapter>,
    message_id: String,
    model: String,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<StopReason>,
}

impl Translator {
    pub fn new(model: String, input_tokens: u32, adapter: Box<dyn Adapter>) -> Self {
        Self {
            state: State::New,
            blocks: BlockTable::new(),
            adapter,
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model,
            input_tokens,
            output_tokens: 0,
            stop_reason: None,
        }
    }

    /// §4.F.1: `message_start` + `ping`, emitted before the first upstream byte.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        debug_assert_eq!(self.state, State::New);
        self.state = State::Streaming;
        vec![
            StreamEvent::MessageStart {
                message: MessageStartPayload {
                    id: self.message_id.clone(),
                    kind: "message",
                    role: "assistant",
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: 0,
                    },
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// §4.F.2: handles a single parsed `chat.completion.chunk`.
    pub fn handle_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };
        let delta = choice.delta;

        let reasoning = self
            .adapter
            .extract_reasoning(&delta)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        if let Some(reasoning) = reasoning {
            if !self.blocks.is_reasoning_open() {
                events.push(self.blocks.start_reasoning());
            }
            events.push(self.blocks.reasoning_delta(reasoning));
        }

        if let Some(text) = delta.content.filter(|s| !s.is_empty()) {
            let processed = self.adapter.process_text_content(&text);
            for segment in processed.segments {
                match segment {
                    TextSegment::Text(text) => {
                        if let Some(stop) = self.blocks.stop_reasoning() {
                            events.push(stop);
                        }
                        if !self.blocks.is_text_open() {
                            events.push(self.blocks.start_text());
                        }
                        events.push(self.blocks.text_delta(text));
                    }
                    TextSegment::ToolCall(tool_call) => {
                        if let Some(stop) = self.blocks.stop_reasoning() {
                            events.push(stop);
                        }
                        if let Some(stop) = self.blocks.stop_text() {
                            events.push(stop);
                        }
                        let synthetic_index = self.blocks.synthetic_tool_key();
                        let tool_id = format!("tool_{}", Uuid::new_v4().simple());
                        events.push(self.blocks.start_tool(synthetic_index, tool_id, tool_call.name));
                        let args = serde_json::to_string(&tool_call.arguments).unwrap_or_else(|_| "{}".to_string());
                        if let Some(delta_event) = self.blocks.append_tool_args(synthetic_index, &args) {
                            events.push(delta_event);
                        }
                        if let Some(stop) = self.blocks.stop_tool(synthetic_index) {
                            events.push(stop);
                        }
                    }
                }
            }
        }

        for tool_call in delta.tool_calls.into_iter().flatten() {
            let upstream_index = tool_call.index;
            let name = tool_call.function.as_ref().and_then(|f| f.name.clone());
            let arguments = tool_call.function.as_ref().and_then(|f| f.arguments.clone());

            if !self.blocks.has_tool(upstream_index) {
                if let Some(name) = name {
                    if let Some(stop) = self.blocks.stop_reasoning() {
                        events.push(stop);
                    }
                    if let Some(stop) = self.blocks.stop_text() {
                        events.push(stop);
                    }
                    let tool_id = tool_call.id.unwrap_or_else(|| format!("tool_{}", Uuid::new_v4().simple()));
                    events.push(self.blocks.start_tool(upstream_index, tool_id, name));

                    if let Some(pending) = self.blocks.take_pending(upstream_index) {
                        if !pending.is_empty() {
                            if let Some(event) = self.blocks.append_tool_args(upstream_index, &pending) {
                                events.push(event);
                            }
                        }
                    }
                    if let Some(args) = arguments.filter(|s| !s.is_empty()) {
                        if let Some(event) = self.blocks.append_tool_args(upstream_index, &args) {
                            events.push(event);
                        }
                    }
                } else if let Some(args) = arguments.filter(|s| !s.is_empty()) {
                    self.blocks.buffer_pending(upstream_index, &args);
                }
            } else if let Some(args) = arguments.filter(|s| !s.is_empty()) {
                if let Some(event) = self.blocks.append_tool_args(upstream_index, &args) {
                    events.push(event);
                }
            }
        }

        if let Some(finish_reason) = choice.finish_reason {
            events.extend(self.handle_finish_reason(finish_reason));
        }

        events
    }

    fn handle_finish_reason(&mut self, finish_reason: FinishReason) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(stop) = self.blocks.stop_reasoning() {
            events.push(stop);
        }
        if let Some(stop) = self.blocks.stop_text() {
            events.push(stop);
        }

        self.stop_reason = Some(match finish_reason {
            FinishReason::ToolCalls | FinishReason::FunctionCall => {
                for upstream_index in self.blocks.open_tool_upstream_indices() {
                    if let Some(stop) = self.blocks.stop_tool(upstream_index) {
                        events.push(stop);
                    }
                }
                StopReason::ToolUse
            }
            FinishReason::Stop => StopReason::EndTurn,
            FinishReason::Length => StopReason::MaxTokens,
            FinishReason::ContentFilter => StopReason::StopSequence,
            FinishReason::Other(reason) => {
                log::warn!(target: "gateway::translator", "unrecognized finish_reason {reason:?}, defaulting to end_turn");
                StopReason::EndTurn
            }
        });

        events
    }

    /// §4.F.3: termination on `DONE` / upstream EOF with no prior error.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.finish_inner(None)
    }

    /// Like [`Self::finish`], but forces the emitted `stop_reason` rather than
    /// using whatever `finish_reason` the upstream last reported (§5: a
    /// request-deadline abort after data has flowed closes out as
    /// `max_tokens` regardless of what the upstream itself said last).
    pub fn finish_with_reason(&mut self, stop_reason: StopReason) -> Vec<StreamEvent> {
        self.finish_inner(Some(stop_reason))
    }

    fn finish_inner(&mut self, forced_stop_reason: Option<StopReason>) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let leftover = self.adapter.flush();
        if !leftover.is_empty() {
            if !self.blocks.is_text_open() {
                events.push(self.blocks.start_text());
            }
            events.push(self.blocks.text_delta(leftover));
        }

        for (upstream_index, fragment) in self.blocks.drain_unresolved_pending() {
            log::warn!(
                target: "gateway::translator",
                "discarding {} unresolved tool-call argument bytes for upstream index {upstream_index} \
                 (function.name never arrived)",
                fragment.len()
            );
        }

        events.extend(self.blocks.close_all());

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason: forced_stop_reason.or(self.stop_reason).or(Some(StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: MessageDeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        self.state = State::Ended;
        events
    }

    /// §4.F.5: upstream error after `message_start` has already gone out.
    pub fn fail(&mut self, message: String) -> Vec<StreamEvent> {
        let mut events = self.blocks.close_all();
        events.push(StreamEvent::Error {
            error: StreamErrorPayload {
                kind: "api_error",
                message,
            },
        });
        self.state = State::Errored;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DefaultAdapter, XmlToolAdapter};
    use crate::types::openai::{ChatChoiceDelta, ChatMessageDelta, StreamingFunctionCall, StreamingToolCall, Usage as UpstreamUsage};

    fn chunk(content: Option<&str>, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: None,
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta: ChatMessageDelta {
                    role: None,
                    content: content.map(str::to_string),
                    reasoning_content: None,
                    reasoning: None,
                    thinking: None,
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage: None,
        }
    }

    #[test]
    fn s1_simple_text_reply() {
        let mut t = Translator::new("gpt-4o".into(), 5, Box::new(DefaultAdapter));
        let mut events = t.start();
        events.extend(t.handle_chunk(chunk(Some("He"), None)));
        events.extend(t.handle_chunk(chunk(Some("llo"), None)));
        let mut final_chunk = chunk(None, Some(FinishReason::Stop));
        final_chunk.usage = Some(UpstreamUsage {
            prompt_tokens: 5,
            completion_tokens: 2,
        });
        events.extend(t.handle_chunk(final_chunk));
        events.extend(t.finish());

        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], StreamEvent::Ping));
        assert!(matches!(events[2], StreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(&events[3], StreamEvent::ContentBlockDelta { index: 0, delta: BlockDelta::TextDelta { text } } if text == "He"));
        assert!(matches!(&events[4], StreamEvent::ContentBlockDelta { index: 0, delta: BlockDelta::TextDelta { text } } if text == "llo"));
        assert!(matches!(events[5], StreamEvent::ContentBlockStop { index: 0 }));
        match &events[6] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
                assert_eq!(usage.output_tokens, 2);
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
        assert!(matches!(events[7], StreamEvent::MessageStop));
    }

    #[test]
    fn s2_tool_call_split_arguments() {
        let mut t = Translator::new("gpt-4o".into(), 5, Box::new(DefaultAdapter));
        let mut events = t.start();

        let mut start = chunk(None, None);
        start.choices[0].delta.tool_calls = Some(vec![StreamingToolCall {
            index: 0,
            id: Some("call_42".into()),
            function: Some(StreamingFunctionCall {
                name: Some("get_weather".into()),
                arguments: Some("{\"loc".into()),
            }),
        }]);
        events.extend(t.handle_chunk(start));

        let mut cont = chunk(None, None);
        cont.choices[0].delta.tool_calls = Some(vec![StreamingToolCall {
            index: 0,
            id: None,
            function: Some(StreamingFunctionCall {
                name: None,
                arguments: Some("ation\":\"Paris\"}".into()),
            }),
        }]);
        events.extend(t.handle_chunk(cont));
        events.extend(t.handle_chunk(chunk(None, Some(FinishReason::ToolCalls))));
        events.extend(t.finish());

        assert!(matches!(
            &events[2],
            StreamEvent::ContentBlockStart { index: 0, content_block: ContentBlockStart::ToolUse { id, name, .. } }
            if id == "call_42" && name == "get_weather"
        ));
        let mut concatenated = String::new();
        for event in &events {
            if let StreamEvent::ContentBlockDelta { delta: BlockDelta::InputJsonDelta { partial_json }, .. } = event {
                concatenated.push_str(partial_json);
            }
        }
        let parsed: serde_json::Value = serde_json::from_str(&concatenated).unwrap();
        assert_eq!(parsed["location"], "Paris");

        let stop_reason_event = events.iter().find_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => delta.stop_reason,
            _ => None,
        });
        assert_eq!(stop_reason_event, Some(StopReason::ToolUse));
    }

    #[test]
    fn s6_xml_tool_extraction_splits_into_three_blocks() {
        let mut t = Translator::new("grok-beta".into(), 5, Box::new(XmlToolAdapter::default()));
        let mut events = t.start();
        events.extend(t.handle_chunk(chunk(
            Some(
                "I'll run it.\n<function_calls>\n<invoke name=\"bash\">\n<parameter name=\"command\">ls</parameter>\n</invoke>\n</function_calls>\nDone.",
            ),
            Some(FinishReason::Stop),
        )));
        events.extend(t.finish());

        let starts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart { index, content_block } => Some((*index, content_block)),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 3);
        assert!(matches!(starts[0].1, ContentBlockStart::Text { .. }));
        assert!(matches!(starts[1].1, ContentBlockStart::ToolUse { ref name, .. } if name == "bash"));
        assert!(matches!(starts[2].1, ContentBlockStart::Text { .. }));
    }

    #[test]
    fn s3_text_then_tool_call_uses_distinct_ascending_indices() {
        let mut t = Translator::new("gpt-4o".into(), 5, Box::new(DefaultAdapter));
        let mut events = t.start();
        events.extend(t.handle_chunk(chunk(Some("Let me check that."), None)));

        let mut start = chunk(None, None);
        start.choices[0].delta.tool_calls = Some(vec![StreamingToolCall {
            index: 0,
            id: Some("call_1".into()),
            function: Some(StreamingFunctionCall {
                name: Some("get_weather".into()),
                arguments: Some("{}".into()),
            }),
        }]);
        events.extend(t.handle_chunk(start));
        events.extend(t.handle_chunk(chunk(None, Some(FinishReason::ToolCalls))));
        events.extend(t.finish());

        let starts: Vec<(u32, &ContentBlockStart)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart { index, content_block } => Some((*index, content_block)),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(matches!(starts[0], (0, ContentBlockStart::Text { .. })));
        assert!(matches!(starts[1], (1, ContentBlockStart::ToolUse { .. })));
    }

    #[test]
    fn reasoning_delta_is_picked_up_regardless_of_upstream_field_spelling() {
        // A family that spells reasoning as `thinking` rather than
        // `reasoning_content` must still produce a thinking block, since
        // `DefaultAdapter::extract_reasoning` checks every known spelling.
        let mut t = Translator::new("gpt-4o".into(), 5, Box::new(DefaultAdapter));
        let mut events = t.start();

        let mut reasoning_chunk = chunk(None, None);
        reasoning_chunk.choices[0].delta.thinking = Some("carrying the one...".into());
        events.extend(t.handle_chunk(reasoning_chunk));
        events.extend(t.handle_chunk(chunk(Some("42"), Some(FinishReason::Stop))));
        events.extend(t.finish());

        let starts: Vec<&ContentBlockStart> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart { content_block, .. } => Some(content_block),
                _ => None,
            })
            .collect();
        assert!(
            starts.iter().any(|b| matches!(b, ContentBlockStart::Thinking { .. })),
            "expected a thinking block to open from the `thinking` field, got {starts:?}"
        );
    }

    #[test]
    fn mid_stream_failure_closes_open_blocks_and_emits_error_event() {
        let mut t = Translator::new("gpt-4o".into(), 5, Box::new(DefaultAdapter));
        let mut events = t.start();
        events.extend(t.handle_chunk(chunk(Some("partial"), None)));
        events.extend(t.fail("upstream connection reset".into()));

        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
        let stops = events.iter().filter(|e| matches!(e, StreamEvent::ContentBlockStop { .. })).count();
        assert_eq!(stops, 1);
    }
}
