//! Non-streaming Assembler (§4.G): folds the same `StreamEvent` sequence the
//! translator produces into a single Anthropic `Response` body, for clients
//! that set `stream:false`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::anthropic::{BlockDelta, ContentBlockStart, Response, ResponseContent, StopReason, StreamEvent, Usage};

enum PartialBlock {
    Text(String),
    Thinking(String),
    ToolUse { id: String, name: String, arg_bytes: String },
}

#[derive(Default)]
pub struct Assembler {
    id: String,
    model: String,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<StopReason>,
    blocks: BTreeMap<u32, PartialBlock>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = message.id.clone();
                self.model = message.model.clone();
                self.input_tokens = message.usage.input_tokens;
            }
            StreamEvent::ContentBlockStart { index, content_block } => {
                let block = match content_block {
                    ContentBlockStart::Text { text } => PartialBlock::Text(text.clone()),
                    ContentBlockStart::Thinking { thinking } => PartialBlock::Thinking(thinking.clone()),
                    ContentBlockStart::ToolUse { id, name, .. } => PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        arg_bytes: String::new(),
                    },
                };
                self.blocks.insert(*index, block);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(block) = self.blocks.get_mut(index) {
                    match (block, delta) {
                        (PartialBlock::Text(text), BlockDelta::TextDelta { text: fragment }) => text.push_str(fragment),
                        (PartialBlock::Thinking(thinking), BlockDelta::ThinkingDelta { thinking: fragment }) => {
                            thinking.push_str(fragment)
                        }
                        (PartialBlock::ToolUse { arg_bytes, .. }, BlockDelta::InputJsonDelta { partial_json }) => {
                            arg_bytes.push_str(partial_json)
                        }
                        _ => {}
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                self.output_tokens = usage.output_tokens;
            }
            StreamEvent::ContentBlockStop { .. } | StreamEvent::MessageStop | StreamEvent::Ping | StreamEvent::Error { .. } => {}
        }
    }

    pub fn finish(self) -> Response {
        let content = self
            .blocks
            .into_values()
            .map(|block| match block {
                PartialBlock::Text(text) => ResponseContent::Text { text },
                PartialBlock::Thinking(thinking) => ResponseContent::Thinking {
                    thinking,
                    signature: String::new(),
                },
                PartialBlock::ToolUse { id, name, arg_bytes } => {
                    let input = if arg_bytes.is_empty() {
                        Value::Object(Default::default())
                    } else {
                        sonic_rs::from_str(&arg_bytes).unwrap_or_else(|e| {
                            log::warn!(target: "gateway::assembler", "tool block {id} had malformed JSON arguments: {e}");
                            Value::Object(Default::default())
                        })
                    };
                    ResponseContent::ToolUse { id, name, input }
                }
            })
            .collect();

        Response {
            id: self.id,
            kind: "message",
            role: "assistant",
            content,
            model: self.model,
            stop_reason: self.stop_reason,
            stop_sequence: None,
            usage: Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_table::BlockTable;
    use crate::types::anthropic::{MessageDeltaPayload, MessageDeltaUsage, MessageStartPayload};

    #[test]
    fn assembles_text_then_tool_use_in_order() {
        let mut blocks = BlockTable::new();
        let mut assembler = Assembler::new();

        assembler.consume(&StreamEvent::MessageStart {
            message: MessageStartPayload {
                id: "msg_1".into(),
                kind: "message",
                role: "assistant",
                content: vec![],
                model: "gpt-4o".into(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 0,
                },
            },
        });

        assembler.consume(&blocks.start_text());
        assembler.consume(&blocks.text_delta("Looking up... ".into()));
        assembler.consume(&blocks.stop_text().unwrap());

        assembler.consume(&blocks.start_tool(0, "call_1".into(), "get_weather".into()));
        assembler.consume(&blocks.append_tool_args(0, "{\"city\":\"Paris\"}").unwrap());
        assembler.consume(&blocks.stop_tool(0).unwrap());

        assembler.consume(&StreamEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason: Some(StopReason::ToolUse),
                stop_sequence: None,
            },
            usage: MessageDeltaUsage { output_tokens: 12 },
        });

        let response = assembler.finish();
        assert_eq!(response.content.len(), 2);
        assert!(matches!(&response.content[0], ResponseContent::Text { text } if text == "Looking up... "));
        assert!(matches!(&response.content[1], ResponseContent::ToolUse { name, .. } if name == "get_weather"));
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 12);
    }
}
