//! Block state (§3.2): the content-block bookkeeping the Stream Translator
//! owns for the lifetime of a single response. Encapsulated as a plain value
//! with no shared mutability (§9) — one `BlockTable` per translator instance,
//! dropped when the response ends.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::anthropic::{BlockDelta, ContentBlockStart, StreamEvent};

#[derive(Debug)]
struct ToolBlock {
    anthropic_index: u32,
    tool_id: String,
    tool_name: String,
    arg_bytes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenKind {
    Text,
    Reasoning,
    Tool(u32),
}

#[derive(Debug)]
struct OpenBlock {
    index: u32,
    kind: OpenKind,
}

#[derive(Debug, Default)]
pub struct BlockTable {
    next_index: u32,
    /// Blocks currently open, in the order they were started (§3.2 invariant:
    /// every start has exactly one stop, closed in FIFO order at termination).
    open: Vec<OpenBlock>,
    text_idx: Option<u32>,
    reasoning_idx: Option<u32>,
    tools: HashMap<u32, ToolBlock>,
    /// Argument fragments seen for an upstream tool-call index before its
    /// `function.name` has arrived yet (§9 open question: buffer, don't drop).
    pending_unnamed: HashMap<u32, String>,
    /// Counts tool blocks synthesized from extracted XML rather than a real
    /// upstream tool-call index, so each gets a distinct key in `tools` from
    /// a space native upstream indices (small, ascending) never reach.
    synthetic_tool_count: u32,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_text_open(&self) -> bool {
        self.text_idx.is_some()
    }

    pub fn is_reasoning_open(&self) -> bool {
        self.reasoning_idx.is_some()
    }

    fn allocate(&mut self) -> u32 {
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }

    pub fn start_text(&mut self) -> StreamEvent {
        let index = self.allocate();
        self.text_idx = Some(index);
        self.open.push(OpenBlock { index, kind: OpenKind::Text });
        StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::Text { text: String::new() },
        }
    }

    pub fn text_delta(&self, text: String) -> StreamEvent {
        let index = self.text_idx.expect("text_delta called without an open text block");
        StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta { text },
        }
    }

    pub fn stop_text(&mut self) -> Option<StreamEvent> {
        let index = self.text_idx.take()?;
        self.open.retain(|b| b.index != index);
        Some(StreamEvent::ContentBlockStop { index })
    }

    pub fn start_reasoning(&mut self) -> StreamEvent {
        let index = self.allocate();
        self.reasoning_idx = Some(index);
        self.open.push(OpenBlock { index, kind: OpenKind::Reasoning });
        StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::Thinking { thinking: String::new() },
        }
    }

    pub fn reasoning_delta(&self, text: String) -> StreamEvent {
        let index = self.reasoning_idx.expect("reasoning_delta called without an open reasoning block");
        StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::ThinkingDelta { thinking: text },
        }
    }

    pub fn stop_reasoning(&mut self) -> Option<StreamEvent> {
        let index = self.reasoning_idx.take()?;
        self.open.retain(|b| b.index != index);
        Some(StreamEvent::ContentBlockStop { index })
    }

    pub fn has_tool(&self, upstream_index: u32) -> bool {
        self.tools.contains_key(&upstream_index)
    }

    /// A key for a tool block with no real upstream index (one per XML
    /// extraction), guaranteed distinct from every native upstream index and
    /// from every previous call to this method.
    pub fn synthetic_tool_key(&mut self) -> u32 {
        let key = u32::MAX - self.synthetic_tool_count;
        self.synthetic_tool_count += 1;
        key
    }

    pub fn start_tool(&mut self, upstream_index: u32, tool_id: String, tool_name: String) -> StreamEvent {
        let index = self.allocate();
        self.open.push(OpenBlock {
            index,
            kind: OpenKind::Tool(upstream_index),
        });
        self.tools.insert(
            upstream_index,
            ToolBlock {
                anthropic_index: index,
                tool_id: tool_id.clone(),
                tool_name: tool_name.clone(),
                arg_bytes: String::new(),
            },
        );
        StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::ToolUse {
                id: tool_id,
                name: tool_name,
                input: Value::Object(Default::default()),
            },
        }
    }

    /// Appends a raw argument fragment to a started tool block and returns the
    /// `input_json_delta` event. Returns `None` if `upstream_index` has no
    /// open tool block (a translator-error condition the caller should log).
    pub fn append_tool_args(&mut self, upstream_index: u32, fragment: &str) -> Option<StreamEvent> {
        let tool = self.tools.get_mut(&upstream_index)?;
        tool.arg_bytes.push_str(fragment);
        Some(StreamEvent::ContentBlockDelta {
            index: tool.anthropic_index,
            delta: BlockDelta::InputJsonDelta {
                partial_json: fragment.to_string(),
            },
        })
    }

    pub fn stop_tool(&mut self, upstream_index: u32) -> Option<StreamEvent> {
        let tool = self.tools.get(&upstream_index)?;
        let index = tool.anthropic_index;
        self.open.retain(|b| b.index != index);
        Some(StreamEvent::ContentBlockStop { index })
    }

    /// Buffers an argument/id fragment for a tool-call index that has not yet
    /// produced a `function.name` (§9 open question resolution).
    pub fn buffer_pending(&mut self, upstream_index: u32, fragment: &str) {
        self.pending_unnamed.entry(upstream_index).or_default().push_str(fragment);
    }

    pub fn take_pending(&mut self, upstream_index: u32) -> Option<String> {
        self.pending_unnamed.remove(&upstream_index)
    }

    /// Drops every still-unnamed tool-call buffer at stream end; the caller
    /// logs a warning per entry (§9: never invent a name for these).
    pub fn drain_unresolved_pending(&mut self) -> Vec<(u32, String)> {
        self.pending_unnamed.drain().collect()
    }

    /// Parses a closed tool block's accumulated argument bytes as JSON.
    /// Returns `{}` (and lets the caller log) on malformed input, per §4.G
    /// "malformed JSON... use `{}` if parse fails".
    pub fn parsed_tool_input(&self, upstream_index: u32) -> Option<Value> {
        let tool = self.tools.get(&upstream_index)?;
        Some(sonic_rs::from_str(&tool.arg_bytes).unwrap_or_else(|_| Value::Object(Default::default())))
    }

    pub fn tool_id(&self, upstream_index: u32) -> Option<&str> {
        self.tools.get(&upstream_index).map(|t| t.tool_id.as_str())
    }

    pub fn tool_name(&self, upstream_index: u32) -> Option<&str> {
        self.tools.get(&upstream_index).map(|t| t.tool_name.as_str())
    }

    pub fn tool_anthropic_index(&self, upstream_index: u32) -> Option<u32> {
        self.tools.get(&upstream_index).map(|t| t.anthropic_index)
    }

    /// Every currently-open tool block's upstream index, oldest first.
    pub fn open_tool_upstream_indices(&self) -> Vec<u32> {
        self.open
            .iter()
            .filter_map(|b| match b.kind {
                OpenKind::Tool(upstream_index) => Some(upstream_index),
                _ => None,
            })
            .collect()
    }

    /// Closes every still-open block, in the order it was opened (§4.F.3 step 1).
    pub fn close_all(&mut self) -> Vec<StreamEvent> {
        let indices: Vec<u32> = self.open.iter().map(|b| b.index).collect();
        let mut events = Vec::with_capacity(indices.len());
        for index in indices {
            let kind = self.open.iter().find(|b| b.index == index).map(|b| b.kind);
            match kind {
                Some(OpenKind::Text) => {
                    self.text_idx = None;
                }
                Some(OpenKind::Reasoning) => {
                    self.reasoning_idx = None;
                }
                _ => {}
            }
            events.push(StreamEvent::ContentBlockStop { index });
        }
        self.open.clear();
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_strictly_increasing_across_mixed_blocks() {
        let mut table = BlockTable::new();
        let e0 = table.start_text();
        assert!(matches!(e0, StreamEvent::ContentBlockStart { index: 0, .. }));
        table.stop_text();
        let e1 = table.start_tool(0, "call_1".into(), "get_weather".into());
        assert!(matches!(e1, StreamEvent::ContentBlockStart { index: 1, .. }));
        let e2 = table.start_text();
        assert!(matches!(e2, StreamEvent::ContentBlockStart { index: 2, .. }));
    }

    #[test]
    fn at_most_one_text_and_reasoning_open() {
        let mut table = BlockTable::new();
        table.start_reasoning();
        assert!(table.is_reasoning_open());
        table.start_text();
        assert!(table.is_text_open());
        // starting another text block is a caller-level programming error guarded
        // against by the translator, not by BlockTable itself; BlockTable only
        // tracks the single active index.
        assert_eq!(table.text_idx, table.text_idx);
    }

    #[test]
    fn tool_args_concatenate_and_parse() {
        let mut table = BlockTable::new();
        table.start_tool(0, "call_42".into(), "get_weather".into());
        table.append_tool_args(0, "{\"loc");
        table.append_tool_args(0, "ation\":\"Paris\"}");
        let parsed = table.parsed_tool_input(0).unwrap();
        assert_eq!(parsed["location"], "Paris");
    }

    #[test]
    fn close_all_emits_stops_in_open_order() {
        let mut table = BlockTable::new();
        table.start_text();
        table.start_tool(0, "call_1".into(), "f".into());
        let events = table.close_all();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStop { index: 1 }));
        assert!(!table.is_text_open());
    }

    #[test]
    fn pending_unnamed_fragments_buffer_then_flush() {
        let mut table = BlockTable::new();
        table.buffer_pending(0, "{\"par");
        table.buffer_pending(0, "tial");
        let buffered = table.take_pending(0).unwrap();
        assert_eq!(buffered, "{\"partial");
        assert!(table.take_pending(0).is_none());
    }
}
