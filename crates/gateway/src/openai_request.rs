//! OpenAI Request Builder (§4.B): canonical request → OpenAI chat-completions payload.

use serde_json::{Value, json};

use crate::identity_filter;
use crate::types::canonical::{Block, CanonicalRequest, CanonicalToolChoice, Role, ToolResultContent, Turn};
use crate::types::openai::{
    ChatCompletionRequest, ChatMessage, ChatRole, ContentPart, FunctionCall, FunctionDefinition, ImageUrl,
    MessageContent, StreamOptions, Tool, ToolCall, ToolCallType, ToolChoice, ToolChoiceFunction, ToolChoiceMode,
};

/// Builds the OpenAI request. `extra` starts empty and is handed to the
/// selected adapter's `prepare_request` (§4.C) before the caller sends it.
pub fn build(req: &CanonicalRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if !req.system.is_empty() {
        let joined = req.system.join("\n\n");
        let content = if identity_filter::should_apply(&joined) {
            identity_filter::apply(&joined)
        } else {
            joined
        };
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: Some(MessageContent::Text(content)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for turn in &req.messages {
        build_turn(turn, &mut messages);
    }

    let tools = if req.tools.is_empty() {
        None
    } else {
        Some(
            req.tools
                .iter()
                .map(|t| Tool {
                    tool_type: ToolCallType::Function,
                    function: FunctionDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: strip_uri_format(t.input_schema.clone()),
                    },
                })
                .collect(),
        )
    };

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        CanonicalToolChoice::Auto => ToolChoice::Mode(ToolChoiceMode::Auto),
        CanonicalToolChoice::None => ToolChoice::Mode(ToolChoiceMode::None),
        CanonicalToolChoice::Tool { name } => ToolChoice::Specific {
            tool_type: ToolCallType::Function,
            function: ToolChoiceFunction { name: name.clone() },
        },
    });

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        stream: req.stream,
        stream_options: req.stream.then_some(StreamOptions { include_usage: true }),
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        tools,
        tool_choice,
        stop: None,
        extra: Value::Null,
    }
}

fn build_turn(turn: &Turn, out: &mut Vec<ChatMessage>) {
    match turn.role {
        Role::User => build_user_turn(turn, out),
        Role::Assistant => build_assistant_turn(turn, out),
    }
}

fn build_user_turn(turn: &Turn, out: &mut Vec<ChatMessage>) {
    // tool_result blocks become `tool` messages emitted before any remaining content (§4.B).
    for block in &turn.blocks {
        if let Block::ToolResult { tool_use_id, content, .. } = block {
            let content = match content {
                ToolResultContent::Text(s) => s.clone(),
                ToolResultContent::Json(v) => serde_json::to_string(v).unwrap_or_default(),
            };
            out.push(ChatMessage {
                role: ChatRole::Tool,
                content: Some(MessageContent::Text(content)),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            });
        }
    }

    let parts: Vec<ContentPart> = turn
        .blocks
        .iter()
        .filter_map(|block| match block {
            Block::Text(text) => Some(ContentPart::Text { text: text.clone() }),
            Block::Image { media_type, data } => Some(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{media_type};base64,{data}"),
                },
            }),
            Block::ToolUse { .. } | Block::ToolResult { .. } => None,
        })
        .collect();

    if parts.is_empty() {
        return;
    }

    // A single text part collapses to a plain string; anything multimodal keeps the array form.
    let content = if parts.len() == 1 {
        match &parts[0] {
            ContentPart::Text { text } => MessageContent::Text(text.clone()),
            ContentPart::ImageUrl { .. } => MessageContent::Parts(parts),
        }
    } else {
        MessageContent::Parts(parts)
    };

    out.push(ChatMessage {
        role: ChatRole::User,
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    });
}

fn build_assistant_turn(turn: &Turn, out: &mut Vec<ChatMessage>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &turn.blocks {
        match block {
            Block::Text(t) => text.push_str(t),
            Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                tool_type: ToolCallType::Function,
                function: FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            Block::Image { .. } | Block::ToolResult { .. } => {}
        }
    }

    let content = if text.is_empty() { None } else { Some(MessageContent::Text(text)) };

    out.push(ChatMessage {
        role: ChatRole::Assistant,
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    });
}

/// Recursively strips any `"format": "uri"` property from a JSON Schema tree
/// (§4.B), since most OpenAI-compatible upstreams reject it.
pub fn strip_uri_format(schema: Value) -> Value {
    match schema {
        Value::Object(mut map) => {
            if map.get("format").and_then(Value::as_str) == Some("uri") {
                map.remove("format");
            }
            for (_, v) in map.iter_mut() {
                *v = strip_uri_format(v.take());
            }
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(strip_uri_format).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::canonical::ToolResultContent;

    #[test]
    fn strips_nested_uri_format() {
        let schema = json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "format": "uri"},
                "nested": {"type": "object", "properties": {"link": {"type": "string", "format": "uri"}}}
            }
        });
        let stripped = strip_uri_format(schema);
        assert_eq!(stripped["properties"]["url"].get("format"), None);
        assert_eq!(stripped["properties"]["nested"]["properties"]["link"].get("format"), None);
    }

    #[test]
    fn tool_result_turn_precedes_assistant_tool_call_order() {
        // S4: assistant tool_use emits first, followed by the tool-result message.
        let req = CanonicalRequest {
            model: "gpt-4o".into(),
            system: vec![],
            messages: vec![
                Turn {
                    role: Role::Assistant,
                    blocks: vec![Block::ToolUse {
                        id: "t1".into(),
                        name: "calc".into(),
                        input: json!({"a": 1, "b": 2}),
                    }],
                },
                Turn {
                    role: Role::User,
                    blocks: vec![Block::ToolResult {
                        tool_use_id: "t1".into(),
                        content: ToolResultContent::Text("3".into()),
                        is_error: false,
                    }],
                },
            ],
            tools: vec![],
            tool_choice: None,
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            stream: false,
            thinking: None,
        };

        let built = build(&req);
        assert_eq!(built.messages.len(), 2);
        let assistant = &built.messages[0];
        assert_eq!(assistant.role, ChatRole::Assistant);
        assert!(assistant.content.is_none());
        let tool_calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.arguments, r#"{"a":1,"b":2}"#);

        let tool_msg = &built.messages[1];
        assert_eq!(tool_msg.role, ChatRole::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("t1"));
    }
}
