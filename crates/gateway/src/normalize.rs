//! Message Normalizer (§4.A): Anthropic wire request → canonical request.

use std::collections::HashSet;

use crate::error::GatewayError;
use crate::types::anthropic as a;
use crate::types::canonical::{
    Block, CanonicalRequest, CanonicalTool, CanonicalToolChoice, Role, ThinkingBudget, Turn, ToolResultContent,
};

pub struct Normalized {
    pub request: CanonicalRequest,
    /// Parameter names the target family doesn't support, dropped during
    /// normalization. Surfaced by the Dispatcher as `X-Dropped-Params`.
    pub dropped: Vec<&'static str>,
}

pub fn normalize(req: a::Request) -> Result<Normalized, GatewayError> {
    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
    }

    let system = normalize_system(req.system)?;

    let mut messages = Vec::with_capacity(req.messages.len());
    let mut known_tool_use_ids = HashSet::new();
    for (turn_idx, msg) in req.messages.into_iter().enumerate() {
        messages.push(normalize_turn(turn_idx, msg, &mut known_tool_use_ids)?);
    }

    let mut dropped = Vec::new();
    if req.top_k.is_some() {
        dropped.push("top_k");
    }

    let tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| CanonicalTool {
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        })
        .collect();

    let tool_choice = req.tool_choice.map(|tc| match tc {
        a::ToolChoice::Auto { .. } | a::ToolChoice::Any { .. } => CanonicalToolChoice::Auto,
        a::ToolChoice::None => CanonicalToolChoice::None,
        a::ToolChoice::Tool { name, .. } => CanonicalToolChoice::Tool { name },
    });

    let thinking = req.thinking.and_then(|t| match t {
        a::ThinkingConfig::Enabled { budget_tokens } => Some(ThinkingBudget { budget_tokens }),
        a::ThinkingConfig::Disabled => None,
    });

    Ok(Normalized {
        request: CanonicalRequest {
            model: req.model,
            system,
            messages,
            tools,
            tool_choice,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stream: req.stream.unwrap_or(false),
            thinking,
        },
        dropped,
    })
}

fn normalize_system(system: Option<a::SystemPrompt>) -> Result<Vec<String>, GatewayError> {
    Ok(match system {
        None => Vec::new(),
        Some(a::SystemPrompt::Text(s)) => vec![s],
        Some(a::SystemPrompt::Blocks(blocks)) => blocks.into_iter().map(|b| b.text).collect(),
    })
}

fn normalize_turn(
    turn_idx: usize,
    msg: a::InputMessage,
    known_tool_use_ids: &mut HashSet<String>,
) -> Result<Turn, GatewayError> {
    let role = match msg.role {
        a::Role::User => Role::User,
        a::Role::Assistant => Role::Assistant,
    };

    let items = match msg.content {
        a::InputMessageContent::Text(s) => vec![a::ContentBlock::Text(a::TextBlock {
            text: s,
            unknown_fields: Default::default(),
        })],
        a::InputMessageContent::Items(items) => items,
    };

    let mut blocks = Vec::with_capacity(items.len());
    let mut seen_tool_use_ids = HashSet::new();
    let mut seen_tool_result_ids = HashSet::new();

    for (block_idx, item) in items.into_iter().enumerate() {
        let path = format!("messages[{turn_idx}].content[{block_idx}]");
        match item {
            a::ContentBlock::Text(t) => blocks.push(Block::Text(t.text)),
            a::ContentBlock::Image(img) => match img.source {
                a::ImageSource::Base64 { media_type, data } => blocks.push(Block::Image { media_type, data }),
                a::ImageSource::Unknown(_) => {
                    return Err(GatewayError::InvalidRequest(format!(
                        "{path}: only base64 image sources are supported"
                    )));
                }
            },
            a::ContentBlock::ToolUse(tu) => {
                if role != Role::Assistant {
                    return Err(GatewayError::InvalidRequest(format!("{path}: tool_use only valid on assistant turns")));
                }
                if !seen_tool_use_ids.insert(tu.id.clone()) {
                    continue; // duplicate tool_use.id within this turn: first wins
                }
                known_tool_use_ids.insert(tu.id.clone());
                blocks.push(Block::ToolUse {
                    id: tu.id,
                    name: tu.name,
                    input: tu.input,
                });
            }
            a::ContentBlock::ToolResult(tr) => {
                if role != Role::User {
                    return Err(GatewayError::InvalidRequest(format!("{path}: tool_result only valid on user turns")));
                }
                if !seen_tool_result_ids.insert(tr.tool_use_id.clone()) {
                    continue; // duplicate tool_result.tool_use_id within this turn: first wins
                }
                if !known_tool_use_ids.contains(&tr.tool_use_id) {
                    return Err(GatewayError::InvalidRequest(format!(
                        "{path}.tool_use_id: no tool_use with id {:?} appears earlier in the conversation",
                        tr.tool_use_id
                    )));
                }
                let content = match tr.content {
                    None => ToolResultContent::Text(String::new()),
                    Some(serde_json::Value::String(s)) => ToolResultContent::Text(s),
                    Some(v) => ToolResultContent::Json(v),
                };
                blocks.push(Block::ToolResult {
                    tool_use_id: tr.tool_use_id,
                    content,
                    is_error: tr.is_error.unwrap_or(false),
                });
            }
            a::ContentBlock::Unknown(_) => {
                return Err(GatewayError::InvalidRequest(format!("{path}: unrecognized content block type")));
            }
        }
    }

    Ok(Turn { role, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unknown_fields::UnknownFields;

    fn text_message(role: a::Role, text: &str) -> a::InputMessage {
        a::InputMessage {
            role,
            content: a::InputMessageContent::Text(text.into()),
            unknown_fields: UnknownFields::default(),
        }
    }

    fn items_message(role: a::Role, items: Vec<a::ContentBlock>) -> a::InputMessage {
        a::InputMessage {
            role,
            content: a::InputMessageContent::Items(items),
            unknown_fields: UnknownFields::default(),
        }
    }

    fn request(messages: Vec<a::InputMessage>) -> a::Request {
        a::Request {
            model: "gpt-4o".into(),
            messages,
            system: None,
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            top_k: None,
            stream: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            stop_sequences: None,
            unknown_fields: UnknownFields::default(),
        }
    }

    #[test]
    fn tool_result_matching_prior_tool_use_is_accepted() {
        let req = request(vec![
            text_message(a::Role::User, "what's 1+2?"),
            items_message(
                a::Role::Assistant,
                vec![a::ContentBlock::ToolUse(a::ToolUseBlock {
                    id: "t1".into(),
                    name: "calc".into(),
                    input: serde_json::json!({"a": 1, "b": 2}),
                    unknown_fields: UnknownFields::default(),
                })],
            ),
            items_message(
                a::Role::User,
                vec![a::ContentBlock::ToolResult(a::ToolResultBlock {
                    tool_use_id: "t1".into(),
                    content: Some(serde_json::Value::String("3".into())),
                    is_error: None,
                    unknown_fields: UnknownFields::default(),
                })],
            ),
        ]);

        let normalized = normalize(req).expect("matching tool_result should normalize cleanly");
        assert_eq!(normalized.request.messages.len(), 3);
    }

    #[test]
    fn orphaned_tool_result_is_rejected_as_invalid_request() {
        let req = request(vec![
            text_message(a::Role::User, "hi"),
            items_message(
                a::Role::User,
                vec![a::ContentBlock::ToolResult(a::ToolResultBlock {
                    tool_use_id: "never-seen".into(),
                    content: Some(serde_json::Value::String("3".into())),
                    is_error: None,
                    unknown_fields: UnknownFields::default(),
                })],
            ),
        ]);

        let err = normalize(req).expect_err("orphaned tool_result must be rejected");
        match err {
            GatewayError::InvalidRequest(msg) => {
                assert!(msg.contains("never-seen"), "error should name the offending id: {msg}");
                assert!(msg.contains("messages[1].content[0]"), "error should name the field path: {msg}");
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_referencing_a_later_tool_use_is_rejected() {
        // The tool_use must appear *earlier* in the conversation; a forward
        // reference is just as invalid as one that never appears.
        let req = request(vec![
            items_message(
                a::Role::User,
                vec![a::ContentBlock::ToolResult(a::ToolResultBlock {
                    tool_use_id: "t1".into(),
                    content: None,
                    is_error: None,
                    unknown_fields: UnknownFields::default(),
                })],
            ),
            items_message(
                a::Role::Assistant,
                vec![a::ContentBlock::ToolUse(a::ToolUseBlock {
                    id: "t1".into(),
                    name: "calc".into(),
                    input: serde_json::json!({}),
                    unknown_fields: UnknownFields::default(),
                })],
            ),
        ]);

        assert!(matches!(normalize(req), Err(GatewayError::InvalidRequest(_))));
    }
}
