//! The internal canonical request (§3.1): what the Anthropic wire request is
//! normalized into, and what the OpenAI request builder consumes. Keeping
//! this as its own tagged-variant type (rather than passing the Anthropic
//! wire struct straight through) is what lets the Model Adapter Registry and
//! the OpenAI Request Builder stay ignorant of Anthropic's wire quirks.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub model: String,
    pub system: Vec<String>,
    pub messages: Vec<Turn>,
    pub tools: Vec<CanonicalTool>,
    pub tool_choice: Option<CanonicalToolChoice>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stream: bool,
    pub thinking: Option<ThinkingBudget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone)]
pub enum Block {
    Text(String),
    Image { media_type: String, data: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: ToolResultContent, is_error: bool },
}

#[derive(Debug, Clone)]
pub enum ToolResultContent {
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone)]
pub struct CanonicalTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub enum CanonicalToolChoice {
    Auto,
    None,
    Tool { name: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ThinkingBudget {
    pub budget_tokens: u32,
}
