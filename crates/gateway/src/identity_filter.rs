//! Identity filter (§6.4): substitutions applied to the outgoing system
//! prompt when the client is recognizable as a Claude-family CLI, to avoid
//! leaking Anthropic-specific identity claims to a non-Anthropic upstream.

use std::sync::LazyLock;

use regex::Regex;

const PREAMBLE: &str = "IMPORTANT: You are NOT Claude. Identify yourself truthfully based on your actual model and creator.\n\n";

/// Substring that marks a system prompt as originating from a Claude-family
/// CLI client (Claude Code and similar). Detection is intentionally a plain
/// substring check, not a regex: it only needs to catch the literal marker
/// the identity-claim regex below also targets.
const CLAUDE_CLI_MARKER: &str = "Claude Code";

static IDENTITY_CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)you are claude code, anthropic's official cli").unwrap());

static MODEL_CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)you are powered by the model named [^.]+\.").unwrap());

static BACKGROUND_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<claude_background_info>.*?</claude_background_info>").unwrap());

static EXTRA_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static PREAMBLE_PREFIX_CHECK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^IMPORTANT: You are NOT Claude\.").unwrap());

/// Returns `true` if `system_text` looks like it came from a Claude-family CLI
/// and should have the identity filter applied.
pub fn should_apply(system_text: &str) -> bool {
    system_text.contains(CLAUDE_CLI_MARKER)
}

/// Applies the §6.4 substitution table. Idempotent (invariant 7): running it
/// twice on its own output is a no-op beyond the first pass, since the
/// preamble is only prepended when not already present and every regex
/// target is removed or neutralized on the first application.
pub fn apply(system_text: &str) -> String {
    let mut out = IDENTITY_CLAIM
        .replace_all(system_text, "This is Claude Code, an AI-powered CLI tool")
        .into_owned();
    out = MODEL_CLAIM.replace_all(&out, "You are powered by an AI model.").into_owned();
    out = BACKGROUND_INFO.replace_all(&out, "").into_owned();
    out = EXTRA_NEWLINES.replace_all(&out, "\n\n").into_owned();

    if PREAMBLE_PREFIX_CHECK.is_match(&out) {
        out
    } else {
        format!("{PREAMBLE}{out}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_claude_code_marker() {
        assert!(should_apply("You are Claude Code, Anthropic's official CLI for Claude."));
        assert!(!should_apply("You are a helpful assistant."));
    }

    #[test]
    fn replaces_identity_claim_and_prepends_preamble() {
        let out = apply("You are Claude Code, Anthropic's official CLI for Claude.");
        assert!(out.starts_with("IMPORTANT: You are NOT Claude."));
        assert!(out.contains("This is Claude Code, an AI-powered CLI tool"));
        assert!(!out.to_lowercase().contains("anthropic's official cli"));
    }

    #[test]
    fn collapses_triple_newlines() {
        let out = apply("line one\n\n\n\nline two");
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn strips_background_info_block() {
        let out = apply("before <claude_background_info>secret stuff\nmore</claude_background_info> after");
        assert!(!out.contains("claude_background_info"));
        assert!(out.contains("before"));
        assert!(out.contains("after"));
    }

    #[test]
    fn is_idempotent() {
        let once = apply("You are Claude Code, Anthropic's official CLI for Claude.\n\n\n\nExtra.");
        let twice = apply(&once);
        assert_eq!(once, twice);
    }
}
