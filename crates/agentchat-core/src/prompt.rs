//! Prompt Rendering
//!
//! One-shot template substitution used at agent construction. Rendering is
//! plain `{{key}}` replacement; no template files are loaded at runtime.

/// Sentinel substring the model is instructed to include in its final
/// answer, so an outer orchestrator can detect completion.
pub const FINAL_ANSWER: &str = "[FINAL ANSWER]";

/// System prompt template for a protocol-driven agent.
///
/// Slots: `{{name}}` (agent name), `{{system}}` (caller instructions),
/// `{{final}}` (terminal marker). The tool markdown block is appended
/// separately from the registry.
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are {{name}}.

{{system}}

## Response Format

Reply with a single JSON object and nothing before it. To think and act:

{"thought": ["step-by-step reasoning"], "action": {"name": "tool_name", "args": {"param": "value"}}}

To deliver the final answer instead of acting:

{"thought": ["step-by-step reasoning"], "answer": "the final answer"}

Rules:
- Provide at most one of "action" or "answer" per reply.
- After an action, the tool's observation arrives as the next user message.
- Use only the tools listed below; never invent tool names.
- Include '{{final}}' in the answer once the task is complete and no further action is needed.
"#;

/// Render a template by substituting every `(placeholder, value)` pair.
///
/// Placeholders are literal strings (e.g. `"{{name}}"`); unknown
/// placeholders are left untouched.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (placeholder, value) in vars {
        rendered = rendered.replace(placeholder, value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "Hello {{name}}, {{greeting}}!",
            &[("{{name}}", "Engineer"), ("{{greeting}}", "welcome")],
        );
        assert_eq!(rendered, "Hello Engineer, welcome!");
    }

    #[test]
    fn test_unknown_placeholders_untouched() {
        let rendered = render_template("{{kept}}", &[("{{other}}", "x")]);
        assert_eq!(rendered, "{{kept}}");
    }

    #[test]
    fn test_system_template_slots() {
        let rendered = render_template(
            SYSTEM_PROMPT_TEMPLATE,
            &[
                ("{{name}}", "Engineer"),
                ("{{system}}", "You fix clusters."),
                ("{{final}}", FINAL_ANSWER),
            ],
        );
        assert!(rendered.starts_with("You are Engineer."));
        assert!(rendered.contains("You fix clusters."));
        assert!(rendered.contains(FINAL_ANSWER));
        assert!(!rendered.contains("{{"));
    }
}
