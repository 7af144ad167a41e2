//! Grounded prompt rendering.

/// Fixed instruction template with `{context}` and `{question}` slots.
pub const GROUNDED_TEMPLATE: &str = include_str!("prompts/grounded_answer.txt");

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

/// Renders the grounded template with `context` and `query` substituted.
///
/// The template is applied the same way for every input, including an empty
/// context. Substitution is single-pass: slot markers that appear inside the
/// context or the query are copied through untouched.
pub fn build(context: &str, query: &str) -> String {
    render(
        GROUNDED_TEMPLATE,
        &[(CONTEXT_SLOT, context), (QUESTION_SLOT, query)],
    )
}

fn render(template: &str, slots: &[(&str, &str)]) -> String {
    let extra: usize = slots.iter().map(|(_, value)| value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match slots.iter().find(|(slot, _)| tail.starts_with(slot)) {
            Some((slot, value)) => {
                out.push_str(value);
                rest = &tail[slot.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn template_has_each_slot_once() {
        assert_eq!(GROUNDED_TEMPLATE.matches(CONTEXT_SLOT).count(), 1);
        assert_eq!(GROUNDED_TEMPLATE.matches(QUESTION_SLOT).count(), 1);
        assert!(GROUNDED_TEMPLATE.find(CONTEXT_SLOT) < GROUNDED_TEMPLATE.find(QUESTION_SLOT));
    }

    #[test]
    fn template_carries_grounding_instructions() {
        let lower = GROUNDED_TEMPLATE.to_lowercase();
        assert!(lower.contains("use only the available information"));
        assert!(lower.contains("not enough information"));
        assert!(lower.contains("same language as the question"));
    }

    #[test]
    fn empty_context_still_renders_query() {
        let query = "What is the difference between AI and machine learning?";
        let prompt = build("", query);
        assert!(prompt.contains(&format!("Question: {query}")));
        assert!(prompt.contains("Available information:\n\n"));
        assert!(!prompt.contains(CONTEXT_SLOT));
        assert!(!prompt.contains(QUESTION_SLOT));
        assert!(prompt.trim_end().ends_with("Answer:"));
    }

    #[test]
    fn substitutes_context_and_query_in_place() {
        let prompt = build("line one\nline two", "Why?");
        let expected = GROUNDED_TEMPLATE
            .replace(CONTEXT_SLOT, "line one\nline two")
            .replace(QUESTION_SLOT, "Why?");
        assert_eq!(prompt, expected);
    }

    #[test]
    fn slot_markers_in_inputs_are_not_expanded() {
        let prompt = build("see {question}", "what about {context}?");
        assert!(prompt.contains("see {question}"));
        assert!(prompt.contains("Question: what about {context}?"));
    }

    #[test]
    fn unknown_braces_are_preserved() {
        assert_eq!(render("a {x} b {", &[("{y}", "z")]), "a {x} b {");
    }
}
