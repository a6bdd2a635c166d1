/*!
 * Prompt construction for the HTTP backends.
 */

use crate::providers::{TermReviewRequest, TranslationRequest};

/// Characters of source text sent to the terminology review
pub const REVIEW_SOURCE_CHARS: usize = 1200;

const PLACEHOLDER_RULE: &str = "Tokens such as ⟦P0⟧ stand for code, identifiers and terms that must \
    stay unchanged. Copy every token exactly as it appears, in the same place in the sentence.";

const REVIEW_SYSTEM_PROMPT: &str = "You review technical translations. You get a {source_language} \
    original and its {target_language} translation. Find technical terms of the original that must \
    stay in {source_language} (CamelCase names, acronyms, framework, library, tool and product \
    names) but were translated anyway.\n\
    Reply with one line per finding in the form `translated fragment => original term`.\n\
    Reply NONE when there is nothing to fix. Do not explain.";

/// Fill the language placeholders of a system prompt template
pub fn render_system_prompt(template: &str, source_language: &str, target_language: &str) -> String {
    template
        .replace("{source_language}", source_language)
        .replace("{target_language}", target_language)
}

/// User prompt for a translation request
pub fn translation_prompt(request: &TranslationRequest) -> String {
    let mut prompt = String::new();
    prompt.push_str(PLACEHOLDER_RULE);
    prompt.push_str("\n\n");

    if let Some(context) = request.context.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str("[Previous context for terminology consistency]:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    prompt.push_str("[Text to translate]:\n");
    prompt.push_str(&request.text);
    prompt.push_str(&format!("\n\n[Translation into {}]:", request.target_language));
    prompt
}

/// System prompt for the terminology review
pub fn review_system_prompt(request: &TermReviewRequest) -> String {
    render_system_prompt(REVIEW_SYSTEM_PROMPT, &request.source_language, &request.target_language)
}

/// User prompt for the terminology review; the source is truncated
pub fn review_prompt(request: &TermReviewRequest) -> String {
    let source: String = request.source.chars().take(REVIEW_SOURCE_CHARS).collect();
    format!(
        "[Original ({})]:\n{}\n\n[Translation ({})]:\n{}\n\n[Findings]:",
        request.source_language, source, request.target_language, request.translated
    )
}

/// Last `max_chars` characters of a text
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((byte, _)) => &text[byte..],
        None => "",
    }
}
