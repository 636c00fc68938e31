//! Text helpers for generated code
//!
//! Generated tests arrive as raw continuations of an `assert ` prompt and
//! generated solutions may run past the function body. These helpers cut
//! them down to the parts the executor runs.

/// Top-level markers that end a generated body
const BODY_TERMINATORS: &[&str] = &["\nclass", "\ndef", "\n#", "\nif", "\nprint", "\n```"];

/// Name of the first function defined in a prompt
///
/// `def add(a, b):` yields `add`. Returns `None` when the prompt has no
/// `def` or the name is empty.
pub fn function_name(prompt: &str) -> Option<&str> {
    let start = prompt
        .match_indices("def ")
        .find(|(idx, _)| *idx == 0 || prompt[..*idx].ends_with(|c: char| c.is_whitespace()))
        .map(|(idx, m)| idx + m.len())?;
    let rest = &prompt[start..];
    let name = rest.split('(').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Cut a generated snippet at the first top-level terminator
pub fn truncate_body(text: &str) -> &str {
    let end = BODY_TERMINATORS
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
        .unwrap_or(text.len());
    &text[..end]
}

/// Completion with trailing top-level code and code fences removed
pub fn truncate_completion(completion: &str) -> String {
    truncate_body(completion).trim_end().to_string()
}

/// Assertion expressions found in raw generated test text
///
/// The text continues a prompt ending with `assert `, so it is re-prefixed
/// and split on `assert `. Pieces that never mention `entry_point` are
/// dropped, the rest are cut at the first top-level terminator. The
/// returned strings are expressions, without the `assert` keyword.
pub fn extract_assertions(text: &str, entry_point: &str) -> Vec<String> {
    let entry_point = entry_point.trim();
    let prefixed = format!("assert {}", text);

    prefixed
        .split("assert ")
        .filter(|part| !part.trim().is_empty() && part.contains(entry_point))
        .map(|part| truncate_body(part).trim().to_string())
        .filter(|expr| !expr.is_empty() && expr.contains(entry_point))
        .collect()
}
