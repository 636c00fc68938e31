// Parse raw generated text into exercises

use verdict_common::store::content_id;
use verdict_common::types::Exercise;

const DOCSTRING_QUOTES: &[&str] = &["\"\"\"", "'''"];

/// Split generated text into one chunk per `def`
///
/// Text before the first `def` is dropped.
pub fn split_exercises(output: &str) -> Vec<String> {
    output
        .split("def")
        .skip(1)
        .map(|piece| format!("def{}", piece))
        .collect()
}

/// Problem (signature + docstring) and body of one chunk
fn split_docstring(chunk: &str) -> Option<(String, &str)> {
    DOCSTRING_QUOTES.iter().find_map(|quote| {
        let mut parts = chunk.splitn(4, quote);
        let head = parts.next()?;
        let doc = parts.next()?;
        let body = parts.next()?;
        Some((format!("{head}{quote}{doc}{quote}"), body))
    })
}

/// A chunk is usable when its body after the docstring returns or prints
pub fn check_exercise(chunk: &str) -> bool {
    split_docstring(chunk)
        .map(|(_, body)| body.contains("return") || body.contains("print"))
        .unwrap_or(false)
}

/// Exercises found in one generation output
///
/// The id is the content hash of the problem, so the same problem
/// generated twice maps to the same exercise.
pub fn generator_to_exercises(output: &str) -> Vec<Exercise> {
    split_exercises(output)
        .iter()
        .filter(|chunk| check_exercise(chunk))
        .filter_map(|chunk| split_docstring(chunk))
        .map(|(problem, body)| Exercise {
            exercise_id: content_id(&problem),
            solution: body.trim_matches('`').to_string(),
            problem,
        })
        .collect()
}
