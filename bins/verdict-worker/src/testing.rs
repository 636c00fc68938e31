// Shared fixtures for worker tests

use std::process::Command;
use std::sync::OnceLock;

use verdict_common::types::{Candidate, VerificationJob};

pub const PROMPT: &str = "def f():\n    ";

/// Process-backed tests skip themselves without an interpreter
pub fn python_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

pub fn job(task_id: &str, completion: &str, tests: &[&str], timeout_ms: u64) -> VerificationJob {
    VerificationJob {
        task_id: task_id.to_string(),
        prompt: PROMPT.to_string(),
        completion: completion.to_string(),
        tests: tests.iter().map(|t| t.to_string()).collect(),
        entry_point: None,
        test_code: None,
        timeout_ms,
    }
}

pub fn candidate(task_id: &str, completion: &str) -> Candidate {
    Candidate {
        task_id: task_id.to_string(),
        prompt: PROMPT.to_string(),
        completion: completion.to_string(),
    }
}
