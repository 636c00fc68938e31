pub mod assertions;
pub mod config;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use config::Config;
pub use types::{
    Candidate, ExecutionMode, ExecutionResult, PassCriterion, RunStatus, TestRecord, TestSuite,
    VerificationJob,
};
