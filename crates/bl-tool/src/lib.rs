mod case;
mod runner;
mod source;

pub use case::{ExpectedReply, TestCase, TestStep, TESTCASE_SCHEMA_V1};
pub use runner::{assert_case, run_case, RunReport};
pub use source::{discover_cases, read_test_case, CASE_FILE_NAME};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlToolError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse testcase {path}: {source}")]
    ParseCase {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("Invalid testcase schema version \"{found}\", expected \"{expected}\".")]
    InvalidSchemaVersion { expected: String, found: String },
    #[error("Bot error: {0}")]
    Bot(#[from] bl_core::BotError),
    #[error("Reply mismatch at turn {turn} (0 is the start reply). expected={expected} actual={actual}")]
    ReplyMismatch {
        turn: usize,
        expected: String,
        actual: String,
    },
    #[error("Failed to serialize reply for diff: {0}")]
    ReplySerialize(serde_json::Error),
}

pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

pub fn demos_root() -> PathBuf {
    workspace_root().join("demos")
}
