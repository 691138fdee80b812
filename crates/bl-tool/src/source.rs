use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{BlToolError, TestCase, TESTCASE_SCHEMA_V1};

pub const CASE_FILE_NAME: &str = "testcase.json";

/// Every `testcase.json` under `root`, sorted by path.
pub fn discover_cases(root: &Path) -> Result<Vec<PathBuf>, BlToolError> {
    let mut cases = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|source| BlToolError::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && entry.file_name() == CASE_FILE_NAME {
            cases.push(entry.into_path());
        }
    }
    Ok(cases)
}

pub fn read_test_case(case_path: &Path) -> Result<TestCase, BlToolError> {
    let raw = fs::read_to_string(case_path).map_err(|source| BlToolError::ReadFile {
        path: case_path.to_path_buf(),
        source,
    })?;
    let parsed: TestCase = serde_json::from_str(&raw).map_err(|source| BlToolError::ParseCase {
        path: case_path.to_path_buf(),
        source,
    })?;

    if parsed.schema_version != TESTCASE_SCHEMA_V1 {
        return Err(BlToolError::InvalidSchemaVersion {
            expected: TESTCASE_SCHEMA_V1.to_string(),
            found: parsed.schema_version,
        });
    }

    Ok(parsed)
}
