use std::collections::BTreeMap;

use bl_core::BotValue;
use serde::{Deserialize, Serialize};

pub const TESTCASE_SCHEMA_V1: &str = "bl-tool-case.v1";

/// A scripted conversation: the start reply, then one reply per sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub start: ExpectedReply,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TestStep {
    Send { text: String, expect: ExpectedReply },
}

impl TestStep {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
        }
    }

    pub fn expect(&self) -> &ExpectedReply {
        match self {
            Self::Send { expect, .. } => expect,
        }
    }
}

/// Answers and buttons must match exactly. `state` and `session` are only
/// checked when given, and `session` only for the listed keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedReply {
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub buttons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub session: BTreeMap<String, BotValue>,
}

impl ExpectedReply {
    pub fn matches(&self, actual: &ExpectedReply) -> bool {
        if self.answers != actual.answers || self.buttons != actual.buttons {
            return false;
        }
        if self.state.is_some() && self.state != actual.state {
            return false;
        }
        self.session
            .iter()
            .all(|(key, value)| actual.session.get(key) == Some(value))
    }
}

#[cfg(test)]
mod case_tests {
    use super::*;

    fn reply(answers: &[&str], state: Option<&str>) -> ExpectedReply {
        ExpectedReply {
            answers: answers.iter().map(|answer| answer.to_string()).collect(),
            buttons: Vec::new(),
            state: state.map(str::to_string),
            session: BTreeMap::new(),
        }
    }

    #[test]
    fn test_step_kind_name_reports_expected_value() {
        let step = TestStep::Send {
            text: "hi".to_string(),
            expect: ExpectedReply::default(),
        };
        assert_eq!(step.kind_name(), "send");
        assert_eq!(step.expect(), &ExpectedReply::default());
    }

    #[test]
    fn testcase_deserialize_applies_defaults() {
        let parsed: TestCase = serde_json::from_str(
            r#"{
  "schemaVersion": "bl-tool-case.v1",
  "start": { "answers": ["Hi"] },
  "steps": [
    { "kind": "send", "text": "menu", "expect": { "buttons": ["A"], "state": "/Menu" } }
  ]
}"#,
        )
        .expect("testcase should deserialize");

        assert_eq!(parsed.schema_version, TESTCASE_SCHEMA_V1);
        assert_eq!(parsed.timeout_ms, None);
        assert_eq!(parsed.start.answers, vec!["Hi"]);
        assert!(parsed.start.buttons.is_empty());
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].expect().state.as_deref(), Some("/Menu"));
    }

    #[test]
    fn matches_ignores_unlisted_state_and_session_keys() {
        let mut actual = reply(&["Hi"], Some("/Start"));
        actual
            .session
            .insert("city".to_string(), BotValue::from("Sofia"));
        actual
            .session
            .insert("visits".to_string(), BotValue::Number(2.0));

        assert!(reply(&["Hi"], None).matches(&actual));
        assert!(reply(&["Hi"], Some("/Start")).matches(&actual));
        assert!(!reply(&["Hi"], Some("/Menu")).matches(&actual));
        assert!(!reply(&["Hello"], None).matches(&actual));

        let mut expected = reply(&["Hi"], None);
        expected
            .session
            .insert("visits".to_string(), BotValue::Number(2.0));
        assert!(expected.matches(&actual));
        expected
            .session
            .insert("city".to_string(), BotValue::from("Varna"));
        assert!(!expected.matches(&actual));
    }
}
