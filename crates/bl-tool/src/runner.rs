use std::iter;
use std::path::Path;
use std::time::Duration;

use bl_api::{create_session, load_bot, LoadBotOptions};
use bl_runtime::{format_reply, Session, SessionOptions};

use crate::source::read_test_case;
use crate::{BlToolError, ExpectedReply, TestCase, TestStep};

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// One entry per turn; index 0 is the start reply.
    pub observed: Vec<ExpectedReply>,
    pub sent_messages: usize,
}

/// Runs a case without network host functions so transcripts stay deterministic.
pub fn run_case(bot_dir: &Path, case: &TestCase) -> Result<RunReport, BlToolError> {
    let loaded = load_bot(&LoadBotOptions {
        path: bot_dir.to_path_buf(),
    })?;
    let mut options = SessionOptions::default();
    if let Some(timeout_ms) = case.timeout_ms {
        options.script_timeout = Duration::from_millis(timeout_ms);
    }
    let mut session = create_session(&loaded, options);

    let reply = session.start();
    let mut observed = vec![observe(&reply, &session)];
    for step in &case.steps {
        match step {
            TestStep::Send { text, .. } => {
                let reply = session.handle_message(text);
                observed.push(observe(&reply, &session));
            }
        }
    }

    Ok(RunReport {
        observed,
        sent_messages: case.steps.len(),
    })
}

fn observe(reply: &str, session: &Session) -> ExpectedReply {
    let formatted = format_reply(reply);
    ExpectedReply {
        answers: formatted.answers,
        buttons: formatted.buttons,
        state: Some(session.position().to_string()),
        session: session.context().session.clone(),
    }
}

pub fn assert_case(bot_dir: &Path, case_path: &Path) -> Result<(), BlToolError> {
    let case = read_test_case(case_path)?;
    let report = run_case(bot_dir, &case)?;

    let expected = iter::once(&case.start).chain(case.steps.iter().map(TestStep::expect));
    for (turn, (expected, actual)) in expected.zip(report.observed.iter()).enumerate() {
        if !expected.matches(actual) {
            let expected = serde_json::to_string(expected).map_err(BlToolError::ReplySerialize)?;
            let actual = serde_json::to_string(actual).map_err(BlToolError::ReplySerialize)?;
            return Err(BlToolError::ReplyMismatch {
                turn,
                expected,
                actual,
            });
        }
    }

    Ok(())
}
