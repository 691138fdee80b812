use serde::{Deserialize, Serialize};

pub(crate) const OPTIONS_HEADER: &str = "Options:";

/// A reply split for delivery: answer lines plus the offered button labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedReply {
    pub answers: Vec<String>,
    pub buttons: Vec<String>,
}

pub(crate) fn render_options(labels: &[String]) -> String {
    let lines = labels
        .iter()
        .map(|label| format!("- {}", label))
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n\n{}\n{}", OPTIONS_HEADER, lines)
}

/// Every `Options:` section contributes its `- label` lines as buttons;
/// all other non-empty lines are answers.
pub fn format_reply(reply: &str) -> FormattedReply {
    let mut formatted = FormattedReply::default();
    let mut in_options = false;
    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() {
            in_options = false;
            continue;
        }
        if line == OPTIONS_HEADER {
            in_options = true;
            continue;
        }
        match line.strip_prefix("- ").filter(|_| in_options) {
            Some(label) => formatted.buttons.push(label.to_string()),
            None => {
                in_options = false;
                formatted.answers.push(line.to_string());
            }
        }
    }
    formatted
}
