use std::sync::OnceLock;

use bl_core::Context;
use regex::{Captures, Regex};
use tracing::warn;

use crate::host::ScriptHost;
use crate::sanitize::sanitize_value;

impl ScriptHost {
    /// Replaces every `${expr}` span with its sanitized value.
    /// A failing expression becomes empty text.
    pub fn substitute(&mut self, text: &str, context: &Context) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        self.refresh_bindings(context);
        template_regex()
            .replace_all(text, |captures: &Captures<'_>| {
                let expr = &captures[1];
                match self.evaluate_text(expr) {
                    Ok(value) => sanitize_value(&value),
                    Err(error) => {
                        warn!(
                            %expr,
                            code = %error.code,
                            message = %error.message,
                            "expression failed; substituting empty text"
                        );
                        String::new()
                    }
                }
            })
            .into_owned()
    }
}

fn template_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("template regex"))
}
