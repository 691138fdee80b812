use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Neutralizes markup in a substituted value while leaving harmless HTML alone.
pub fn sanitize_value(value: &str) -> String {
    let without_handlers = event_handler_regex().replace_all(value, "");
    let without_schemes = unsafe_scheme_regex().replace_all(&without_handlers, "");
    let escaped_open = dangerous_open_tag_regex().replace_all(&without_schemes, escape_brackets);
    let escaped_close = dangerous_close_tag_regex().replace_all(&escaped_open, escape_brackets);
    let escaped_rest = dangerous_tag_prefix_regex().replace_all(&escaped_close, |captures: &Captures<'_>| {
        format!("&lt;{}", captures[1].to_ascii_lowercase())
    });
    unsafe_attribute_regex()
        .replace_all(&escaped_rest, "")
        .into_owned()
}

fn escape_brackets(captures: &Captures<'_>) -> String {
    captures[0].replace('<', "&lt;").replace('>', "&gt;")
}

fn event_handler_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"(?i) on\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).expect("event handler regex")
    })
}

fn unsafe_scheme_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)(?:javascript|data)\s*:").expect("unsafe scheme regex"))
}

fn dangerous_open_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)<\s*(?:script|iframe|object|embed|svg)[^>]*>").expect("open tag regex")
    })
}

fn dangerous_close_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)</\s*(?:script|iframe|object|embed|svg)\s*>").expect("close tag regex")
    })
}

fn dangerous_tag_prefix_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)<\s*(script|iframe|object|embed|svg)").expect("tag prefix regex")
    })
}

fn unsafe_attribute_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"(?i)\s(?:srcdoc|formaction|poster|sandbox)\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
            .expect("unsafe attribute regex")
    })
}
