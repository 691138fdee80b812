use std::sync::OnceLock;

use bl_core::{SourceSpan, Tag, ROOT_THEME};
use regex::Regex;
use tracing::debug;

use crate::tree::{BotSource, StateNode, ThemeNode};

const BUTTONS_KEY: &str = "buttons";
const CONTINUATION_INDENT: usize = 4;

/// Parses bot-language text into themes of nested states. Never fails:
/// malformed lines are skipped and logged at debug level.
pub fn parse_bot_source(source: &str) -> BotSource {
    let lines = source
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>();
    let mut builder = SourceBuilder::new();

    let mut index = 0usize;
    while index < lines.len() {
        let raw = lines[index];
        let line_no = index + 1;
        index += 1;

        let indent = indent_of(raw);
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("theme:") {
            builder.commit_buffer();
            builder.start_theme(rest.trim(), line_no);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("state:") {
            builder.commit_buffer();
            builder.open_state(rest.trim(), indent, line_no);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("script:") {
            builder.commit_buffer();
            let mut body = Vec::new();
            if !rest.trim().is_empty() {
                body.push(rest.trim().to_string());
            }
            while index < lines.len() {
                let next = lines[index];
                if next.trim().is_empty() {
                    body.push(String::new());
                    index += 1;
                    continue;
                }
                if indent_of(next) <= indent {
                    break;
                }
                body.push(strip_columns(next, indent).to_string());
                index += 1;
            }
            builder.push_script(&body, line_no);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("buttons:") {
            builder.commit_buffer();
            builder.open_key = Some(BUTTONS_KEY.to_string());
            if !rest.trim().is_empty() {
                builder.buffer.push(rest.trim().to_string());
            }
            continue;
        }

        if builder.open_key.as_deref() == Some(BUTTONS_KEY) {
            let closes = builder
                .stack
                .last()
                .map(|open| indent <= open.indent)
                .unwrap_or(true);
            if !closes {
                builder.buffer.push(trimmed.to_string());
                continue;
            }
            builder.commit_buffer();
        }

        if let Some(captures) = key_value_regex().captures(trimmed) {
            builder.commit_buffer();
            let key = captures[1].to_string();
            let rest = captures[2].trim();
            if builder.stack.is_empty() {
                debug!(line = line_no, key = %key, "discarding key outside of any state");
                continue;
            }
            if rest.is_empty() {
                builder.open_key = Some(key);
            } else {
                builder.apply_value(&key, rest.to_string());
            }
            continue;
        }

        if builder.open_key.is_some() && (indent >= CONTINUATION_INDENT || raw.starts_with('\t')) {
            builder.buffer.push(strip_continuation(raw).to_string());
            continue;
        }

        if builder.open_key.is_some() {
            builder.commit_buffer();
        } else {
            debug!(line = line_no, "ignoring unrecognized line");
        }
    }

    builder.finish()
}

struct OpenState {
    indent: usize,
    node: StateNode,
}

struct SourceBuilder {
    themes: Vec<ThemeNode>,
    theme: ThemeNode,
    theme_declared: bool,
    stack: Vec<OpenState>,
    open_key: Option<String>,
    buffer: Vec<String>,
}

impl SourceBuilder {
    fn new() -> Self {
        Self {
            themes: Vec::new(),
            theme: ThemeNode {
                name: ROOT_THEME.to_string(),
                states: Vec::new(),
                location: SourceSpan::synthetic(),
            },
            theme_declared: false,
            stack: Vec::new(),
            open_key: None,
            buffer: Vec::new(),
        }
    }

    fn start_theme(&mut self, name: &str, line: usize) {
        self.close_all_states();
        self.flush_theme();
        self.theme = ThemeNode {
            name: if name.is_empty() {
                ROOT_THEME.to_string()
            } else {
                name.to_string()
            },
            states: Vec::new(),
            location: SourceSpan::line(line),
        };
        self.theme_declared = true;
    }

    fn open_state(&mut self, name: &str, indent: usize, line: usize) {
        while self
            .stack
            .last()
            .map(|open| indent <= open.indent)
            .unwrap_or(false)
        {
            self.pop_state();
        }

        let path = match self.stack.last() {
            Some(parent) => collapse_slashes(&format!("{}/{}", parent.node.path, name)),
            None => collapse_slashes(&format!("/{}", name)),
        };
        self.stack.push(OpenState {
            indent,
            node: StateNode::new(name, path, indent, line),
        });
    }

    fn push_script(&mut self, body: &[String], line: usize) {
        let Some(open) = self.stack.last_mut() else {
            debug!(line, "discarding script block outside of any state");
            return;
        };
        open.node.tags.push(Tag::Script(wrap_script(&body.join("\n"))));
    }

    fn apply_value(&mut self, key: &str, value: String) {
        let Some(open) = self.stack.last_mut() else {
            return;
        };
        let node = &mut open.node;
        match key {
            "a" => node.tags.push(Tag::Answer(value)),
            "go" => node.tags.push(Tag::Go(value)),
            "go!" => node.tags.push(Tag::GoNow(value)),
            "script" => node.tags.push(Tag::Script(wrap_script(&value))),
            BUTTONS_KEY => {
                node.buttons = Some(match node.buttons.take() {
                    Some(existing) => format!("{}\n{}", existing, value),
                    None => value,
                })
            }
            _ => {
                node.fields.insert(key.to_string(), value);
            }
        }
    }

    fn commit_buffer(&mut self) {
        let Some(key) = self.open_key.take() else {
            self.buffer.clear();
            return;
        };
        let value = self.buffer.join("\n").trim_end().to_string();
        self.buffer.clear();
        if !value.is_empty() {
            self.apply_value(&key, value);
        }
    }

    fn pop_state(&mut self) {
        let Some(open) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.node.children.push(open.node),
            None => self.theme.states.push(open.node),
        }
    }

    fn close_all_states(&mut self) {
        while !self.stack.is_empty() {
            self.pop_state();
        }
    }

    fn flush_theme(&mut self) {
        if self.theme_declared || !self.theme.states.is_empty() {
            let theme = std::mem::replace(
                &mut self.theme,
                ThemeNode {
                    name: ROOT_THEME.to_string(),
                    states: Vec::new(),
                    location: SourceSpan::synthetic(),
                },
            );
            self.themes.push(theme);
        }
    }

    fn finish(mut self) -> BotSource {
        self.commit_buffer();
        self.close_all_states();
        self.flush_theme();
        BotSource {
            themes: self.themes,
        }
    }
}

fn key_value_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^([a-zA-Z!]+):\s*(.*)$").expect("key value regex"))
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|ch| ch.is_whitespace()).count()
}

fn strip_columns(line: &str, columns: usize) -> &str {
    let mut rest = line;
    for _ in 0..columns {
        match rest.chars().next() {
            Some(ch) if ch.is_whitespace() => rest = &rest[ch.len_utf8()..],
            _ => break,
        }
    }
    rest
}

fn strip_continuation(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix('\t') {
        return rest;
    }
    strip_columns(line, CONTINUATION_INDENT)
}

/// Leading and trailing separators keep a sloppy last line from swallowing
/// whatever the executor appends.
fn wrap_script(body: &str) -> String {
    format!(";\n{}\n;\n", body)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    out
}
