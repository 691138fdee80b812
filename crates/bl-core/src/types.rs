use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const ROOT_THEME: &str = "/";
pub const START_STATE: &str = "/Start";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn synthetic() -> Self {
        Self::line(1)
    }

    pub fn line(line: usize) -> Self {
        Self {
            start: SourceLocation { line, column: 1 },
            end: SourceLocation { line, column: 1 },
        }
    }
}

/// One authored unit of state content, kept in the order it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Tag {
    Script(String),
    Answer(String),
    Go(String),
    GoNow(String),
}

impl Tag {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::Answer(_) => "a",
            Self::Go(_) => "go",
            Self::GoNow(_) => "go!",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Trigger {
    Wildcard,
    Pattern(Regex),
    Invalid(String),
    Plain(String),
}

impl Trigger {
    pub fn is_match(&self, input: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Pattern(regex) => regex.is_match(input),
            Self::Invalid(_) | Self::Plain(_) => false,
        }
    }
}

/// Absolute address of a state: theme key plus flattened path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub theme: String,
    pub state: String,
}

impl Target {
    pub fn new(theme: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            state: state.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.theme == ROOT_THEME {
            write!(f, "{}", self.state)
        } else {
            write!(f, "{}{}", self.theme, self.state)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonSpec {
    pub label: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedButton {
    pub label: String,
    pub target: Option<Target>,
}

#[derive(Debug, Clone)]
pub struct State {
    pub path: String,
    pub name: String,
    pub tags: Vec<Tag>,
    pub q: Option<Trigger>,
    pub q_global: Option<Trigger>,
    pub go: Option<String>,
    pub go_now: Option<String>,
    pub buttons: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub location: SourceSpan,
}

impl State {
    pub fn parent_path(&self) -> Option<&str> {
        parent_path(&self.path)
    }

    /// `go` wins over `go!` when a local override needs a destination.
    pub fn declared_target(&self) -> Option<&str> {
        self.go.as_deref().or(self.go_now.as_deref())
    }
}

pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Theme {
    pub name: String,
    pub states: IndexMap<String, State>,
}

impl Theme {
    pub fn children_of<'a>(&'a self, parent: Option<&'a str>) -> impl Iterator<Item = &'a State> {
        self.states
            .values()
            .filter(move |state| state.parent_path() == parent)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bot {
    pub themes: IndexMap<String, Theme>,
}

impl Bot {
    pub fn theme(&self, name: &str) -> Option<&Theme> {
        self.themes.get(name)
    }

    pub fn has_theme(&self, name: &str) -> bool {
        self.themes.contains_key(name)
    }

    pub fn state(&self, theme: &str, path: &str) -> Option<&State> {
        self.themes.get(theme)?.states.get(path)
    }

    pub fn state_at(&self, target: &Target) -> Option<&State> {
        self.state(&target.theme, &target.state)
    }

    pub fn contains(&self, theme: &str, path: &str) -> bool {
        self.state(theme, path).is_some()
    }

    pub fn default_theme(&self) -> Option<&str> {
        if self.themes.contains_key(ROOT_THEME) {
            return Some(ROOT_THEME);
        }
        self.themes.keys().next().map(String::as_str)
    }

    pub fn states(&self) -> impl Iterator<Item = (&str, &State)> {
        self.themes.iter().flat_map(|(theme_name, theme)| {
            theme
                .states
                .values()
                .map(move |state| (theme_name.as_str(), state))
        })
    }

    pub fn state_count(&self) -> usize {
        self.themes.values().map(|theme| theme.states.len()).sum()
    }
}
