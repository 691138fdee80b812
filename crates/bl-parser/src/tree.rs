use std::collections::BTreeMap;

use bl_core::{SourceSpan, Tag};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BotSource {
    pub themes: Vec<ThemeNode>,
}

impl BotSource {
    pub fn state_paths(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for theme in &self.themes {
            for state in &theme.states {
                state.collect_paths(&theme.name, &mut out);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeNode {
    pub name: String,
    pub states: Vec<StateNode>,
    pub location: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateNode {
    pub name: String,
    pub path: String,
    pub indent: usize,
    pub tags: Vec<Tag>,
    pub fields: BTreeMap<String, String>,
    pub buttons: Option<String>,
    pub children: Vec<StateNode>,
    pub location: SourceSpan,
}

impl StateNode {
    pub fn new(name: &str, path: String, indent: usize, line: usize) -> Self {
        Self {
            name: name.to_string(),
            path,
            indent,
            tags: Vec::new(),
            fields: BTreeMap::new(),
            buttons: None,
            children: Vec::new(),
            location: SourceSpan::line(line),
        }
    }

    pub fn child(&self, name: &str) -> Option<&StateNode> {
        self.children.iter().find(|child| child.name == name)
    }

    fn collect_paths(&self, theme: &str, out: &mut Vec<(String, String)>) {
        out.push((theme.to_string(), self.path.clone()));
        for child in &self.children {
            child.collect_paths(theme, out);
        }
    }
}
