use std::collections::BTreeMap;
use std::sync::OnceLock;

use bl_core::{Bot, State, Tag, Theme, Trigger, ROOT_THEME};
use bl_parser::{parse_bot_source, BotSource, StateNode};
use regex::Regex;
use tracing::{debug, warn};

const TRIGGER_KEY: &str = "q";
const GLOBAL_TRIGGER_KEY: &str = "q!";

/// Parses every source (ordered by name) and flattens them into one bot.
pub fn compile_bot_from_source_map(sources: &BTreeMap<String, String>) -> Bot {
    let parsed = sources
        .iter()
        .map(|(name, text)| {
            debug!(source = %name, "parsing bot source");
            parse_bot_source(text)
        })
        .collect::<Vec<_>>();
    compile_bot(&parsed)
}

/// Builds the flattened path index. The parsed trees are only read.
pub fn compile_bot(sources: &[BotSource]) -> Bot {
    let mut bot = Bot::default();
    for source in sources {
        for theme_node in &source.themes {
            let theme_name = normalize_theme_name(&theme_node.name);
            let theme = bot
                .themes
                .entry(theme_name.clone())
                .or_insert_with(|| Theme {
                    name: theme_name.clone(),
                    states: Default::default(),
                });
            for node in &theme_node.states {
                flatten_into(theme, node);
            }
        }
    }
    bot
}

fn flatten_into(theme: &mut Theme, node: &StateNode) {
    let state = compile_state(node);
    if theme.states.contains_key(&state.path) {
        warn!(
            theme = %theme.name,
            path = %state.path,
            "duplicate state path, later definition wins"
        );
    }
    theme.states.insert(state.path.clone(), state);
    for child in &node.children {
        flatten_into(theme, child);
    }
}

fn compile_state(node: &StateNode) -> State {
    let go = node.tags.iter().rev().find_map(|tag| match tag {
        Tag::Go(target) => Some(target.clone()),
        _ => None,
    });
    let go_now = node.tags.iter().rev().find_map(|tag| match tag {
        Tag::GoNow(target) => Some(target.clone()),
        _ => None,
    });

    let mut fields = node.fields.clone();
    let q = fields.remove(TRIGGER_KEY).map(|raw| compile_trigger(&raw));
    let q_global = fields
        .remove(GLOBAL_TRIGGER_KEY)
        .map(|raw| compile_trigger(&raw));

    State {
        path: node.path.clone(),
        name: node.name.clone(),
        tags: node.tags.clone(),
        q,
        q_global,
        go,
        go_now,
        buttons: node.buttons.clone(),
        fields,
        location: node.location.clone(),
    }
}

pub fn compile_trigger(raw: &str) -> Trigger {
    let raw = raw.trim();
    if raw == "*" {
        return Trigger::Wildcard;
    }
    let Some(captures) = regex_literal().captures(raw) else {
        debug!(trigger = %raw, "trigger has no $regex<...> literal and never matches");
        return Trigger::Plain(raw.to_string());
    };
    match Regex::new(&captures[1]) {
        Ok(regex) => Trigger::Pattern(regex),
        Err(error) => {
            warn!(trigger = %raw, %error, "invalid trigger regex is treated as non-matching");
            Trigger::Invalid(raw.to_string())
        }
    }
}

pub fn normalize_theme_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return ROOT_THEME.to_string();
    }
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

fn regex_literal() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\$regex<(.*)>").expect("regex literal pattern"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn flattening_indexes_nested_states_by_full_path() {
        let bot = compile_bot_from_source_map(&sources(&[(
            "main.bot",
            "theme: /\nstate: Start\n    a: Hi\n    state: Order\n        q: $regex<order>\n        state: Size\n            q: *\nstate: Help\n    q!: $regex<(?i)help>\n    a: Help text\n",
        )]));

        let root = bot.theme(ROOT_THEME).expect("root theme");
        let keys = root.states.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, vec!["/Start", "/Start/Order", "/Start/Order/Size", "/Help"]);

        let order = bot.state("/", "/Start/Order").expect("order state");
        assert!(order.q.as_ref().is_some_and(|q| q.is_match("I want to order")));
        assert_eq!(order.parent_path(), Some("/Start"));

        let size = bot.state("/", "/Start/Order/Size").expect("size state");
        assert!(matches!(size.q, Some(Trigger::Wildcard)));

        let help = bot.state("/", "/Help").expect("help state");
        assert!(help.q_global.as_ref().is_some_and(|q| q.is_match("HELP me")));
        assert!(help.fields.is_empty());
    }

    #[test]
    fn themes_are_normalized_and_merged_across_sources() {
        let bot = compile_bot_from_source_map(&sources(&[
            ("a.bot", "theme: Deliv\nstate: Address\n    a: Where?\n"),
            ("b.bot", "theme: /Deliv\nstate: Confirm\n    a: Sure?\n"),
        ]));
        assert_eq!(bot.themes.len(), 1);
        let deliv = bot.theme("/Deliv").expect("deliv theme");
        assert_eq!(deliv.states.len(), 2);
        assert!(deliv.states.contains_key("/Address"));
        assert!(deliv.states.contains_key("/Confirm"));
    }

    #[test]
    fn go_fields_take_the_last_authored_value_and_keep_tag_order() {
        let bot = compile_bot_from_source_map(&sources(&[(
            "main.bot",
            "state: S\n    go!: /A\n    a: text\n    go!: /B\n    go: /C\n",
        )]));
        let state = bot.state("/", "/S").expect("state");
        assert_eq!(state.go_now.as_deref(), Some("/B"));
        assert_eq!(state.go.as_deref(), Some("/C"));
        assert_eq!(
            state.tags.iter().map(Tag::keyword).collect::<Vec<_>>(),
            vec!["go!", "a", "go!", "go"]
        );
    }

    #[test]
    fn duplicate_paths_keep_the_later_definition() {
        let bot = compile_bot_from_source_map(&sources(&[(
            "main.bot",
            "state: S\n    a: first\nstate: S\n    a: second\n",
        )]));
        let state = bot.state("/", "/S").expect("state");
        assert_eq!(state.tags, vec![Tag::Answer("second".to_string())]);
        assert_eq!(bot.state_count(), 1);
    }

    #[test]
    fn compiling_twice_yields_the_same_paths_and_tags() {
        let text = "state: A\n    a: x\n    state: B\n        script:\n            let y = 1;\n        a: y\n";
        let parsed = parse_bot_source(text);
        let first = compile_bot(std::slice::from_ref(&parsed));
        let second = compile_bot(&[parse_bot_source(text)]);
        let collect = |bot: &Bot| {
            bot.states()
                .map(|(theme, state)| (theme.to_string(), state.path.clone(), state.tags.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(&first), collect(&second));
        assert_eq!(parsed, parse_bot_source(text));
    }

    #[test]
    fn compile_trigger_variants() {
        assert!(matches!(compile_trigger(" * "), Trigger::Wildcard));
        assert!(matches!(compile_trigger("$regex<^yes$>"), Trigger::Pattern(_)));
        assert!(matches!(compile_trigger("$regex<(unclosed>"), Trigger::Invalid(_)));
        assert!(matches!(compile_trigger("hello"), Trigger::Plain(_)));
    }

    #[test]
    fn normalize_theme_name_variants() {
        assert_eq!(normalize_theme_name(""), "/");
        assert_eq!(normalize_theme_name("/"), "/");
        assert_eq!(normalize_theme_name("Deliv"), "/Deliv");
        assert_eq!(normalize_theme_name("/Deliv"), "/Deliv");
    }
}
