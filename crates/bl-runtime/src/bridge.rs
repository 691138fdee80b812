use std::collections::BTreeMap;

use bl_core::{BotError, BotValue};
use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};

/// `$name` bindings visible to scripts, paired with the scope variable they read.
pub(crate) const CONTEXT_BINDINGS: [(&str, &str); 5] = [
    ("$context", "__bl_context"),
    ("$session", "__bl_session"),
    ("$client", "__bl_client"),
    ("$request", "__bl_request"),
    ("$input", "__bl_input"),
];

pub(crate) const REACTIONS_BINDING: (&str, &str) = ("$reactions", "reactions");

pub(crate) fn rewrite_bindings(source: &str) -> String {
    let mut rewritten = source.to_string();
    for (symbol, variable) in CONTEXT_BINDINGS.iter().chain([&REACTIONS_BINDING]) {
        rewritten = replace_binding_symbol(&rewritten, symbol, variable);
    }
    rewritten
}

pub(crate) fn replace_binding_symbol(source: &str, symbol: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;

    while let Some(found) = source[cursor..].find(symbol) {
        let start = cursor + found;
        let end = start + symbol.len();

        let left = source[..start].chars().next_back();
        let right = source[end..].chars().next();
        if is_left_boundary(left) && is_right_boundary(right) {
            out.push_str(&source[cursor..start]);
            out.push_str(replacement);
            cursor = end;
            continue;
        }

        let next = start + source[start..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&source[cursor..next]);
        cursor = next;
    }

    out.push_str(&source[cursor..]);
    out
}

pub(crate) fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '$' || ch == '_'
}

fn is_left_boundary(left: Option<char>) -> bool {
    match left {
        None => true,
        Some(ch) => !is_identifier_char(ch) && ch != '.',
    }
}

fn is_right_boundary(right: Option<char>) -> bool {
    match right {
        None => true,
        Some(ch) => !is_identifier_char(ch),
    }
}

pub(crate) fn value_to_dynamic(value: &BotValue) -> Dynamic {
    match value {
        BotValue::Null => Dynamic::UNIT,
        BotValue::Bool(value) => Dynamic::from_bool(*value),
        BotValue::Number(value) => match value_integer(value) {
            Some(integer) => Dynamic::from_int(integer),
            None => Dynamic::from_float(*value as FLOAT),
        },
        BotValue::String(value) => Dynamic::from(value.clone()),
        BotValue::Array(values) => {
            Dynamic::from_array(values.iter().map(value_to_dynamic).collect::<Array>())
        }
        BotValue::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.clone().into(), value_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Integral numbers go back to scripts as `INT` so they keep working as
/// indexes, ranges and counters.
fn value_integer(value: &f64) -> Option<INT> {
    BotValue::Number(*value)
        .as_integer()
        .and_then(|integer| INT::try_from(integer).ok())
}

pub(crate) fn dynamic_to_value(value: Dynamic) -> Result<BotValue, BotError> {
    if value.is_unit() {
        return Ok(BotValue::Null);
    }
    if value.is::<bool>() {
        return Ok(BotValue::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(BotValue::Number(value.cast::<INT>() as f64));
    }
    if value.is::<FLOAT>() {
        return Ok(BotValue::Number(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(BotValue::String(
            value.cast::<ImmutableString>().to_string(),
        ));
    }
    if value.is::<char>() {
        return Ok(BotValue::String(value.cast::<char>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_value(item)?);
        }
        return Ok(BotValue::Array(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_value(value)?);
        }
        return Ok(BotValue::Map(out));
    }

    Err(BotError::new(
        "SCRIPT_VALUE_UNSUPPORTED",
        format!("Unsupported script value type \"{}\".", value.type_name()),
    ))
}

/// Text form of a script value: strings as-is, containers as JSON.
pub(crate) fn dynamic_to_text(value: Dynamic) -> Result<String, BotError> {
    dynamic_to_value(value).map(|value| value.to_text())
}

#[cfg(test)]
mod bridge_tests {
    use super::*;

    #[test]
    fn binding_rewrite_respects_identifier_boundaries() {
        let source = "$session.name = $input; let x = $sessions; a.$client; $reactions.answer(\"hi\");";
        let rewritten = rewrite_bindings(source);
        assert!(rewritten.starts_with("__bl_session.name = __bl_input;"));
        assert!(rewritten.contains("$sessions"));
        assert!(rewritten.contains("a.$client"));
        assert!(rewritten.contains("reactions.answer(\"hi\")"));
    }

    #[test]
    fn binding_rewrite_handles_multibyte_text() {
        let rewritten = replace_binding_symbol("«$input» ü", "$input", "__bl_input");
        assert_eq!(rewritten, "«__bl_input» ü");
    }

    #[test]
    fn values_cross_the_bridge_without_loss() {
        let value = BotValue::Map(BTreeMap::from([
            ("name".to_string(), BotValue::from("Ana")),
            ("age".to_string(), BotValue::from(31.0)),
            ("tags".to_string(), BotValue::Array(vec![BotValue::from(true)])),
            ("nothing".to_string(), BotValue::Null),
        ]));
        let back = dynamic_to_value(value_to_dynamic(&value)).expect("value should convert");
        assert_eq!(back, value);
    }

    #[test]
    fn integers_become_numbers_and_render_without_decimals() {
        let value = dynamic_to_value(Dynamic::from(42 as INT)).expect("int");
        assert_eq!(value, BotValue::Number(42.0));
        assert_eq!(
            dynamic_to_text(Dynamic::from('x')).expect("char"),
            "x".to_string()
        );
    }

    #[test]
    fn integral_numbers_reenter_scripts_as_int() {
        assert!(value_to_dynamic(&BotValue::Number(3.0)).is::<INT>());
        assert!(value_to_dynamic(&BotValue::Number(3.5)).is::<FLOAT>());
        assert!(value_to_dynamic(&BotValue::Number(f64::INFINITY)).is::<FLOAT>());
    }

    #[test]
    fn custom_types_are_rejected() {
        #[derive(Clone)]
        struct Opaque;
        let error = dynamic_to_value(Dynamic::from(Opaque)).expect_err("custom type");
        assert_eq!(error.code, "SCRIPT_VALUE_UNSUPPORTED");
    }
}
