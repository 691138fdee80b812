use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(untagged)]
pub enum BotValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<BotValue>),
    Map(BTreeMap<String, BotValue>),
}

impl BotValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, BotValue>> {
        match self {
            Self::Map(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// Text form used when a value is spliced into an answer.
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Number(value) => number_to_text(*value),
            Self::String(value) => value.clone(),
            Self::Array(_) | Self::Map(_) => self.to_json(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// The number as an integer when it has no fractional part and fits `i64` exactly.
    pub fn as_integer(&self) -> Option<i64> {
        self.as_number().and_then(integral)
    }
}

/// Integral numbers serialize as JSON integers so `2` never turns into `2.0`.
impl Serialize for BotValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Number(value) => match integral(*value) {
                Some(integer) => serializer.serialize_i64(integer),
                None => serializer.serialize_f64(*value),
            },
            Self::String(value) => serializer.serialize_str(value),
            Self::Array(values) => values.serialize(serializer),
            Self::Map(values) => values.serialize(serializer),
        }
    }
}

impl From<&str> for BotValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for BotValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for BotValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for BotValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

pub(crate) fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15).then_some(value as i64)
}

fn number_to_text(value: f64) -> String {
    match integral(value) {
        Some(integer) => integer.to_string(),
        None => value.to_string(),
    }
}
