use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::BotValue;

pub type ContextMap = BTreeMap<String, BotValue>;

/// Per-session data visible to scripts. Only scripts mutate the three maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub session: ContextMap,
    pub client: ContextMap,
    pub request: ContextMap,
    pub input: Option<String>,
}

impl Context {
    pub fn input_text(&self) -> &str {
        self.input.as_deref().unwrap_or_default()
    }

    pub fn as_value(&self) -> BotValue {
        BotValue::Map(BTreeMap::from([
            ("session".to_string(), BotValue::Map(self.session.clone())),
            ("client".to_string(), BotValue::Map(self.client.clone())),
            ("request".to_string(), BotValue::Map(self.request.clone())),
            (
                "input".to_string(),
                BotValue::String(self.input_text().to_string()),
            ),
        ]))
    }
}
