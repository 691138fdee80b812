use std::sync::Arc;

use bl_api::LoadedBot;
use bl_runtime::{Session, SessionOptions};
use serde::Serialize;

/// A loaded bot plus the options every new session gets.
#[derive(Debug, Clone)]
pub(crate) struct ShellBot {
    pub(crate) loaded: LoadedBot,
    pub(crate) options: SessionOptions,
}

impl ShellBot {
    pub(crate) fn open_session(&self) -> Session {
        Session::new(
            Arc::clone(&self.loaded.bot),
            &self.loaded.helpers,
            self.options.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Turn {
    pub(crate) input: Option<String>,
    pub(crate) reply: String,
    pub(crate) answers: Vec<String>,
    pub(crate) buttons: Vec<String>,
    pub(crate) theme: String,
    pub(crate) state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplCommandAction {
    NotHandled,
    Continue,
    Restart,
    Quit,
}
