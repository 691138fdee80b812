use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bl_core::{BotError, BotValue};

mod bridge;
mod buttons;
mod host;
mod reply;
mod resolver;
mod sanitize;
mod session;
mod substitute;

pub use buttons::parse_buttons;
pub use host::{HelperScript, ScriptEffects, ScriptHost, TransitionRequest};
pub use reply::{format_reply, FormattedReply};
pub use resolver::resolve;
pub use sanitize::sanitize_value;
pub use session::{Session, NOT_UNDERSTOOD};

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_TRANSITION_DEPTH: usize = 64;

/// Functions supplied by the embedding application and callable from scripts
/// with up to three arguments.
pub trait HostFunctionRegistry: Send + Sync {
    fn call(&self, name: &str, args: &[BotValue]) -> Result<BotValue, BotError>;
    fn names(&self) -> &[String];
}

#[derive(Clone)]
pub struct SessionOptions {
    pub script_timeout: Duration,
    pub max_transition_depth: usize,
    pub host_functions: Option<Arc<dyn HostFunctionRegistry>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            max_transition_depth: DEFAULT_MAX_TRANSITION_DEPTH,
            host_functions: None,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("script_timeout", &self.script_timeout)
            .field("max_transition_depth", &self.max_transition_depth)
            .field(
                "host_functions",
                &self.host_functions.as_ref().map(|registry| registry.names()),
            )
            .finish()
    }
}
