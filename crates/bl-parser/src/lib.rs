mod line;
mod tree;

pub use line::parse_bot_source;
pub use tree::{BotSource, StateNode, ThemeNode};
