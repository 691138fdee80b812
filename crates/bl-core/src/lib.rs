pub mod context;
pub mod error;
pub mod types;
pub mod value;

pub use context::Context;
pub use error::BotError;
pub use types::*;
pub use value::*;
