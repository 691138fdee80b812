use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use bl_api::{default_session_options, load_bot, LoadBotOptions};
use bl_core::BotError;
use clap::Parser;
use tracing::debug;

mod cli_args;
mod error_map;
mod logging;
mod models;
mod repl;
mod run_mode;

pub(crate) use cli_args::{Cli, Mode, ReplArgs, RunArgs};
pub(crate) use error_map::{emit_error, json_string, map_cli_io, map_cli_json, map_cli_source_path};
pub(crate) use logging::init_logging;
pub(crate) use models::{ReplCommandAction, ShellBot, Turn};

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, BotError> {
    match cli.command {
        Mode::Repl(args) => repl::run_repl(args),
        Mode::Run(args) => run_mode::run_messages(args),
    }
}

pub(crate) fn load_shell_bot(bot: &str, timeout_ms: Option<u64>) -> Result<ShellBot, BotError> {
    let path = resolve_bot_path(bot)?;
    let loaded = load_bot(&LoadBotOptions { path })?;
    let mut options = default_session_options()?;
    if let Some(timeout_ms) = timeout_ms {
        options.script_timeout = Duration::from_millis(timeout_ms);
    }
    debug!(?options, "session options ready");
    Ok(ShellBot { loaded, options })
}

pub(crate) fn resolve_bot_path(bot: &str) -> Result<PathBuf, BotError> {
    let path = PathBuf::from(bot);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()
        .map_err(map_cli_source_path)?
        .join(path))
}
