use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bl-cli")]
#[command(about = "BotLang dialog shell")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    /// Chat with a bot line by line.
    Repl(ReplArgs),
    /// Start a session, send each `--message` in order and print every reply.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ReplArgs {
    #[arg(long = "bot")]
    pub(crate) bot: String,
    #[arg(long = "timeout-ms")]
    pub(crate) timeout_ms: Option<u64>,
    #[arg(long = "debug")]
    pub(crate) debug: bool,
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    #[arg(long = "bot")]
    pub(crate) bot: String,
    #[arg(long = "message")]
    pub(crate) message: Vec<String>,
    #[arg(long = "json")]
    pub(crate) json: bool,
    #[arg(long = "timeout-ms")]
    pub(crate) timeout_ms: Option<u64>,
    #[arg(long = "debug")]
    pub(crate) debug: bool,
}
