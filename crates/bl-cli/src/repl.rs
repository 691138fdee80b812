use std::io::{self, BufRead, Write};

use bl_core::BotError;
use bl_runtime::{format_reply, Session};

use crate::{
    init_logging, load_shell_bot, map_cli_io, map_cli_json, ReplArgs, ReplCommandAction,
    ShellBot,
};

pub(crate) const REPL_HELP: &str = "commands: :help :state :context :restart :quit";

pub(crate) fn run_repl(args: ReplArgs) -> Result<i32, BotError> {
    init_logging(args.debug);
    let shell = load_shell_bot(&args.bot, args.timeout_ms)?;
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut writer = io::stdout();
    run_repl_with_io(&shell, &mut reader, &mut writer)
}

pub(crate) fn run_repl_with_io(
    shell: &ShellBot,
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
) -> Result<i32, BotError> {
    writeln!(writer, "BotLang REPL").map_err(map_cli_io)?;
    writeln!(writer, "{}", REPL_HELP).map_err(map_cli_io)?;

    let mut session = shell.open_session();
    let mut buttons = write_reply(writer, &session.start())?;

    loop {
        let Some(raw) = prompt_input_from("> ", reader, writer)? else {
            writeln!(writer).map_err(map_cli_io)?;
            return Ok(0);
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match handle_repl_command(raw, shell, &mut session, writer)? {
            ReplCommandAction::Quit => return Ok(0),
            ReplCommandAction::Continue => continue,
            ReplCommandAction::Restart => {
                buttons = write_reply(writer, &session.start())?;
                continue;
            }
            ReplCommandAction::NotHandled => {}
        }
        let message = button_by_index(raw, &buttons).unwrap_or(raw).to_string();
        buttons = write_reply(writer, &session.handle_message(&message))?;
    }
}

pub(crate) fn handle_repl_command(
    raw: &str,
    shell: &ShellBot,
    session: &mut Session,
    writer: &mut dyn Write,
) -> Result<ReplCommandAction, BotError> {
    match raw {
        ":help" => {
            writeln!(writer, "{}", REPL_HELP).map_err(map_cli_io)?;
            Ok(ReplCommandAction::Continue)
        }
        ":state" => {
            writeln!(writer, "state: {}", session.position()).map_err(map_cli_io)?;
            Ok(ReplCommandAction::Continue)
        }
        ":context" => {
            let context = serde_json::to_string_pretty(session.context()).map_err(map_cli_json)?;
            writeln!(writer, "{}", context).map_err(map_cli_io)?;
            Ok(ReplCommandAction::Continue)
        }
        ":restart" => {
            *session = shell.open_session();
            writeln!(writer, "restarted").map_err(map_cli_io)?;
            Ok(ReplCommandAction::Restart)
        }
        ":quit" => {
            writeln!(writer, "bye").map_err(map_cli_io)?;
            Ok(ReplCommandAction::Quit)
        }
        _ => Ok(ReplCommandAction::NotHandled),
    }
}

/// Prints answers and numbered buttons; returns the labels for index lookup.
pub(crate) fn write_reply(writer: &mut dyn Write, reply: &str) -> Result<Vec<String>, BotError> {
    let formatted = format_reply(reply);
    writeln!(writer).map_err(map_cli_io)?;
    for answer in &formatted.answers {
        writeln!(writer, "{}", answer).map_err(map_cli_io)?;
    }
    for (index, label) in formatted.buttons.iter().enumerate() {
        writeln!(writer, "  [{}] {}", index + 1, label).map_err(map_cli_io)?;
    }
    Ok(formatted.buttons)
}

pub(crate) fn button_by_index<'a>(raw: &str, buttons: &'a [String]) -> Option<&'a str> {
    let index = raw.parse::<usize>().ok()?;
    buttons
        .get(index.checked_sub(1)?)
        .map(String::as_str)
}

/// Reads one line; `None` at end of input.
pub(crate) fn prompt_input_from(
    prefix: &str,
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
) -> Result<Option<String>, BotError> {
    write!(writer, "{}", prefix).map_err(map_cli_io)?;
    writer.flush().map_err(map_cli_io)?;
    let mut input = String::new();
    let read = reader.read_line(&mut input).map_err(map_cli_io)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim_end_matches(&['\r', '\n'][..]).to_string()))
}
