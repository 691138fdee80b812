use std::io::{self, Write};

use bl_core::BotError;
use bl_runtime::{format_reply, Session};

use crate::{init_logging, json_string, load_shell_bot, map_cli_io, map_cli_json, RunArgs, ShellBot, Turn};

pub(crate) fn run_messages(args: RunArgs) -> Result<i32, BotError> {
    init_logging(args.debug);
    let shell = load_shell_bot(&args.bot, args.timeout_ms)?;
    let turns = collect_turns(&shell, &args.message);
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    if args.json {
        emit_turns_json(&turns, &mut writer)?;
    } else {
        emit_turns(&turns, &mut writer)?;
    }
    Ok(0)
}

/// The start reply followed by one turn per message.
pub(crate) fn collect_turns(shell: &ShellBot, messages: &[String]) -> Vec<Turn> {
    let mut session = shell.open_session();
    let reply = session.start();
    let mut turns = vec![make_turn(None, reply, &session)];
    for message in messages {
        let reply = session.handle_message(message);
        turns.push(make_turn(Some(message.clone()), reply, &session));
    }
    turns
}

fn make_turn(input: Option<String>, reply: String, session: &Session) -> Turn {
    let formatted = format_reply(&reply);
    Turn {
        input,
        reply,
        answers: formatted.answers,
        buttons: formatted.buttons,
        theme: session.current_theme().to_string(),
        state: session.current_state().to_string(),
    }
}

pub(crate) fn emit_turns(turns: &[Turn], writer: &mut dyn Write) -> Result<(), BotError> {
    writeln!(writer, "RESULT:OK").map_err(map_cli_io)?;
    for turn in turns {
        if let Some(input) = &turn.input {
            writeln!(writer, "INPUT_JSON:{}", json_string(input)).map_err(map_cli_io)?;
        }
        for answer in &turn.answers {
            writeln!(writer, "TEXT_JSON:{}", json_string(answer)).map_err(map_cli_io)?;
        }
        for button in &turn.buttons {
            writeln!(writer, "BUTTON_JSON:{}", json_string(button)).map_err(map_cli_io)?;
        }
        writeln!(writer, "STATE:{}|{}", turn.theme, turn.state).map_err(map_cli_io)?;
    }
    Ok(())
}

pub(crate) fn emit_turns_json(turns: &[Turn], writer: &mut dyn Write) -> Result<(), BotError> {
    let payload = serde_json::to_string_pretty(turns).map_err(map_cli_json)?;
    writeln!(writer, "{}", payload).map_err(map_cli_io)
}
