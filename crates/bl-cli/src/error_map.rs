use bl_core::BotError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> BotError {
    BotError::new(code, error.to_string())
}

pub(crate) fn emit_error(error: BotError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!("ERROR_MSG_JSON:{}", json_string(&error.message));
    1
}

pub(crate) fn json_string(text: &str) -> String {
    serde_json::to_string(text).expect("string json")
}

pub(crate) fn map_cli_io(error: std::io::Error) -> BotError {
    map_error("CLI_IO", error)
}

pub(crate) fn map_cli_source_path(error: std::io::Error) -> BotError {
    map_error("CLI_SOURCE_PATH", error)
}

pub(crate) fn map_cli_json(error: serde_json::Error) -> BotError {
    map_error("CLI_JSON", error)
}
