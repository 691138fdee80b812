use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bl_compiler::compile_bot_from_source_map;
use bl_core::{Bot, BotError, START_STATE};
use bl_runtime::{HelperScript, Session, SessionOptions};
use tracing::{debug, warn};

mod http;
mod loader;

pub use http::{HttpHostFunctions, FETCH_JSON, FETCH_TEXT};

#[derive(Debug, Clone)]
pub struct LoadBotOptions {
    /// A single `.bot` file or a project directory scanned recursively.
    pub path: PathBuf,
}

/// A compiled bot plus the helper scripts every session should load.
#[derive(Debug, Clone)]
pub struct LoadedBot {
    pub bot: Arc<Bot>,
    pub helpers: Vec<HelperScript>,
    pub source_names: Vec<String>,
}

pub fn load_bot(options: &LoadBotOptions) -> Result<LoadedBot, BotError> {
    let files = loader::read_project(&options.path)?;
    let bot = compile_bot_sources(&files.bots)?;
    let helpers = files
        .helpers
        .into_iter()
        .map(|(name, source)| HelperScript { name, source })
        .collect::<Vec<_>>();
    debug!(
        path = %options.path.display(),
        sources = files.bots.len(),
        helpers = helpers.len(),
        states = bot.state_count(),
        "bot loaded"
    );
    Ok(LoadedBot {
        bot: Arc::new(bot),
        helpers,
        source_names: files.bots.into_keys().collect(),
    })
}

pub fn compile_bot_sources(
    sources: &BTreeMap<String, String>,
) -> Result<Bot, BotError> {
    let bot = compile_bot_from_source_map(sources);
    if bot.state_count() == 0 {
        return Err(BotError::new(
            "API_BOT_EMPTY",
            "Bot sources declare no states.",
        ));
    }
    if !bot.themes.values().any(|theme| theme.states.contains_key(START_STATE)) {
        warn!("bot has no {} state; sessions will not start", START_STATE);
    }
    Ok(bot)
}

pub fn create_session(loaded: &LoadedBot, options: SessionOptions) -> Session {
    Session::new(Arc::clone(&loaded.bot), &loaded.helpers, options)
}

/// Session options with the HTTP fetch helpers registered.
pub fn default_session_options() -> Result<SessionOptions, BotError> {
    let defaults = SessionOptions::default();
    let http = HttpHostFunctions::new(defaults.script_timeout)?;
    Ok(SessionOptions {
        host_functions: Some(Arc::new(http)),
        ..defaults
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};

    use bl_core::BotValue;
    use bl_runtime::HostFunctionRegistry;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("botlang-api-{}-{}", name, nanos))
    }

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent should be created");
        }
        fs::write(path, content).expect("file should be written");
    }

    #[test]
    fn load_bot_merges_project_files_and_helpers() {
        let root = temp_dir("project");
        write_file(
            &root.join("main.bot"),
            "state: Start\n    a: Hi ${shout(\"there\")}\n",
        );
        write_file(
            &root.join("themes/deliv.bot"),
            "theme: Deliv\nstate: Address\n    q!: $regex<deliver>\n    a: Where?\n",
        );
        write_file(&root.join("helpers.rhai"), "fn shout(text) { text.to_upper() }");
        write_file(&root.join("notes.txt"), "ignored");

        let loaded = load_bot(&LoadBotOptions { path: root.clone() }).expect("bot should load");
        assert_eq!(loaded.source_names, vec!["main.bot", "themes/deliv.bot"]);
        assert_eq!(loaded.helpers.len(), 1);
        assert_eq!(loaded.helpers[0].name, "helpers.rhai");
        assert!(loaded.bot.contains("/Deliv", "/Address"));

        let mut session = create_session(&loaded, SessionOptions::default());
        assert_eq!(session.start(), "Hi THERE");
        assert_eq!(session.handle_message("deliver"), "Where?");

        fs::remove_dir_all(root).expect("temp dir should be removed");
    }

    #[test]
    fn load_bot_accepts_a_single_file() {
        let root = temp_dir("single");
        let file = root.join("pizza.bot");
        write_file(&file, "state: Start\n    a: Pizza?\n");

        let loaded = load_bot(&LoadBotOptions { path: file }).expect("bot should load");
        assert_eq!(loaded.source_names, vec!["pizza.bot"]);
        assert!(loaded.helpers.is_empty());

        fs::remove_dir_all(root).expect("temp dir should be removed");
    }

    #[test]
    fn load_bot_reports_source_errors() {
        let missing = load_bot(&LoadBotOptions {
            path: temp_dir("missing"),
        })
        .expect_err("missing path should fail");
        assert_eq!(missing.code, "API_SOURCE_NOT_FOUND");

        let root = temp_dir("empty");
        write_file(&root.join("readme.md"), "# nothing");
        let empty = load_bot(&LoadBotOptions { path: root.clone() })
            .expect_err("directory without bots should fail");
        assert_eq!(empty.code, "API_SOURCE_EMPTY");

        let unsupported = load_bot(&LoadBotOptions {
            path: root.join("readme.md"),
        })
        .expect_err("non-bot file should fail");
        assert_eq!(unsupported.code, "API_SOURCE_UNSUPPORTED");

        write_file(&root.join("blank.bot"), "\n\n");
        let blank = load_bot(&LoadBotOptions { path: root.clone() })
            .expect_err("bot without states should fail");
        assert_eq!(blank.code, "API_BOT_EMPTY");

        fs::remove_dir_all(root).expect("temp dir should be removed");
    }

    #[test]
    fn http_host_functions_validate_arguments_before_fetching() {
        let http = HttpHostFunctions::new(std::time::Duration::from_secs(1))
            .expect("client should build");
        assert_eq!(http.names(), &["fetch_json".to_string(), "fetch_text".to_string()]);

        let error = http
            .call(FETCH_JSON, &[])
            .expect_err("missing url should fail");
        assert_eq!(error.code, "API_HOST_ARGUMENT");

        let error = http
            .call(FETCH_TEXT, &[BotValue::Number(1.0)])
            .expect_err("non-string url should fail");
        assert_eq!(error.code, "API_HOST_ARGUMENT");

        let error = http
            .call("fetch_xml", &[BotValue::from("http://localhost")])
            .expect_err("unknown function should fail");
        assert_eq!(error.code, "API_HOST_FUNCTION_MISSING");
    }

    #[test]
    fn default_session_options_register_fetch_helpers() {
        let options = default_session_options().expect("options should build");
        let registry = options.host_functions.expect("registry should be set");
        assert!(registry.names().iter().any(|name| name == FETCH_JSON));
    }
}
