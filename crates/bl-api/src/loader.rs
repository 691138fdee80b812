use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bl_core::BotError;
use walkdir::WalkDir;

pub(crate) const BOT_EXTENSION: &str = "bot";
pub(crate) const HELPER_EXTENSION: &str = "rhai";

/// Raw project files keyed by their `/`-separated path relative to the root.
#[derive(Debug, Default)]
pub(crate) struct ProjectFiles {
    pub(crate) bots: BTreeMap<String, String>,
    pub(crate) helpers: BTreeMap<String, String>,
}

pub(crate) fn read_project(path: &Path) -> Result<ProjectFiles, BotError> {
    if !path.exists() {
        return Err(BotError::new(
            "API_SOURCE_NOT_FOUND",
            format!("bot path does not exist: {}", path.display()),
        ));
    }
    if path.is_file() {
        return read_single_file(path);
    }

    let mut files = ProjectFiles::default();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.path();
        let bucket = match extension(file) {
            Some(BOT_EXTENSION) => &mut files.bots,
            Some(HELPER_EXTENSION) => &mut files.helpers,
            _ => continue,
        };
        let relative = file
            .strip_prefix(path)
            .map_err(|error| {
                BotError::new(
                    "API_SOURCE_SCAN",
                    format!("failed to scan {}: {}", file.display(), error),
                )
            })?
            .to_string_lossy()
            .replace('\\', "/");
        bucket.insert(relative, read_text(file)?);
    }

    if files.bots.is_empty() {
        return Err(BotError::new(
            "API_SOURCE_EMPTY",
            format!("No .bot files under {}", path.display()),
        ));
    }
    Ok(files)
}

fn read_single_file(path: &Path) -> Result<ProjectFiles, BotError> {
    if extension(path) != Some(BOT_EXTENSION) {
        return Err(BotError::new(
            "API_SOURCE_UNSUPPORTED",
            format!("expected a .bot file or a directory: {}", path.display()),
        ));
    }
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main.bot".to_string());
    let mut files = ProjectFiles::default();
    files.bots.insert(name, read_text(path)?);
    Ok(files)
}

fn read_text(path: &Path) -> Result<String, BotError> {
    fs::read_to_string(path).map_err(|error| {
        BotError::new(
            "API_SOURCE_READ",
            format!("failed to read {}: {}", path.display(), error),
        )
    })
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|extension| extension.to_str())
}
