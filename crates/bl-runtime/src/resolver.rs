use bl_core::{Bot, Target, ROOT_THEME};
use tracing::debug;

/// Resolves an authored target against the current position.
///
/// Returns `None` only for an empty target. Any other input yields a pair,
/// which may name a state that does not exist; callers check existence.
pub fn resolve(bot: &Bot, target: &str, current_path: &str, current_theme: &str) -> Option<Target> {
    let target = target.trim().trim_end_matches('/');
    if target.is_empty() {
        return None;
    }
    let current = normalize_path(current_path);

    let resolved = if target == ".." || target.starts_with("../") {
        resolve_upward(target, &current, current_theme)
    } else if let Some(rest) = target.strip_prefix("./") {
        Target::new(current_theme, join_path(&current, rest))
    } else if target.starts_with('/') {
        resolve_absolute(bot, target, current_theme)
    } else {
        resolve_short(bot, target, &current, current_theme)
    };
    debug!(%target, from = %current, to = %resolved, "resolved target");
    Some(resolved)
}

fn resolve_upward(target: &str, current: &str, theme: &str) -> Target {
    let mut segments = split_segments(current);
    let mut rest = Vec::new();
    let mut climbing = true;
    for part in target.split('/').filter(|part| !part.is_empty()) {
        if climbing && part == ".." {
            segments.pop();
        } else {
            climbing = false;
            rest.push(part);
        }
    }
    segments.extend(rest);
    Target::new(theme, format!("/{}", segments.join("/")))
}

fn resolve_absolute(bot: &Bot, target: &str, current_theme: &str) -> Target {
    let parts = split_segments(target);
    let path = format!("/{}", parts.join("/"));

    if parts.len() > 1 {
        let candidate_theme = format!("/{}", parts[0]);
        if bot.has_theme(&candidate_theme) {
            return Target::new(candidate_theme, format!("/{}", parts[1..].join("/")));
        }
    }
    if bot.contains(ROOT_THEME, &path) {
        return Target::new(ROOT_THEME, path);
    }
    Target::new(current_theme, path)
}

/// Short names prefer a child of the current state, then a top-level state
/// of the current theme.
fn resolve_short(bot: &Bot, target: &str, current: &str, theme: &str) -> Target {
    let child = join_path(current, target);
    if bot.contains(theme, &child) {
        return Target::new(theme, child);
    }
    let top_level = join_path("/", target);
    Target::new(theme, top_level)
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn normalize_path(path: &str) -> String {
    format!("/{}", split_segments(path).join("/"))
}

fn join_path(base: &str, rest: &str) -> String {
    let mut segments = split_segments(base);
    segments.extend(split_segments(rest));
    format!("/{}", segments.join("/"))
}
