use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn";

/// Installs the stderr subscriber. A second call is a no-op.
pub(crate) fn init_logging(debug: bool) {
    let directive = filter_directive(debug, std::env::var("RUST_LOG").ok());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn filter_directive(debug: bool, env: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    env.filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

#[cfg(test)]
mod logging_tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_environment() {
        assert_eq!(
            filter_directive(true, Some("bl_runtime=trace".to_string())),
            "debug"
        );
    }

    #[test]
    fn environment_filter_is_used_when_present() {
        assert_eq!(
            filter_directive(false, Some("bl_runtime=trace".to_string())),
            "bl_runtime=trace"
        );
        assert_eq!(filter_directive(false, Some("  ".to_string())), "warn");
        assert_eq!(filter_directive(false, None), "warn");
    }
}
