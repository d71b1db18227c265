use tracing_subscriber::EnvFilter;

/// Application-level constants
pub const APP_NAME: &str = "Atelier";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Debug builds log every stage; release builds keep to run-level events.
pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if is_dev() {
        "atelier=debug"
    } else {
        "atelier=info"
    }
}

/// Install the global fmt subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_atelier() {
        assert_eq!(APP_NAME, "Atelier");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn log_filter_targets_this_crate() {
        let filter = default_log_filter();
        assert!(filter.starts_with("atelier="));
        assert_eq!(filter.ends_with("debug"), is_dev());
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }
}
