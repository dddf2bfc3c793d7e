//! Logging setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,mesh_adapter=debug,kube=info,hyper=warn";

/// Filter used when `RUST_LOG` is unset and `DEBUG=true`
pub const DEBUG_FILTER: &str = "debug,hyper=info";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Default filter directive given the `DEBUG` environment value
pub fn default_filter(debug: Option<&str>) -> &'static str {
    match debug {
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => DEBUG_FILTER,
        _ => DEFAULT_FILTER,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the defaults. Calling this twice is harmless; the
/// second call is ignored.
pub fn init(format: LogFormat) {
    let debug = std::env::var("DEBUG").ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug.as_deref())));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_env_raises_default_filter() {
        assert_eq!(default_filter(Some("true")), DEBUG_FILTER);
        assert_eq!(default_filter(Some("TRUE")), DEBUG_FILTER);
        assert_eq!(default_filter(Some("false")), DEFAULT_FILTER);
        assert_eq!(default_filter(None), DEFAULT_FILTER);
    }

    #[test]
    fn filters_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new(DEBUG_FILTER).is_ok());
    }
}
