//! tracing-subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use tunecord_core::config::LoggingConfig;

/// Filter directives: `--verbose` wins over `logging.level`, then per-crate
/// filters are appended.
pub fn directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };

    std::iter::once(level)
        .chain(config.filters.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides the config.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(config, verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match config.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    match config.format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true)
            .init(),
        _ => fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_default_info() {
        assert_eq!(directives(&LoggingConfig::default(), false), "info");
    }

    #[test]
    fn test_directives_level_and_filters() {
        let config = LoggingConfig {
            level: Some("warn".into()),
            filters: vec!["tunecord_media=trace".into()],
            ..LoggingConfig::default()
        };
        assert_eq!(directives(&config, false), "warn,tunecord_media=trace");
        assert_eq!(directives(&config, true), "debug,tunecord_media=trace");
    }
}
