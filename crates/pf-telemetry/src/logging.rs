use tracing_subscriber::{fmt, EnvFilter};

// ---------------------------------------------------------------------------
// LogFormat
// ---------------------------------------------------------------------------

/// Output shape of the log stream, selected by the `general.log_format`
/// config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for terminals and local runs.
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

impl LogFormat {
    /// Parse the config value. Anything that isn't `json` means text, so a
    /// typo degrades to readable output instead of a dead daemon.
    pub fn from_config(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber for a postflow process.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (the config's
/// `general.log_level`, e.g. "info" or "pf_queue=debug,warn") applies.
/// Worker ids ride on span fields rather than thread ids, so thread ids are
/// left out of the output. Calling this again (tests, embedded use) leaves
/// the existing subscriber in place.
pub fn init_logging(service_name: &str, default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    match format {
        LogFormat::Text => {
            builder.try_init().ok();
        }
        LogFormat::Json => {
            builder.json().try_init().ok();
        }
    }

    tracing::info!(service = service_name, format = ?format, "logging initialised");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_defaults_to_text() {
        assert_eq!(LogFormat::from_config("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_config("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_config("text"), LogFormat::Text);
        assert_eq!(LogFormat::from_config("yaml"), LogFormat::Text);
        assert_eq!(LogFormat::from_config(""), LogFormat::Text);
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        init_logging("pf-test", "info", LogFormat::Text);
        init_logging("pf-test", "debug", LogFormat::Json);
    }
}
