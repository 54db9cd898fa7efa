//! Global `tracing` subscriber setup for applications embedding the SDK.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{MachinaError, MachinaResult};

/// Install a registry with an `EnvFilter` and a text or JSON fmt layer.
///
/// `RUST_LOG` overrides `config.level`. Fails if a global subscriber is
/// already installed.
pub fn init(config: &LogConfig) -> MachinaResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| MachinaError::Logging(format!("invalid level {:?}: {e}", config.level)))?;

    let result = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
        "text" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
        other => {
            return Err(MachinaError::Logging(format!(
                "unknown log format {other:?} (expected \"json\" or \"text\")"
            )))
        }
    };

    result.map_err(|e| MachinaError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        let config = LogConfig {
            level: "info".into(),
            format: "xml".into(),
        };
        assert!(matches!(init(&config), Err(MachinaError::Logging(_))));
    }

    #[test]
    fn test_second_init_fails_instead_of_panicking() {
        let config = LogConfig::default();
        // Another test in this binary may have installed one already.
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
