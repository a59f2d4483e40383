//! Console logging for host applications.
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! host installs a subscriber, either its own or the one set up here.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Installs a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_level` (e.g. `"info"` or
/// `"imageutils=debug"`). Fails if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_logging(default_level: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| {
            Error::invalid_config("logging", format!("invalid filter '{default_level}': {e}"))
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::invalid_config("logging", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_invalid_filter_rejected() {
        // Only meaningful when RUST_LOG does not override the default.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = init_logging("imageutils=notalevel").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstructionFailure);
    }
}
