//! `tracing` subscriber set-up for the console binary.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `FFEE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! Logs go to stderr so they do not interleave with console output.

use ffee_types::FeeError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.  Call once, before starting any worker.
///
/// # Errors
///
/// [`FeeError::Config`] if a global subscriber is already installed.
pub fn init_tracing() -> Result<(), FeeError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json_requested(std::env::var("FFEE_LOG_FORMAT").ok().as_deref()) {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    result.map_err(|e| FeeError::Config(format!("tracing already initialised: {e}")))
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_format_selection() {
        assert!(json_requested(Some("json")));
        assert!(json_requested(Some("JSON")));
        assert!(!json_requested(Some("compact")));
        assert!(!json_requested(None));
    }

    #[test]
    fn second_init_is_an_error() {
        let first = init_tracing();
        let second = init_tracing();
        // Another test may have installed a subscriber first.
        assert!(first.is_ok() || matches!(first, Err(FeeError::Config(_))));
        assert!(matches!(second, Err(FeeError::Config(_))));
    }
}
