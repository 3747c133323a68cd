//! Log setup for the `speakerscribe` binary.
//!
//! Logs share stderr with the progress line; stdout carries only the
//! transcript so it can be piped.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "speakerscribe=info";
const FORMAT_ENV: &str = "RUST_LOG_FORMAT";

/// Install the global subscriber. `RUST_LOG` overrides the default filter and
/// `RUST_LOG_FORMAT=json` switches to one JSON object per line. Later calls
/// leave the first subscriber in place.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if wants_json(std::env::var(FORMAT_ENV).ok().as_deref()) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn wants_json(format: Option<&str>) -> bool {
    format.is_some_and(|value| value.trim().eq_ignore_ascii_case("json"))
}
