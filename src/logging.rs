//! Log output per the config's logging block.

use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Quieten the HTTP plumbing unless someone really asks
const NOISY_CRATES: &str = "h2=error,hyper_util=error,tower=error";

fn build_filter(level: &str) -> Result<EnvFilter, String> {
    EnvFilter::try_new(format!("{level},{NOISY_CRATES}"))
        .map_err(|err| format!("invalid log level {level:?}: {err}"))
}

/// Install the global subscriber. `debug` (the CLI flag) overrides the
/// configured level.
pub fn setup(config: &LoggingConfig, debug: bool) -> Result<(), String> {
    let level = match debug {
        true => "debug",
        false => config.level.as_str(),
    };
    let filter = build_filter(level)?;

    let writer = match config.output_path.as_str() {
        "stdout" | "" => BoxMakeWriter::new(std::io::stdout),
        "stderr" => BoxMakeWriter::new(std::io::stderr),
        path => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| format!("can't open log file {path:?}: {err}"))?;
            BoxMakeWriter::new(Arc::new(file))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match config.encoding.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|err| format!("failed to install logger: {err}"))
}
