use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "focus.log";
const LOG_ENV: &str = "FOCUS_LOG";
const DEFAULT_DIRECTIVE: &str = "focus_engine=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs the global subscriber. Logs go to `<logs_dir>/focus.log`, or to
/// stderr when that file cannot be opened. Safe to call more than once.
pub fn init_tracing(logs_dir: &Path) {
    let path = logs_dir.join(LOG_FILE);
    let result = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        Err(error) => {
            eprintln!("cannot open {}: {error}; logging to stderr", path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .try_init()
        }
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
