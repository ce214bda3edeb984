//! Shared plumbing for the `tuf` and `verify` binaries.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Environment variable selecting the log level
pub const LOG_ENV: &str = "ROOTLINE_LOG";

/// Initialize logging to stderr; stdout is reserved for command output.
pub fn init_logging() {
    let level = std::env::var(LOG_ENV)
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");
}

/// Report a fatal error and exit non-zero.
pub fn fail(err: rootline_core::CeremonyError) -> ! {
    eprintln!("error: {err}");
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
    std::process::exit(1);
}
