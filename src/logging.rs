use tracing_subscriber::EnvFilter;

/// Initialize structured logging for a binary.
///
/// `RUST_LOG` wins over `level` when set. Output goes to stderr so stdout
/// stays free for the run narrative and the producer's summary line.
pub fn init(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // a second init (tests, embedded use) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
