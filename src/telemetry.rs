use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` directives are honoured on
/// top of an INFO floor. Calling it twice is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .try_init();
}
