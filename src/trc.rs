//! Tracing configuration and initialization.

use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Environment variable controlling the log filter.
pub const ENV_LOG: &str = "SFTP_FS_LOG";

pub struct Trc {
    env_filter: EnvFilter,
    verbose: bool,
}

impl Default for Trc {
    fn default() -> Self {
        let maybe_env_filter =
            EnvFilter::try_from_env(ENV_LOG).or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            // A user who set a filter wants the full picture, span events
            // included.
            Ok(env_filter) => Self {
                env_filter,
                verbose: true,
            },
            Err(_) => Self {
                env_filter: EnvFilter::new("info"),
                verbose: false,
            },
        }
    }
}

impl Trc {
    pub fn init(self) {
        let builder = tracing_subscriber::fmt().with_env_filter(self.env_filter);
        if self.verbose {
            builder
                .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
                .init();
        } else {
            builder.with_target(false).compact().init();
        }
    }
}
