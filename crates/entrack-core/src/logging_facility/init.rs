//! Subscriber installation

use std::sync::Once;

use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output at debug level
    Development,
    /// JSON output at info level
    Production,
    /// Bare registry; tests install the capture layer themselves
    Test,
}

impl Profile {
    fn default_filter(self) -> &'static str {
        match self {
            Profile::Development => "entrack=debug",
            Profile::Production | Profile::Test => "entrack=info",
        }
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber for `profile`
///
/// Only the first call has any effect. `RUST_LOG` overrides the profile's
/// default filter.
///
/// ```
/// use entrack_core::logging_facility::{init, Profile};
///
/// init(Profile::Production);
/// init(Profile::Development); // ignored
/// ```
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(profile.default_filter()));
        match profile {
            Profile::Development => {
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
            Profile::Production => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .init();
            }
            Profile::Test => {
                tracing_subscriber::registry().init();
            }
        }
    });
}
