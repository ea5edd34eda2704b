use std::sync::Once;

use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Output shape of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable lines, debug level for the unitas crates
    Development,
    /// One JSON object per event, info level
    Production,
    /// Bare registry; pair with `init_test_capture` for assertions
    Test,
}

impl Profile {
    fn default_directive(&self) -> &'static str {
        match self {
            Profile::Development => "unitas_core=debug,unitas_store=debug",
            Profile::Production => "unitas_core=info,unitas_store=info",
            Profile::Test => "off",
        }
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber for `profile`
///
/// Only the first call has an effect. `RUST_LOG` overrides the profile's
/// default filter.
pub fn init(profile: Profile) {
    init_with_filter(profile, None);
}

/// Like [`init`], with an explicit filter directive taking precedence
pub fn init_with_filter(profile: Profile, directive: Option<&str>) {
    INIT_ONCE.call_once(|| {
        let filter = match directive {
            Some(d) => EnvFilter::new(d),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(profile.default_directive())),
        };
        // A subscriber installed elsewhere wins; ignore the error.
        let _ = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .finish()
                .try_init(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .finish()
                .try_init(),
            Profile::Test => tracing_subscriber::registry().try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(Profile::Test);
        init(Profile::Test);
        init_with_filter(Profile::Development, Some("debug"));
    }

    #[test]
    fn test_default_directives_differ() {
        assert_ne!(
            Profile::Development.default_directive(),
            Profile::Production.default_directive()
        );
    }
}
