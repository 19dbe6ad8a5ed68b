use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

static INIT: Once = Once::new();

/// Installs a stderr `fmt` subscriber when `PKGBRIDGE_LOG` is set. Safe to call
/// on every entry; a subscriber already installed by the host wins.
pub fn init() {
    init_with(&BridgeConfig::from_env());
}

pub fn init_with(config: &BridgeConfig) {
    let Some(directive) = config.log_filter.clone() else {
        return;
    };
    INIT.call_once(move || {
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
