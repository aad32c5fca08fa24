//! Mirrors the teacher's `golem_common::tracing::TracingConfig`: a small
//! config struct plus constructors for local development vs. structured
//! production output, both driven by `tracing-subscriber`.

use crate::SafeDisplay;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub json: bool,
    #[serde(with = "humantime_serde")]
    pub flush_interval: std::time::Duration,
}

impl TracingConfig {
    pub fn local_dev(service_name: &str) -> Self {
        TracingConfig {
            service_name: service_name.to_string(),
            json: false,
            flush_interval: std::time::Duration::from_secs(1),
        }
    }

    pub fn json(service_name: &str) -> Self {
        TracingConfig {
            service_name: service_name.to_string(),
            json: true,
            flush_interval: std::time::Duration::from_secs(1),
        }
    }

    /// Installs a global `tracing-subscriber` registry: pretty+ANSI for
    /// local dev, JSON lines for production, both `RUST_LOG`-driven.
    pub fn init(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        if self.json {
            let _ = fmt()
                .json()
                .with_env_filter(env_filter)
                .with_current_span(true)
                .try_init();
        } else {
            let _ = fmt()
                .pretty()
                .with_env_filter(env_filter)
                .try_init();
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig::local_dev("cloudai-master")
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "service_name: {}, json: {}",
            self.service_name, self.json
        )
    }
}
