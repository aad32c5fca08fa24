//! Process-wide configuration (spec §6 "Process-wide configuration" table).

use cloudai_common::tracing_config::TracingConfig;
use cloudai_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    pub tracing: TracingConfig,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub http_port: u16,
    pub grpc_port: u16,
    /// Default SLA slack multiplier `k` (spec §4.4), clipped to [1.5, 2.5].
    pub sched_sla_multiplier: f64,
    pub param_file: PathBuf,
    #[serde(with = "humantime_serde")]
    pub param_reload_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub inactivity_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub queue_tick: Duration,
    /// EMA learning rate λ for the τ-store (spec §3, default 0.2).
    pub tau_lambda: f64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            tracing: TracingConfig::local_dev("cloudai-master"),
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_database: "cloudai".to_string(),
            http_port: 8080,
            grpc_port: 50051,
            sched_sla_multiplier: 2.0,
            param_file: PathBuf::from("config/ga_output.json"),
            param_reload_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(30),
            queue_tick: Duration::from_secs(5),
            tau_lambda: 0.2,
        }
    }
}

impl MasterConfig {
    /// Clips an operator-supplied `k_value` into the allowed SLA slack
    /// range, spec §4.4 step 6.
    pub fn clip_k(k: f64) -> f64 {
        k.clamp(1.5, 2.5)
    }
}

impl SafeDisplay for MasterConfig {
    fn to_safe_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "tracing: {}", self.tracing.to_safe_string());
        let _ = writeln!(out, "mongodb_database: {}", self.mongodb_database);
        let _ = writeln!(out, "http_port: {}", self.http_port);
        let _ = writeln!(out, "grpc_port: {}", self.grpc_port);
        let _ = writeln!(
            out,
            "sched_sla_multiplier: {}",
            self.sched_sla_multiplier
        );
        let _ = writeln!(out, "param_file: {}", self.param_file.display());
        let _ = writeln!(
            out,
            "param_reload_interval: {:?}",
            self.param_reload_interval
        );
        let _ = writeln!(out, "inactivity_timeout: {:?}", self.inactivity_timeout);
        let _ = writeln!(out, "queue_tick: {:?}", self.queue_tick);
        let _ = writeln!(out, "tau_lambda: {}", self.tau_lambda);
        out
    }
}
