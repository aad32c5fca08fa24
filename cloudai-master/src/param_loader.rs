//! Parameter Loader (C8), spec §4.6 "Parameter hot-reload" + §9 "Hot-reload
//! file watch": polls the GA trainer's output file, validates it, and
//! atomically swaps the active parameter tuple through an `ArcSwap`-style
//! pointer so readers never observe a half-written value. An unreadable or
//! malformed file leaves the previously active tuple in place
//! (last-known-good, spec §4.6 Fallback policy).

use cloudai_common::model::TaskClass;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// The hot-reloadable scheduler parameter tuple `P`, spec §3/§4.6.
#[derive(Debug, Clone)]
pub struct SchedulerParams {
    pub theta1: f64,
    pub theta2: f64,
    pub theta3: f64,
    pub theta4: f64,
    pub alpha: f64,
    pub beta: f64,
    pub affinity: HashMap<TaskClass, HashMap<String, f64>>,
    pub penalty: HashMap<String, f64>,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        SchedulerParams {
            theta1: 0.5,
            theta2: 0.3,
            theta3: 0.2,
            theta4: 1.0,
            alpha: 1.0,
            beta: 0.5,
            affinity: HashMap::new(),
            penalty: HashMap::new(),
        }
    }
}

impl SchedulerParams {
    pub fn affinity_for(&self, class: TaskClass, worker_id: &str) -> f64 {
        self.affinity
            .get(&class)
            .and_then(|per_worker| per_worker.get(worker_id))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn penalty_for(&self, worker_id: &str) -> f64 {
        self.penalty.get(worker_id).copied().unwrap_or(0.0)
    }
}

/// On-disk shape, spec §6 "Scheduler parameter file". Every sub-key is
/// optional; missing keys fall back to `SchedulerParams::default()`.
#[derive(Debug, Deserialize)]
struct ParamFile {
    #[serde(default)]
    theta: Option<ThetaFile>,
    #[serde(default)]
    risk: Option<RiskFile>,
    #[serde(default)]
    affinity: Option<HashMap<String, HashMap<String, f64>>>,
    #[serde(default)]
    penalty: Option<HashMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct ThetaFile {
    theta1: Option<f64>,
    theta2: Option<f64>,
    theta3: Option<f64>,
    theta4: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RiskFile {
    alpha: Option<f64>,
    beta: Option<f64>,
}

impl ParamFile {
    fn into_params(self) -> SchedulerParams {
        let defaults = SchedulerParams::default();
        let theta = self.theta.unwrap_or(ThetaFile {
            theta1: None,
            theta2: None,
            theta3: None,
            theta4: None,
        });
        let risk = self.risk.unwrap_or(RiskFile {
            alpha: None,
            beta: None,
        });
        let affinity = self
            .affinity
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(class, per_worker)| TaskClass::parse(&class).map(|c| (c, per_worker)))
            .collect();
        SchedulerParams {
            theta1: theta.theta1.unwrap_or(defaults.theta1),
            theta2: theta.theta2.unwrap_or(defaults.theta2),
            theta3: theta.theta3.unwrap_or(defaults.theta3),
            theta4: theta.theta4.unwrap_or(defaults.theta4),
            alpha: risk.alpha.unwrap_or(defaults.alpha),
            beta: risk.beta.unwrap_or(defaults.beta),
            affinity,
            penalty: self.penalty.unwrap_or_default(),
        }
    }
}

pub struct ParamLoader {
    active: RwLock<Arc<SchedulerParams>>,
    path: PathBuf,
    last_seen_mtime: AtomicU64,
}

impl ParamLoader {
    pub fn with_default() -> Arc<Self> {
        Self::with_params(SchedulerParams::default())
    }

    pub fn with_params(params: SchedulerParams) -> Arc<Self> {
        Arc::new(ParamLoader {
            active: RwLock::new(Arc::new(params)),
            path: PathBuf::new(),
            last_seen_mtime: AtomicU64::new(0),
        })
    }

    pub fn new(path: PathBuf) -> Arc<Self> {
        Arc::new(ParamLoader {
            active: RwLock::new(Arc::new(SchedulerParams::default())),
            path,
            last_seen_mtime: AtomicU64::new(0),
        })
    }

    pub fn current(&self) -> Arc<SchedulerParams> {
        self.active.read().expect("param lock poisoned").clone()
    }

    /// Attempts a single reload; logs and leaves the active tuple unchanged
    /// on any failure (missing file, unreadable, malformed JSON).
    fn try_reload(&self) -> bool {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(_) => return false,
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if mtime == self.last_seen_mtime.load(Ordering::Relaxed) {
            return false;
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "failed to read scheduler parameter file");
                return false;
            }
        };
        let parsed: Result<ParamFile, _> = serde_json::from_str(&contents);
        match parsed {
            Ok(file) => {
                let params = file.into_params();
                *self.active.write().expect("param lock poisoned") = Arc::new(params);
                self.last_seen_mtime.store(mtime, Ordering::Relaxed);
                info!("scheduler parameters reloaded");
                true
            }
            Err(err) => {
                warn!(error = %err, "malformed scheduler parameter file, keeping last-known-good");
                false
            }
        }
    }

    /// Background polling loop, spec §4.6/§9: polls mtime every
    /// `reload_interval`, parses+validates, atomically swaps on success.
    pub async fn run(
        self: Arc<Self>,
        reload_interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        self.try_reload();
        let mut interval = tokio::time::interval(reload_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.try_reload();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_r::test;

    #[test]
    fn malformed_file_keeps_default_tuple() {
        let mut file = tempfile_for_test("not json");
        let loader = ParamLoader::new(file.path_buf());
        assert!(!loader.try_reload());
        assert_eq!(loader.current().theta1, SchedulerParams::default().theta1);
        file.cleanup();
    }

    #[test]
    fn valid_file_overrides_defaults() {
        let mut file = tempfile_for_test(r#"{"theta":{"theta1":0.9},"risk":{"alpha":2.0}}"#);
        let loader = ParamLoader::new(file.path_buf());
        assert!(loader.try_reload());
        let params = loader.current();
        assert_eq!(params.theta1, 0.9);
        assert_eq!(params.alpha, 2.0);
        assert_eq!(params.theta2, SchedulerParams::default().theta2);
        file.cleanup();
    }

    struct TempFile {
        path: PathBuf,
    }

    impl TempFile {
        fn path_buf(&self) -> PathBuf {
            self.path.clone()
        }
        fn cleanup(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_for_test(contents: &str) -> TempFile {
        let path = std::env::temp_dir().join(format!(
            "cloudai-param-test-{}.json",
            uuid::Uuid::new_v4()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        TempFile { path }
    }
}
