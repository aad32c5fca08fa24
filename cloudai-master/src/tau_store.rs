//! τ-Store (C3): per-class expected-runtime estimator with EMA updates,
//! spec §4.3. Reads are frequent, writes rare, hence one rwlock guarding a
//! small map rather than anything fancier.

use cloudai_common::model::TaskClass;
use std::collections::HashMap;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::sync::RwLock;
use tracing::debug;

pub struct TauStore {
    values: RwLock<HashMap<TaskClass, f64>>,
    lambda: RwLock<f64>,
}

impl TauStore {
    pub fn new(lambda: f64) -> Arc<Self> {
        let mut values = HashMap::new();
        for class in TaskClass::iter() {
            values.insert(class, class.default_tau());
        }
        Arc::new(TauStore {
            values: RwLock::new(values),
            lambda: RwLock::new(lambda.clamp(0.0, 1.0)),
        })
    }

    /// Spec §4.3 `GetTau`: unknown classes fall back to the mixed default,
    /// though in practice `TaskClass` is a closed enum so this only matters
    /// before the map is seeded.
    pub async fn get_tau(&self, class: TaskClass) -> f64 {
        let values = self.values.read().await;
        *values
            .get(&class)
            .unwrap_or(&TaskClass::Mixed.default_tau())
    }

    /// Spec §4.3 `UpdateTau`: `τ_new = λ·actual + (1−λ)·τ_old`. No-op on
    /// non-positive runtimes.
    pub async fn update_tau(&self, class: TaskClass, actual_runtime_seconds: f64) {
        if actual_runtime_seconds <= 0.0 {
            return;
        }
        let lambda = *self.lambda.read().await;
        let mut values = self.values.write().await;
        let old = *values.get(&class).unwrap_or(&class.default_tau());
        let new = lambda * actual_runtime_seconds + (1.0 - lambda) * old;
        values.insert(class, new);
        debug!(class = %class, old, new, "tau updated");
    }

    /// Spec §4.3 `SetTau`: for initialization/testing, rejects non-positive.
    pub async fn set_tau(&self, class: TaskClass, value: f64) -> bool {
        if value <= 0.0 {
            return false;
        }
        self.values.write().await.insert(class, value);
        true
    }

    /// Spec §4.3 `SetLambda`: only takes effect for λ∈[0,1].
    pub async fn set_lambda(&self, lambda: f64) -> bool {
        if !(0.0..=1.0).contains(&lambda) {
            return false;
        }
        *self.lambda.write().await = lambda;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn unknown_class_update_is_noop_on_nonpositive() {
        let store = TauStore::new(0.2);
        let before = store.get_tau(TaskClass::CpuHeavy).await;
        store.update_tau(TaskClass::CpuHeavy, 0.0).await;
        let after = store.get_tau(TaskClass::CpuHeavy).await;
        assert_eq!(before, after);
    }

    #[test]
    async fn update_tau_matches_ema_formula() {
        let store = TauStore::new(0.2);
        store.update_tau(TaskClass::CpuHeavy, 12.0).await;
        let tau = store.get_tau(TaskClass::CpuHeavy).await;
        assert!((tau - 14.4).abs() < 1e-9);
    }

    #[test]
    async fn repeated_updates_converge_towards_actual() {
        let store = TauStore::new(0.2);
        let actual = 25.0;
        let mut last_diff = f64::MAX;
        for _ in 0..20 {
            store.update_tau(TaskClass::Mixed, actual).await;
            let tau = store.get_tau(TaskClass::Mixed).await;
            let diff = (tau - actual).abs();
            assert!(diff <= last_diff + 1e-9);
            last_diff = diff;
        }
        assert!(last_diff < 0.1);
    }

    #[test]
    async fn set_lambda_rejects_out_of_range() {
        let store = TauStore::new(0.2);
        assert!(!store.set_lambda(1.5).await);
        assert!(store.set_lambda(0.5).await);
    }
}
