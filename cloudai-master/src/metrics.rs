//! Named counters exposed on `/metrics` (SPEC_FULL §11): tasks
//! admitted/dispatched/completed/failed, scheduler declines, SLA misses and
//! dropped telemetry messages. Registered once against the process-wide
//! `prometheus::Registry` the teacher already threads into
//! `poem::endpoint::PrometheusExporter`.

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

pub struct Metrics {
    pub tasks_admitted: IntCounter,
    pub tasks_dispatched: IntCounter,
    pub tasks_completed: IntCounter,
    pub tasks_failed: IntCounter,
    pub scheduler_declines: IntCounter,
    pub sla_misses: IntCounter,
    pub telemetry_dropped: IntCounter,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Arc<Self>, String> {
        let metrics = Metrics {
            tasks_admitted: new_counter(
                "cloudai_tasks_admitted_total",
                "Tasks accepted by the admission controller",
            )?,
            tasks_dispatched: new_counter(
                "cloudai_tasks_dispatched_total",
                "Tasks successfully dispatched to a worker",
            )?,
            tasks_completed: new_counter(
                "cloudai_tasks_completed_total",
                "Tasks reconciled with a successful completion",
            )?,
            tasks_failed: new_counter(
                "cloudai_tasks_failed_total",
                "Tasks reconciled with a failed outcome",
            )?,
            scheduler_declines: new_counter(
                "cloudai_scheduler_declines_total",
                "Sweeper ticks where the scheduler found no eligible worker for a task",
            )?,
            sla_misses: new_counter(
                "cloudai_sla_misses_total",
                "Completed tasks whose completion time was past their deadline",
            )?,
            telemetry_dropped: new_counter(
                "cloudai_telemetry_dropped_total",
                "Heartbeats dropped because a worker's telemetry inbox was full",
            )?,
        };
        for counter in [
            &metrics.tasks_admitted,
            &metrics.tasks_dispatched,
            &metrics.tasks_completed,
            &metrics.tasks_failed,
            &metrics.scheduler_declines,
            &metrics.sla_misses,
            &metrics.telemetry_dropped,
        ] {
            registry
                .register(Box::new(counter.clone()))
                .map_err(|err| err.to_string())?;
        }
        Ok(Arc::new(metrics))
    }
}

fn new_counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn counters_register_without_collision() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.tasks_admitted.inc();
        assert_eq!(metrics.tasks_admitted.get(), 1);
        let families = registry.gather();
        assert_eq!(families.len(), 7);
    }
}
