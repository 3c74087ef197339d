//! Operator metrics
//!
//! A process-owned Prometheus registry namespaced by the project name.
//! Handler operations are observed by the metrics decorator, so retry
//! attempts show up as individual samples.

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

pub struct Metrics {
    registry: Registry,
    operation_duration: HistogramVec,
    operation_errors: IntCounterVec,
}

impl Metrics {
    pub fn new(project: &str) -> Result<Self, prometheus::Error> {
        // Metric names only allow underscores.
        let namespace = project.replace('-', "_");
        let registry = Registry::new_custom(Some(namespace), None)?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "operation_duration_seconds",
                "Duration of one resource handler operation in seconds",
            ),
            &["handler", "operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let operation_errors = IntCounterVec::new(
            Opts::new(
                "operation_errors_total",
                "Total number of failed resource handler operations",
            ),
            &["handler", "operation"],
        )?;
        registry.register(Box::new(operation_errors.clone()))?;

        Ok(Self {
            registry,
            operation_duration,
            operation_errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one handler operation attempt
    pub fn observe(&self, handler: &str, operation: &str, elapsed: Duration, failed: bool) {
        self.operation_duration
            .with_label_values(&[handler, operation])
            .observe(elapsed.as_secs_f64());
        if failed {
            self.operation_errors
                .with_label_values(&[handler, operation])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_carry_project_namespace() {
        let metrics = Metrics::new("ingress-operator").unwrap();

        metrics.observe("configmap", "current_state", Duration::from_millis(5), false);

        let families = metrics.registry().gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"ingress_operator_operation_duration_seconds"));
    }

    #[test]
    fn test_errors_are_counted_per_operation() {
        let metrics = Metrics::new("ingress-operator").unwrap();

        metrics.observe("service", "apply_update", Duration::from_millis(1), true);
        metrics.observe("service", "apply_update", Duration::from_millis(1), true);
        metrics.observe("service", "apply_update", Duration::from_millis(1), false);

        let families = metrics.registry().gather();
        let errors = families
            .iter()
            .find(|f| f.get_name() == "ingress_operator_operation_errors_total")
            .expect("error counter family");
        assert_eq!(errors.get_metric()[0].get_counter().value(), 2.0);
    }
}
