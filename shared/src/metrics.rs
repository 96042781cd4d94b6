//! Prometheus metrics exposition, shared by every binary that mounts
//! a `/metrics` route.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{Result, SchedulerError};

/// Owns the process-wide Prometheus recorder. `install` must be called
/// once per binary, before any `metrics::counter!`/`histogram!` call —
/// those macros are no-ops until a recorder is installed.
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|err| SchedulerError::internal(format!("failed to install metrics recorder: {err}")))?;
        Ok(Self { handle })
    }

    /// Renders the current registry in the Prometheus text exposition
    /// format, suitable for returning as-is from a `/metrics` handler.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_render_round_trips() {
        let registry = MetricsRegistry::install().unwrap();
        metrics::counter!("scheduler_tasks_completed_total").increment(1);
        assert!(registry.render().contains("scheduler_tasks_completed_total"));
    }
}
