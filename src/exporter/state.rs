use std::sync::Arc;

use prometheus::Registry;

use crate::metrics::MetricState;

#[derive(Clone)]
pub struct ExporterState {
    pub metrics: Arc<MetricState>,
    pub registry: Registry,
}

impl ExporterState {
    /// Register the state's gauge in a fresh registry
    pub fn new(metrics: Arc<MetricState>) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        registry.register(Box::new(metrics.gauge()))?;

        Ok(Self { metrics, registry })
    }
}
