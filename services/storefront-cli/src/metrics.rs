//! Prometheus metrics exposition
//!
//! The library records its counters through the `metrics` facade; the CLI
//! installs a Prometheus recorder so `--metrics` can print them on exit.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
