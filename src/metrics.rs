// metrics.rs - Prometheus counters for the transform paths

use prometheus::{IntCounter, Registry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    pub packets_out: IntCounter,
    pub packets_in: IntCounter,
    pub bytes_protected: IntCounter,
    pub integrity_failures: IntCounter,
    pub malformed_options: IntCounter,
    pub header_errors: IntCounter,
    pub truncated_packets: IntCounter,
    pub sequence_exhausted: IntCounter,
    pub expansion_failures: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new_custom(Some("ahgate".into()), None)?;

        macro_rules! register_counter {
            ($name:expr, $help:expr) => {{
                let counter = IntCounter::new($name, $help)?;
                registry.register(Box::new(counter.clone()))?;
                counter
            }};
        }

        let packets_out = register_counter!("packets_out", "Packets successfully AH-encoded");
        let packets_in = register_counter!("packets_in", "Packets successfully AH-verified");
        let bytes_protected =
            register_counter!("bytes_protected", "Total bytes covered by computed digests");
        let integrity_failures =
            register_counter!("integrity_failures", "Inbound ICV verification failures");
        let malformed_options = register_counter!(
            "malformed_options",
            "Packets dropped for malformed IP options"
        );
        let header_errors =
            register_counter!("header_errors", "Packets dropped for invalid AH headers");
        let truncated_packets = register_counter!(
            "truncated_packets",
            "Packets dropped as truncated or fragmented"
        );
        let sequence_exhausted = register_counter!(
            "sequence_exhausted",
            "Encodes refused because the SA sequence counter would wrap"
        );
        let expansion_failures = register_counter!(
            "expansion_failures",
            "Encodes refused because the packet buffer could not grow"
        );

        Ok(Self {
            registry,
            packets_out,
            packets_in,
            bytes_protected,
            integrity_failures,
            malformed_options,
            header_errors,
            truncated_packets,
            sequence_exhausted,
            expansion_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_metrics_registry() {
        let metrics = Metrics::new().expect("metrics");
        metrics.packets_out.inc();
        metrics.integrity_failures.inc();
        metrics.bytes_protected.inc_by(1500);
        assert!(!metrics.gather().is_empty());
    }
}
