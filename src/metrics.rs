//! Process-wide metrics registry.
//!
//! Every client instantiating its own meter provider causes duplicate
//! Prometheus registration, so this module keeps a single
//! [`prometheus::Registry`] behind a [`std::sync::OnceLock`], registered
//! into exactly once.

use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use std::sync::OnceLock;

pub struct Metrics {
    pub output_client_logs: CounterVec,
    pub dropped_logs: CounterVec,
    pub exported_client_logs: CounterVec,
    pub buffered_logs: GaugeVec,
    pub throttled_logs: CounterVec,
    pub errors: CounterVec,
    pub dque_size: GaugeVec,
}

impl Metrics {
    fn new(registry: &Registry) -> Metrics {
        let output_client_logs = CounterVec::new(
            Opts::new("output_client_logs_total", "Records that reached the export path"),
            &["endpoint"],
        )
        .expect("metric definition is valid");
        let dropped_logs = CounterVec::new(
            Opts::new("dropped_logs_total", "Records dropped before export"),
            &["endpoint", "reason"],
        )
        .expect("metric definition is valid");
        let exported_client_logs = CounterVec::new(
            Opts::new("exported_client_logs_total", "Records successfully exported"),
            &["endpoint"],
        )
        .expect("metric definition is valid");
        let buffered_logs = GaugeVec::new(
            Opts::new("buffered_logs", "Records currently buffered"),
            &["endpoint"],
        )
        .expect("metric definition is valid");
        let throttled_logs = CounterVec::new(
            Opts::new("throttled_logs_total", "Records refused by the rate limiter"),
            &["endpoint"],
        )
        .expect("metric definition is valid");
        let errors = CounterVec::new(Opts::new("errors_total", "Pipeline errors by kind"), &["type"])
            .expect("metric definition is valid");
        let dque_size = GaugeVec::new(
            Opts::new("dque_size", "Current persistent queue size"),
            &["name"],
        )
        .expect("metric definition is valid");

        for collector in [
            Box::new(output_client_logs.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(dropped_logs.clone()),
            Box::new(exported_client_logs.clone()),
            Box::new(buffered_logs.clone()),
            Box::new(throttled_logs.clone()),
            Box::new(errors.clone()),
            Box::new(dque_size.clone()),
        ] {
            // Registration only fails on a duplicate descriptor, which the
            // once-guard below already prevents.
            let _ = registry.register(collector);
        }

        Metrics {
            output_client_logs,
            dropped_logs,
            exported_client_logs,
            buffered_logs,
            throttled_logs,
            errors,
            dque_size,
        }
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Returns the process-wide Prometheus registry, creating it on first use.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Returns the process-wide metrics handles, registering them into
/// [`registry`] on first use. Idempotent: later calls return the same
/// instance instead of re-registering.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics::new(registry()))
}
