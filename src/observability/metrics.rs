use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub status_transitions_total: IntCounterVec,
    pub pings_ingested_total: IntCounterVec,
    pub order_code_attempts: Histogram,
    pub order_code_exhausted_total: IntCounter,
    pub evidence_bytes_written_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let status_transitions_total = IntCounterVec::new(
            Opts::new(
                "status_transitions_total",
                "Delivery status transitions by target status and outcome",
            ),
            &["status", "outcome"],
        )
        .expect("valid status_transitions_total metric");

        let pings_ingested_total = IntCounterVec::new(
            Opts::new(
                "pings_ingested_total",
                "Device location pings by delivery correlation result",
            ),
            &["correlation"],
        )
        .expect("valid pings_ingested_total metric");

        let order_code_attempts = Histogram::with_opts(
            HistogramOpts::new(
                "order_code_attempts",
                "Candidates drawn before a free order code was found",
            )
            .buckets(vec![1.0, 2.0, 3.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )
        .expect("valid order_code_attempts metric");

        let order_code_exhausted_total = IntCounter::new(
            "order_code_exhausted_total",
            "Order code generations that ran out of attempts",
        )
        .expect("valid order_code_exhausted_total metric");

        let evidence_bytes_written_total = IntCounter::new(
            "evidence_bytes_written_total",
            "Bytes of delivery evidence written to disk",
        )
        .expect("valid evidence_bytes_written_total metric");

        registry
            .register(Box::new(status_transitions_total.clone()))
            .expect("register status_transitions_total");
        registry
            .register(Box::new(pings_ingested_total.clone()))
            .expect("register pings_ingested_total");
        registry
            .register(Box::new(order_code_attempts.clone()))
            .expect("register order_code_attempts");
        registry
            .register(Box::new(order_code_exhausted_total.clone()))
            .expect("register order_code_exhausted_total");
        registry
            .register(Box::new(evidence_bytes_written_total.clone()))
            .expect("register evidence_bytes_written_total");

        Self {
            registry,
            status_transitions_total,
            pings_ingested_total,
            order_code_attempts,
            order_code_exhausted_total,
            evidence_bytes_written_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
