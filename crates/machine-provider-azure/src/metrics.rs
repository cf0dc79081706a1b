//! Prometheus instrumentation of backend API calls.

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Value of the `provider` label.
pub const PROVIDER_LABEL: &str = "azure";

/// Counters and latency histogram for every resource access call.
#[derive(Clone)]
pub struct ApiMetrics {
    requests: IntCounterVec,
    failed_requests: IntCounterVec,
    request_duration: HistogramVec,
}

impl ApiMetrics {
    /// Create the metrics and register them with `registry`.
    ///
    /// # Errors
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new("azure_api_requests_total", "Total successful Azure API calls"),
            &["provider", "service"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let failed_requests = IntCounterVec::new(
            Opts::new(
                "azure_api_failed_requests_total",
                "Total failed Azure API calls",
            ),
            &["provider", "service"],
        )?;
        registry.register(Box::new(failed_requests.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "azure_api_request_duration_seconds",
                "Latency of successful Azure API calls",
            )
            .buckets(vec![
                0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0,
            ]),
            &["provider", "service"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            requests,
            failed_requests,
            request_duration,
        })
    }

    /// Metrics bound to a private registry.
    ///
    /// # Errors
    /// Returns an error if the metric descriptors are invalid.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(&Registry::new())
    }

    /// Record a successful call.
    pub fn record_success(&self, service: &str, elapsed: Duration) {
        self.requests
            .with_label_values(&[PROVIDER_LABEL, service])
            .inc();
        self.request_duration
            .with_label_values(&[PROVIDER_LABEL, service])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a failed call.
    pub fn record_failure(&self, service: &str) {
        self.failed_requests
            .with_label_values(&[PROVIDER_LABEL, service])
            .inc();
    }

    /// Number of successful calls recorded for `service`.
    #[must_use]
    pub fn successes(&self, service: &str) -> u64 {
        self.requests
            .with_label_values(&[PROVIDER_LABEL, service])
            .get()
    }

    /// Number of failed calls recorded for `service`.
    #[must_use]
    pub fn failures(&self, service: &str) -> u64 {
        self.failed_requests
            .with_label_values(&[PROVIDER_LABEL, service])
            .get()
    }
}
