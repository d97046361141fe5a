use crate::cluster::ResourceKind;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    Registry, opts, register_gauge_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry,
};

pub const SECRET_LABELS: &[&str] = &[
    "key_name",
    "issuer",
    "cn",
    "secret_name",
    "secret_namespace",
    "serviceline",
];

pub const CONFIGMAP_LABELS: &[&str] = &[
    "key_name",
    "issuer",
    "cn",
    "configmap_name",
    "configmap_namespace",
];

/// All metric families exported by certpulse, bound to a single registry.
///
/// Created once at startup and shared between the checker loops and the
/// `/metrics` handler. Every collector is internally synchronised, so the
/// loops may reset and set series concurrently.
pub struct Metrics {
    registry: Registry,
    pub secret_expiry_seconds: GaugeVec,
    pub secret_not_after_timestamp: GaugeVec,
    pub configmap_expiry_seconds: GaugeVec,
    pub configmap_not_after_timestamp: GaugeVec,
    pub errors: IntCounter,
    pub ticks: IntCounterVec,
    pub tick_duration: HistogramVec,
    pub last_tick_timestamp: IntGaugeVec,
    pub panics_recovered: IntCounter,
}

impl Metrics {
    /// Register every family on a fresh registry
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be created or registered
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register every family on the given registry
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be created or registered
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let secret_expiry_seconds = register_gauge_vec_with_registry!(
            opts!(
                "certpulse_secret_expires_in_seconds",
                "Number of seconds until a certificate stored in a Secret expires (negative if expired)"
            ),
            SECRET_LABELS,
            &registry
        )?;

        let secret_not_after_timestamp = register_gauge_vec_with_registry!(
            opts!(
                "certpulse_secret_not_after_timestamp",
                "Expiration of a certificate stored in a Secret as a unix timestamp"
            ),
            SECRET_LABELS,
            &registry
        )?;

        let configmap_expiry_seconds = register_gauge_vec_with_registry!(
            opts!(
                "certpulse_configmap_expires_in_seconds",
                "Number of seconds until a certificate stored in a ConfigMap expires (negative if expired)"
            ),
            CONFIGMAP_LABELS,
            &registry
        )?;

        let configmap_not_after_timestamp = register_gauge_vec_with_registry!(
            opts!(
                "certpulse_configmap_not_after_timestamp",
                "Expiration of a certificate stored in a ConfigMap as a unix timestamp"
            ),
            CONFIGMAP_LABELS,
            &registry
        )?;

        let errors = register_int_counter_with_registry!(
            opts!(
                "certpulse_errors_total",
                "Total errors while listing, matching or decoding certificates"
            ),
            &registry
        )?;

        let ticks = register_int_counter_vec_with_registry!(
            opts!("certpulse_ticks_total", "Total reconciliation ticks by kind"),
            &["kind"],
            &registry
        )?;

        let tick_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "certpulse_tick_duration_seconds",
                "Duration of one reconciliation tick in seconds"
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["kind"],
            &registry
        )?;

        let last_tick_timestamp = register_int_gauge_vec_with_registry!(
            opts!(
                "certpulse_last_tick_timestamp_seconds",
                "Unix timestamp of the last completed tick"
            ),
            &["kind"],
            &registry
        )?;

        let panics_recovered = register_int_counter_with_registry!(
            opts!(
                "certpulse_panics_recovered_total",
                "Total panics recovered from"
            ),
            &registry
        )?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            secret_expiry_seconds,
            secret_not_after_timestamp,
            configmap_expiry_seconds,
            configmap_not_after_timestamp,
            errors,
            ticks,
            tick_duration,
            last_tick_timestamp,
            panics_recovered,
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished tick for `kind`
    pub fn observe_tick(&self, kind: ResourceKind, seconds: f64, finished_at: i64) {
        let kind = kind.as_str();
        self.ticks.with_label_values(&[kind]).inc();
        self.tick_duration.with_label_values(&[kind]).observe(seconds);
        self.last_tick_timestamp
            .with_label_values(&[kind])
            .set(finished_at);
    }

    /// Encode and return metrics for HTTP export
    ///
    /// # Errors
    ///
    /// Returns an error if metrics encoding fails
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();

        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| format!("could not encode custom metrics: {e}"))?;

        Ok(buffer)
    }
}
