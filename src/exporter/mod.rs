//! Turning certificate bytes into gauge series
//!
//! # Module Organization
//!
//! - `decode` - PEM/DER certificate decoding
//! - `clock` - injectable source of "now"
//!
//! [`ExporterPort`] is the capability the checkers drive. [`CertExporter`]
//! implements it for both resource kinds; the two flavours differ only in the
//! metric families they write and in whether a `serviceline` label is added.

pub mod clock;
pub mod decode;

pub use clock::{Clock, FixedClock, SystemClock};
pub use decode::{DecodeError, DecodedCertificate, decode_certificates};

use crate::{cluster::ResourceKind, metrics::Metrics};
use prometheus::GaugeVec;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

/// Resource label copied onto Secret series for ownership attribution
pub const SERVICELINE_LABEL: &str = "serviceline";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to set metric: {0}")]
    Metric(#[from] prometheus::Error),
}

/// What a checker needs from an exporter
pub trait ExporterPort: Send + Sync {
    /// Decode `data` and publish one pair of series per certificate found
    ///
    /// Returns the number of certificates published.
    ///
    /// # Errors
    ///
    /// Returns an error if no certificate could be decoded from `data`
    fn export_metrics(
        &self,
        data: &[u8],
        key_name: &str,
        resource_name: &str,
        namespace: &str,
        password: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, ExportError>;

    /// Drop every series previously published by this exporter
    fn reset_metrics(&self);
}

pub struct CertExporter {
    kind: ResourceKind,
    expires_in: GaugeVec,
    not_after: GaugeVec,
    clock: Arc<dyn Clock>,
}

impl CertExporter {
    /// Exporter writing the `certpulse_secret_*` families
    #[must_use]
    pub fn secrets(metrics: &Metrics, clock: Arc<dyn Clock>) -> Self {
        Self::for_kind(ResourceKind::Secret, metrics, clock)
    }

    /// Exporter writing the `certpulse_configmap_*` families
    #[must_use]
    pub fn config_maps(metrics: &Metrics, clock: Arc<dyn Clock>) -> Self {
        Self::for_kind(ResourceKind::ConfigMap, metrics, clock)
    }

    #[must_use]
    pub fn for_kind(kind: ResourceKind, metrics: &Metrics, clock: Arc<dyn Clock>) -> Self {
        let (expires_in, not_after) = match kind {
            ResourceKind::Secret => (
                metrics.secret_expiry_seconds.clone(),
                metrics.secret_not_after_timestamp.clone(),
            ),
            ResourceKind::ConfigMap => (
                metrics.configmap_expiry_seconds.clone(),
                metrics.configmap_not_after_timestamp.clone(),
            ),
        };

        Self {
            kind,
            expires_in,
            not_after,
            clock,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl ExporterPort for CertExporter {
    #[allow(clippy::cast_precision_loss)]
    fn export_metrics(
        &self,
        data: &[u8],
        key_name: &str,
        resource_name: &str,
        namespace: &str,
        password: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, ExportError> {
        let certificates = decode_certificates(data, password)?;
        let now = self.clock.now().timestamp();
        let serviceline = labels.get(SERVICELINE_LABEL).map_or("", String::as_str);

        for cert in &certificates {
            let mut values = vec![
                key_name,
                cert.issuer.as_str(),
                cert.cn.as_str(),
                resource_name,
                namespace,
            ];
            if self.kind == ResourceKind::Secret {
                values.push(serviceline);
            }

            self.expires_in
                .get_metric_with_label_values(&values)?
                .set((cert.not_after - now) as f64);
            self.not_after
                .get_metric_with_label_values(&values)?
                .set(cert.not_after as f64);
        }

        Ok(certificates.len())
    }

    fn reset_metrics(&self) {
        self.expires_in.reset();
        self.not_after.reset();
    }
}
