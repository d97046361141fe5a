//! Periodic discovery of certificate material in cluster resources
//!
//! # Module Organization
//!
//! - `filter` - name globs, type allowlist and annotation selectors
//! - `password` - passphrase lookup for a single data entry
//! - `ticker` - injectable tick source
//!
//! One [`ResourceChecker`] runs per resource kind. Every tick it resets the
//! exporter, lists resources, filters them, resolves passwords and exports the
//! selected entries. Nothing is carried over between ticks, so a resource that
//! disappears from the cluster disappears from the metrics on the next tick.

pub mod filter;
pub mod password;
pub mod ticker;

use crate::{
    cluster::{ClusterApi, ResourceItem, ResourceKind},
    exporter::ExporterPort,
    metrics::Metrics,
};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use filter::{EntryFilter, GlobFilter, annotations_match, type_allowed};
use futures::FutureExt;
use password::PasswordResolver;
use serde::Serialize;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use ticker::Ticker;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Polling period used when none is configured
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(3600);

/// Immutable settings of one checker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    pub period: Duration,
    pub label_selectors: Vec<String>,
    pub annotation_selectors: Vec<String>,
    /// `""` lists across every namespace
    pub namespaces: Vec<String>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Secret types to keep, ignored for config maps
    pub resource_type_allowlist: Vec<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            label_selectors: Vec::new(),
            annotation_selectors: Vec::new(),
            namespaces: vec![String::new()],
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            resource_type_allowlist: Vec::new(),
        }
    }
}

fn drop_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

impl CheckerConfig {
    /// Normalise the configuration
    ///
    /// Blank selectors, globs and types are dropped, and an empty namespace
    /// list becomes "all namespaces".
    ///
    /// # Errors
    ///
    /// Returns an error if the period is zero
    pub fn validate(self) -> Result<Self> {
        if self.period.is_zero() {
            bail!("polling period must be greater than zero");
        }

        let mut namespaces: Vec<String> = self
            .namespaces
            .into_iter()
            .map(|namespace| namespace.trim().to_string())
            .collect();
        if namespaces.is_empty() {
            namespaces.push(String::new());
        }

        Ok(Self {
            period: self.period,
            label_selectors: drop_blank(self.label_selectors),
            annotation_selectors: drop_blank(self.annotation_selectors),
            namespaces,
            include_globs: drop_blank(self.include_globs),
            exclude_globs: drop_blank(self.exclude_globs),
            resource_type_allowlist: drop_blank(self.resource_type_allowlist),
        })
    }

    /// A checker without include globs can never select an entry
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.include_globs.is_empty()
    }
}

/// Summary of one tick, logged as JSON
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub kind: String,
    pub time: String,
    /// Resources returned by the list calls, duplicates included
    pub listed: usize,
    /// Data entries successfully exported
    pub exported: usize,
    /// Certificates published across all exported entries
    pub certificates: usize,
    /// Data entries not selected by the include/exclude globs
    pub skipped: usize,
    pub errors: u64,
    pub runtime_ms: i64,
}

impl TickReport {
    fn new(kind: ResourceKind, started: DateTime<Utc>) -> Self {
        Self {
            kind: kind.to_string(),
            time: started.to_rfc3339(),
            listed: 0,
            exported: 0,
            certificates: 0,
            skipped: 0,
            errors: 0,
            runtime_ms: 0,
        }
    }
}

pub struct ResourceChecker {
    kind: ResourceKind,
    config: CheckerConfig,
    filter: EntryFilter,
    cluster: Arc<dyn ClusterApi>,
    exporter: Arc<dyn ExporterPort>,
    metrics: Arc<Metrics>,
}

impl ResourceChecker {
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        config: CheckerConfig,
        cluster: Arc<dyn ClusterApi>,
        exporter: Arc<dyn ExporterPort>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let filter = EntryFilter::new(
            GlobFilter::new(&config.include_globs),
            GlobFilter::new(&config.exclude_globs),
        );

        Self {
            kind,
            config,
            filter,
            cluster,
            exporter,
            metrics,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub const fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Tick until `shutdown` turns true or its sender is dropped
    ///
    /// Shutdown is only observed between ticks. A panic inside a tick is
    /// logged and counted, and the loop carries on with the next tick.
    pub async fn run<T>(&self, ticker: &mut T, mut shutdown: watch::Receiver<bool>)
    where
        T: Ticker + ?Sized,
    {
        info!(
            kind = %self.kind,
            namespaces = ?self.config.namespaces,
            period_secs = self.config.period.as_secs(),
            "Starting checker"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                () = ticker.tick() => {}
            }

            let result = AssertUnwindSafe(self.check_once()).catch_unwind().await;

            if let Err(panic) = result {
                error!(
                    kind = %self.kind,
                    "Panic in checker tick: {}",
                    panic_message(panic.as_ref())
                );
                self.metrics.panics_recovered.inc();
            }
        }

        info!(kind = %self.kind, "Checker stopped");
    }

    /// Run a single reconciliation pass
    pub async fn check_once(&self) -> TickReport {
        let started = Utc::now();
        let mut report = TickReport::new(self.kind, started);

        debug!(kind = %self.kind, "Begin periodic check");

        // stale series must go before anything of this tick is published
        self.exporter.reset_metrics();

        let items = self.discover(&mut report).await;
        report.listed = items.len();

        let resolver = PasswordResolver::new(self.cluster.as_ref());

        for item in &items {
            if !self.wanted(item) {
                continue;
            }

            for (name, data) in &item.data_entries {
                let decision = self.filter.decide(name);
                if decision.errors > 0 {
                    self.record_errors(&mut report, decision.errors);
                }

                if !decision.is_selected() {
                    debug!(
                        kind = %self.kind,
                        resource = %item.name,
                        namespace = %item.namespace,
                        entry = %name,
                        "Ignoring entry, does not match include globs or matches exclude globs"
                    );
                    report.skipped += 1;
                    continue;
                }

                let password = resolver.resolve(item, name).await;

                match self.exporter.export_metrics(
                    data,
                    name,
                    &item.name,
                    &item.namespace,
                    &password,
                    &item.labels,
                ) {
                    Ok(published) => {
                        debug!(
                            kind = %self.kind,
                            resource = %item.name,
                            namespace = %item.namespace,
                            entry = %name,
                            certificates = published,
                            "Published metrics"
                        );
                        report.exported += 1;
                        report.certificates += published;
                    }
                    Err(e) => {
                        error!(
                            kind = %self.kind,
                            resource = %item.name,
                            namespace = %item.namespace,
                            entry = %name,
                            "Error exporting {}: {e}",
                            self.kind
                        );
                        self.record_errors(&mut report, 1);
                    }
                }
            }
        }

        let finished = Utc::now();
        let runtime = finished.signed_duration_since(started);
        report.runtime_ms = runtime.num_milliseconds();

        self.metrics.observe_tick(
            self.kind,
            runtime.to_std().map(|d| d.as_secs_f64()).unwrap_or_default(),
            finished.timestamp(),
        );

        if let Ok(serialized) = serde_json::to_string(&report) {
            info!("{serialized}");
        }

        report
    }

    async fn discover(&self, report: &mut TickReport) -> Vec<ResourceItem> {
        let selectors: Vec<Option<&str>> = if self.config.label_selectors.is_empty() {
            vec![None]
        } else {
            self.config
                .label_selectors
                .iter()
                .map(|selector| Some(selector.as_str()))
                .collect()
        };

        let mut items = Vec::new();

        // one call per selector; the union may hold the same resource twice
        for namespace in &self.config.namespaces {
            for selector in &selectors {
                match self.list(namespace, *selector).await {
                    Ok(mut listed) => items.append(&mut listed),
                    Err(e) => {
                        error!(
                            kind = %self.kind,
                            namespace = %namespace,
                            selector = selector.unwrap_or_default(),
                            "Error requesting {}s: {e:#}",
                            self.kind
                        );
                        self.record_errors(report, 1);
                    }
                }
            }
        }

        items
    }

    async fn list(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<ResourceItem>> {
        match self.kind {
            ResourceKind::Secret => self.cluster.list_secrets(namespace, selector).await,
            ResourceKind::ConfigMap => self.cluster.list_config_maps(namespace, selector).await,
        }
    }

    fn wanted(&self, item: &ResourceItem) -> bool {
        if self.kind == ResourceKind::Secret
            && !type_allowed(item, &self.config.resource_type_allowlist)
        {
            debug!(
                secret = %item.name,
                namespace = %item.namespace,
                secret_type = item.resource_type.as_deref().unwrap_or_default(),
                "Ignoring secret, type not in include types"
            );
            return false;
        }

        if !annotations_match(item, &self.config.annotation_selectors) {
            debug!(
                kind = %self.kind,
                resource = %item.name,
                namespace = %item.namespace,
                "Ignoring resource, no selected annotation present"
            );
            return false;
        }

        true
    }

    fn record_errors(&self, report: &mut TickReport, count: u64) {
        report.errors += count;
        self.metrics.errors.inc_by(count);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
