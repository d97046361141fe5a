#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use certpulse::{
    checker::{CheckerConfig, ResourceChecker, ticker::Ticker},
    cluster::{ClusterApi, ResourceItem, ResourceKind},
    exporter::{CertExporter, ExportError, ExporterPort, FixedClock},
    metrics::Metrics,
};
use chrono::DateTime;
use prometheus::{GaugeVec, core::Collector};
use rcgen::{CertificateParams, DnType, KeyPair};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use time::OffsetDateTime;
use tokio::sync::watch;

/// Frozen "now" shared by every test clock
pub const NOW: i64 = 1_700_000_000;

/// Self-signed PEM certificate with `cn` as subject and issuer
pub fn cert_pem(cn: &str, not_after: i64) -> String {
    let mut params = CertificateParams::new(vec![format!("{cn}.example.com")]).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    params.not_before = OffsetDateTime::from_unix_timestamp(NOW - 86_400).unwrap();
    params.not_after = OffsetDateTime::from_unix_timestamp(not_after).unwrap();
    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().pem()
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Builder for fake Secrets and ConfigMaps
#[derive(Clone)]
pub struct Resource(pub ResourceItem);

impl Resource {
    pub fn secret(namespace: &str, name: &str) -> Self {
        Self::new(ResourceKind::Secret, namespace, name)
    }

    pub fn config_map(namespace: &str, name: &str) -> Self {
        Self::new(ResourceKind::ConfigMap, namespace, name)
    }

    fn new(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self(ResourceItem {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resource_type: (kind == ResourceKind::Secret).then(|| "Opaque".to_string()),
            data_entries: BTreeMap::new(),
        })
    }

    pub fn type_(mut self, resource_type: &str) -> Self {
        self.0.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.0.labels = map(labels);
        self
    }

    pub fn annotations(mut self, annotations: &[(&str, &str)]) -> Self {
        self.0.annotations = map(annotations);
        self
    }

    pub fn entry(mut self, key: &str, value: impl AsRef<[u8]>) -> Self {
        self.0
            .data_entries
            .insert(key.to_string(), value.as_ref().to_vec());
        self
    }

    pub fn build(self) -> ResourceItem {
        self.0
    }
}

/// `k=v[,k=v]` equality selectors only
fn selector_matches(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').all(|requirement| {
        requirement
            .split_once('=')
            .is_some_and(|(key, value)| labels.get(key.trim()).map(String::as_str) == Some(value.trim()))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCall {
    pub kind: ResourceKind,
    pub namespace: String,
    pub selector: Option<String>,
}

/// In-memory cluster
#[derive(Default)]
pub struct FakeCluster {
    resources: Mutex<Vec<ResourceItem>>,
    failing_namespaces: Mutex<HashSet<String>>,
    list_calls: Mutex<Vec<ListCall>>,
    get_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new(resources: Vec<ResourceItem>) -> Arc<Self> {
        Arc::new(Self {
            resources: Mutex::new(resources),
            ..Self::default()
        })
    }

    pub fn add(&self, resource: ResourceItem) {
        self.resources.lock().unwrap().push(resource);
    }

    pub fn remove(&self, kind: ResourceKind, namespace: &str, name: &str) {
        self.resources
            .lock()
            .unwrap()
            .retain(|r| !(r.kind == kind && r.namespace == namespace && r.name == name));
    }

    /// Make every list call against `namespace` fail
    pub fn fail_namespace(&self, namespace: &str) {
        self.failing_namespaces
            .lock()
            .unwrap()
            .insert(namespace.to_string());
    }

    pub fn list_calls(&self) -> Vec<ListCall> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>> {
        self.list_calls.lock().unwrap().push(ListCall {
            kind,
            namespace: namespace.to_string(),
            selector: selector.map(ToString::to_string),
        });

        if self.failing_namespaces.lock().unwrap().contains(namespace) {
            return Err(anyhow!("namespaces \"{namespace}\" is forbidden"));
        }

        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| namespace.is_empty() || r.namespace == namespace)
            .filter(|r| selector.is_none_or(|s| selector_matches(&r.labels, s)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>> {
        self.list(ResourceKind::Secret, namespace, label_selector)
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>> {
        self.list(ResourceKind::ConfigMap, namespace, label_selector)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<ResourceItem> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.resources
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.kind == ResourceKind::Secret && r.namespace == namespace && r.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("secrets \"{name}\" not found"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reset,
    Export {
        key: String,
        resource: String,
        namespace: String,
        password: String,
    },
}

/// Exporter that only records what it was asked to do
#[derive(Default)]
pub struct RecordingExporter {
    events: Mutex<Vec<Event>>,
    panics_on_reset: AtomicUsize,
}

impl RecordingExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Panic inside the next `count` resets
    pub fn panic_on_reset(&self, count: usize) {
        self.panics_on_reset.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn exports(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Export { .. }))
            .collect()
    }

    pub fn password_for(&self, key: &str) -> Option<String> {
        self.events().into_iter().find_map(|event| match event {
            Event::Export {
                key: k, password, ..
            } if k == key => Some(password),
            _ => None,
        })
    }
}

impl ExporterPort for RecordingExporter {
    fn export_metrics(
        &self,
        _data: &[u8],
        key_name: &str,
        resource_name: &str,
        namespace: &str,
        password: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<usize, ExportError> {
        self.events.lock().unwrap().push(Event::Export {
            key: key_name.to_string(),
            resource: resource_name.to_string(),
            namespace: namespace.to_string(),
            password: password.to_string(),
        });
        Ok(1)
    }

    fn reset_metrics(&self) {
        let remaining = self.panics_on_reset.load(Ordering::SeqCst);
        if remaining > 0 {
            self.panics_on_reset.store(remaining - 1, Ordering::SeqCst);
            panic!("reset exploded");
        }
        self.events.lock().unwrap().push(Event::Reset);
    }
}

/// Ticks immediately `ticks` times, then requests shutdown and never ticks again
pub struct StopAfter {
    remaining: usize,
    stop: watch::Sender<bool>,
}

impl StopAfter {
    pub fn new(ticks: usize) -> (Self, watch::Receiver<bool>) {
        let (stop, shutdown) = watch::channel(false);
        (
            Self {
                remaining: ticks,
                stop,
            },
            shutdown,
        )
    }
}

#[async_trait]
impl Ticker for StopAfter {
    async fn tick(&mut self) {
        if self.remaining == 0 {
            let _ = self.stop.send(true);
            std::future::pending::<()>().await;
        }
        self.remaining -= 1;
    }
}

pub fn config(include: &[&str]) -> CheckerConfig {
    CheckerConfig {
        period: Duration::from_secs(3600),
        include_globs: strings(include),
        ..CheckerConfig::default()
    }
}

pub fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().unwrap())
}

pub fn recording_checker(
    kind: ResourceKind,
    config: CheckerConfig,
    cluster: &Arc<FakeCluster>,
    exporter: &Arc<RecordingExporter>,
    metrics: &Arc<Metrics>,
) -> ResourceChecker {
    ResourceChecker::new(
        kind,
        config,
        cluster.clone(),
        exporter.clone(),
        metrics.clone(),
    )
}

/// Checker wired to the real exporter and a clock frozen at [`NOW`]
pub fn cert_checker(
    kind: ResourceKind,
    config: CheckerConfig,
    cluster: &Arc<FakeCluster>,
    metrics: &Arc<Metrics>,
) -> ResourceChecker {
    let clock = Arc::new(FixedClock(DateTime::from_timestamp(NOW, 0).unwrap()));
    let exporter = Arc::new(CertExporter::for_kind(kind, metrics, clock));
    ResourceChecker::new(kind, config, cluster.clone(), exporter, metrics.clone())
}

pub fn series_count(vec: &GaugeVec) -> usize {
    vec.collect()
        .iter()
        .map(|family| family.get_metric().len())
        .sum()
}
