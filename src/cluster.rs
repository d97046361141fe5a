//! Kubernetes access for the checkers
//!
//! The checkers never talk to `kube` directly: they go through [`ClusterApi`],
//! which returns flattened [`ResourceItem`]s. [`KubeCluster`] is the real
//! implementation; tests substitute an in-memory one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    Client, Config,
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use std::{collections::BTreeMap, fmt, path::Path};
use tracing::warn;

/// Kind of cluster resource a checker is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Secret,
    ConfigMap,
}

impl ResourceKind {
    /// Lowercase name used as a metric label value and in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::ConfigMap => "configmap",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Secret or `ConfigMap` reduced to the fields the checkers look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceItem {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Secret `type` (e.g. `kubernetes.io/tls`), always `None` for config maps
    pub resource_type: Option<String>,
    pub data_entries: BTreeMap<String, Vec<u8>>,
}

impl ResourceItem {
    /// Look up a single data entry by key
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&[u8]> {
        self.data_entries.get(key).map(Vec::as_slice)
    }
}

impl From<Secret> for ResourceItem {
    fn from(secret: Secret) -> Self {
        let meta = secret.metadata;
        let data_entries = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect();

        Self {
            kind: ResourceKind::Secret,
            namespace: meta.namespace.unwrap_or_default(),
            name: meta.name.unwrap_or_default(),
            labels: meta.labels.unwrap_or_default(),
            annotations: meta.annotations.unwrap_or_default(),
            resource_type: secret.type_,
            data_entries,
        }
    }
}

impl From<ConfigMap> for ResourceItem {
    fn from(config_map: ConfigMap) -> Self {
        let meta = config_map.metadata;
        let namespace = meta.namespace.unwrap_or_default();
        let name = meta.name.unwrap_or_default();

        let mut data_entries: BTreeMap<String, Vec<u8>> = config_map
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.into_bytes()))
            .collect();

        // binaryData wins over data on a shared key
        for (key, value) in config_map.binary_data.unwrap_or_default() {
            if data_entries.insert(key.clone(), value.0).is_some() {
                warn!(
                    configmap = %name,
                    namespace = %namespace,
                    key = %key,
                    "key present in both data and binaryData, using binaryData"
                );
            }
        }

        Self {
            kind: ResourceKind::ConfigMap,
            namespace,
            name,
            labels: meta.labels.unwrap_or_default(),
            annotations: meta.annotations.unwrap_or_default(),
            resource_type: None,
            data_entries,
        }
    }
}

/// Read-only view of the cluster used by the checkers
///
/// An empty `namespace` means every namespace.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List Secrets, optionally restricted by a label selector
    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>>;

    /// List config maps, optionally restricted by a label selector
    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>>;

    /// Fetch a single Secret by name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<ResourceItem>;
}

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl KubeCluster {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig file, or from the
    /// environment (in-cluster service account, `KUBECONFIG`, `~/.kube/config`)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the client
    /// cannot be created
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .context("Failed to build client config from kubeconfig")?;
                Client::try_from(config).context("Failed to create Kubernetes client")?
            }
            None => Client::try_default()
                .await
                .context("Failed to create Kubernetes client")?,
        };

        Ok(Self::new(client))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>> {
        let secrets = self
            .api::<Secret>(namespace)
            .list(&list_params(label_selector))
            .await
            .with_context(|| format!("Failed to list secrets in namespace '{namespace}'"))?;

        Ok(secrets.items.into_iter().map(ResourceItem::from).collect())
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceItem>> {
        let config_maps = self
            .api::<ConfigMap>(namespace)
            .list(&list_params(label_selector))
            .await
            .with_context(|| format!("Failed to list configmaps in namespace '{namespace}'"))?;

        Ok(config_maps.items.into_iter().map(ResourceItem::from).collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<ResourceItem> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get(name)
            .await
            .with_context(|| format!("Failed to get secret {namespace}/{name}"))?;

        Ok(ResourceItem::from(secret))
    }
}
