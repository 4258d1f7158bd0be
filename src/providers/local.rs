//! In-process simulated cloud.
//!
//! Resources live in a JSON document (`cloud.json`) beside the workspace
//! state, so successive runs see the same "real world". Ids are
//! deterministic: `<kind>-<serial>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Provider, ProviderError};
use crate::resource::AttributeMap;
use crate::schema::{
    AddressRangeOutputs, CacheInstanceOutputs, ComputeServiceOutputs, InvokerBindingOutputs,
    LoadBalancerOutputs, NetworkOutputs, ResourceKind, ServicePeeringOutputs, SqlDatabaseOutputs,
    SqlInstanceOutputs, SubnetworkOutputs, TypedInputs, VpcConnectorOutputs, into_attributes,
};

pub const CLOUD_FILE: &str = "cloud.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Cloud {
    next_serial: u64,
    resources: BTreeMap<String, CloudResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CloudResource {
    kind: ResourceKind,
    serial: u64,
    inputs: AttributeMap,
    outputs: AttributeMap,
    /// Ids of other live resources this one points at.
    linked_ids: Vec<String>,
}

impl Cloud {
    fn find(&self, kind: ResourceKind, id: &str) -> Result<&CloudResource, ProviderError> {
        self.resources
            .get(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| ProviderError::NotFound(format!("{kind} '{id}'")))
    }

    fn users_of(&self, id: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.linked_ids.iter().any(|l| l == id))
            .map(|(other, _)| other.as_str())
            .collect()
    }
}

#[derive(Debug)]
pub struct LocalProvider {
    path: Option<PathBuf>,
    cloud: Mutex<Cloud>,
}

impl LocalProvider {
    /// Opens (or starts) the simulated cloud stored at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let path = path.into();
        let cloud = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ProviderError::Permanent(format!("corrupt {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Cloud::default(),
            Err(e) => {
                return Err(ProviderError::Permanent(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        Ok(Self {
            path: Some(path),
            cloud: Mutex::new(cloud),
        })
    }

    /// A cloud that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cloud: Mutex::new(Cloud::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn resource_count(&self) -> usize {
        self.cloud.lock().await.resources.len()
    }

    /// Writes `next` to disk and only then makes it the live cloud.
    async fn commit(&self, cloud: &mut Cloud, next: Cloud) -> Result<(), ProviderError> {
        self.persist(&next).await?;
        *cloud = next;
        Ok(())
    }

    async fn persist(&self, cloud: &Cloud) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write_err =
            |e: std::io::Error| ProviderError::Transient(format!("failed to write {}: {}", path.display(), e));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let content = serde_json::to_string_pretty(cloud)
            .map_err(|e| ProviderError::Permanent(e.to_string()))?;
        tokio::fs::write(path, content).await.map_err(write_err)
    }
}

fn decode(kind: ResourceKind, inputs: &AttributeMap) -> Result<TypedInputs, ProviderError> {
    kind.decode_inputs(inputs)
        .map_err(|e| ProviderError::Permanent(format!("invalid {kind} inputs: {e}")))
}

fn slug(kind: ResourceKind) -> String {
    kind.as_str().replace('_', "-")
}

fn private_ip(serial: u64) -> String {
    format!("10.250.{}.{}", serial / 250, serial % 250 + 2)
}

/// First host address of an IPv4 CIDR block.
fn gateway_of(cidr: &str) -> String {
    let base = cidr.split('/').next().unwrap_or(cidr);
    let mut octets: Vec<u32> = base.split('.').filter_map(|o| o.parse().ok()).collect();
    if octets.len() != 4 {
        return base.to_string();
    }
    octets[3] += 1;
    octets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn compute_outputs(id: &str, serial: u64, inputs: &TypedInputs) -> AttributeMap {
    let id = id.to_string();
    match inputs {
        TypedInputs::Network(i) => into_attributes(&NetworkOutputs {
            self_link: format!("projects/local/global/networks/{}", i.name),
            id,
        }),
        TypedInputs::Subnetwork(i) => into_attributes(&SubnetworkOutputs {
            self_link: format!("projects/local/regions/{}/subnetworks/{}", i.region, i.name),
            gateway_address: gateway_of(&i.cidr),
            id,
        }),
        TypedInputs::AddressRange(i) => into_attributes(&AddressRangeOutputs {
            name: i.name.clone(),
            address: format!("10.{}.0.0", 100 + serial % 100),
            id,
        }),
        TypedInputs::ServicePeering(i) => into_attributes(&ServicePeeringOutputs {
            peering: format!("servicenetworking-{}", i.network),
            id,
        }),
        TypedInputs::VpcConnector(i) => into_attributes(&VpcConnectorOutputs {
            self_link: format!("projects/local/locations/{}/connectors/{}", i.region, i.name),
            id,
        }),
        TypedInputs::SqlInstance(i) => into_attributes(&SqlInstanceOutputs {
            connection_name: format!("local:{}:{}", i.region, i.name),
            private_ip: private_ip(serial),
            id,
        }),
        TypedInputs::SqlDatabase(i) => into_attributes(&SqlDatabaseOutputs {
            name: i.name.clone(),
            id,
        }),
        TypedInputs::CacheInstance(_) => into_attributes(&CacheInstanceOutputs {
            host: private_ip(serial),
            port: 6379,
            id,
        }),
        TypedInputs::ComputeService(i) => into_attributes(&ComputeServiceOutputs {
            url: format!("https://{}-{}.run.local", i.name, i.region),
            service_account: format!("{}@local.iam", i.name),
            id,
        }),
        TypedInputs::InvokerBinding(_) => into_attributes(&InvokerBindingOutputs {
            etag: format!("etag-{serial}"),
            id,
        }),
        TypedInputs::LoadBalancer(_) => into_attributes(&LoadBalancerOutputs {
            ip_address: format!("203.0.113.{}", serial % 254 + 1),
            id,
        }),
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(
        &self,
        kind: ResourceKind,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError> {
        let typed = decode(kind, inputs)?;
        let mut cloud = self.cloud.lock().await;
        let mut next = cloud.clone();

        next.next_serial += 1;
        let serial = next.next_serial;
        let id = format!("{}-{}", slug(kind), serial);
        let outputs = compute_outputs(&id, serial, &typed);

        next.resources.insert(
            id.clone(),
            CloudResource {
                kind,
                serial,
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                linked_ids: typed.linked_ids().into_iter().map(str::to_string).collect(),
            },
        );
        self.commit(&mut cloud, next).await?;
        tracing::debug!(%kind, id = %id, "local resource created");
        Ok(outputs)
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<AttributeMap, ProviderError> {
        let cloud = self.cloud.lock().await;
        Ok(cloud.find(kind, id)?.outputs.clone())
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError> {
        let typed = decode(kind, inputs)?;
        let mut cloud = self.cloud.lock().await;
        let serial = cloud.find(kind, id)?.serial;
        let outputs = compute_outputs(id, serial, &typed);

        let mut next = cloud.clone();
        if let Some(resource) = next.resources.get_mut(id) {
            resource.inputs = inputs.clone();
            resource.outputs = outputs.clone();
            resource.linked_ids = typed.linked_ids().into_iter().map(str::to_string).collect();
        }
        self.commit(&mut cloud, next).await?;
        tracing::debug!(%kind, id, "local resource updated");
        Ok(outputs)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        let mut cloud = self.cloud.lock().await;
        cloud.find(kind, id)?;

        let users = cloud.users_of(id);
        if !users.is_empty() {
            return Err(ProviderError::DependencyViolation(format!(
                "{kind} '{id}' is still used by {}",
                users.join(", ")
            )));
        }

        let mut next = cloud.clone();
        next.resources.remove(id);
        self.commit(&mut cloud, next).await?;
        tracing::debug!(%kind, id, "local resource deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn network_inputs(name: &str) -> AttributeMap {
        attrs(&[("name", json!(name))])
    }

    fn cache_inputs(network: &str) -> AttributeMap {
        attrs(&[
            ("name", json!("sessions")),
            ("tier", json!("BASIC")),
            ("memory_size_gb", json!(1)),
            ("region", json!("europe-west1")),
            ("network", json!(network)),
            ("eviction_policy", json!("allkeys-lru")),
        ])
    }

    #[tokio::test]
    async fn test_create_assigns_deterministic_ids() {
        let provider = LocalProvider::in_memory();
        let net = provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap();
        assert_eq!(net["id"], json!("network-1"));
        assert_eq!(net["self_link"], json!("projects/local/global/networks/vpc"));

        let cache = provider
            .create(ResourceKind::CacheInstance, &cache_inputs("network-1"))
            .await
            .unwrap();
        assert_eq!(cache["id"], json!("cache-instance-2"));
        assert_eq!(cache["port"], json!(6379));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_inputs_permanently() {
        let provider = LocalProvider::in_memory();
        let err = provider
            .create(ResourceKind::Network, &attrs(&[("mtu", json!(1460))]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
        assert_eq!(provider.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_read_unknown_is_not_found() {
        let provider = LocalProvider::in_memory();
        let err = provider
            .read(ResourceKind::Network, "network-42")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_with_wrong_kind_is_not_found() {
        let provider = LocalProvider::in_memory();
        provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap();
        let err = provider
            .read(ResourceKind::Subnetwork, "network-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let provider = LocalProvider::in_memory();
        provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap();
        let updated = provider
            .update(
                ResourceKind::Network,
                "network-1",
                &attrs(&[("name", json!("vpc")), ("routing_mode", json!("GLOBAL"))]),
            )
            .await
            .unwrap();
        assert_eq!(updated["id"], json!("network-1"));
    }

    #[tokio::test]
    async fn test_delete_refused_while_in_use() {
        let provider = LocalProvider::in_memory();
        provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap();
        provider
            .create(ResourceKind::CacheInstance, &cache_inputs("network-1"))
            .await
            .unwrap();

        let err = provider
            .delete(ResourceKind::Network, "network-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DependencyViolation(_)));
        assert!(err.to_string().contains("cache-instance-2"));

        provider
            .delete(ResourceKind::CacheInstance, "cache-instance-2")
            .await
            .unwrap();
        provider
            .delete(ResourceKind::Network, "network-1")
            .await
            .unwrap();
        assert_eq!(provider.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = LocalProvider::in_memory();
        let err = provider
            .delete(ResourceKind::Network, "network-7")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cloud_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws").join(CLOUD_FILE);

        let provider = LocalProvider::open(&path).unwrap();
        provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap();
        drop(provider);

        let reopened = LocalProvider::open(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        let outputs = reopened
            .read(ResourceKind::Network, "network-1")
            .await
            .unwrap();
        assert_eq!(outputs["id"], json!("network-1"));

        let next = reopened
            .create(ResourceKind::Network, &network_inputs("other"))
            .await
            .unwrap();
        assert_eq!(next["id"], json!("network-2"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cloud_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("ws");
        let provider = LocalProvider::open(blocker.join(CLOUD_FILE)).unwrap();

        std::fs::write(&blocker, "not a directory").unwrap();
        let err = provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.resource_count().await, 0);

        std::fs::remove_file(&blocker).unwrap();
        let outputs = provider
            .create(ResourceKind::Network, &network_inputs("vpc"))
            .await
            .unwrap();
        assert_eq!(outputs["id"], json!("network-1"));
        assert_eq!(provider.resource_count().await, 1);
    }

    #[test]
    fn test_open_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLOUD_FILE);
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            LocalProvider::open(&path),
            Err(ProviderError::Permanent(_))
        ));
    }

    #[test]
    fn test_gateway_of() {
        assert_eq!(gateway_of("10.0.1.0/24"), "10.0.1.1");
        assert_eq!(gateway_of("bogus"), "bogus");
    }
}
