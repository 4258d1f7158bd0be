use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{AttributeSpec, OutputSpec, Schema, SchemaError};
use crate::resource::AttributeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnetwork,
    AddressRange,
    ServicePeering,
    VpcConnector,
    SqlInstance,
    SqlDatabase,
    CacheInstance,
    ComputeService,
    InvokerBinding,
    LoadBalancer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Network,
        ResourceKind::Subnetwork,
        ResourceKind::AddressRange,
        ResourceKind::ServicePeering,
        ResourceKind::VpcConnector,
        ResourceKind::SqlInstance,
        ResourceKind::SqlDatabase,
        ResourceKind::CacheInstance,
        ResourceKind::ComputeService,
        ResourceKind::InvokerBinding,
        ResourceKind::LoadBalancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnetwork => "subnetwork",
            ResourceKind::AddressRange => "address_range",
            ResourceKind::ServicePeering => "service_peering",
            ResourceKind::VpcConnector => "vpc_connector",
            ResourceKind::SqlInstance => "sql_instance",
            ResourceKind::SqlDatabase => "sql_database",
            ResourceKind::CacheInstance => "cache_instance",
            ResourceKind::ComputeService => "compute_service",
            ResourceKind::InvokerBinding => "invoker_binding",
            ResourceKind::LoadBalancer => "load_balancer",
        }
    }

    pub fn schema(&self) -> &'static Schema {
        match self {
            ResourceKind::Network => &NETWORK,
            ResourceKind::Subnetwork => &SUBNETWORK,
            ResourceKind::AddressRange => &ADDRESS_RANGE,
            ResourceKind::ServicePeering => &SERVICE_PEERING,
            ResourceKind::VpcConnector => &VPC_CONNECTOR,
            ResourceKind::SqlInstance => &SQL_INSTANCE,
            ResourceKind::SqlDatabase => &SQL_DATABASE,
            ResourceKind::CacheInstance => &CACHE_INSTANCE,
            ResourceKind::ComputeService => &COMPUTE_SERVICE,
            ResourceKind::InvokerBinding => &INVOKER_BINDING,
            ResourceKind::LoadBalancer => &LOAD_BALANCER,
        }
    }

    /// Decodes concrete inputs into this kind's typed structure.
    pub fn decode_inputs(&self, inputs: &AttributeMap) -> Result<TypedInputs, serde_json::Error> {
        let value = serde_json::Value::Object(
            inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        Ok(match self {
            ResourceKind::Network => TypedInputs::Network(serde_json::from_value(value)?),
            ResourceKind::Subnetwork => TypedInputs::Subnetwork(serde_json::from_value(value)?),
            ResourceKind::AddressRange => TypedInputs::AddressRange(serde_json::from_value(value)?),
            ResourceKind::ServicePeering => {
                TypedInputs::ServicePeering(serde_json::from_value(value)?)
            }
            ResourceKind::VpcConnector => TypedInputs::VpcConnector(serde_json::from_value(value)?),
            ResourceKind::SqlInstance => TypedInputs::SqlInstance(serde_json::from_value(value)?),
            ResourceKind::SqlDatabase => TypedInputs::SqlDatabase(serde_json::from_value(value)?),
            ResourceKind::CacheInstance => {
                TypedInputs::CacheInstance(serde_json::from_value(value)?)
            }
            ResourceKind::ComputeService => {
                TypedInputs::ComputeService(serde_json::from_value(value)?)
            }
            ResourceKind::InvokerBinding => {
                TypedInputs::InvokerBinding(serde_json::from_value(value)?)
            }
            ResourceKind::LoadBalancer => TypedInputs::LoadBalancer(serde_json::from_value(value)?),
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownType(s.to_string()))
    }
}

use super::AttrType::String as Str;
use super::AttrType::{Bool, Integer, StringList, StringMap};

static NETWORK: Schema = Schema {
    kind: ResourceKind::Network,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::optional("auto_create_subnetworks", Bool).forces_replacement(),
        AttributeSpec::optional("routing_mode", Str),
    ],
    outputs: &[OutputSpec::new("id", Str), OutputSpec::new("self_link", Str)],
};

static SUBNETWORK: Schema = Schema {
    kind: ResourceKind::Subnetwork,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("network", Str).forces_replacement(),
        AttributeSpec::required("region", Str).forces_replacement(),
        AttributeSpec::required("cidr", Str).forces_replacement(),
        AttributeSpec::optional("private_google_access", Bool),
    ],
    outputs: &[
        OutputSpec::new("id", Str),
        OutputSpec::new("self_link", Str),
        OutputSpec::new("gateway_address", Str),
    ],
};

static ADDRESS_RANGE: Schema = Schema {
    kind: ResourceKind::AddressRange,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("network", Str).forces_replacement(),
        AttributeSpec::required("prefix_length", Integer).forces_replacement(),
        AttributeSpec::optional("purpose", Str).forces_replacement(),
    ],
    outputs: &[
        OutputSpec::new("id", Str),
        OutputSpec::new("name", Str),
        OutputSpec::new("address", Str),
    ],
};

static SERVICE_PEERING: Schema = Schema {
    kind: ResourceKind::ServicePeering,
    inputs: &[
        AttributeSpec::required("network", Str).forces_replacement(),
        AttributeSpec::required("service", Str).forces_replacement(),
        AttributeSpec::required("reserved_ranges", StringList),
    ],
    outputs: &[OutputSpec::new("id", Str), OutputSpec::new("peering", Str)],
};

static VPC_CONNECTOR: Schema = Schema {
    kind: ResourceKind::VpcConnector,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("region", Str).forces_replacement(),
        AttributeSpec::required("network", Str).forces_replacement(),
        AttributeSpec::required("cidr", Str).forces_replacement(),
        AttributeSpec::optional("min_instances", Integer),
        AttributeSpec::optional("max_instances", Integer),
    ],
    outputs: &[OutputSpec::new("id", Str), OutputSpec::new("self_link", Str)],
};

static SQL_INSTANCE: Schema = Schema {
    kind: ResourceKind::SqlInstance,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("database_version", Str).forces_replacement(),
        AttributeSpec::required("region", Str).forces_replacement(),
        AttributeSpec::required("tier", Str),
        AttributeSpec::required("network", Str).forces_replacement(),
        AttributeSpec::optional("availability_type", Str),
        AttributeSpec::optional("backups_enabled", Bool),
        AttributeSpec::optional("deletion_protection", Bool),
    ],
    outputs: &[
        OutputSpec::new("id", Str),
        OutputSpec::new("connection_name", Str),
        OutputSpec::new("private_ip", Str),
    ],
};

static SQL_DATABASE: Schema = Schema {
    kind: ResourceKind::SqlDatabase,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("instance", Str).forces_replacement(),
        AttributeSpec::optional("charset", Str).forces_replacement(),
    ],
    outputs: &[OutputSpec::new("id", Str), OutputSpec::new("name", Str)],
};

static CACHE_INSTANCE: Schema = Schema {
    kind: ResourceKind::CacheInstance,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("tier", Str).forces_replacement(),
        AttributeSpec::required("memory_size_gb", Integer),
        AttributeSpec::required("region", Str).forces_replacement(),
        AttributeSpec::required("network", Str).forces_replacement(),
        AttributeSpec::optional("redis_version", Str).forces_replacement(),
        AttributeSpec::optional("connect_mode", Str).forces_replacement(),
        AttributeSpec::optional("eviction_policy", Str),
    ],
    outputs: &[
        OutputSpec::new("id", Str),
        OutputSpec::new("host", Str),
        OutputSpec::new("port", Integer),
    ],
};

static COMPUTE_SERVICE: Schema = Schema {
    kind: ResourceKind::ComputeService,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("region", Str).forces_replacement(),
        AttributeSpec::required("image", Str),
        AttributeSpec::optional("env", StringMap),
        AttributeSpec::optional("vpc_connector", Str),
        AttributeSpec::optional("ingress", Str),
        AttributeSpec::optional("min_instances", Integer),
        AttributeSpec::optional("max_instances", Integer),
    ],
    outputs: &[
        OutputSpec::new("id", Str),
        OutputSpec::new("url", Str),
        OutputSpec::new("service_account", Str),
    ],
};

static INVOKER_BINDING: Schema = Schema {
    kind: ResourceKind::InvokerBinding,
    inputs: &[
        AttributeSpec::required("service", Str).forces_replacement(),
        AttributeSpec::required("member", Str).forces_replacement(),
        AttributeSpec::optional("role", Str).forces_replacement(),
    ],
    outputs: &[OutputSpec::new("id", Str), OutputSpec::new("etag", Str)],
};

static LOAD_BALANCER: Schema = Schema {
    kind: ResourceKind::LoadBalancer,
    inputs: &[
        AttributeSpec::required("name", Str).forces_replacement(),
        AttributeSpec::required("backends", StringList),
        AttributeSpec::optional("port", Integer).forces_replacement(),
        AttributeSpec::optional("enable_cdn", Bool),
    ],
    outputs: &[OutputSpec::new("id", Str), OutputSpec::new("ip_address", Str)],
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInputs {
    pub name: String,
    pub auto_create_subnetworks: Option<bool>,
    pub routing_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetworkInputs {
    pub name: String,
    pub network: String,
    pub region: String,
    pub cidr: String,
    pub private_google_access: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressRangeInputs {
    pub name: String,
    pub network: String,
    pub prefix_length: u8,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicePeeringInputs {
    pub network: String,
    pub service: String,
    pub reserved_ranges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VpcConnectorInputs {
    pub name: String,
    pub region: String,
    pub network: String,
    pub cidr: String,
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlInstanceInputs {
    pub name: String,
    pub database_version: String,
    pub region: String,
    pub tier: String,
    pub network: String,
    pub availability_type: Option<String>,
    pub backups_enabled: Option<bool>,
    pub deletion_protection: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlDatabaseInputs {
    pub name: String,
    pub instance: String,
    pub charset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheInstanceInputs {
    pub name: String,
    pub tier: String,
    pub memory_size_gb: u32,
    pub region: String,
    pub network: String,
    pub redis_version: Option<String>,
    pub connect_mode: Option<String>,
    /// Passed through to the managed service untouched.
    pub eviction_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeServiceInputs {
    pub name: String,
    pub region: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub vpc_connector: Option<String>,
    pub ingress: Option<String>,
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvokerBindingInputs {
    pub service: String,
    pub member: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerInputs {
    pub name: String,
    pub backends: Vec<String>,
    pub port: Option<u16>,
    pub enable_cdn: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedInputs {
    Network(NetworkInputs),
    Subnetwork(SubnetworkInputs),
    AddressRange(AddressRangeInputs),
    ServicePeering(ServicePeeringInputs),
    VpcConnector(VpcConnectorInputs),
    SqlInstance(SqlInstanceInputs),
    SqlDatabase(SqlDatabaseInputs),
    CacheInstance(CacheInstanceInputs),
    ComputeService(ComputeServiceInputs),
    InvokerBinding(InvokerBindingInputs),
    LoadBalancer(LoadBalancerInputs),
}

impl TypedInputs {
    /// Provider ids of other resources these inputs point at.
    pub fn linked_ids(&self) -> Vec<&str> {
        match self {
            TypedInputs::Network(_) => vec![],
            TypedInputs::Subnetwork(i) => vec![i.network.as_str()],
            TypedInputs::AddressRange(i) => vec![i.network.as_str()],
            TypedInputs::ServicePeering(i) => vec![i.network.as_str()],
            TypedInputs::VpcConnector(i) => vec![i.network.as_str()],
            TypedInputs::SqlInstance(i) => vec![i.network.as_str()],
            TypedInputs::SqlDatabase(i) => vec![i.instance.as_str()],
            TypedInputs::CacheInstance(i) => vec![i.network.as_str()],
            TypedInputs::ComputeService(i) => i.vpc_connector.iter().map(String::as_str).collect(),
            TypedInputs::InvokerBinding(i) => vec![i.service.as_str()],
            TypedInputs::LoadBalancer(i) => i.backends.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkOutputs {
    pub id: String,
    pub self_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubnetworkOutputs {
    pub id: String,
    pub self_link: String,
    pub gateway_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressRangeOutputs {
    pub id: String,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServicePeeringOutputs {
    pub id: String,
    pub peering: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VpcConnectorOutputs {
    pub id: String,
    pub self_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlInstanceOutputs {
    pub id: String,
    pub connection_name: String,
    pub private_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlDatabaseOutputs {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInstanceOutputs {
    pub id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeServiceOutputs {
    pub id: String,
    pub url: String,
    pub service_account: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvokerBindingOutputs {
    pub id: String,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerOutputs {
    pub id: String,
    pub ip_address: String,
}

/// Serializes a typed output struct into an attribute map.
pub fn into_attributes<T: Serialize>(outputs: &T) -> AttributeMap {
    match serde_json::to_value(outputs) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => AttributeMap::new(),
    }
}
