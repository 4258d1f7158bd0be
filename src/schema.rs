//! Resource schema registry.
//!
//! Every resource kind declares its input attributes (type, required,
//! forces replacement) and its output attributes. The planner asks the
//! registry whether a changed attribute can be updated in place; the loader
//! asks it whether a declaration is well-formed.

mod kinds;

pub use kinds::{
    AddressRangeInputs, AddressRangeOutputs, CacheInstanceInputs, CacheInstanceOutputs,
    ComputeServiceInputs, ComputeServiceOutputs, InvokerBindingInputs, InvokerBindingOutputs,
    LoadBalancerInputs, LoadBalancerOutputs, NetworkInputs, NetworkOutputs, ResourceKind,
    ServicePeeringInputs, ServicePeeringOutputs, SqlDatabaseInputs, SqlDatabaseOutputs,
    SqlInstanceInputs, SqlInstanceOutputs, SubnetworkInputs, SubnetworkOutputs, TypedInputs,
    VpcConnectorInputs, VpcConnectorOutputs, into_attributes,
};

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::ConfigError;
use crate::resource::{Expr, Reference, ResourceDeclaration};

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("unknown resource type '{0}'")]
    UnknownType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    String,
    Integer,
    Bool,
    StringList,
    StringMap,
}

impl AttrType {
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            AttrType::String => value.is_string(),
            AttrType::Integer => value.is_i64() || value.is_u64(),
            AttrType::Bool => value.is_boolean(),
            AttrType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| v.is_string())),
            AttrType::StringMap => value
                .as_object()
                .is_some_and(|entries| entries.values().all(|v| v.is_string())),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::String => "string",
            AttrType::Integer => "integer",
            AttrType::Bool => "bool",
            AttrType::StringList => "list of strings",
            AttrType::StringMap => "map of strings",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttributeSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: AttrType,
    pub required: bool,
    pub forces_replacement: bool,
}

impl AttributeSpec {
    pub const fn required(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            required: true,
            forces_replacement: false,
        }
    }

    pub const fn optional(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            required: false,
            forces_replacement: false,
        }
    }

    pub const fn forces_replacement(mut self) -> Self {
        self.forces_replacement = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutputSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: AttrType,
}

impl OutputSpec {
    pub const fn new(name: &'static str, ty: AttrType) -> Self {
        Self { name, ty }
    }
}

#[derive(Debug, Serialize)]
pub struct Schema {
    pub kind: ResourceKind,
    pub inputs: &'static [AttributeSpec],
    pub outputs: &'static [OutputSpec],
}

impl Schema {
    pub fn input(&self, name: &str) -> Option<&AttributeSpec> {
        self.inputs.iter().find(|a| a.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn forces_replacement(&self, attribute: &str) -> bool {
        self.input(attribute).is_some_and(|a| a.forces_replacement)
    }
}

/// Lookup table from type name to schema.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, &'static Schema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    pub fn builtin() -> Self {
        let schemas = ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str(), kind.schema()))
            .collect();
        Self { schemas }
    }

    pub fn lookup(&self, resource_type: &str) -> Result<&'static Schema, SchemaError> {
        self.schemas
            .get(resource_type)
            .copied()
            .ok_or_else(|| SchemaError::UnknownType(resource_type.to_string()))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &'static Schema> + '_ {
        self.schemas.values().copied()
    }

    /// Checks attribute names, presence, literal types and the type of every
    /// referenced output. Whether reference targets exist is the graph
    /// builder's concern.
    pub fn validate(&self, decl: &ResourceDeclaration) -> Result<(), ConfigError> {
        let schema = self.lookup(decl.id.kind.as_str())?;
        let resource = decl.id.to_string();

        for name in decl.inputs.keys() {
            if schema.input(name).is_none() {
                return Err(ConfigError::UnknownAttribute {
                    resource,
                    attribute: name.clone(),
                });
            }
        }

        for spec in schema.inputs {
            match decl.inputs.get(spec.name) {
                Some(expr) => check_expr(&resource, spec, expr)?,
                None if spec.required => {
                    return Err(ConfigError::MissingAttribute {
                        resource,
                        attribute: spec.name.to_string(),
                    });
                }
                None => {}
            }
        }

        if decl.id.kind == ResourceKind::InvokerBinding {
            check_invoker_binding(decl)?;
        }

        Ok(())
    }
}

fn check_expr(resource: &str, spec: &AttributeSpec, expr: &Expr) -> Result<(), ConfigError> {
    let mismatch = |found: String| ConfigError::TypeMismatch {
        resource: resource.to_string(),
        attribute: spec.name.to_string(),
        expected: spec.ty.to_string(),
        found,
    };

    match (expr, spec.ty) {
        (Expr::Literal(value), ty) => {
            if ty.accepts(value) {
                Ok(())
            } else {
                Err(mismatch(value.to_string()))
            }
        }
        (Expr::Reference(r), ty) => {
            let output = referenced_output(resource, spec.name, r)?;
            if output.ty == ty {
                Ok(())
            } else {
                Err(mismatch(format!("{} ({})", r, output.ty)))
            }
        }
        (Expr::List(items), AttrType::StringList) => items
            .iter()
            .try_for_each(|item| check_string_element(resource, spec.name, item, &mismatch)),
        (Expr::Map(entries), AttrType::StringMap) => entries
            .values()
            .try_for_each(|item| check_string_element(resource, spec.name, item, &mismatch)),
        (other, _) => Err(mismatch(other.to_string())),
    }
}

fn check_string_element<F>(
    resource: &str,
    attribute: &str,
    item: &Expr,
    mismatch: &F,
) -> Result<(), ConfigError>
where
    F: Fn(String) -> ConfigError,
{
    match item {
        Expr::Literal(v) if v.is_string() => Ok(()),
        Expr::Reference(r) => {
            let output = referenced_output(resource, attribute, r)?;
            if output.ty == AttrType::String {
                Ok(())
            } else {
                Err(mismatch(format!("{} ({})", r, output.ty)))
            }
        }
        other => Err(mismatch(other.to_string())),
    }
}

fn referenced_output(
    resource: &str,
    attribute: &str,
    reference: &Reference,
) -> Result<&'static OutputSpec, ConfigError> {
    reference
        .target
        .kind
        .schema()
        .output(&reference.attribute)
        .ok_or_else(|| ConfigError::UnresolvedReference {
            from: resource.to_string(),
            path: attribute.to_string(),
            target: reference.to_string(),
        })
}

/// The member of an invoker binding must be the caller's identity, never the
/// service account of the service being invoked.
fn check_invoker_binding(decl: &ResourceDeclaration) -> Result<(), ConfigError> {
    let single_ref = |name: &str| match decl.inputs.get(name) {
        Some(Expr::Reference(r)) => Some(r),
        _ => None,
    };

    if let (Some(service), Some(member)) = (single_ref("service"), single_ref("member"))
        && member.attribute == "service_account"
        && member.target == service.target
    {
        return Err(ConfigError::SelfInvokerBinding {
            binding: decl.id.to_string(),
            service: service.target.to_string(),
        });
    }

    Ok(())
}
