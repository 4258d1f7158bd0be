use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ProviderConfig, SettingsOverlay};

/// Root declaration document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawDocument {
    pub required_version: Option<String>,
    #[serde(default)]
    pub settings: SettingsOverlay,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub variable: BTreeMap<String, RawVariable>,
    /// `type -> name -> attributes`, in document order.
    #[serde(default)]
    pub resource: toml::Table,
    /// `name -> module block`, in document order.
    #[serde(default)]
    pub module: toml::Table,
    #[serde(default)]
    pub output: BTreeMap<String, RawOutput>,
}

/// A module loaded from a `source` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawModuleFile {
    pub required_version: Option<String>,
    #[serde(default)]
    pub variable: BTreeMap<String, RawVariable>,
    #[serde(default)]
    pub resource: toml::Table,
    #[serde(default)]
    pub module: toml::Table,
    #[serde(default)]
    pub output: BTreeMap<String, RawOutput>,
}

/// A `[module.<name>]` block: either `source` or an inline body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawModule {
    pub source: Option<String>,
    #[serde(default)]
    pub inputs: toml::Table,
    #[serde(default)]
    pub variable: BTreeMap<String, RawVariable>,
    #[serde(default)]
    pub resource: toml::Table,
    #[serde(default)]
    pub module: toml::Table,
    #[serde(default)]
    pub output: BTreeMap<String, RawOutput>,
}

impl RawModule {
    pub fn has_inline_body(&self) -> bool {
        !self.variable.is_empty()
            || !self.resource.is_empty()
            || !self.module.is_empty()
            || !self.output.is_empty()
    }
}

/// What a scope declares, whichever document it came from.
#[derive(Debug, Default)]
pub(super) struct RawBody {
    pub variable: BTreeMap<String, RawVariable>,
    pub resource: toml::Table,
    pub module: toml::Table,
    pub output: BTreeMap<String, RawOutput>,
}

impl From<RawDocument> for RawBody {
    fn from(doc: RawDocument) -> Self {
        Self {
            variable: doc.variable,
            resource: doc.resource,
            module: doc.module,
            output: doc.output,
        }
    }
}

impl From<RawModuleFile> for RawBody {
    fn from(file: RawModuleFile) -> Self {
        Self {
            variable: file.variable,
            resource: file.resource,
            module: file.module,
            output: file.output,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawVariable {
    #[serde(rename = "type")]
    pub ty: VarType,
    pub default: Option<toml::Value>,
    #[allow(dead_code)] // NOTE: documentation only
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawOutput {
    pub value: toml::Value,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Integer,
    Bool,
    List,
    Map,
}

impl VarType {
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            VarType::String => value.is_string(),
            VarType::Integer => value.is_i64() || value.is_u64(),
            VarType::Bool => value.is_boolean(),
            VarType::List => value.is_array(),
            VarType::Map => value.is_object(),
        }
    }

    /// Converts a raw `--var` string into a value of this type.
    pub fn parse_cli_value(&self, raw: &str) -> Option<serde_json::Value> {
        match self {
            VarType::String => Some(serde_json::Value::String(raw.to_string())),
            VarType::Integer => raw.trim().parse::<i64>().ok().map(Into::into),
            VarType::Bool => raw.trim().parse::<bool>().ok().map(Into::into),
            VarType::List | VarType::Map => {
                let table: toml::Table = toml::from_str(&format!("v = {raw}")).ok()?;
                let value = toml_to_json(table.get("v")?);
                self.accepts(&value).then_some(value)
            }
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarType::String => "string",
            VarType::Integer => "integer",
            VarType::Bool => "bool",
            VarType::List => "list",
            VarType::Map => "map",
        };
        f.write_str(name)
    }
}

/// TOML datetimes become strings; everything else maps one to one.
pub(super) fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => (*i).into(),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        toml::Value::Boolean(b) => (*b).into(),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(items) => items.iter().map(toml_to_json).collect(),
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}
