use std::collections::BTreeMap;

use super::document::toml_to_json;
use crate::error::ConfigError;
use crate::resource::Expr;
use crate::schema::ResourceKind;

/// What a `${...}` expression names, before scope resolution.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Symbol {
    Resource {
        kind: ResourceKind,
        name: String,
        attribute: String,
    },
    Variable(String),
    ModuleOutput {
        module: String,
        output: String,
    },
}

/// Returns `None` for plain strings. A string holding `${` anywhere but as
/// one whole reference is rejected.
pub(super) fn parse_symbol(location: &str, text: &str) -> Result<Option<Symbol>, ConfigError> {
    if !text.contains("${") {
        return Ok(None);
    }

    let invalid = |reason: &str| ConfigError::InvalidExpression {
        location: location.to_string(),
        expression: text.to_string(),
        reason: reason.to_string(),
    };

    let inner = text
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|inner| !inner.contains("${") && !inner.contains('}'))
        .ok_or_else(|| invalid("interpolation must be a single whole reference"))?
        .trim();

    let parts: Vec<&str> = inner.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid("empty path segment"));
    }

    match parts.as_slice() {
        ["var", name] => Ok(Some(Symbol::Variable(name.to_string()))),
        ["module", module, output] => Ok(Some(Symbol::ModuleOutput {
            module: module.to_string(),
            output: output.to_string(),
        })),
        [kind, name, attribute] => {
            let kind = kind
                .parse::<ResourceKind>()
                .map_err(|e| invalid(&e.to_string()))?;
            Ok(Some(Symbol::Resource {
                kind,
                name: name.to_string(),
                attribute: attribute.to_string(),
            }))
        }
        _ => Err(invalid(
            "expected <type>.<name>.<attribute>, var.<name> or module.<name>.<output>",
        )),
    }
}

/// Converts a TOML value into an expression, handing every reference to
/// `resolve`. `location` prefixes parse errors.
pub(super) fn convert<F>(location: &str, value: &toml::Value, resolve: &F) -> Result<Expr, ConfigError>
where
    F: Fn(Symbol) -> Result<Expr, ConfigError>,
{
    match value {
        toml::Value::String(text) => match parse_symbol(location, text)? {
            Some(symbol) => resolve(symbol),
            None => Ok(Expr::Literal(serde_json::Value::String(text.clone()))),
        },
        toml::Value::Array(items) => {
            let converted = items
                .iter()
                .enumerate()
                .map(|(i, item)| convert(&format!("{location}[{i}]"), item, resolve))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::list(converted))
        }
        toml::Value::Table(table) => {
            let converted = table
                .iter()
                .map(|(key, item)| {
                    convert(&format!("{location}.{key}"), item, resolve).map(|e| (key.clone(), e))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(Expr::map(converted))
        }
        other => Ok(Expr::Literal(toml_to_json(other))),
    }
}
