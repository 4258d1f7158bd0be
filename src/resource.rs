use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::schema::ResourceKind;

/// Concrete attribute values as sent to and returned by a provider.
pub type AttributeMap = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Error, PartialEq)]
#[error("invalid resource identifier '{0}'")]
pub struct InvalidResourceId(pub String);

/// Stable identity of a resource: `[module.<m>.]*<type>.<name>`.
///
/// Independent of declaration order, so it doubles as the state key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub module_path: Vec<String>,
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            module_path: Vec::new(),
            kind,
            name: name.into(),
        }
    }

    pub fn in_module(mut self, module_path: &[String]) -> Self {
        let mut path = module_path.to_vec();
        path.append(&mut self.module_path);
        self.module_path = path;
        self
    }

    pub fn module_prefix(&self) -> String {
        self.module_path
            .iter()
            .map(|m| format!("module.{m}."))
            .collect()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", self.module_prefix(), self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = InvalidResourceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidResourceId(s.to_string());
        let parts: Vec<&str> = s.split('.').collect();
        let mut module_path = Vec::new();
        let mut rest = parts.as_slice();

        while rest.len() > 2 && rest[0] == "module" {
            if rest[1].is_empty() {
                return Err(invalid());
            }
            module_path.push(rest[1].to_string());
            rest = &rest[2..];
        }

        match rest {
            [kind, name] if !name.is_empty() => {
                let kind = kind.parse::<ResourceKind>().map_err(|_| invalid())?;
                Ok(Self {
                    module_path,
                    kind,
                    name: name.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A pointer from one resource's input to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub target: ResourceId,
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// An attribute value as declared: literals, references, or containers
/// holding references. Containers without references collapse to literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(serde_json::Value),
    Reference(Reference),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
}

impl Expr {
    pub fn list(items: Vec<Expr>) -> Self {
        if items.iter().all(|e| matches!(e, Expr::Literal(_))) {
            let values = items
                .into_iter()
                .filter_map(|e| match e {
                    Expr::Literal(v) => Some(v),
                    _ => None,
                })
                .collect();
            Expr::Literal(serde_json::Value::Array(values))
        } else {
            Expr::List(items)
        }
    }

    pub fn map(entries: BTreeMap<String, Expr>) -> Self {
        if entries.values().all(|e| matches!(e, Expr::Literal(_))) {
            let values = entries
                .into_iter()
                .filter_map(|(k, e)| match e {
                    Expr::Literal(v) => Some((k, v)),
                    _ => None,
                })
                .collect();
            Expr::Literal(serde_json::Value::Object(values))
        } else {
            Expr::Map(entries)
        }
    }

    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(r) => found.push(r),
            Expr::List(items) => items.iter().for_each(|e| e.collect_references(found)),
            Expr::Map(entries) => entries.values().for_each(|e| e.collect_references(found)),
        }
    }

    /// Resolves to a concrete value, or `None` if any reference is not yet known.
    pub fn resolve<F>(&self, lookup: &F) -> Option<serde_json::Value>
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Reference(r) => lookup(r),
            Expr::List(items) => items
                .iter()
                .map(|e| e.resolve(lookup))
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Expr::Map(entries) => entries
                .iter()
                .map(|(k, e)| e.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Reference(r) => write!(f, "${{{r}}}"),
            Expr::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Expr::Map(entries) => {
                let rendered: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{k} = {v}")).collect();
                write!(f, "{{ {} }}", rendered.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDeclaration {
    pub id: ResourceId,
    pub inputs: BTreeMap<String, Expr>,
    /// Ordering hints that are not expressed through attribute references.
    pub depends_on: Vec<ResourceId>,
    pub prevent_destroy: bool,
}

impl ResourceDeclaration {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            prevent_destroy: false,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn with_literal(self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.with_input(name, Expr::Literal(value))
    }

    pub fn with_reference(
        self,
        name: impl Into<String>,
        target: ResourceId,
        attribute: impl Into<String>,
    ) -> Self {
        self.with_input(name, Expr::Reference(Reference::new(target, attribute)))
    }

    pub fn with_depends_on(mut self, target: ResourceId) -> Self {
        self.depends_on.push(target);
        self
    }

    /// `(input attribute, reference)` pairs in attribute order.
    pub fn references(&self) -> Vec<(&str, &Reference)> {
        self.inputs
            .iter()
            .flat_map(|(name, expr)| expr.references().into_iter().map(move |r| (name.as_str(), r)))
            .collect()
    }
}

/// Declarations in declaration order, indexed by identity.
#[derive(Debug, Clone, Default)]
pub struct DeclarationSet {
    items: Vec<ResourceDeclaration>,
    index: HashMap<ResourceId, usize>,
}

impl DeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rejected declaration if its identity is already present.
    pub fn insert(&mut self, decl: ResourceDeclaration) -> Result<(), ResourceDeclaration> {
        if self.index.contains_key(&decl.id) {
            return Err(decl);
        }
        self.index.insert(decl.id.clone(), self.items.len());
        self.items.push(decl);
        Ok(())
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDeclaration> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDeclaration> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<ResourceDeclaration> for DeclarationSet {
    /// Later duplicates are dropped; the loader reports duplicates before this point.
    fn from_iter<I: IntoIterator<Item = ResourceDeclaration>>(iter: I) -> Self {
        let mut set = DeclarationSet::new();
        for decl in iter {
            let _ = set.insert(decl);
        }
        set
    }
}
