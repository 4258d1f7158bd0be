use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};

use super::document::{RawBody, RawDocument, RawModule, RawModuleFile, RawVariable, toml_to_json};
use super::expr::{Symbol, convert, parse_symbol};
use super::{ProviderConfig, SettingsOverlay};
use crate::error::ConfigError;
use crate::resource::{DeclarationSet, Expr, Reference, ResourceDeclaration, ResourceId};
use crate::schema::{ResourceKind, SchemaRegistry};

const DEPENDS_ON: &str = "depends_on";
const PREVENT_DESTROY: &str = "prevent_destroy";

#[derive(Debug, Clone, PartialEq)]
pub struct OutputDeclaration {
    pub name: String,
    pub value: Expr,
    pub description: Option<String>,
}

/// A parsed, flattened and schema-checked declaration document.
#[derive(Debug)]
pub struct Configuration {
    pub path: PathBuf,
    pub required_version: Option<VersionReq>,
    pub settings: SettingsOverlay,
    pub provider: ProviderConfig,
    pub declarations: DeclarationSet,
    pub outputs: Vec<OutputDeclaration>,
}

impl Configuration {
    /// Loads the document at `path`. `variables` holds raw `--var` values.
    pub fn load(path: &Path, variables: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::parse(&path.display().to_string(), &content, base_dir, variables)?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    pub fn parse(
        origin: &str,
        content: &str,
        base_dir: &Path,
        variables: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawDocument = toml::from_str(content).map_err(|e| ConfigError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;

        let required_version = check_version(origin, raw.required_version.as_deref())?;
        let provided = root_variables(&raw.variable, variables)?;
        let settings = raw.settings.clone();
        let provider = raw.provider.clone();

        let mut flattener = Flattener::default();
        let outputs = flattener.flatten(&[], RawBody::from(raw), provided, base_dir)?;

        let registry = SchemaRegistry::builtin();
        for decl in flattener.declarations.iter() {
            registry.validate(decl)?;
        }

        tracing::debug!(
            origin,
            resources = flattener.declarations.len(),
            outputs = outputs.len(),
            "configuration loaded"
        );

        Ok(Self {
            path: PathBuf::from(origin),
            required_version,
            settings,
            provider,
            declarations: flattener.declarations,
            outputs,
        })
    }

    pub fn output(&self, name: &str) -> Option<&OutputDeclaration> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

fn check_version(origin: &str, required: Option<&str>) -> Result<Option<VersionReq>, ConfigError> {
    let Some(required) = required else {
        return Ok(None);
    };
    let req = VersionReq::parse(required).map_err(|e| ConfigError::Parse {
        origin: origin.to_string(),
        message: format!("required_version '{required}': {e}"),
    })?;
    let running = running_version();
    if !req.matches(&running) {
        return Err(ConfigError::VersionMismatch {
            required: required.to_string(),
            running: running.to_string(),
        });
    }
    Ok(Some(req))
}

fn running_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

fn root_variables(
    declared: &BTreeMap<String, RawVariable>,
    supplied: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, Expr>, ConfigError> {
    supplied
        .iter()
        .map(|(name, raw)| {
            let var = declared.get(name).ok_or_else(|| ConfigError::UnknownVariable {
                scope: "root".to_string(),
                name: name.clone(),
            })?;
            let value = var
                .ty
                .parse_cli_value(raw)
                .ok_or_else(|| ConfigError::TypeMismatch {
                    resource: "variable".to_string(),
                    attribute: name.clone(),
                    expected: var.ty.to_string(),
                    found: raw.clone(),
                })?;
            Ok((name.clone(), Expr::Literal(value)))
        })
        .collect()
}

/// Names bound in one module scope.
struct Scope {
    path: Vec<String>,
    variables: BTreeMap<String, Expr>,
    module_outputs: BTreeMap<String, BTreeMap<String, Expr>>,
}

impl Scope {
    fn name(&self) -> String {
        if self.path.is_empty() {
            "root".to_string()
        } else {
            self.prefix().trim_end_matches('.').to_string()
        }
    }

    fn prefix(&self) -> String {
        self.path.iter().map(|m| format!("module.{m}.")).collect()
    }

    fn resolve(&self, symbol: Symbol) -> Result<Expr, ConfigError> {
        match symbol {
            Symbol::Resource {
                kind,
                name,
                attribute,
            } => Ok(Expr::Reference(Reference::new(
                ResourceId::new(kind, name).in_module(&self.path),
                attribute,
            ))),
            Symbol::Variable(name) => {
                self.variables
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownVariable {
                        scope: self.name(),
                        name,
                    })
            }
            Symbol::ModuleOutput { module, output } => self
                .module_outputs
                .get(&module)
                .and_then(|outputs| outputs.get(&output))
                .cloned()
                .ok_or(ConfigError::UnknownModuleOutput { module, output }),
        }
    }
}

#[derive(Default)]
struct Flattener {
    declarations: DeclarationSet,
    /// Module files currently being expanded.
    sources: Vec<PathBuf>,
}

impl Flattener {
    fn flatten(
        &mut self,
        path: &[String],
        body: RawBody,
        mut provided: BTreeMap<String, Expr>,
        base_dir: &Path,
    ) -> Result<Vec<OutputDeclaration>, ConfigError> {
        let mut scope = Scope {
            path: path.to_vec(),
            variables: BTreeMap::new(),
            module_outputs: BTreeMap::new(),
        };

        for (name, var) in &body.variable {
            let value = match provided.remove(name) {
                Some(value) => value,
                None => default_value(&scope, name, var)?,
            };
            if let Expr::Literal(literal) = &value
                && !var.ty.accepts(literal)
            {
                return Err(ConfigError::TypeMismatch {
                    resource: format!("{}variable", scope.prefix()),
                    attribute: name.clone(),
                    expected: var.ty.to_string(),
                    found: literal.to_string(),
                });
            }
            scope.variables.insert(name.clone(), value);
        }
        if let Some(name) = provided.into_keys().next() {
            return Err(ConfigError::UnknownVariable {
                scope: scope.name(),
                name,
            });
        }

        self.flatten_modules(&mut scope, &body.module, base_dir)?;

        for (type_name, by_name) in &body.resource {
            let kind: ResourceKind = type_name.parse()?;
            let by_name = by_name.as_table().ok_or_else(|| ConfigError::Parse {
                origin: format!("{}resource.{type_name}", scope.prefix()),
                message: "expected a table of named resources".to_string(),
            })?;
            for (name, attributes) in by_name {
                let decl = resource_declaration(&scope, kind, name, attributes)?;
                let id = decl.id.to_string();
                self.declarations
                    .insert(decl)
                    .map_err(|_| ConfigError::DuplicateResource(id))?;
            }
        }

        body.output
            .into_iter()
            .map(|(name, raw)| {
                let location = format!("{}output.{name}", scope.prefix());
                let value = convert(&location, &raw.value, &|symbol| scope.resolve(symbol))?;
                Ok(OutputDeclaration {
                    name,
                    value,
                    description: raw.description,
                })
            })
            .collect()
    }

    /// Expands module blocks. A module whose inputs read another module's
    /// outputs waits until that module has been expanded.
    fn flatten_modules(
        &mut self,
        scope: &mut Scope,
        modules: &toml::Table,
        base_dir: &Path,
    ) -> Result<(), ConfigError> {
        let mut pending: Vec<(&String, &toml::Value)> = modules.iter().collect();

        while !pending.is_empty() {
            let ready = pending.iter().position(|(name, block)| {
                module_dependencies(block)
                    .iter()
                    .all(|dep| scope.module_outputs.contains_key(dep) || !modules.contains_key(dep) || dep == *name)
            });
            let Some(index) = ready else {
                let (name, _) = pending[0];
                return Err(ConfigError::InvalidExpression {
                    location: format!("{}module.{name}.inputs", scope.prefix()),
                    expression: pending
                        .iter()
                        .map(|(n, _)| format!("module.{n}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                    reason: "module inputs form a cycle".to_string(),
                });
            };

            let (name, block) = pending.remove(index);
            let outputs = self.flatten_module(scope, name, block, base_dir)?;
            scope.module_outputs.insert(name.clone(), outputs);
        }
        Ok(())
    }

    fn flatten_module(
        &mut self,
        scope: &Scope,
        name: &str,
        block: &toml::Value,
        base_dir: &Path,
    ) -> Result<BTreeMap<String, Expr>, ConfigError> {
        let origin = format!("{}module.{name}", scope.prefix());
        let module: RawModule = block.clone().try_into().map_err(|e: toml::de::Error| {
            ConfigError::Parse {
                origin: origin.clone(),
                message: e.to_string(),
            }
        })?;

        let mut inputs = BTreeMap::new();
        for (key, value) in &module.inputs {
            let location = format!("{origin}.inputs.{key}");
            let expr = convert(&location, value, &|symbol| scope.resolve(symbol))?;
            inputs.insert(key.clone(), expr);
        }

        let mut child_path = scope.path.clone();
        child_path.push(name.to_string());

        let outputs = match &module.source {
            Some(_) if module.has_inline_body() => {
                return Err(ConfigError::Parse {
                    origin,
                    message: "a module takes either `source` or an inline body, not both"
                        .to_string(),
                });
            }
            Some(source) => {
                let path = base_dir.join(source);
                let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
                if self.sources.contains(&canonical) {
                    return Err(ConfigError::RecursiveModule {
                        module: origin,
                        source_path: path,
                    });
                }

                let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let file: RawModuleFile =
                    toml::from_str(&content).map_err(|e| ConfigError::Parse {
                        origin: path.display().to_string(),
                        message: e.to_string(),
                    })?;
                check_version(&path.display().to_string(), file.required_version.as_deref())?;

                tracing::debug!(module = %origin, source = %path.display(), "expanding module");
                let child_base = path.parent().unwrap_or(base_dir).to_path_buf();
                self.sources.push(canonical);
                let result = self.flatten(&child_path, RawBody::from(file), inputs, &child_base);
                self.sources.pop();
                result?
            }
            None => {
                let body = RawBody {
                    variable: module.variable,
                    resource: module.resource,
                    module: module.module,
                    output: module.output,
                };
                self.flatten(&child_path, body, inputs, base_dir)?
            }
        };

        Ok(outputs.into_iter().map(|o| (o.name, o.value)).collect())
    }
}

fn default_value(scope: &Scope, name: &str, var: &RawVariable) -> Result<Expr, ConfigError> {
    let default = var.default.as_ref().ok_or_else(|| ConfigError::MissingVariable {
        scope: scope.name(),
        name: name.to_string(),
    })?;
    let location = format!("{}variable.{name}.default", scope.prefix());
    if let toml::Value::String(text) = default
        && parse_symbol(&location, text)?.is_some()
    {
        return Err(ConfigError::InvalidExpression {
            location,
            expression: text.clone(),
            reason: "defaults must be literal values".to_string(),
        });
    }
    Ok(Expr::Literal(toml_to_json(default)))
}

/// Modules named by `${module.<m>.<out>}` anywhere in a module block's inputs.
fn module_dependencies(block: &toml::Value) -> BTreeSet<String> {
    fn walk(value: &toml::Value, found: &mut BTreeSet<String>) {
        match value {
            toml::Value::String(text) => {
                if let Ok(Some(Symbol::ModuleOutput { module, .. })) = parse_symbol("", text) {
                    found.insert(module);
                }
            }
            toml::Value::Array(items) => items.iter().for_each(|v| walk(v, found)),
            toml::Value::Table(table) => table.values().for_each(|v| walk(v, found)),
            _ => {}
        }
    }

    let mut found = BTreeSet::new();
    if let Some(inputs) = block.get("inputs") {
        walk(inputs, &mut found);
    }
    found
}

fn resource_declaration(
    scope: &Scope,
    kind: ResourceKind,
    name: &str,
    attributes: &toml::Value,
) -> Result<ResourceDeclaration, ConfigError> {
    let id = ResourceId::new(kind, name).in_module(&scope.path);
    let attributes = attributes.as_table().ok_or_else(|| ConfigError::Parse {
        origin: id.to_string(),
        message: "expected a table of attributes".to_string(),
    })?;

    let mut decl = ResourceDeclaration::new(id.clone());
    for (key, value) in attributes {
        let location = format!("{id}.{key}");
        match key.as_str() {
            DEPENDS_ON => decl.depends_on = ordering_hints(scope, &location, value)?,
            PREVENT_DESTROY => {
                decl.prevent_destroy =
                    value.as_bool().ok_or_else(|| ConfigError::TypeMismatch {
                        resource: id.to_string(),
                        attribute: key.clone(),
                        expected: "bool".to_string(),
                        found: value.to_string(),
                    })?;
            }
            _ => {
                let expr = convert(&location, value, &|symbol| scope.resolve(symbol))?;
                decl.inputs.insert(key.clone(), expr);
            }
        }
    }
    Ok(decl)
}

/// `depends_on = ["<type>.<name>", ...]`, scoped to the current module.
fn ordering_hints(
    scope: &Scope,
    location: &str,
    value: &toml::Value,
) -> Result<Vec<ResourceId>, ConfigError> {
    let invalid = |expression: String, reason: &str| ConfigError::InvalidExpression {
        location: location.to_string(),
        expression,
        reason: reason.to_string(),
    };

    let items = value
        .as_array()
        .ok_or_else(|| invalid(value.to_string(), "expected a list of resource addresses"))?;

    items
        .iter()
        .map(|item| {
            let text = item
                .as_str()
                .ok_or_else(|| invalid(item.to_string(), "expected a string"))?;
            match text.parse::<ResourceId>() {
                Ok(id) if id.module_path.is_empty() => Ok(id.in_module(&scope.path)),
                Ok(_) => Err(invalid(
                    text.to_string(),
                    "ordering hints cannot cross module boundaries",
                )),
                Err(e) => Err(invalid(text.to_string(), &e.to_string())),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(content: &str) -> Result<Configuration, ConfigError> {
        parse_with(content, &BTreeMap::new())
    }

    fn parse_with(
        content: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<Configuration, ConfigError> {
        Configuration::parse("main.toml", content, Path::new("."), vars)
    }

    const THREE_TIER: &str = r#"
        required_version = ">= 0.1"

        [variable.region]
        type = "string"
        default = "europe-west1"

        [resource.network.vpc]
        name = "app-vpc"

        [resource.sql_instance.db]
        name = "app-db"
        database_version = "POSTGRES_15"
        region = "${var.region}"
        tier = "db-f1-micro"
        network = "${network.vpc.id}"

        [resource.cache_instance.cache]
        name = "app-cache"
        tier = "BASIC"
        memory_size_gb = 1
        region = "${var.region}"
        network = "${network.vpc.id}"
        eviction_policy = "allkeys-lru"

        [output.cache_host]
        value = "${cache_instance.cache.host}"
        description = "Cache endpoint"
    "#;

    #[test]
    fn test_parse_three_tier_document() {
        let config = parse(THREE_TIER).unwrap();
        assert_eq!(config.declarations.len(), 3);
        assert_eq!(config.provider, ProviderConfig::Local);

        let db = config
            .declarations
            .get(&"sql_instance.db".parse().unwrap())
            .unwrap();
        assert_eq!(db.inputs["region"], Expr::Literal(json!("europe-west1")));
        assert_eq!(
            db.inputs["network"],
            Expr::Reference(Reference::new("network.vpc".parse().unwrap(), "id"))
        );

        let order: Vec<String> = config
            .declarations
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(
            order,
            vec!["network.vpc", "sql_instance.db", "cache_instance.cache"]
        );
        assert_eq!(config.output("cache_host").unwrap().description.as_deref(), Some("Cache endpoint"));
    }

    #[test]
    fn test_cli_variable_overrides_default() {
        let vars = BTreeMap::from([("region".to_string(), "us-central1".to_string())]);
        let config = parse_with(THREE_TIER, &vars).unwrap();
        let cache = config
            .declarations
            .get(&"cache_instance.cache".parse().unwrap())
            .unwrap();
        assert_eq!(cache.inputs["region"], Expr::Literal(json!("us-central1")));
    }

    #[test]
    fn test_undeclared_cli_variable_is_rejected() {
        let vars = BTreeMap::from([("zone".to_string(), "b".to_string())]);
        let err = parse_with(THREE_TIER, &vars).unwrap_err();
        assert_eq!(err.to_string(), "root: undeclared variable 'zone'");
    }

    #[test]
    fn test_version_mismatch() {
        let err = parse("required_version = \">= 99.0\"").unwrap_err();
        assert!(matches!(err, ConfigError::VersionMismatch { .. }));
    }

    #[test]
    fn test_unknown_top_level_key_is_parse_error() {
        let err = parse("[resources.network.vpc]\nname = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unknown_resource_type() {
        let err = parse("[resource.bucket.assets]\nname = \"x\"").unwrap_err();
        assert_eq!(err.to_string(), "unknown resource type 'bucket'");
    }

    #[test]
    fn test_unknown_attribute_fails_fast() {
        let err = parse("[resource.network.vpc]\nname = \"x\"\nmtu = 1460").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_missing_variable_without_default() {
        let err = parse(
            r#"
            [variable.project]
            type = "string"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "root: no value for variable 'project' and no default");
    }

    #[test]
    fn test_meta_keys() {
        let config = parse(
            r#"
            [resource.network.vpc]
            name = "vpc"
            prevent_destroy = true

            [resource.service_peering.private]
            network = "${network.vpc.id}"
            service = "servicenetworking.googleapis.com"
            reserved_ranges = []

            [resource.sql_instance.db]
            name = "db"
            database_version = "POSTGRES_15"
            region = "europe-west1"
            tier = "db-f1-micro"
            network = "${network.vpc.id}"
            depends_on = ["service_peering.private"]
            "#,
        )
        .unwrap();

        let vpc = config.declarations.get(&"network.vpc".parse().unwrap()).unwrap();
        assert!(vpc.prevent_destroy);
        assert!(!vpc.inputs.contains_key(PREVENT_DESTROY));

        let db = config.declarations.get(&"sql_instance.db".parse().unwrap()).unwrap();
        assert_eq!(db.depends_on, vec!["service_peering.private".parse().unwrap()]);
    }

    #[test]
    fn test_inline_module_is_flattened_with_prefix() {
        let config = parse(
            r#"
            [resource.network.vpc]
            name = "vpc"

            [module.cache]
            inputs = { network = "${network.vpc.id}" }

            [module.cache.variable.network]
            type = "string"

            [module.cache.resource.cache_instance.main]
            name = "sessions"
            tier = "BASIC"
            memory_size_gb = 1
            region = "europe-west1"
            network = "${var.network}"

            [module.cache.output.host]
            value = "${cache_instance.main.host}"

            [resource.compute_service.api]
            name = "api"
            region = "europe-west1"
            image = "gcr.io/app/api:1"
            env = { CACHE_HOST = "${module.cache.host}", MODE = "prod" }
            "#,
        )
        .unwrap();

        let cache_id: ResourceId = "module.cache.cache_instance.main".parse().unwrap();
        let cache = config.declarations.get(&cache_id).unwrap();
        assert_eq!(
            cache.inputs["network"],
            Expr::Reference(Reference::new("network.vpc".parse().unwrap(), "id"))
        );

        let api = config
            .declarations
            .get(&"compute_service.api".parse().unwrap())
            .unwrap();
        let Expr::Map(env) = &api.inputs["env"] else {
            panic!("env should hold a reference");
        };
        assert_eq!(env["CACHE_HOST"], Expr::Reference(Reference::new(cache_id, "host")));
    }

    #[test]
    fn test_module_cannot_reach_parent_resources_implicitly() {
        let config = parse(
            r#"
            [resource.network.vpc]
            name = "vpc"

            [module.db.resource.sql_database.app]
            name = "app"
            instance = "${sql_instance.main.id}"
            "#,
        )
        .unwrap();
        let db: ResourceId = "module.db.sql_database.app".parse().unwrap();
        let decl = config.declarations.get(&db).unwrap();
        let refs = decl.references();
        assert_eq!(refs[0].1.target.to_string(), "module.db.sql_instance.main");
        assert!(!config.declarations.contains(&refs[0].1.target));
    }

    #[test]
    fn test_unknown_module_output() {
        let err = parse(
            r#"
            [module.net.resource.network.vpc]
            name = "vpc"

            [resource.subnetwork.app]
            name = "app"
            network = "${module.net.network_id}"
            region = "europe-west1"
            cidr = "10.0.0.0/24"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "module 'net' has no output 'network_id'");
    }

    #[test]
    fn test_sibling_module_inputs_are_ordered() {
        let config = parse(
            r#"
            [module.app]
            inputs = { network = "${module.net.id}" }
            variable.network = { type = "string" }
            resource.subnetwork.app = { name = "app", network = "${var.network}", region = "r", cidr = "10.0.0.0/24" }

            [module.net]
            resource.network.vpc = { name = "vpc" }
            output.id = { value = "${network.vpc.id}" }
            "#,
        )
        .unwrap();
        let sub = config
            .declarations
            .get(&"module.app.subnetwork.app".parse().unwrap())
            .unwrap();
        assert_eq!(sub.references()[0].1.target.to_string(), "module.net.network.vpc");
    }

    #[test]
    fn test_module_input_cycle() {
        let err = parse(
            r#"
            [module.a]
            inputs = { x = "${module.b.x}" }
            variable.x = { type = "string" }
            output.x = { value = "${var.x}" }

            [module.b]
            inputs = { x = "${module.a.x}" }
            variable.x = { type = "string" }
            output.x = { value = "${var.x}" }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("module inputs form a cycle"));
    }

    #[test]
    fn test_module_source_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("modules")).unwrap();
        std::fs::write(
            dir.path().join("modules/network.toml"),
            r#"
            [variable.name]
            type = "string"

            [resource.network.main]
            name = "${var.name}"

            [output.id]
            value = "${network.main.id}"
            "#,
        )
        .unwrap();
        let main = dir.path().join("main.toml");
        std::fs::write(
            &main,
            r#"
            [module.network]
            source = "modules/network.toml"
            inputs = { name = "prod-vpc" }

            [output.network_id]
            value = "${module.network.id}"
            "#,
        )
        .unwrap();

        let config = Configuration::load(&main, &BTreeMap::new()).unwrap();
        let id: ResourceId = "module.network.network.main".parse().unwrap();
        assert_eq!(
            config.declarations.get(&id).unwrap().inputs["name"],
            Expr::Literal(json!("prod-vpc"))
        );
        assert_eq!(
            config.output("network_id").unwrap().value,
            Expr::Reference(Reference::new(id, "id"))
        );
    }

    #[test]
    fn test_recursive_module_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("loop.toml"),
            "[module.again]\nsource = \"loop.toml\"\n",
        )
        .unwrap();
        let main = dir.path().join("main.toml");
        std::fs::write(&main, "[module.first]\nsource = \"loop.toml\"\n").unwrap();

        let err = Configuration::load(&main, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::RecursiveModule { .. }));
    }

    #[test]
    fn test_source_and_inline_body_conflict() {
        let err = parse(
            r#"
            [module.net]
            source = "net.toml"
            resource.network.vpc = { name = "vpc" }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("either `source` or an inline body"));
    }

    #[test]
    fn test_cross_module_ordering_hint_rejected() {
        let err = parse(
            r#"
            [resource.network.vpc]
            name = "vpc"
            depends_on = ["module.x.network.other"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot cross module boundaries"));
    }

    #[test]
    fn test_variable_type_is_checked() {
        let err = parse(
            r#"
            [variable.size]
            type = "integer"
            default = "large"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }
}
