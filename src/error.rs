use std::path::PathBuf;

use thiserror::Error;

use crate::resource::ResourceId;

/// Errors detected before any provider call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("configuration requires tierform {required}, but this is {running}")]
    VersionMismatch { required: String, running: String },

    #[error(transparent)]
    Schema(#[from] crate::schema::SchemaError),

    #[error("{resource}: unknown attribute '{attribute}'")]
    UnknownAttribute { resource: String, attribute: String },

    #[error("{resource}: missing required attribute '{attribute}'")]
    MissingAttribute { resource: String, attribute: String },

    #[error("{resource}.{attribute}: expected {expected}, found {found}")]
    TypeMismatch {
        resource: String,
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("{location}: invalid expression '{expression}': {reason}")]
    InvalidExpression {
        location: String,
        expression: String,
        reason: String,
    },

    #[error("{from}.{path}: unresolved reference to {target}")]
    UnresolvedReference {
        from: String,
        path: String,
        target: String,
    },

    #[error("cyclic dependency: {}", render_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceId> },

    #[error("duplicate declaration of {0}")]
    DuplicateResource(String),

    #[error("{scope}: no value for variable '{name}' and no default")]
    MissingVariable { scope: String, name: String },

    #[error("{scope}: undeclared variable '{name}'")]
    UnknownVariable { scope: String, name: String },

    #[error("module '{module}' has no output '{output}'")]
    UnknownModuleOutput { module: String, output: String },

    #[error("no output named '{0}'")]
    UnknownOutput(String),

    #[error("module '{module}' includes {} recursively", .source_path.display())]
    RecursiveModule { module: String, source_path: PathBuf },

    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error(
        "{binding}: member is the service account of {service} itself; bind the calling service's identity instead"
    )]
    SelfInvokerBinding { binding: String, service: String },

    #[error("{resource} has prevent_destroy set, but the plan would {action} it")]
    PreventDestroy { resource: String, action: String },
}

fn render_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Error)]
pub enum TierformError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] crate::state::StateError),

    #[error(transparent)]
    Provider(#[from] crate::providers::ProviderError),

    #[error(transparent)]
    Executor(#[from] crate::executor::ExecutorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
