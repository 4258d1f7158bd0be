pub mod http;
pub mod local;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::resource::AttributeMap;
use crate::schema::ResourceKind;

/// Output attribute every provider returns on create.
pub const ID_OUTPUT: &str = "id";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("authentication error: {0}")]
    Auth(String),
    /// Rate limiting or a temporary network failure; safe to retry.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// Invalid input, quota, permission; never retried.
    #[error("provider rejected the request: {0}")]
    Permanent(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(
        "dependency violation: {0}; detach or delete whatever still uses it (it may have been created outside tierform), then re-run"
    )]
    DependencyViolation(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Create/read/update/delete contract for one cloud.
///
/// Every call is idempotent only with respect to transient errors: the
/// executor retries `Transient` failures and nothing else.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the outputs, which always include [`ID_OUTPUT`].
    async fn create(
        &self,
        kind: ResourceKind,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError>;

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<AttributeMap, ProviderError>;

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError>;

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError>;
}

/// Extracts the provider id from a create/update response.
pub fn provider_id(outputs: &AttributeMap) -> Result<String, ProviderError> {
    outputs
        .get(ID_OUTPUT)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Permanent("response carries no 'id' output".to_string()))
}

/// Builds a provider config from a `--provider` override.
pub fn provider_config(name: &str, endpoint: Option<String>) -> Result<ProviderConfig, ProviderError> {
    match (name, endpoint) {
        ("local", _) => Ok(ProviderConfig::Local),
        ("http", Some(endpoint)) => Ok(ProviderConfig::Http { endpoint }),
        ("http", None) => Err(ProviderError::Permanent(
            "the http provider needs an endpoint; set [provider] endpoint or use --endpoint"
                .to_string(),
        )),
        (other, _) => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

/// `data_dir` is the workspace state directory; the local provider keeps its
/// simulated cloud there.
pub fn get_provider(
    config: &ProviderConfig,
    token: Option<String>,
    data_dir: &Path,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::Local => Ok(Arc::new(local::LocalProvider::open(
            data_dir.join(local::CLOUD_FILE),
        )?)),
        ProviderConfig::Http { endpoint } => {
            let token = token.ok_or_else(|| {
                ProviderError::Auth(
                    "No API token provided. Set TIERFORM_PROVIDER_TOKEN or use --token flag"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(http::HttpProvider::new(token, endpoint.clone())?))
        }
    }
}
