//! REST provider: `POST /resources/<kind>`, `GET|PUT|DELETE /resources/<kind>/<id>`.

mod client;
mod error;
mod types;

pub use client::HttpClient;
pub use error::HttpError;
pub use types::{ApiError, ApiResponse};

use async_trait::async_trait;

use super::{Provider, ProviderError};
use crate::resource::AttributeMap;
use crate::schema::ResourceKind;

#[derive(Debug)]
pub struct HttpProvider {
    client: HttpClient,
}

impl HttpProvider {
    pub fn new(token: String, endpoint: String) -> Result<Self, ProviderError> {
        let client = HttpClient::new(token, endpoint)?;
        tracing::debug!(endpoint = client.api_base(), "http provider configured");
        Ok(Self { client })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn create(
        &self,
        kind: ResourceKind,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError> {
        Ok(self.client.create_resource(kind.as_str(), inputs).await?)
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<AttributeMap, ProviderError> {
        Ok(self.client.get_resource(kind.as_str(), id).await?)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError> {
        Ok(self.client.update_resource(kind.as_str(), id, inputs).await?)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        Ok(self.client.delete_resource(kind.as_str(), id).await?)
    }
}
