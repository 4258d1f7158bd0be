use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};

use super::HttpError;
use super::types::ApiResponse;
use crate::resource::AttributeMap;

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(token: String, base_url: String) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", token);
        let header_value = HeaderValue::from_str(&auth_value).map_err(|_| HttpError::Auth {
            message: "Invalid token format".to_string(),
        })?;
        headers.insert(AUTHORIZATION, header_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(HttpError::Network)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, kind: &str) -> String {
        format!("{}/resources/{}", self.base_url, kind)
    }

    fn resource_url(&self, kind: &str, id: &str) -> String {
        format!("{}/resources/{}/{}", self.base_url, kind, urlencoding::encode(id))
    }

    pub async fn create_resource(
        &self,
        kind: &str,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, HttpError> {
        let url = self.collection_url(kind);
        self.send(Method::POST, &url, Some(inputs), kind, "").await
    }

    pub async fn get_resource(&self, kind: &str, id: &str) -> Result<AttributeMap, HttpError> {
        let url = self.resource_url(kind, id);
        self.send(Method::GET, &url, None, kind, id).await
    }

    pub async fn update_resource(
        &self,
        kind: &str,
        id: &str,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, HttpError> {
        let url = self.resource_url(kind, id);
        self.send(Method::PUT, &url, Some(inputs), kind, id).await
    }

    pub async fn delete_resource(&self, kind: &str, id: &str) -> Result<(), HttpError> {
        let url = self.resource_url(kind, id);
        let response = self.client.delete(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = response.text().await?;
        let envelope = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body).ok();
        let message = envelope
            .as_ref()
            .and_then(|e| e.first_error())
            .unwrap_or("Unknown error")
            .to_string();

        if status == StatusCode::CONFLICT {
            return Err(HttpError::InUse {
                kind: kind.to_string(),
                id: id.to_string(),
                message,
            });
        }
        check_status(status, None, kind, id, &message)?;

        match envelope {
            Some(e) if !e.success => Err(HttpError::Api {
                status: status.as_u16(),
                message,
            }),
            _ => Ok(()),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&AttributeMap>,
        kind: &str,
        id: &str,
    ) -> Result<AttributeMap, HttpError> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response.text().await?;
        let envelope = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body);
        let message = envelope
            .as_ref()
            .ok()
            .and_then(|e| e.first_error())
            .unwrap_or("Unknown error")
            .to_string();

        check_status(status, retry_after, kind, id, &message)?;

        let envelope = envelope.map_err(|e| HttpError::Decode {
            message: format!("Failed to parse response: {}", e),
        })?;

        if !envelope.success {
            return Err(HttpError::Api {
                status: status.as_u16(),
                message,
            });
        }

        match envelope.result {
            Some(serde_json::Value::Object(result)) => Ok(result.into_iter().collect()),
            other => Err(HttpError::Decode {
                message: format!("expected an attribute object, got {:?}", other),
            }),
        }
    }
}

fn check_status(
    status: StatusCode,
    retry_after: Option<u64>,
    kind: &str,
    id: &str,
    message: &str,
) -> Result<(), HttpError> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::NOT_FOUND => HttpError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HttpError::Auth {
            message: message.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => HttpError::RateLimited {
            retry_after: retry_after.unwrap_or(0),
        },
        _ => HttpError::Api {
            status: status.as_u16(),
            message: message.to_string(),
        },
    })
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}
