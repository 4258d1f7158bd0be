use serde::Deserialize;

/// Envelope around every API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiError>,
    pub result: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.message.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[allow(dead_code)] // NOTE: Kept for debug logging
    pub code: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_errors() {
        let body = r#"{"success": false, "errors": [{"code": 1003, "message": "quota exceeded"}], "result": null}"#;
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert!(!response.success);
        assert_eq!(response.first_error(), Some("quota exceeded"));
        assert!(response.result.is_none());
    }

    #[test]
    fn test_errors_default_to_empty() {
        let body = r#"{"success": true, "result": {"id": "net-1"}}"#;
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert!(response.errors.is_empty());
        assert_eq!(response.first_error(), None);
    }
}
