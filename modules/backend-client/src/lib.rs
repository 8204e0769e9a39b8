pub mod error;
pub mod opportunity;
pub mod persistence;
pub mod types;

pub use error::{BackendError, Result};
pub use opportunity::OpportunityClient;
pub use persistence::PersistenceClient;
pub use types::{AnalysisRequest, AnalysisResponse, OpportunityRequest, OpportunityResponse};

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Client for the analysis backend: a single `POST /analyze` endpoint taking
/// `{method, params}` and answering `{success, data | analysis}`.
pub struct AnalysisClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl AnalysisClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    /// Invoke one backend method. Non-2xx statuses and `success: false`
    /// envelopes are both returned as errors.
    pub async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        let url = format!("{}/analyze", self.base_url);
        tracing::debug!(method, "Analysis backend request");

        let mut request = self
            .client
            .post(&url)
            .json(&AnalysisRequest { method, params });
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let envelope: AnalysisResponse = decode(resp).await?;
        envelope.into_payload()
    }
}

/// Turn a non-2xx response into `Api`, keeping the body as the message.
pub(crate) async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Check the status and decode a JSON body. Decoding goes through the body
/// text so malformed payloads surface as `Decode`, not `Network`.
pub(crate) async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let body = ensure_success(resp).await?.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = AnalysisClient::new("https://backend.example.com/", None);
        assert_eq!(client.base_url, "https://backend.example.com");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let client = AnalysisClient::new("http://127.0.0.1:1", None);
        let err = client
            .call("organization_discovery", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }
}
