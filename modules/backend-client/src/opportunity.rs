use serde_json::Value;

use crate::error::Result;
use crate::types::{OpportunityRequest, OpportunityResponse};
use crate::decode;

/// Client for the opportunity scoring service (`POST /opportunities`).
pub struct OpportunityClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl OpportunityClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    /// Score opportunities for one stage or for a whole synthesis.
    pub async fn score(&self, request: &OpportunityRequest) -> Result<Vec<Value>> {
        let url = format!("{}/opportunities", self.base_url);
        tracing::debug!(mode = request.mode.as_str(), "Opportunity scoring request");

        let mut builder = self.client.post(&url).json(request);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let resp: OpportunityResponse = decode(builder.send().await?).await?;
        resp.into_opportunities()
    }
}
