use serde_json::Value;

use crate::{decode, ensure_success};
use crate::error::Result;
use crate::types::SaveStageRequest;

/// Client for the external persistence adapter.
///
/// Stage names and payloads are plain strings and JSON here; typing them is
/// the caller's concern.
pub struct PersistenceClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl PersistenceClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Persist one stage slice, replacing only that stage for the organization.
    /// Any 2xx counts as saved; the response body is not read.
    pub async fn save_stage_data(&self, org_name: &str, stage: &str, payload: &Value) -> Result<()> {
        let url = format!("{}/stages", self.base_url);
        let body = SaveStageRequest {
            org_name,
            stage,
            payload,
        };
        let resp = self.authed(self.client.post(&url).json(&body)).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    /// Fetch the stored profile. `Ok(None)` when the organization is unknown.
    pub async fn get_profile(&self, org_name: &str) -> Result<Option<Value>> {
        let url = format!("{}/profiles/{}", self.base_url, encode_segment(org_name));
        let resp = self.authed(self.client.get(&url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let profile: Value = decode(resp).await?;
        Ok(Some(profile).filter(|p| !p.is_null()))
    }

    /// Query stored stage records with adapter-side filters.
    pub async fn retrieve(&self, org_name: &str, filters: &Value) -> Result<Vec<Value>> {
        let url = format!(
            "{}/profiles/{}/retrieve",
            self.base_url,
            encode_segment(org_name)
        );
        let resp = self.authed(self.client.post(&url).json(filters)).send().await?;
        decode(resp).await
    }
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
