// Trait abstractions for the orchestrator's external collaborators.
//
// AnalysisBackend: the `{method, params}` analysis/collector endpoint.
// OpportunityScorer: the opportunity scoring service.
// ProfileStore: the persistence adapter (profiles + stage slices).
// Clock: wall-clock source for cache expiry and timestamps.
//
// Production impls wrap the `backend-client` HTTP clients. Tests use the
// mocks in `crate::testing`: no network, deterministic time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use backend_client::{AnalysisClient, OpportunityClient, OpportunityRequest, PersistenceClient};
use chrono::{DateTime, Utc};
use serde_json::Value;

use orgsignal_common::{OrgSignalError, RetrieveFilter, StageId, StageRecord, StoredProfile};

// ---------------------------------------------------------------------------
// AnalysisBackend
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Invoke one named method. Any non-success response is an `Err`.
    async fn call(&self, method: &str, params: &Value) -> Result<Value>;
}

#[async_trait]
impl AnalysisBackend for AnalysisClient {
    async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        Ok(AnalysisClient::call(self, method, params).await?)
    }
}

// ---------------------------------------------------------------------------
// OpportunityScorer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OpportunityScorer: Send + Sync {
    /// Return raw opportunity items as the service produced them.
    async fn score(&self, request: &OpportunityRequest) -> Result<Vec<Value>>;
}

#[async_trait]
impl OpportunityScorer for OpportunityClient {
    async fn score(&self, request: &OpportunityRequest) -> Result<Vec<Value>> {
        Ok(OpportunityClient::score(self, request).await?)
    }
}

// ---------------------------------------------------------------------------
// ProfileStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Persist one stage slice, overwriting only that stage.
    async fn save_stage_data(&self, org_name: &str, stage: StageId, payload: &Value) -> Result<()>;

    /// Load the stored profile, if the organization has been seen before.
    async fn get_profile(&self, org_name: &str) -> Result<Option<StoredProfile>>;

    /// Query stored stage records, newest first.
    async fn retrieve(&self, org_name: &str, filters: &RetrieveFilter) -> Result<Vec<StageRecord>>;
}

#[async_trait]
impl ProfileStore for PersistenceClient {
    async fn save_stage_data(&self, org_name: &str, stage: StageId, payload: &Value) -> Result<()> {
        PersistenceClient::save_stage_data(self, org_name, stage.as_str(), payload)
            .await
            .map_err(|e| persistence_error("save", e))
    }

    async fn get_profile(&self, org_name: &str) -> Result<Option<StoredProfile>> {
        let stored = PersistenceClient::get_profile(self, org_name)
            .await
            .map_err(|e| persistence_error("get_profile", e))?;
        match stored {
            Some(raw) => Ok(Some(
                serde_json::from_value(raw).context("Malformed stored profile")?,
            )),
            None => Ok(None),
        }
    }

    async fn retrieve(&self, org_name: &str, filters: &RetrieveFilter) -> Result<Vec<StageRecord>> {
        let filters = serde_json::to_value(filters)?;
        PersistenceClient::retrieve(self, org_name, &filters)
            .await
            .map_err(|e| persistence_error("retrieve", e))?
            .into_iter()
            .map(|raw| serde_json::from_value(raw).context("Malformed stage record"))
            .collect()
    }
}

fn persistence_error(operation: &str, err: backend_client::BackendError) -> anyhow::Error {
    OrgSignalError::Persistence(format!("{operation}: {err}")).into()
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_adapter_is_a_persistence_error() {
        let client = PersistenceClient::new("http://127.0.0.1:1", None);
        let err = ProfileStore::get_profile(&client, "Acme").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrgSignalError>(),
            Some(OrgSignalError::Persistence(_))
        ));
    }
}
