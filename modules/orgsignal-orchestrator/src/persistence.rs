//! In-process `ProfileStore`, used when no persistence service is configured.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use orgsignal_common::{Organization, RetrieveFilter, StageId, StageRecord, StoredProfile};

use crate::traits::{Clock, ProfileStore};

/// Profiles keyed by `Organization::key()`. Each stage keeps only its latest
/// slice; writing one stage never touches another.
pub struct MemoryProfileStore {
    clock: Arc<dyn Clock>,
    profiles: RwLock<HashMap<String, StoredProfile>>,
}

impl MemoryProfileStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.read().expect("profile lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn profile_key(org_name: &str) -> String {
    Organization::new(org_name).key()
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn save_stage_data(&self, org_name: &str, stage: StageId, payload: &Value) -> Result<()> {
        let now = self.clock.now();
        let mut profiles = self.profiles.write().expect("profile lock poisoned");
        let profile = profiles
            .entry(profile_key(org_name))
            .or_insert_with(|| StoredProfile::new(Organization::new(org_name.trim()), now));

        // The extraction slice carries the merged organization; fold it into
        // the stored one so later runs start from it.
        if stage == StageId::Extraction {
            if let Some(incoming) = payload
                .get("profile")
                .and_then(|p| serde_json::from_value::<Organization>(p.clone()).ok())
            {
                profile.organization =
                    Organization::merged(&incoming, Some(&profile.organization), None);
            }
        }

        profile.stages.insert(
            stage,
            StageRecord {
                stage,
                payload: payload.clone(),
                saved_at: now,
            },
        );
        profile.updated_at = now;
        debug!(org = org_name, stage = %stage, "Stage slice saved");
        Ok(())
    }

    async fn get_profile(&self, org_name: &str) -> Result<Option<StoredProfile>> {
        let profiles = self.profiles.read().expect("profile lock poisoned");
        Ok(profiles.get(&profile_key(org_name)).cloned())
    }

    async fn retrieve(&self, org_name: &str, filters: &RetrieveFilter) -> Result<Vec<StageRecord>> {
        let profiles = self.profiles.read().expect("profile lock poisoned");
        let Some(profile) = profiles.get(&profile_key(org_name)) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<StageRecord> = profile
            .stages
            .values()
            .filter(|r| filters.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        if let Some(limit) = filters.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
