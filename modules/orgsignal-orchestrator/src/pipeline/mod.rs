//! Stage pipeline coordinator.
//!
//! Drives `extraction → competitive → media → regulatory → trends →
//! synthesis` strictly in order. Each pre-synthesis stage loads the persisted
//! profile, calls the backend under a stage deadline, persists its slice and
//! is scored for opportunities. A failed stage becomes a
//! `StageResult { success: false }` and the run moves on. The caller always
//! gets a complete `IntelligenceReport`.

pub mod stages;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use orgsignal_common::{
    CanonicalIntelligence, Config, OpportunityCandidate, OrgSignalError, Organization, RawSignal,
    RetrieveFilter, StageId, StageRecord, StageResult, TabContent,
};

use crate::cache::{CacheStore, ANALYSIS_TTL, DEFAULT_CAPACITY, LOOKUP_TTL};
use crate::fanout::FanOutExecutor;
use crate::formatter;
use crate::opportunities::{consolidate, OpportunityDeriver};
use crate::synthesis::{self, Synthesizer};
use crate::traits::{AnalysisBackend, Clock, OpportunityScorer, ProfileStore, SystemClock};
use crate::util::fingerprint;

use self::stages::{Invocation, PriorSlices};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_COLLECTOR_TIMEOUT: Duration = Duration::from_secs(45);

/// Long-lived collaborators, built once per process.
#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub backend: Arc<dyn AnalysisBackend>,
    pub scorer: Arc<dyn OpportunityScorer>,
    pub store: Arc<dyn ProfileStore>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    pub clock: Arc<dyn Clock>,
    #[builder(default = DEFAULT_STAGE_TIMEOUT)]
    pub stage_timeout: Duration,
    #[builder(default = DEFAULT_COLLECTOR_TIMEOUT)]
    pub collector_timeout: Duration,
    #[builder(default = ANALYSIS_TTL)]
    pub analysis_ttl: Duration,
    #[builder(default = LOOKUP_TTL)]
    pub lookup_ttl: Duration,
    #[builder(default = DEFAULT_CAPACITY)]
    pub cache_capacity: usize,
}

impl PipelineDeps {
    /// Deps with timeouts and cache sizing taken from `Config`.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn AnalysisBackend>,
        scorer: Arc<dyn OpportunityScorer>,
        store: Arc<dyn ProfileStore>,
    ) -> Self {
        Self::builder()
            .backend(backend)
            .scorer(scorer)
            .store(store)
            .stage_timeout(config.stage_timeout)
            .collector_timeout(config.collector_timeout)
            .analysis_ttl(config.analysis_ttl)
            .lookup_ttl(config.lookup_ttl)
            .cache_capacity(config.cache_capacity)
            .build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub organization: Organization,
    pub raw_signals: Vec<RawSignal>,
}

impl PipelineRequest {
    pub fn new(organization: Organization) -> Self {
        Self {
            organization,
            raw_signals: Vec::new(),
        }
    }

    pub fn with_signals(mut self, raw_signals: Vec<RawSignal>) -> Self {
        self.raw_signals = raw_signals;
        self
    }
}

/// Everything produced by one run.
#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceReport {
    pub run_id: Uuid,
    /// Merged profile as of the end of the run.
    pub organization: Organization,
    /// One entry per stage, in execution order.
    pub stages: Vec<StageResult>,
    pub canonical: CanonicalIntelligence,
    pub tabs: TabContent,
    pub opportunities: Vec<OpportunityCandidate>,
    /// False when synthesis fell back to the static body.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl IntelligenceReport {
    pub fn stage(&self, stage: StageId) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_id == stage)
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            stages_succeeded: self.stages.iter().filter(|s| s.success).count(),
            failed_stages: self
                .stages
                .iter()
                .filter(|s| !s.success)
                .map(|s| s.stage_id)
                .collect(),
            entity_actions: self.canonical.entity_actions.len(),
            topic_trends: self.canonical.topic_trends.len(),
            raw_signals: self.canonical.raw_signals.len(),
            opportunities: self.opportunities.len(),
            synthesis_fallback: !self.success,
        }
    }
}

/// Summary of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub stages_succeeded: usize,
    pub failed_stages: Vec<StageId>,
    pub entity_actions: usize,
    pub topic_trends: usize,
    pub raw_signals: usize,
    pub opportunities: usize,
    pub synthesis_fallback: bool,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Intelligence Run Complete ===")?;
        writeln!(f, "Stages succeeded:   {}", self.stages_succeeded)?;
        writeln!(f, "Stages failed:      {}", self.failed_stages.len())?;
        for stage in &self.failed_stages {
            writeln!(f, "  - {stage}")?;
        }
        writeln!(f, "Entity actions:     {}", self.entity_actions)?;
        writeln!(f, "Topic trends:       {}", self.topic_trends)?;
        writeln!(f, "Raw signals:        {}", self.raw_signals)?;
        writeln!(f, "Opportunities:      {}", self.opportunities)?;
        if self.synthesis_fallback {
            writeln!(f, "\nSynthesis fell back to the static report body.")?;
        }
        Ok(())
    }
}

/// Result of running a single stage on demand.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub result: StageResult,
    /// Only set for a synthesis stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabs: Option<TabContent>,
    pub opportunities: Vec<OpportunityCandidate>,
}

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

/// Runs one pre-synthesis stage. Cloned into cache producers.
#[derive(Clone)]
struct StageExecutor {
    backend: Arc<dyn AnalysisBackend>,
    store: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    fanout: FanOutExecutor,
    stage_timeout: Duration,
}

impl StageExecutor {
    async fn execute(&self, stage: StageId, explicit: &Organization) -> Result<StageResult> {
        match tokio::time::timeout(self.stage_timeout, self.attempt(stage, explicit)).await {
            Ok(result) => result,
            Err(_) => Err(OrgSignalError::StageTimeout {
                stage,
                timeout_secs: self.stage_timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn attempt(&self, stage: StageId, explicit: &Organization) -> Result<StageResult> {
        let persisted = match self.store.get_profile(&explicit.name).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Profile load failed (non-fatal)");
                None
            }
        };
        let persisted_org = persisted.as_ref().map(|p| &p.organization);
        let org = Organization::merged(explicit, persisted_org, None);
        let calls = stages::calls_for(stage, &org, PriorSlices::new(persisted.as_ref()));

        let payloads = match stages::invocation(stage) {
            Invocation::Direct(method) => {
                let call = calls
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("No call configured for stage {stage}"))?;
                let payload = self
                    .backend
                    .call(method, &call.params)
                    .await
                    .map_err(|e| OrgSignalError::Backend(format!("{method}: {e:#}")))?;
                if payload.is_null() {
                    return Err(OrgSignalError::MalformedResponse(format!(
                        "{method} returned an empty payload"
                    ))
                    .into());
                }
                BTreeMap::from([(method.to_string(), payload)])
            }
            Invocation::FanOut(_) => {
                let result = self.fanout.execute(calls).await;
                if result.all_failed() {
                    return Err(OrgSignalError::AllCollectorsFailed { stage }.into());
                }
                info!(
                    stage = %stage,
                    succeeded = result.succeeded(),
                    failed = result.failed(),
                    "Collectors settled"
                );
                result.into_values()
            }
        };

        let slice = match stage {
            StageId::Extraction => stages::extraction_slice(explicit, persisted_org, &payloads),
            _ => stages::map_slice(stage, &payloads),
        };
        let data = Value::Object(slice);
        let tabs = stages::project_tabs(stage, &data);

        if let Err(e) = self.store.save_stage_data(&explicit.name, stage, &data).await {
            warn!(stage = %stage, error = %e, "Stage persistence failed (non-fatal)");
        }

        info!(stage = %stage, org = explicit.name.as_str(), "Stage complete");
        Ok(StageResult::succeeded(stage, data, tabs, self.clock.now()))
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    store: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    executor: StageExecutor,
    stage_cache: CacheStore<StageResult>,
    synthesizer: Synthesizer,
    opportunities: OpportunityDeriver,
}

impl Coordinator {
    pub fn new(deps: PipelineDeps) -> Self {
        let fanout = FanOutExecutor::new(deps.backend.clone(), deps.collector_timeout);
        Self {
            executor: StageExecutor {
                backend: deps.backend.clone(),
                store: deps.store.clone(),
                clock: deps.clock.clone(),
                fanout,
                stage_timeout: deps.stage_timeout,
            },
            stage_cache: CacheStore::new(deps.clock.clone(), deps.analysis_ttl, deps.cache_capacity),
            synthesizer: Synthesizer::new(deps.backend.clone(), deps.stage_timeout),
            opportunities: OpportunityDeriver::new(
                deps.scorer.clone(),
                deps.clock.clone(),
                deps.lookup_ttl,
                deps.cache_capacity,
            ),
            store: deps.store,
            clock: deps.clock,
        }
    }

    /// Run every stage and assemble the report. Never fails.
    pub async fn run(&self, request: PipelineRequest) -> IntelligenceReport {
        let run_id = Uuid::new_v4();
        let explicit = request.organization;
        info!(%run_id, org = explicit.name.as_str(), "Intelligence run starting");

        let mut stages = Vec::with_capacity(StageId::ALL.len());
        let mut batches = Vec::new();
        let mut current = Some(StageId::Extraction);

        while let Some(stage) = current {
            if stage.is_terminal() {
                break;
            }
            let result = self.stage_result(stage, &explicit).await;
            batches.push(self.opportunities.for_stage(&explicit, &result).await);
            stages.push(result);
            current = stage.next();
        }

        let organization = profile_from(&stages, &explicit);
        let canonical = synthesis::reconcile(&stages, &request.raw_signals);
        let outcome = self
            .synthesizer
            .synthesize(&organization, &canonical, &stages)
            .await;
        let tabs = formatter::format_value(&outcome.body);

        batches.push(
            self.opportunities
                .comprehensive(&organization, &stages, &outcome.body)
                .await,
        );
        stages.push(self.synthesis_result(&explicit, &outcome, &tabs).await);

        let report = IntelligenceReport {
            run_id,
            organization,
            stages,
            canonical,
            tabs,
            opportunities: consolidate(batches),
            success: outcome.success,
            error: outcome.error,
            generated_at: self.clock.now(),
        };
        info!(%run_id, "{}", report.stats());
        report
    }

    /// Run one stage on its own. Synthesis reads the other stages from the
    /// persisted profile instead of running them.
    pub async fn run_stage(&self, stage: StageId, org: &Organization) -> StageOutcome {
        if !stage.is_terminal() {
            let result = self.stage_result(stage, org).await;
            let opportunities = consolidate([self.opportunities.for_stage(org, &result).await]);
            return StageOutcome {
                result,
                tabs: None,
                opportunities,
            };
        }

        let stages = self.persisted_stages(org).await;
        let organization = profile_from(&stages, org);
        let canonical = synthesis::reconcile(&stages, &[]);
        let outcome = self
            .synthesizer
            .synthesize(&organization, &canonical, &stages)
            .await;
        let tabs = formatter::format_value(&outcome.body);
        let opportunities = consolidate([self
            .opportunities
            .comprehensive(&organization, &stages, &outcome.body)
            .await]);

        StageOutcome {
            result: self.synthesis_result(org, &outcome, &tabs).await,
            tabs: Some(tabs),
            opportunities,
        }
    }

    /// Stored stage records for an organization, newest first.
    pub async fn history(&self, org_name: &str, filter: &RetrieveFilter) -> Result<Vec<StageRecord>> {
        self.store.retrieve(org_name, filter).await
    }

    /// Drop every cached stage result and opportunity list.
    pub fn clear_cache(&self) {
        self.stage_cache.clear();
        self.opportunities.clear();
        info!("Caches cleared");
    }

    pub fn cached_stages(&self) -> usize {
        self.stage_cache.len()
    }

    /// Cached or deduplicated stage run. Errors become a failed result and
    /// are never cached.
    async fn stage_result(&self, stage: StageId, org: &Organization) -> StageResult {
        let key = format!("{}:{}:{}", org.key(), stage, fingerprint(&json!(org)));
        let executor = self.executor.clone();
        let explicit = org.clone();

        let produced = self
            .stage_cache
            .acquire_or_join(&key, move || async move { executor.execute(stage, &explicit).await })
            .await;

        match produced {
            Ok(result) => result,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Stage failed (non-fatal)");
                StageResult::failed(stage, e, self.clock.now())
            }
        }
    }

    async fn synthesis_result(
        &self,
        org: &Organization,
        outcome: &synthesis::SynthesisOutcome,
        tabs: &TabContent,
    ) -> StageResult {
        let now = self.clock.now();
        if !outcome.success {
            let error = outcome.error.as_deref().unwrap_or("synthesis failed");
            return StageResult::failed(StageId::Synthesis, error, now);
        }

        if let Err(e) = self
            .store
            .save_stage_data(&org.name, StageId::Synthesis, &outcome.body)
            .await
        {
            warn!(stage = %StageId::Synthesis, error = %e, "Stage persistence failed (non-fatal)");
        }

        let tab_map = match serde_json::to_value(tabs) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        StageResult::succeeded(StageId::Synthesis, outcome.body.clone(), tab_map, now)
    }

    async fn persisted_stages(&self, org: &Organization) -> Vec<StageResult> {
        let profile = match self.store.get_profile(&org.name).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Profile load failed (non-fatal)");
                None
            }
        };
        let Some(profile) = profile else {
            return Vec::new();
        };
        StageId::PRE_SYNTHESIS
            .into_iter()
            .filter_map(|stage| {
                let record = profile.stages.get(&stage)?;
                let tabs = stages::project_tabs(stage, &record.payload);
                Some(StageResult::succeeded(
                    stage,
                    record.payload.clone(),
                    tabs,
                    record.saved_at,
                ))
            })
            .collect()
    }
}

/// The merged profile from the extraction slice, or the caller's own.
fn profile_from(stages: &[StageResult], explicit: &Organization) -> Organization {
    stages
        .iter()
        .find(|s| s.stage_id == StageId::Extraction && s.success)
        .and_then(|s| s.field("profile"))
        .and_then(|p| serde_json::from_value::<Organization>(p.clone()).ok())
        .unwrap_or_else(|| explicit.clone())
}
