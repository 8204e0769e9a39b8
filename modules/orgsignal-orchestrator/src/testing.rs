// Test mocks for the orchestrator.
//
// Three mocks matching the trait boundaries, plus a controllable clock:
// - MockBackend (AnalysisBackend): method → canned payload, forced failures, delays
// - MockScorer (OpportunityScorer): stage/mode → canned opportunity items
// - MemoryProfileStore (ProfileStore) is the real in-memory store, reused as-is
// - ManualClock (Clock): time only moves when the test says so
//
// Plus fixtures for the "Acme" robotics organization.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use backend_client::OpportunityRequest;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use orgsignal_common::{Organization, StageId};

use crate::persistence::MemoryProfileStore;
use crate::pipeline::PipelineDeps;
use crate::traits::{AnalysisBackend, Clock, OpportunityScorer};

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts at 2026-03-02T09:00:00Z.
    pub fn new() -> Self {
        Self::at(
            DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
                .expect("valid fixture timestamp")
                .with_timezone(&Utc),
        )
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        *self.now.lock().expect("clock lock poisoned") += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// Method-keyed analysis backend. Unregistered methods return `Err`.
/// Builder pattern: `.on()`, `.failing()`, `.delayed()`.
pub struct MockBackend {
    responses: HashMap<String, Value>,
    failures: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            failures: HashSet::new(),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, method: &str, payload: Value) -> Self {
        self.responses.insert(method.to_string(), payload);
        self
    }

    pub fn failing(mut self, method: &str) -> Self {
        self.failures.insert(method.to_string());
        self
    }

    pub fn delayed(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("mock lock poisoned").len()
    }

    /// Params of the most recent call to `method`.
    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisBackend for MockBackend {
    async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push((method.to_string(), params.clone()));

        if let Some(delay) = self.delays.get(method) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(method) {
            bail!("MockBackend: forced failure for {method}");
        }
        self.responses
            .get(method)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("MockBackend: no response registered for {method}"))
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

pub struct MockScorer {
    by_stage: HashMap<String, Vec<Value>>,
    comprehensive: Vec<Value>,
    failing: bool,
    requests: Mutex<Vec<OpportunityRequest>>,
}

impl MockScorer {
    pub fn new() -> Self {
        Self {
            by_stage: HashMap::new(),
            comprehensive: Vec::new(),
            failing: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on_stage(mut self, stage: StageId, items: Vec<Value>) -> Self {
        self.by_stage.insert(stage.as_str().to_string(), items);
        self
    }

    pub fn on_comprehensive(mut self, items: Vec<Value>) -> Self {
        self.comprehensive = items;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("mock lock poisoned").len()
    }

    pub fn modes(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .map(|r| r.mode.clone())
            .collect()
    }
}

impl Default for MockScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpportunityScorer for MockScorer {
    async fn score(&self, request: &OpportunityRequest) -> Result<Vec<Value>> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .push(request.clone());

        if self.failing {
            bail!("MockScorer: forced failure");
        }
        if request.mode == "comprehensive" {
            return Ok(self.comprehensive.clone());
        }
        Ok(request
            .stage
            .as_ref()
            .and_then(|s| self.by_stage.get(s))
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn acme() -> Organization {
    Organization::new("Acme").with_industry("robotics")
}

/// Payloads for every method the pipeline calls for Acme.
pub fn acme_backend() -> MockBackend {
    MockBackend::new()
        .on(
            "organization_discovery",
            json!({
                "industry": "industrial automation",
                "competitors": ["Globex", "Initech"],
                "regulators": ["OSHA", "EU Commission"],
                "media_outlets": ["TechCrunch", "Reuters"],
                "investors": ["Sequoia"],
                "analysts": ["Gartner"],
                "activists": [],
                "keywords": ["cobots", "warehouse automation"],
                "summary": "Acme builds collaborative robots for warehouses."
            }),
        )
        .on(
            "competitor_intelligence",
            json!({
                "actions": [
                    {
                        "competitor": "Globex",
                        "action": "Launched a sub-$20k cobot line",
                        "impact": "high",
                        "relevance": 0.9,
                        "published_at": "2026-02-20T00:00:00Z"
                    },
                    {"competitor": "Initech", "action": "Opened an EU distribution hub"}
                ],
                "threats": ["Price pressure in entry-level cobots"]
            }),
        )
        .on(
            "market_position",
            json!({
                "position": "Challenger in collaborative robotics",
                "strengths": ["Safety record"],
                "weaknesses": ["Limited EU presence"]
            }),
        )
        .on(
            "media_monitor",
            json!({
                "coverage": [{
                    "outlet": "TechCrunch",
                    "headline": "Acme raises funding for automation push",
                    "summary": "Series C to expand warehouse automation.",
                    "sentiment": "positive",
                    "url": "https://techcrunch.example/acme"
                }],
                "sentiment": "positive",
                "themes": ["automation", "funding"]
            }),
        )
        .on(
            "regulatory_tracker",
            json!({
                "developments": [{
                    "regulator": "EU Commission",
                    "development": "Machinery Regulation compliance deadline",
                    "impact": "high",
                    "deadline": "2027-01-20"
                }],
                "compliance_risks": ["CE marking for AI-driven safety functions"]
            }),
        )
        .on(
            "legal_filings",
            json!({
                "filings": [{"court": "D. Del.", "title": "Patent suit filed by Globex", "status": "open"}]
            }),
        )
        .on(
            "trend_analyzer",
            json!({
                "trends": [{"topic": "automation", "direction": "rising", "mentions": 12, "sources": ["Reuters"]}]
            }),
        )
        .on(
            "social_signals",
            json!({
                "signals": [{
                    "source": "linkedin",
                    "title": "Cobot adoption",
                    "text": "Automation budgets keep growing in logistics.",
                    "url": "https://linkedin.example/post/1"
                }]
            }),
        )
        .on(
            "synthesize_intelligence",
            json!({
                "synthesis": {
                    "executive_summary": {
                        "headline": "Acme is gaining ground as price pressure builds",
                        "overview": "Funding and media momentum offset competitor price cuts.",
                        "key_findings": ["Globex undercuts on price", "EU deadline approaching"],
                        "immediate_actions": "Prepare CE marking evidence",
                        "risk_level": "elevated"
                    },
                    "competitive": {
                        "summary": "Two competitors moved this month.",
                        "competitor_actions": [{"competitor": "Globex", "action": "Price cut"}]
                    },
                    "media": {"summary": "Coverage is positive.", "sentiment": "positive"},
                    "regulatory": {"developments": ["Machinery Regulation deadline"]},
                    "market_trends": {"trending_topics": ["automation"]},
                    "forward_looking": {"predictions": ["Consolidation in entry-level cobots"]}
                }
            }),
        )
}

pub fn memory_store(clock: Arc<ManualClock>) -> Arc<MemoryProfileStore> {
    Arc::new(MemoryProfileStore::new(clock))
}

/// Pipeline deps wired to mocks, an in-memory store and a manual clock.
pub fn test_deps(
    backend: Arc<MockBackend>,
    scorer: Arc<MockScorer>,
    clock: Arc<ManualClock>,
) -> PipelineDeps {
    PipelineDeps::builder()
        .backend(backend)
        .scorer(scorer)
        .store(memory_store(clock.clone()))
        .clock(clock)
        .stage_timeout(Duration::from_secs(30))
        .collector_timeout(Duration::from_secs(10))
        .build()
}
