//! Synthesis reconciler.
//!
//! Merges whatever stage results are available (failed stages contribute
//! nothing) plus caller-supplied raw signals into one canonical
//! representation, then asks the backend for a narrative synthesis over it.
//! A failed synthesis call is replaced by a static fallback body.

pub mod fallback;
pub mod mapping;
pub mod trends;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use orgsignal_common::{CanonicalIntelligence, Organization, RawSignal, StageResult};

use crate::pipeline::stages::SYNTHESIS_METHOD;
use crate::traits::AnalysisBackend;

use self::mapping::{ACTION_MAPPINGS, SIGNAL_MAPPINGS};

/// Flatten stage outputs into the canonical representation.
pub fn reconcile(stages: &[StageResult], raw_signals: &[RawSignal]) -> CanonicalIntelligence {
    let succeeded: Vec<&StageResult> = stages.iter().filter(|s| s.success).collect();

    let entity_actions = ACTION_MAPPINGS
        .iter()
        .flat_map(|mapping| {
            succeeded
                .iter()
                .filter(|s| s.stage_id == mapping.stage)
                .flat_map(|s| mapping.apply(s))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut signals = raw_signals.to_vec();
    for mapping in SIGNAL_MAPPINGS {
        for stage in succeeded.iter().filter(|s| s.stage_id == mapping.stage) {
            signals.extend(mapping.apply(stage));
        }
    }

    let topic_trends = trends::topic_trends(stages, &signals);

    CanonicalIntelligence {
        entity_actions,
        topic_trends,
        raw_signals: signals,
    }
}

/// Result of the synthesis call. `body` is always usable.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub body: Value,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Synthesizer {
    backend: Arc<dyn AnalysisBackend>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn AnalysisBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// One synthesis call over the canonical representation. Never fails:
    /// any error yields the fallback body with `success = false`.
    pub async fn synthesize(
        &self,
        org: &Organization,
        canonical: &CanonicalIntelligence,
        stages: &[StageResult],
    ) -> SynthesisOutcome {
        let stage_data: Map<String, Value> = stages
            .iter()
            .filter(|s| s.success)
            .map(|s| (s.stage_id.as_str().to_string(), s.data.clone()))
            .collect();
        let params = json!({
            "organization": org,
            "canonical": canonical,
            "stages": stage_data,
        });

        let outcome = match tokio::time::timeout(self.timeout, self.backend.call(SYNTHESIS_METHOD, &params)).await {
            Ok(Ok(body)) if !body.is_null() => Ok(body),
            Ok(Ok(_)) => Err("synthesis returned an empty payload".to_string()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!("synthesis timed out after {}s", self.timeout.as_secs())),
        };

        match outcome {
            Ok(body) => {
                info!(
                    org = org.name.as_str(),
                    entity_actions = canonical.entity_actions.len(),
                    topic_trends = canonical.topic_trends.len(),
                    "Synthesis complete"
                );
                SynthesisOutcome {
                    body,
                    success: true,
                    error: None,
                }
            }
            Err(error) => {
                warn!(org = org.name.as_str(), error = error.as_str(), "Synthesis failed, using fallback");
                SynthesisOutcome {
                    body: fallback::fallback_synthesis(org),
                    success: false,
                    error: Some(error),
                }
            }
        }
    }
}
