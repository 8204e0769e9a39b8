//! Opportunity deriver.
//!
//! Asks the scoring service for action candidates, either per stage or once
//! over the whole run, and normalizes what comes back. Scoring is optional:
//! any failure yields an empty list and is only logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backend_client::OpportunityRequest;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use orgsignal_common::{OpportunityCandidate, Organization, StageId, StageResult, Urgency};

use crate::cache::CacheStore;
use crate::traits::{Clock, OpportunityScorer};
use crate::util::{fingerprint, number_of, text_of};

// --- Default confidence per origin stage ---

pub const EXTRACTION_CONFIDENCE: u8 = 60;
pub const COMPETITIVE_CONFIDENCE: u8 = 70;
pub const MEDIA_CONFIDENCE: u8 = 70;
pub const REGULATORY_CONFIDENCE: u8 = 75;
pub const TRENDS_CONFIDENCE: u8 = 65;
pub const SYNTHESIS_CONFIDENCE: u8 = 80;

pub fn default_confidence(stage: StageId) -> u8 {
    match stage {
        StageId::Extraction => EXTRACTION_CONFIDENCE,
        StageId::Competitive => COMPETITIVE_CONFIDENCE,
        StageId::Media => MEDIA_CONFIDENCE,
        StageId::Regulatory => REGULATORY_CONFIDENCE,
        StageId::Trends => TRENDS_CONFIDENCE,
        StageId::Synthesis => SYNTHESIS_CONFIDENCE,
    }
}

// --- Urgency vocabulary, checked most urgent first ---

const URGENCY_TERMS: &[(Urgency, &[&str])] = &[
    (
        Urgency::Urgent,
        &[
            "urgent", "immediate", "critical", "asap", "hour", "today", "tonight", "right now",
            "24h", "48h", "emergency", "breaking",
        ],
    ),
    (
        Urgency::High,
        &[
            "high", "this week", "next week", "within a week", "1 week", "tomorrow", "few days",
            "soon", "pressing", "important",
        ],
    ),
    (
        Urgency::Medium,
        &["medium", "moderate", "weeks", "this month", "next month", "30 days"],
    ),
    (
        Urgency::Low,
        &[
            "low", "quarter", "year", "months", "long-term", "long term", "eventually", "90 days",
        ],
    ),
];

/// Map free-text urgency or timeframe wording onto the four levels.
/// Unrecognized text is `Medium`.
pub fn normalize_urgency(text: &str) -> Urgency {
    let text = text.to_lowercase();
    URGENCY_TERMS
        .iter()
        .find(|(_, terms)| terms.iter().any(|t| text.contains(t)))
        .map(|(level, _)| *level)
        .unwrap_or(Urgency::Medium)
}

/// 0-100. Fractions (≤ 1.0) are scaled up; missing or unreadable scores take
/// the stage default.
pub fn parse_confidence(item: &Value, stage: StageId) -> u8 {
    match number_of(item, &["confidence", "confidence_score", "score"]) {
        Some(raw) if raw.is_finite() => {
            let pct = if raw <= 1.0 { raw * 100.0 } else { raw };
            pct.round().clamp(0.0, 100.0) as u8
        }
        _ => default_confidence(stage),
    }
}

/// Normalize one scoring-service item. Items without a title are dropped.
pub fn candidate_from(item: &Value, origin: StageId) -> Option<OpportunityCandidate> {
    if let Value::String(title) = item {
        let title = title.trim();
        return (!title.is_empty()).then(|| OpportunityCandidate {
            title: title.to_string(),
            kind: "general".to_string(),
            urgency: Urgency::Medium,
            confidence: default_confidence(origin),
            source_stage: origin,
            description: String::new(),
        });
    }

    let title = text_of(item, &["title", "name", "opportunity"])?;
    let urgency_text = text_of(
        item,
        &["urgency", "priority", "timeframe", "time_sensitivity", "window"],
    )
    .unwrap_or_default();
    let source_stage = text_of(item, &["source_stage", "stage"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(origin);

    Some(OpportunityCandidate {
        title,
        kind: text_of(item, &["type", "category", "kind"]).unwrap_or_else(|| "general".to_string()),
        urgency: normalize_urgency(&urgency_text),
        confidence: parse_confidence(item, source_stage),
        source_stage,
        description: text_of(item, &["description", "summary", "rationale"]).unwrap_or_default(),
    })
}

/// Merge candidate batches, keep the best-scoring candidate per title
/// (case-insensitive), and sort by score, highest first.
pub fn consolidate(
    batches: impl IntoIterator<Item = Vec<OpportunityCandidate>>,
) -> Vec<OpportunityCandidate> {
    let mut merged: Vec<OpportunityCandidate> = Vec::new();
    let mut by_title: HashMap<String, usize> = HashMap::new();

    for candidate in batches.into_iter().flatten() {
        let key = candidate.title.trim().to_lowercase();
        match by_title.get(&key) {
            Some(&idx) => {
                if candidate.score() > merged[idx].score() {
                    merged[idx] = candidate;
                }
            }
            None => {
                by_title.insert(key, merged.len());
                merged.push(candidate);
            }
        }
    }

    merged.sort_by(|a, b| b.score().total_cmp(&a.score()));
    merged
}

#[derive(Clone)]
pub struct OpportunityDeriver {
    scorer: Arc<dyn OpportunityScorer>,
    cache: CacheStore<Vec<OpportunityCandidate>>,
}

impl OpportunityDeriver {
    /// Results are cached for `ttl` per organization, mode and input data.
    pub fn new(scorer: Arc<dyn OpportunityScorer>, clock: Arc<dyn Clock>, ttl: Duration, capacity: usize) -> Self {
        Self {
            scorer,
            cache: CacheStore::new(clock, ttl, capacity),
        }
    }

    /// Per-stage pass. Failed and terminal stages yield nothing.
    pub async fn for_stage(&self, org: &Organization, stage: &StageResult) -> Vec<OpportunityCandidate> {
        if !stage.success || stage.stage_id.is_terminal() {
            return Vec::new();
        }
        let request = OpportunityRequest {
            organization: json!(org),
            stage_data: Some(stage.data.clone()),
            synthesis_data: None,
            mode: "stage".to_string(),
            stage: Some(stage.stage_id.as_str().to_string()),
        };
        self.score(org, request, stage.stage_id).await
    }

    /// Post-synthesis pass over every successful stage plus the synthesis body.
    pub async fn comprehensive(
        &self,
        org: &Organization,
        stages: &[StageResult],
        synthesis: &Value,
    ) -> Vec<OpportunityCandidate> {
        let stage_data: Map<String, Value> = stages
            .iter()
            .filter(|s| s.success && !s.stage_id.is_terminal())
            .map(|s| (s.stage_id.as_str().to_string(), s.data.clone()))
            .collect();
        let request = OpportunityRequest {
            organization: json!(org),
            stage_data: Some(Value::Object(stage_data)),
            synthesis_data: Some(synthesis.clone()),
            mode: "comprehensive".to_string(),
            stage: None,
        };
        self.score(org, request, StageId::Synthesis).await
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    async fn score(
        &self,
        org: &Organization,
        request: OpportunityRequest,
        origin: StageId,
    ) -> Vec<OpportunityCandidate> {
        let key = format!(
            "{}:opportunities:{}:{}:{}",
            org.key(),
            request.mode,
            origin,
            fingerprint(&json!([request.organization, request.stage_data, request.synthesis_data])),
        );
        let scorer = self.scorer.clone();

        let scored = self
            .cache
            .acquire_or_join(&key, move || async move {
                let items = scorer.score(&request).await?;
                Ok(items
                    .iter()
                    .filter_map(|item| candidate_from(item, origin))
                    .collect::<Vec<_>>())
            })
            .await;

        match scored {
            Ok(candidates) => {
                debug!(stage = %origin, count = candidates.len(), "Opportunities scored");
                candidates
            }
            Err(e) => {
                warn!(stage = %origin, error = %e, "Opportunity scoring failed (non-fatal)");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::testing::{ManualClock, MockScorer};

    fn candidate(title: &str, urgency: Urgency, confidence: u8) -> OpportunityCandidate {
        OpportunityCandidate {
            title: title.into(),
            kind: "general".into(),
            urgency,
            confidence,
            source_stage: StageId::Media,
            description: String::new(),
        }
    }

    fn deriver_with(scorer: MockScorer) -> (Arc<MockScorer>, OpportunityDeriver) {
        let scorer = Arc::new(scorer);
        let deriver = OpportunityDeriver::new(
            scorer.clone(),
            Arc::new(ManualClock::new()),
            Duration::from_secs(60),
            16,
        );
        (scorer, deriver)
    }

    #[test]
    fn urgency_vocabulary() {
        assert_eq!(normalize_urgency("2 hours"), Urgency::Urgent);
        assert_eq!(normalize_urgency("urgent deadline"), Urgency::Urgent);
        assert_eq!(normalize_urgency("next quarter"), Urgency::Low);
        assert_eq!(normalize_urgency("Next week"), Urgency::High);
        assert_eq!(normalize_urgency("within 30 days"), Urgency::Medium);
        assert_eq!(normalize_urgency("whenever"), Urgency::Medium);
        assert_eq!(normalize_urgency(""), Urgency::Medium);
    }

    #[test]
    fn confidence_defaults_per_stage() {
        let item = json!({"title": "x"});
        assert_eq!(parse_confidence(&item, StageId::Media), 70);
        assert_eq!(parse_confidence(&item, StageId::Regulatory), 75);
        assert_eq!(parse_confidence(&item, StageId::Trends), 65);
        assert_eq!(parse_confidence(&json!({"confidence": 0.82}), StageId::Media), 82);
        assert_eq!(parse_confidence(&json!({"confidence": "90%"}), StageId::Media), 90);
        assert_eq!(parse_confidence(&json!({"confidence": 140}), StageId::Media), 100);
    }

    #[test]
    fn candidate_reads_synonyms_and_stage_override() {
        let item = json!({
            "name": "Answer the recall story",
            "category": "reputation",
            "timeframe": "today",
            "stage": "regulatory"
        });
        let c = candidate_from(&item, StageId::Media).unwrap();
        assert_eq!(c.title, "Answer the recall story");
        assert_eq!(c.kind, "reputation");
        assert_eq!(c.urgency, Urgency::Urgent);
        assert_eq!(c.source_stage, StageId::Regulatory);
        assert_eq!(c.confidence, REGULATORY_CONFIDENCE);
        assert!(candidate_from(&json!({"urgency": "high"}), StageId::Media).is_none());
    }

    #[test]
    fn explicit_urgency_wins_over_timeframe() {
        let item = json!({"title": "Renew supplier audit", "urgency": "low", "timeframe": "today"});
        assert_eq!(candidate_from(&item, StageId::Media).unwrap().urgency, Urgency::Low);

        let item = json!({"title": "Renew supplier audit", "urgency": null, "timeframe": "today"});
        assert_eq!(candidate_from(&item, StageId::Media).unwrap().urgency, Urgency::Urgent);
    }

    #[test]
    fn consolidate_dedupes_and_sorts_by_weighted_score() {
        let ranked = consolidate([
            vec![
                candidate("Low but sure", Urgency::Low, 100),
                candidate("Urgent", Urgency::Urgent, 50),
            ],
            vec![
                candidate("high pick", Urgency::High, 90),
                candidate("urgent", Urgency::Urgent, 90),
            ],
        ]);
        let titles: Vec<_> = ranked.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["urgent", "high pick", "Low but sure"]);
    }

    #[tokio::test]
    async fn scoring_failure_yields_empty_list() {
        let (_, deriver) = deriver_with(MockScorer::new().failing());
        let stage = StageResult::succeeded(StageId::Media, json!({}), BTreeMap::new(), Utc::now());
        assert!(deriver.for_stage(&Organization::new("Acme"), &stage).await.is_empty());
    }

    #[tokio::test]
    async fn failed_stage_is_not_scored() {
        let (scorer, deriver) = deriver_with(MockScorer::new());
        let stage = StageResult::failed(StageId::Media, "down", Utc::now());
        deriver.for_stage(&Organization::new("Acme"), &stage).await;
        assert_eq!(scorer.request_count(), 0);
    }

    #[tokio::test]
    async fn repeated_scoring_is_cached() {
        let (scorer, deriver) = deriver_with(
            MockScorer::new().on_stage(StageId::Media, vec![json!({"title": "Pitch TechCrunch"})]),
        );
        let org = Organization::new("Acme");
        let stage = StageResult::succeeded(StageId::Media, json!({"coverage": []}), BTreeMap::new(), Utc::now());

        let first = deriver.for_stage(&org, &stage).await;
        let second = deriver.for_stage(&org, &stage).await;
        assert_eq!(first, second);
        assert_eq!(first[0].confidence, MEDIA_CONFIDENCE);
        assert_eq!(scorer.request_count(), 1);

        deriver.clear();
        deriver.for_stage(&org, &stage).await;
        assert_eq!(scorer.request_count(), 2);
    }
}
