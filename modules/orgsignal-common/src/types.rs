use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrgSignalError;

// --- Organization ---

/// Named stakeholder groups around an organization. Lists only ever grow:
/// merging appends entries not already present (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StakeholderGroups {
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub regulators: Vec<String>,
    #[serde(default)]
    pub media_outlets: Vec<String>,
    #[serde(default)]
    pub investors: Vec<String>,
    #[serde(default)]
    pub analysts: Vec<String>,
    #[serde(default)]
    pub activists: Vec<String>,
}

impl StakeholderGroups {
    pub fn fill_from(&mut self, weaker: &StakeholderGroups) {
        union_into(&mut self.competitors, &weaker.competitors);
        union_into(&mut self.regulators, &weaker.regulators);
        union_into(&mut self.media_outlets, &weaker.media_outlets);
        union_into(&mut self.investors, &weaker.investors);
        union_into(&mut self.analysts, &weaker.analysts);
        union_into(&mut self.activists, &weaker.activists);
    }
}

/// The organization being monitored. Enriched additively as stages run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub stakeholders: StakeholderGroups,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    /// Identity key used for persistence and dedup keys.
    pub fn key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Merge three views of the same organization.
    ///
    /// Precedence is explicit caller value > previously persisted value >
    /// freshly discovered value. Scalars take the first non-empty value in
    /// that order; lists are unioned with the stronger source first.
    pub fn merged(
        explicit: &Organization,
        persisted: Option<&Organization>,
        discovered: Option<&Organization>,
    ) -> Organization {
        let mut merged = explicit.clone();
        for weaker in [persisted, discovered].into_iter().flatten() {
            merged.fill_from(weaker);
        }
        merged
    }

    /// Fill empty fields and append new list entries from a weaker source.
    /// Never replaces a value that is already present.
    pub fn fill_from(&mut self, weaker: &Organization) {
        if self.name.trim().is_empty() {
            self.name = weaker.name.clone();
        }
        if self.industry.as_deref().is_none_or(|i| i.trim().is_empty()) {
            self.industry = weaker
                .industry
                .clone()
                .filter(|i| !i.trim().is_empty());
        }
        self.stakeholders.fill_from(&weaker.stakeholders);
        union_into(&mut self.keywords, &weaker.keywords);
    }
}

fn union_into(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if !target.iter().any(|t| t.trim().eq_ignore_ascii_case(item)) {
            target.push(item.to_string());
        }
    }
}

// --- Stages ---

/// Pipeline stages in execution order. `Synthesis` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Extraction,
    Competitive,
    Media,
    Regulatory,
    Trends,
    Synthesis,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        StageId::Extraction,
        StageId::Competitive,
        StageId::Media,
        StageId::Regulatory,
        StageId::Trends,
        StageId::Synthesis,
    ];

    pub const PRE_SYNTHESIS: [StageId; 5] = [
        StageId::Extraction,
        StageId::Competitive,
        StageId::Media,
        StageId::Regulatory,
        StageId::Trends,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Extraction => "extraction",
            StageId::Competitive => "competitive",
            StageId::Media => "media",
            StageId::Regulatory => "regulatory",
            StageId::Trends => "trends",
            StageId::Synthesis => "synthesis",
        }
    }

    pub fn next(&self) -> Option<StageId> {
        match self {
            StageId::Extraction => Some(StageId::Competitive),
            StageId::Competitive => Some(StageId::Media),
            StageId::Media => Some(StageId::Regulatory),
            StageId::Regulatory => Some(StageId::Trends),
            StageId::Trends => Some(StageId::Synthesis),
            StageId::Synthesis => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageId::Synthesis)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = OrgSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrgSignalError::Validation(format!("unknown stage '{s}'")))
    }
}

/// Outcome of one stage invocation.
///
/// `data` is the machine-readable slice later stages map fields out of;
/// `tabs` is the stage's human-facing projection. A failed stage carries an
/// empty object for `data` and no tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub tabs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn succeeded(
        stage_id: StageId,
        data: Value,
        tabs: BTreeMap<String, Value>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_id,
            success: true,
            data,
            tabs,
            error: None,
            completed_at,
        }
    }

    pub fn failed(stage_id: StageId, error: impl fmt::Display, completed_at: DateTime<Utc>) -> Self {
        Self {
            stage_id,
            success: false,
            data: Value::Object(Default::default()),
            tabs: BTreeMap::new(),
            error: Some(error.to_string()),
            completed_at,
        }
    }

    /// Read a top-level field of `data`, ignoring nulls.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }
}

// --- Persistence ---

/// One persisted stage slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub payload: Value,
    pub saved_at: DateTime<Utc>,
}

/// Everything persisted about an organization: the merged profile plus the
/// latest slice written by each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProfile {
    pub organization: Organization,
    #[serde(default)]
    pub stages: BTreeMap<StageId, StageRecord>,
    pub updated_at: DateTime<Utc>,
}

impl StoredProfile {
    pub fn new(organization: Organization, updated_at: DateTime<Utc>) -> Self {
        Self {
            organization,
            stages: BTreeMap::new(),
            updated_at,
        }
    }

    pub fn stage_payload(&self, stage: StageId) -> Option<&Value> {
        self.stages.get(&stage).map(|r| &r.payload)
    }
}

/// Filters for `retrieve`. Empty `stages` means every stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveFilter {
    #[serde(default)]
    pub stages: Vec<StageId>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RetrieveFilter {
    pub fn matches(&self, record: &StageRecord) -> bool {
        (self.stages.is_empty() || self.stages.contains(&record.stage))
            && self.since.is_none_or(|since| record.saved_at >= since)
    }
}

// --- Canonical intelligence ---

pub const DEFAULT_IMPACT: &str = "medium";
pub const DEFAULT_RELEVANCE: f64 = 0.7;

/// One thing an entity did, flattened from any stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAction {
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub action: String,
    pub impact: String,
    pub relevance: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

static INCREASING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(increas\w*|ris(e|es|ing)|up|upward|grow\w*|emerg\w*)\b")
        .expect("valid trend label regex")
});

static DECREASING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(decreas\w*|fall(s|ing)?|down|downward|declin\w*)\b")
        .expect("valid trend label regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

impl TrendDirection {
    /// Lenient parse of upstream direction vocabulary. Unknown text is `Stable`.
    pub fn from_label(label: &str) -> Self {
        if INCREASING_LABEL.is_match(label) {
            TrendDirection::Increasing
        } else if DECREASING_LABEL.is_match(label) {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTrend {
    pub topic: String,
    pub trend_direction: TrendDirection,
    pub mention_count: u32,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Unprocessed text item (headline, post, filing) fed into synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl RawSignal {
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIntelligence {
    pub entity_actions: Vec<EntityAction>,
    pub topic_trends: Vec<TopicTrend>,
    pub raw_signals: Vec<RawSignal>,
}

// --- Opportunities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Urgent,
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn weight(&self) -> f64 {
        match self {
            Urgency::Urgent => 4.0,
            Urgency::High => 3.0,
            Urgency::Medium => 2.0,
            Urgency::Low => 1.0,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Urgent => write!(f, "URGENT"),
            Urgency::High => write!(f, "HIGH"),
            Urgency::Medium => write!(f, "MEDIUM"),
            Urgency::Low => write!(f, "LOW"),
        }
    }
}

/// A scored, time-sensitive action candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityCandidate {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub urgency: Urgency,
    /// 0-100
    pub confidence: u8,
    pub source_stage: StageId,
    #[serde(default)]
    pub description: String,
}

impl OpportunityCandidate {
    /// Ranking score: urgency weight scaled by confidence.
    pub fn score(&self) -> f64 {
        self.urgency.weight() * f64::from(self.confidence) / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(name: &str) -> Organization {
        Organization::new(name)
    }

    #[test]
    fn merge_prefers_explicit_over_persisted_over_discovered() {
        let explicit = org("Acme").with_industry("robotics");
        let persisted = org("Acme").with_industry("manufacturing");
        let mut discovered = org("Acme Corp").with_industry("industrial automation");
        discovered.stakeholders.competitors = vec!["Globex".into()];

        let merged = Organization::merged(&explicit, Some(&persisted), Some(&discovered));
        assert_eq!(merged.name, "Acme");
        assert_eq!(merged.industry.as_deref(), Some("robotics"));
        assert_eq!(merged.stakeholders.competitors, vec!["Globex".to_string()]);
    }

    #[test]
    fn merge_fills_missing_industry_from_persisted() {
        let explicit = org("Acme");
        let persisted = org("Acme").with_industry("robotics");
        let merged = Organization::merged(&explicit, Some(&persisted), None);
        assert_eq!(merged.industry.as_deref(), Some("robotics"));
    }

    #[test]
    fn blank_industry_counts_as_missing() {
        let mut explicit = org("Acme");
        explicit.industry = Some("  ".into());
        let discovered = org("Acme").with_industry("robotics");
        let merged = Organization::merged(&explicit, None, Some(&discovered));
        assert_eq!(merged.industry.as_deref(), Some("robotics"));
    }

    #[test]
    fn list_union_is_case_insensitive_and_keeps_stronger_first() {
        let mut explicit = org("Acme");
        explicit.keywords = vec!["Cobots".into()];
        let mut discovered = org("Acme");
        discovered.keywords = vec!["cobots".into(), "warehouse automation".into(), " ".into()];

        let merged = Organization::merged(&explicit, None, Some(&discovered));
        assert_eq!(
            merged.keywords,
            vec!["Cobots".to_string(), "warehouse automation".to_string()]
        );
    }

    #[test]
    fn stage_order_ends_at_synthesis() {
        let mut stage = StageId::Extraction;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, StageId::ALL.to_vec());
        assert!(stage.is_terminal());
    }

    #[test]
    fn stage_id_parses_case_insensitively() {
        assert_eq!("Media".parse::<StageId>().unwrap(), StageId::Media);
        assert!("press".parse::<StageId>().is_err());
    }

    #[test]
    fn stage_ids_serialize_as_map_keys() {
        let mut profile = StoredProfile::new(org("Acme"), Utc::now());
        profile.stages.insert(
            StageId::Media,
            StageRecord {
                stage: StageId::Media,
                payload: serde_json::json!({"coverage": []}),
                saved_at: Utc::now(),
            },
        );
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json["stages"]["media"].is_object());
    }

    #[test]
    fn failed_stage_has_empty_object_data() {
        let result = StageResult::failed(StageId::Media, "boom", Utc::now());
        assert!(!result.success);
        assert!(result.data.is_object());
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn trend_direction_labels() {
        assert_eq!(TrendDirection::from_label("Rising fast"), TrendDirection::Increasing);
        assert_eq!(TrendDirection::from_label("declining"), TrendDirection::Decreasing);
        assert_eq!(TrendDirection::from_label("flat"), TrendDirection::Stable);
    }

    #[test]
    fn trend_label_matches_whole_words_only() {
        assert_eq!(TrendDirection::from_label("disrupted"), TrendDirection::Stable);
        assert_eq!(TrendDirection::from_label("ups and downs"), TrendDirection::Stable);
        assert_eq!(TrendDirection::from_label("trending up"), TrendDirection::Increasing);
        assert_eq!(TrendDirection::from_label("Growing"), TrendDirection::Increasing);
        assert_eq!(TrendDirection::from_label("slowdown"), TrendDirection::Stable);
        assert_eq!(TrendDirection::from_label("down 12%"), TrendDirection::Decreasing);
    }

    #[test]
    fn opportunity_score_scales_weight_by_confidence() {
        let candidate = OpportunityCandidate {
            title: "Respond to recall".into(),
            kind: "reputation".into(),
            urgency: Urgency::Urgent,
            confidence: 50,
            source_stage: StageId::Media,
            description: String::new(),
        };
        assert!((candidate.score() - 2.0).abs() < f64::EPSILON);
    }
}
