// Per-stage field-mapping tables for the reconciler.
//
// Each table row names one list in a stage's `data` slice and the synonym
// chains used to read each canonical field out of its items.

use chrono::{DateTime, Utc};
use serde_json::Value;

use orgsignal_common::{EntityAction, RawSignal, StageId, StageResult, DEFAULT_IMPACT, DEFAULT_RELEVANCE};

use crate::util::{coerce_to_array, number_of, text_of, timestamp_of};

const IMPACT_KEYS: &[&str] = &["impact", "severity", "importance"];
const RELEVANCE_KEYS: &[&str] = &["relevance", "relevance_score", "score"];
const TIMESTAMP_KEYS: &[&str] = &["published_at", "date", "timestamp", "detected_at"];

/// Entity label for items that do not name one.
pub const UNSPECIFIED_ENTITY: &str = "unspecified";

pub struct ActionMapping {
    pub stage: StageId,
    pub field: &'static str,
    pub entity_type: &'static str,
    pub entity: &'static [&'static str],
    pub action: &'static [&'static str],
}

pub const ACTION_MAPPINGS: &[ActionMapping] = &[
    ActionMapping {
        stage: StageId::Competitive,
        field: "competitor_actions",
        entity_type: "competitor",
        entity: &["competitor", "name", "company"],
        action: &["action", "description", "move", "summary"],
    },
    ActionMapping {
        stage: StageId::Competitive,
        field: "threats",
        entity_type: "threat",
        entity: &["source", "competitor", "name"],
        action: &["threat", "description", "title"],
    },
    ActionMapping {
        stage: StageId::Media,
        field: "coverage",
        entity_type: "media",
        entity: &["outlet", "source", "publication"],
        action: &["headline", "title", "summary"],
    },
    ActionMapping {
        stage: StageId::Regulatory,
        field: "developments",
        entity_type: "regulator",
        entity: &["regulator", "agency", "body"],
        action: &["development", "description", "title", "summary"],
    },
    ActionMapping {
        stage: StageId::Regulatory,
        field: "filings",
        entity_type: "legal",
        entity: &["court", "party", "filer"],
        action: &["title", "description", "summary"],
    },
    ActionMapping {
        stage: StageId::Trends,
        field: "signals",
        entity_type: "social",
        entity: &["source", "platform", "author"],
        action: &["title", "text", "content"],
    },
];

impl ActionMapping {
    /// Flatten the mapped list of `result` into entity actions. Items with
    /// no readable action text are skipped.
    pub fn apply(&self, result: &StageResult) -> Vec<EntityAction> {
        coerce_to_array(result.field(self.field))
            .iter()
            .filter_map(|item| self.action_from(item, result.completed_at))
            .collect()
    }

    fn action_from(&self, item: &Value, completed_at: DateTime<Utc>) -> Option<EntityAction> {
        let (entity, action) = match item {
            Value::String(s) if !s.trim().is_empty() => {
                (UNSPECIFIED_ENTITY.to_string(), s.trim().to_string())
            }
            Value::Object(_) => (
                text_of(item, self.entity).unwrap_or_else(|| UNSPECIFIED_ENTITY.to_string()),
                text_of(item, self.action)?,
            ),
            _ => return None,
        };

        Some(EntityAction {
            entity,
            entity_type: self.entity_type.to_string(),
            action,
            impact: text_of(item, IMPACT_KEYS)
                .map(|i| i.to_lowercase())
                .unwrap_or_else(|| DEFAULT_IMPACT.to_string()),
            relevance: number_of(item, RELEVANCE_KEYS)
                .map(normalize_relevance)
                .unwrap_or(DEFAULT_RELEVANCE),
            source: self.stage.as_str().to_string(),
            timestamp: timestamp_of(item, TIMESTAMP_KEYS).unwrap_or(completed_at),
        })
    }
}

/// 0-1 scale. Values above 1 are read as percentages.
fn normalize_relevance(raw: f64) -> f64 {
    if !raw.is_finite() {
        return DEFAULT_RELEVANCE;
    }
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

pub struct SignalMapping {
    pub stage: StageId,
    pub field: &'static str,
    pub source: &'static [&'static str],
    pub title: &'static [&'static str],
    pub content: &'static [&'static str],
}

pub const SIGNAL_MAPPINGS: &[SignalMapping] = &[
    SignalMapping {
        stage: StageId::Media,
        field: "coverage",
        source: &["outlet", "source", "publication"],
        title: &["headline", "title"],
        content: &["summary", "content", "text"],
    },
    SignalMapping {
        stage: StageId::Trends,
        field: "signals",
        source: &["source", "platform"],
        title: &["title", "headline"],
        content: &["text", "content", "summary"],
    },
];

impl SignalMapping {
    pub fn apply(&self, result: &StageResult) -> Vec<RawSignal> {
        coerce_to_array(result.field(self.field))
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(RawSignal {
                    source: self.stage.as_str().to_string(),
                    title: s.trim().to_string(),
                    ..Default::default()
                }),
                Value::Object(_) => Some(RawSignal {
                    source: text_of(item, self.source)
                        .unwrap_or_else(|| self.stage.as_str().to_string()),
                    title: text_of(item, self.title).unwrap_or_default(),
                    content: text_of(item, self.content).unwrap_or_default(),
                    url: text_of(item, &["url", "link"]),
                    published_at: timestamp_of(item, TIMESTAMP_KEYS),
                })
                .filter(|s| !s.text().trim().is_empty()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn stage(stage: StageId, data: Value) -> StageResult {
        StageResult::succeeded(stage, data, BTreeMap::new(), Utc::now())
    }

    fn mapping(field: &str) -> &'static ActionMapping {
        ACTION_MAPPINGS.iter().find(|m| m.field == field).unwrap()
    }

    #[test]
    fn missing_impact_and_relevance_use_neutral_defaults() {
        let result = stage(
            StageId::Competitive,
            json!({"competitor_actions": [{"competitor": "Initech", "action": "Opened EU hub"}]}),
        );
        let actions = mapping("competitor_actions").apply(&result);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].entity, "Initech");
        assert_eq!(actions[0].entity_type, "competitor");
        assert_eq!(actions[0].impact, "medium");
        assert!((actions[0].relevance - 0.7).abs() < f64::EPSILON);
        assert_eq!(actions[0].timestamp, result.completed_at);
    }

    #[test]
    fn string_items_become_unspecified_entities() {
        let result = stage(StageId::Competitive, json!({"threats": ["Price war"]}));
        let actions = mapping("threats").apply(&result);
        assert_eq!(actions[0].entity, UNSPECIFIED_ENTITY);
        assert_eq!(actions[0].action, "Price war");
    }

    #[test]
    fn percent_relevance_is_scaled() {
        let result = stage(
            StageId::Regulatory,
            json!({"developments": [{"agency": "FTC", "title": "Probe", "relevance": 85}]}),
        );
        let actions = mapping("developments").apply(&result);
        assert!((actions[0].relevance - 0.85).abs() < 1e-9);
    }

    #[test]
    fn items_without_action_text_are_skipped() {
        let result = stage(StageId::Media, json!({"coverage": [{"outlet": "Reuters"}, 7]}));
        assert!(mapping("coverage").apply(&result).is_empty());
    }

    #[test]
    fn coverage_becomes_raw_signals() {
        let result = stage(
            StageId::Media,
            json!({"coverage": [{"outlet": "Reuters", "headline": "Acme expands", "url": "https://r.example/1"}]}),
        );
        let signals = SIGNAL_MAPPINGS[0].apply(&result);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].source, "Reuters");
        assert_eq!(signals[0].url.as_deref(), Some("https://r.example/1"));
    }
}
