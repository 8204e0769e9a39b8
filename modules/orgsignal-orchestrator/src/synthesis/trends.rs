//! Topic trend extraction.
//!
//! Trends reported by the trends stage are used as-is. When it reported none,
//! raw signal text is scanned against a fixed vocabulary instead.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use orgsignal_common::{RawSignal, StageId, StageResult, TopicTrend, TrendDirection};

use crate::util::{coerce_to_array, number_of, string_list, text_of};

/// More mentions than this classify a topic as increasing.
pub const INCREASING_THRESHOLD: u32 = 3;

const VOCABULARY: &[&str] = &[
    "artificial intelligence",
    "automation",
    "sustainability",
    "regulation",
    "supply chain",
    "acquisition",
    "merger",
    "layoffs",
    "funding",
    "partnership",
    "cybersecurity",
    "data privacy",
    "pricing",
    "expansion",
    "lawsuit",
    "recall",
    "tariff",
    "labor",
    "esg",
    "ipo",
];

static VOCABULARY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    VOCABULARY
        .iter()
        .map(|term| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
            (*term, Regex::new(&pattern).expect("valid vocabulary regex"))
        })
        .collect()
});

pub fn classify(mention_count: u32) -> TrendDirection {
    if mention_count > INCREASING_THRESHOLD {
        TrendDirection::Increasing
    } else {
        TrendDirection::Stable
    }
}

/// Explicit trends when the trends stage produced any, otherwise a
/// vocabulary scan over `signals`.
pub fn topic_trends(stages: &[StageResult], signals: &[RawSignal]) -> Vec<TopicTrend> {
    let explicit = explicit_trends(stages);
    if !explicit.is_empty() {
        return explicit;
    }
    scan_vocabulary(signals)
}

pub fn explicit_trends(stages: &[StageResult]) -> Vec<TopicTrend> {
    let Some(trends) = stages
        .iter()
        .find(|s| s.stage_id == StageId::Trends && s.success)
        .and_then(|s| s.field("trends"))
    else {
        return Vec::new();
    };

    coerce_to_array(Some(trends))
        .iter()
        .filter_map(|item| match item {
            Value::String(topic) if !topic.trim().is_empty() => Some(TopicTrend {
                topic: topic.trim().to_string(),
                trend_direction: classify(1),
                mention_count: 1,
                sources: Vec::new(),
            }),
            Value::Object(_) => {
                let topic = text_of(item, &["topic", "name", "title"])?;
                let mention_count = number_of(item, &["mentions", "mention_count", "count", "volume"])
                    .filter(|n| n.is_finite() && *n >= 0.0)
                    .map(|n| n.round() as u32)
                    .unwrap_or(1);
                let trend_direction = text_of(item, &["direction", "trend_direction", "trend"])
                    .map(|label| TrendDirection::from_label(&label))
                    .unwrap_or_else(|| classify(mention_count));
                Some(TopicTrend {
                    topic,
                    trend_direction,
                    mention_count,
                    sources: string_list(item.get("sources")),
                })
            }
            _ => None,
        })
        .collect()
}

/// Count vocabulary mentions across signal text. Only topics mentioned at
/// least once are returned, most-mentioned first.
pub fn scan_vocabulary(signals: &[RawSignal]) -> Vec<TopicTrend> {
    let mut trends: Vec<TopicTrend> = VOCABULARY_PATTERNS
        .iter()
        .filter_map(|(topic, pattern)| {
            let mut mentions = 0u32;
            let mut sources = BTreeSet::new();
            for signal in signals {
                let hits = pattern.find_iter(&signal.text()).count() as u32;
                if hits > 0 {
                    mentions += hits;
                    sources.insert(signal.source.clone());
                }
            }
            (mentions > 0).then(|| TopicTrend {
                topic: topic.to_string(),
                trend_direction: classify(mentions),
                mention_count: mentions,
                sources: sources.into_iter().collect(),
            })
        })
        .collect();
    trends.sort_by(|a, b| {
        b.mention_count
            .cmp(&a.mention_count)
            .then_with(|| a.topic.cmp(&b.topic))
    });
    trends
}
