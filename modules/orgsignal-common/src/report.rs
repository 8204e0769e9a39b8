//! Final report schema consumed by the rendering layer.
//!
//! Every tab has a fixed field set. Text fields are never empty (they fall
//! back to a placeholder) and list fields are never null (they fall back to
//! an empty list), so consumers can index any path without checking.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level keys of a serialized `TabContent`, in report order.
pub const TAB_KEYS: [&str; 6] = [
    "executive_summary",
    "competitive",
    "media",
    "regulatory",
    "market_trends",
    "forward_looking",
];

/// Which extraction path produced the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceShape {
    /// Nested per-domain synthesis block.
    Analytical,
    /// Flat top-level fields.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabContent {
    pub executive_summary: ExecutiveTab,
    pub competitive: CompetitiveTab,
    pub media: MediaTab,
    pub regulatory: RegulatoryTab,
    pub market_trends: TrendsTab,
    pub forward_looking: ForwardLookingTab,
    pub source_shape: SourceShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveTab {
    pub headline: String,
    pub overview: String,
    pub key_findings: Vec<Value>,
    pub immediate_actions: Vec<Value>,
    pub risk_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveTab {
    pub summary: String,
    pub competitor_actions: Vec<Value>,
    pub threats: Vec<Value>,
    pub market_position: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTab {
    pub summary: String,
    pub coverage: Vec<Value>,
    pub narratives: Vec<Value>,
    pub key_voices: Vec<Value>,
    pub sentiment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryTab {
    pub summary: String,
    pub developments: Vec<Value>,
    pub compliance_risks: Vec<Value>,
    pub upcoming_deadlines: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsTab {
    pub summary: String,
    pub trending_topics: Vec<Value>,
    pub emerging_themes: Vec<Value>,
    pub market_signals: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardLookingTab {
    pub summary: String,
    pub predictions: Vec<Value>,
    pub scenarios: Vec<Value>,
    pub watch_list: Vec<Value>,
}
