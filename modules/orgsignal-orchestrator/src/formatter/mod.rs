//! Output formatter: raw synthesis body → fixed-shape `TabContent`.
//!
//! The body is classified once at the boundary into one of two shapes and
//! each tab is read through that shape only. Every field resolves through a
//! synonym chain to a value or a default, so formatting cannot fail and the
//! same input always yields the same output.

mod tabs;

use serde_json::{Map, Value};

use orgsignal_common::{SourceShape, TabContent};

use crate::util::{coerce_text, coerce_to_array};

pub use self::tabs::TabDomain;

/// Synthesis body in one of its two known shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum IntelligenceRaw {
    /// Nested per-domain blocks under a top-level `synthesis` object.
    Analytical(AnalyticalIntelligence),
    /// Flat, top-level fields.
    Legacy(LegacyIntelligence),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticalIntelligence {
    synthesis: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyIntelligence {
    fields: Map<String, Value>,
}

impl IntelligenceRaw {
    /// Classify a raw body. Anything that is not an analytical body is read
    /// as legacy; non-objects become an empty legacy body.
    pub fn from_value(value: &Value) -> Self {
        match value.get("synthesis") {
            Some(Value::Object(synthesis)) => IntelligenceRaw::Analytical(AnalyticalIntelligence {
                synthesis: synthesis.clone(),
            }),
            _ => IntelligenceRaw::Legacy(LegacyIntelligence {
                fields: value.as_object().cloned().unwrap_or_default(),
            }),
        }
    }

    pub fn shape(&self) -> SourceShape {
        match self {
            IntelligenceRaw::Analytical(_) => SourceShape::Analytical,
            IntelligenceRaw::Legacy(_) => SourceShape::Legacy,
        }
    }

    fn reader(&self, domain: TabDomain) -> FieldReader<'_> {
        match self {
            IntelligenceRaw::Analytical(body) => FieldReader::Block(
                domain
                    .block_keys()
                    .iter()
                    .find_map(|k| body.synthesis.get(*k).and_then(Value::as_object)),
            ),
            IntelligenceRaw::Legacy(body) => FieldReader::Flat(&body.fields),
        }
    }
}

/// Reads one tab's fields from whichever shape was detected.
///
/// Analytical blocks are read with the analytical names first and then the
/// legacy synonyms; flat bodies with the legacy synonyms only.
pub(crate) enum FieldReader<'a> {
    Block(Option<&'a Map<String, Value>>),
    Flat(&'a Map<String, Value>),
}

impl FieldReader<'_> {
    fn find(&self, analytical: &[&str], legacy: &[&str]) -> Vec<&Value> {
        let (source, chain): (Option<&Map<String, Value>>, Vec<&str>) = match self {
            FieldReader::Block(block) => (
                *block,
                analytical.iter().chain(legacy.iter()).copied().collect(),
            ),
            FieldReader::Flat(fields) => (Some(*fields), legacy.to_vec()),
        };
        let Some(source) = source else {
            return Vec::new();
        };
        chain
            .iter()
            .filter_map(|k| source.get(*k))
            .filter(|v| !v.is_null())
            .collect()
    }

    pub(crate) fn text(&self, analytical: &[&str], legacy: &[&str], default: &str) -> String {
        self.find(analytical, legacy)
            .into_iter()
            .find_map(|v| coerce_text(Some(v)))
            .unwrap_or_else(|| default.to_string())
    }

    pub(crate) fn list(&self, analytical: &[&str], legacy: &[&str]) -> Vec<Value> {
        let found = self
            .find(analytical, legacy)
            .into_iter()
            .find(|v| !coerce_to_array(Some(*v)).is_empty());
        coerce_to_array(found).into_iter().map(prune_nulls).collect()
    }
}

/// Drop null members from nested objects and arrays.
fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(prune_nulls)
                .collect(),
        ),
        other => other,
    }
}

/// Format a classified body.
pub fn format(raw: &IntelligenceRaw) -> TabContent {
    TabContent {
        executive_summary: tabs::executive(&raw.reader(TabDomain::Executive)),
        competitive: tabs::competitive(&raw.reader(TabDomain::Competitive)),
        media: tabs::media(&raw.reader(TabDomain::Media)),
        regulatory: tabs::regulatory(&raw.reader(TabDomain::Regulatory)),
        market_trends: tabs::market_trends(&raw.reader(TabDomain::MarketTrends)),
        forward_looking: tabs::forward_looking(&raw.reader(TabDomain::ForwardLooking)),
        source_shape: raw.shape(),
    }
}

/// Classify and format in one step.
pub fn format_value(value: &Value) -> TabContent {
    format(&IntelligenceRaw::from_value(value))
}
