// Stage catalogue: which backend methods each stage calls, what params they
// get, how their payloads map into the stage's `data` slice, and the small
// `tabs` projection shown per stage.
//
// Every field that crosses a stage boundary is named in a table below. Nothing
// is passed through by reflection.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use orgsignal_common::{Organization, StageId, StakeholderGroups, StoredProfile};

use crate::fanout::CollectorCall;
use crate::util::{coerce_to_array, pick, string_list, text_of};

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

/// How a stage reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// One call; its error is the stage error.
    Direct(&'static str),
    /// Several independent calls through the fan-out executor.
    FanOut(&'static [&'static str]),
}

pub const SYNTHESIS_METHOD: &str = "synthesize_intelligence";

pub fn invocation(stage: StageId) -> Invocation {
    match stage {
        StageId::Extraction => Invocation::Direct("organization_discovery"),
        StageId::Competitive => Invocation::FanOut(&["competitor_intelligence", "market_position"]),
        StageId::Media => Invocation::Direct("media_monitor"),
        StageId::Regulatory => Invocation::FanOut(&["regulatory_tracker", "legal_filings"]),
        StageId::Trends => Invocation::FanOut(&["trend_analyzer", "social_signals"]),
        StageId::Synthesis => Invocation::Direct(SYNTHESIS_METHOD),
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Stage slices persisted by earlier stages.
#[derive(Clone, Copy)]
pub struct PriorSlices<'a>(Option<&'a StoredProfile>);

impl<'a> PriorSlices<'a> {
    pub fn new(profile: Option<&'a StoredProfile>) -> Self {
        Self(profile)
    }

    pub fn field(&self, stage: StageId, key: &str) -> Option<&'a Value> {
        self.0?
            .stage_payload(stage)?
            .get(key)
            .filter(|v| !v.is_null())
    }
}

/// Backend calls for one pre-synthesis stage.
pub fn calls_for(stage: StageId, org: &Organization, prior: PriorSlices<'_>) -> Vec<CollectorCall> {
    let name = org.name.as_str();
    let industry = org.industry.as_deref();
    let groups = &org.stakeholders;

    match stage {
        StageId::Extraction => vec![CollectorCall::new(
            "organization_discovery",
            json!({
                "organization": name,
                "industry": industry,
                "known_stakeholders": groups,
                "keywords": org.keywords,
            }),
        )],
        StageId::Competitive => {
            let context = prior.field(StageId::Extraction, "summary");
            vec![
                CollectorCall::new(
                    "competitor_intelligence",
                    json!({
                        "organization": name,
                        "industry": industry,
                        "competitors": groups.competitors,
                        "context": context,
                    }),
                ),
                CollectorCall::new(
                    "market_position",
                    json!({
                        "organization": name,
                        "industry": industry,
                        "competitors": groups.competitors,
                    }),
                ),
            ]
        }
        StageId::Media => vec![CollectorCall::new(
            "media_monitor",
            json!({
                "organization": name,
                "media_outlets": groups.media_outlets,
                "keywords": org.keywords,
            }),
        )],
        StageId::Regulatory => {
            let regulators = union(
                &groups.regulators,
                string_list(prior.field(StageId::Extraction, "regulators")),
            );
            vec![
                CollectorCall::new(
                    "regulatory_tracker",
                    json!({
                        "organization": name,
                        "industry": industry,
                        "regulators": regulators,
                    }),
                ),
                CollectorCall::new(
                    "legal_filings",
                    json!({
                        "organization": name,
                        "competitors": groups.competitors,
                    }),
                ),
            ]
        }
        StageId::Trends => vec![
            CollectorCall::new(
                "trend_analyzer",
                json!({
                    "organization": name,
                    "industry": industry,
                    "keywords": org.keywords,
                    "media_themes": string_list(prior.field(StageId::Media, "themes")),
                }),
            ),
            CollectorCall::new(
                "social_signals",
                json!({
                    "organization": name,
                    "keywords": org.keywords,
                    "activists": groups.activists,
                }),
            ),
        ],
        StageId::Synthesis => Vec::new(),
    }
}

fn union(base: &[String], extra: Vec<String>) -> Vec<String> {
    let mut out = base.to_vec();
    for item in extra {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(&item)) {
            out.push(item);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Payload → data slice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Shape {
    List,
    Text(&'static str),
}

/// One `data` key, read from one method's payload through a synonym chain.
struct SliceField {
    key: &'static str,
    from: &'static str,
    synonyms: &'static [&'static str],
    shape: Shape,
}

const fn list(key: &'static str, from: &'static str, synonyms: &'static [&'static str]) -> SliceField {
    SliceField {
        key,
        from,
        synonyms,
        shape: Shape::List,
    }
}

const fn text(
    key: &'static str,
    from: &'static str,
    synonyms: &'static [&'static str],
    default: &'static str,
) -> SliceField {
    SliceField {
        key,
        from,
        synonyms,
        shape: Shape::Text(default),
    }
}

const EXTRACTION_FIELDS: &[SliceField] = &[
    text("summary", "organization_discovery", &["summary", "description", "overview"], ""),
    list("competitors", "organization_discovery", &["competitors", "rivals"]),
    list("regulators", "organization_discovery", &["regulators", "regulatory_bodies"]),
    list("media_outlets", "organization_discovery", &["media_outlets", "media"]),
    list("investors", "organization_discovery", &["investors", "shareholders"]),
    list("analysts", "organization_discovery", &["analysts"]),
    list("activists", "organization_discovery", &["activists", "advocacy_groups"]),
    list("keywords", "organization_discovery", &["keywords", "topics"]),
];

const COMPETITIVE_FIELDS: &[SliceField] = &[
    list("competitor_actions", "competitor_intelligence", &["actions", "competitor_actions", "moves"]),
    list("threats", "competitor_intelligence", &["threats", "risks"]),
    text("market_position", "market_position", &["position", "market_position", "summary"], ""),
    list("strengths", "market_position", &["strengths"]),
    list("weaknesses", "market_position", &["weaknesses", "gaps"]),
];

const MEDIA_FIELDS: &[SliceField] = &[
    list("coverage", "media_monitor", &["coverage", "articles", "mentions"]),
    text("sentiment", "media_monitor", &["sentiment", "overall_sentiment"], "neutral"),
    list("themes", "media_monitor", &["themes", "narratives", "topics"]),
];

const REGULATORY_FIELDS: &[SliceField] = &[
    list("developments", "regulatory_tracker", &["developments", "updates", "changes"]),
    list("compliance_risks", "regulatory_tracker", &["compliance_risks", "risks"]),
    list("filings", "legal_filings", &["filings", "cases", "lawsuits"]),
];

const TRENDS_FIELDS: &[SliceField] = &[
    list("trends", "trend_analyzer", &["trends", "topics"]),
    list("signals", "social_signals", &["signals", "posts", "mentions"]),
];

fn fields(stage: StageId) -> &'static [SliceField] {
    match stage {
        StageId::Extraction => EXTRACTION_FIELDS,
        StageId::Competitive => COMPETITIVE_FIELDS,
        StageId::Media => MEDIA_FIELDS,
        StageId::Regulatory => REGULATORY_FIELDS,
        StageId::Trends => TRENDS_FIELDS,
        StageId::Synthesis => &[],
    }
}

/// Map collector payloads (method → payload, successes only) into the
/// stage's `data` slice. Missing sources yield empty lists and default text.
pub fn map_slice(stage: StageId, payloads: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut slice = Map::new();
    for field in fields(stage) {
        let source = payloads.get(field.from);
        let found = source.and_then(|p| pick(p, field.synonyms));
        let value = match field.shape {
            Shape::List => Value::Array(coerce_to_array(found)),
            Shape::Text(default) => Value::String(
                source
                    .and_then(|p| text_of(p, field.synonyms))
                    .unwrap_or_else(|| default.to_string()),
            ),
        };
        slice.insert(field.key.to_string(), value);
    }
    slice
}

/// The organization as discovered by the extraction call.
pub fn discovered_organization(explicit: &Organization, payload: &Value) -> Organization {
    Organization {
        name: explicit.name.clone(),
        industry: text_of(payload, &["industry", "sector"]),
        stakeholders: StakeholderGroups {
            competitors: string_list(pick(payload, &["competitors", "rivals"])),
            regulators: string_list(pick(payload, &["regulators", "regulatory_bodies"])),
            media_outlets: string_list(pick(payload, &["media_outlets", "media"])),
            investors: string_list(pick(payload, &["investors", "shareholders"])),
            analysts: string_list(pick(payload, &["analysts"])),
            activists: string_list(pick(payload, &["activists", "advocacy_groups"])),
        },
        keywords: string_list(pick(payload, &["keywords", "topics"])),
    }
}

/// Extraction slice: the mapped fields plus the merged profile.
pub fn extraction_slice(
    explicit: &Organization,
    persisted: Option<&Organization>,
    payloads: &BTreeMap<String, Value>,
) -> Map<String, Value> {
    let mut slice = map_slice(StageId::Extraction, payloads);
    let discovered = payloads
        .get("organization_discovery")
        .map(|p| discovered_organization(explicit, p));
    let merged = Organization::merged(explicit, persisted, discovered.as_ref());

    slice.insert("industry".to_string(), json!(merged.industry));
    slice.insert("profile".to_string(), json!(merged));
    slice
}

// ---------------------------------------------------------------------------
// Tabs projection
// ---------------------------------------------------------------------------

pub fn project_tabs(stage: StageId, data: &Value) -> BTreeMap<String, Value> {
    let count = |key: &str| coerce_to_array(data.get(key)).len();
    let texts = |key: &str| string_list(data.get(key));

    let (summary, highlights) = match stage {
        StageId::Extraction => (
            text_of(data, &["summary"]).unwrap_or_else(|| "No organization overview.".into()),
            texts("competitors"),
        ),
        StageId::Competitive => (
            text_of(data, &["market_position"]).unwrap_or_else(|| "Market position not assessed.".into()),
            texts("threats"),
        ),
        StageId::Media => (
            format!(
                "{} coverage items, sentiment {}",
                count("coverage"),
                text_of(data, &["sentiment"]).unwrap_or_else(|| "neutral".into())
            ),
            texts("themes"),
        ),
        StageId::Regulatory => (
            format!(
                "{} developments, {} filings",
                count("developments"),
                count("filings")
            ),
            texts("compliance_risks"),
        ),
        StageId::Trends => (
            format!("{} trends, {} social signals", count("trends"), count("signals")),
            coerce_to_array(data.get("trends"))
                .iter()
                .filter_map(|t| match t {
                    Value::String(s) => Some(s.clone()),
                    other => text_of(other, &["topic", "name", "title"]),
                })
                .collect(),
        ),
        StageId::Synthesis => (
            text_of(data, &["headline", "summary"]).unwrap_or_else(|| "Synthesis complete.".into()),
            Vec::new(),
        ),
    };

    BTreeMap::from([
        ("summary".to_string(), Value::String(summary)),
        ("highlights".to_string(), json!(highlights)),
    ])
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orgsignal_common::StageRecord;

    use super::*;

    fn payloads(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn every_pre_synthesis_stage_has_calls() {
        let org = Organization::new("Acme");
        for stage in StageId::PRE_SYNTHESIS {
            let calls = calls_for(stage, &org, PriorSlices::new(None));
            let expected = match invocation(stage) {
                Invocation::Direct(_) => 1,
                Invocation::FanOut(methods) => methods.len(),
            };
            assert_eq!(calls.len(), expected, "{stage}");
        }
    }

    #[test]
    fn trends_params_read_media_themes_from_prior_slice() {
        let mut profile = StoredProfile::new(Organization::new("Acme"), Utc::now());
        profile.stages.insert(
            StageId::Media,
            StageRecord {
                stage: StageId::Media,
                payload: json!({"themes": ["automation", "funding"]}),
                saved_at: Utc::now(),
            },
        );
        let calls = calls_for(StageId::Trends, &Organization::new("Acme"), PriorSlices::new(Some(&profile)));
        assert_eq!(calls[0].params["media_themes"], json!(["automation", "funding"]));
    }

    #[test]
    fn competitive_slice_maps_synonyms_and_defaults() {
        let slice = map_slice(
            StageId::Competitive,
            &payloads(&[("competitor_intelligence", json!({"moves": [{"competitor": "Globex"}], "risks": "price war"}))]),
        );
        assert_eq!(slice["competitor_actions"], json!([{"competitor": "Globex"}]));
        assert_eq!(slice["threats"], json!(["price war"]));
        assert_eq!(slice["market_position"], json!(""));
        assert_eq!(slice["strengths"], json!([]));
    }

    #[test]
    fn media_sentiment_defaults_to_neutral() {
        let slice = map_slice(StageId::Media, &payloads(&[("media_monitor", json!({"coverage": []}))]));
        assert_eq!(slice["sentiment"], json!("neutral"));
    }

    #[test]
    fn extraction_slice_carries_merged_profile() {
        let explicit = Organization::new("Acme").with_industry("robotics");
        let slice = extraction_slice(
            &explicit,
            None,
            &payloads(&[(
                "organization_discovery",
                json!({"industry": "automation", "competitors": ["Globex"]}),
            )]),
        );
        assert_eq!(slice["industry"], json!("robotics"));
        assert_eq!(slice["profile"]["stakeholders"]["competitors"], json!(["Globex"]));
    }

    #[test]
    fn tabs_always_have_summary_and_highlights() {
        for stage in StageId::ALL {
            let tabs = project_tabs(stage, &json!({}));
            assert!(tabs["summary"].is_string());
            assert!(tabs["highlights"].is_array());
        }
    }
}
