// Per-tab formatters. Each field lists its analytical names, then its legacy
// synonyms, then its default.

use orgsignal_common::{
    CompetitiveTab, ExecutiveTab, ForwardLookingTab, MediaTab, RegulatoryTab, TrendsTab,
};

use super::FieldReader;

pub(crate) const DEFAULT_HEADLINE: &str = "Intelligence summary unavailable";

/// Report section, with the block names it may appear under in an
/// analytical body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabDomain {
    Executive,
    Competitive,
    Media,
    Regulatory,
    MarketTrends,
    ForwardLooking,
}

impl TabDomain {
    pub fn block_keys(&self) -> &'static [&'static str] {
        match self {
            TabDomain::Executive => &["executive_summary", "executive"],
            TabDomain::Competitive => &["competitive", "competitive_landscape", "competition"],
            TabDomain::Media => &["media", "media_landscape", "stakeholders"],
            TabDomain::Regulatory => &["regulatory", "regulatory_environment"],
            TabDomain::MarketTrends => &["market_trends", "trends", "market"],
            TabDomain::ForwardLooking => &["forward_looking", "outlook", "predictions"],
        }
    }
}

pub(super) fn executive(r: &FieldReader<'_>) -> ExecutiveTab {
    ExecutiveTab {
        headline: r.text(
            &["headline", "title"],
            &["headline", "executive_headline", "title"],
            DEFAULT_HEADLINE,
        ),
        overview: r.text(
            &["overview", "summary"],
            &["executive_summary", "overview", "summary"],
            "No overview available.",
        ),
        key_findings: r.list(
            &["key_findings", "findings", "highlights"],
            &["key_findings", "findings", "key_insights"],
        ),
        immediate_actions: r.list(
            &["immediate_actions", "actions", "recommendations"],
            &["immediate_actions", "recommendations", "action_items"],
        ),
        risk_level: r.text(&["risk_level", "risk"], &["risk_level", "overall_risk"], "unknown"),
    }
}

pub(super) fn competitive(r: &FieldReader<'_>) -> CompetitiveTab {
    CompetitiveTab {
        summary: r.text(
            &["summary", "overview"],
            &["competitive_summary", "competitive_analysis"],
            "No competitive summary available.",
        ),
        competitor_actions: r.list(
            &["competitor_actions", "actions", "moves"],
            &["competitor_actions", "competitor_moves"],
        ),
        threats: r.list(&["threats"], &["competitive_threats", "threats"]),
        market_position: r.text(&["market_position", "position"], &["market_position"], "Not assessed"),
    }
}

pub(super) fn media(r: &FieldReader<'_>) -> MediaTab {
    MediaTab {
        summary: r.text(
            &["summary", "overview"],
            &["media_summary", "media_analysis"],
            "No media summary available.",
        ),
        coverage: r.list(
            &["coverage", "articles", "key_coverage"],
            &["media_coverage", "coverage", "articles"],
        ),
        narratives: r.list(&["narratives", "themes"], &["narratives", "media_narratives"]),
        key_voices: r.list(&["key_voices", "influencers", "voices"], &["key_voices", "influencers"]),
        sentiment: r.text(
            &["sentiment", "overall_sentiment"],
            &["media_sentiment"],
            "neutral",
        ),
    }
}

pub(super) fn regulatory(r: &FieldReader<'_>) -> RegulatoryTab {
    RegulatoryTab {
        summary: r.text(
            &["summary", "overview"],
            &["regulatory_summary"],
            "No regulatory summary available.",
        ),
        developments: r.list(
            &["developments", "updates"],
            &["regulatory_developments", "regulatory_updates"],
        ),
        compliance_risks: r.list(&["compliance_risks", "risks"], &["compliance_risks"]),
        upcoming_deadlines: r.list(
            &["upcoming_deadlines", "deadlines"],
            &["upcoming_deadlines", "regulatory_deadlines"],
        ),
    }
}

pub(super) fn market_trends(r: &FieldReader<'_>) -> TrendsTab {
    TrendsTab {
        summary: r.text(
            &["summary", "overview"],
            &["trends_summary", "market_summary"],
            "No market trends summary available.",
        ),
        trending_topics: r.list(
            &["trending_topics", "topics", "trends"],
            &["trending_topics", "topic_trends"],
        ),
        emerging_themes: r.list(&["emerging_themes", "themes"], &["emerging_themes", "emerging_trends"]),
        market_signals: r.list(&["market_signals", "signals"], &["market_signals"]),
    }
}

pub(super) fn forward_looking(r: &FieldReader<'_>) -> ForwardLookingTab {
    ForwardLookingTab {
        summary: r.text(
            &["summary", "outlook", "overview"],
            &["outlook", "forward_looking_summary"],
            "No outlook available.",
        ),
        predictions: r.list(&["predictions", "forecasts"], &["predictions", "forecasts"]),
        scenarios: r.list(&["scenarios"], &["scenarios"]),
        watch_list: r.list(&["watch_list", "watchlist", "monitor"], &["watch_list", "watchlist"]),
    }
}
