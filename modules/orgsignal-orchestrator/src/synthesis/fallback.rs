use serde_json::{json, Value};

use orgsignal_common::Organization;

/// Static synthesis body used when the synthesis call fails. Same nested
/// shape as a real analytical response, with every block and field present.
pub fn fallback_synthesis(org: &Organization) -> Value {
    json!({
        "fallback": true,
        "synthesis": {
            "executive_summary": {
                "headline": format!("Intelligence synthesis unavailable for {}", org.name),
                "overview": "Synthesis could not be completed. Stage results are still available individually.",
                "key_findings": [],
                "immediate_actions": ["Re-run synthesis once the analysis backend recovers"],
                "risk_level": "unknown"
            },
            "competitive": {
                "summary": "Competitive synthesis unavailable.",
                "competitor_actions": [],
                "threats": [],
                "market_position": "Not assessed"
            },
            "media": {
                "summary": "Media synthesis unavailable.",
                "coverage": [],
                "narratives": [],
                "key_voices": [],
                "sentiment": "neutral"
            },
            "regulatory": {
                "summary": "Regulatory synthesis unavailable.",
                "developments": [],
                "compliance_risks": [],
                "upcoming_deadlines": []
            },
            "market_trends": {
                "summary": "Trend synthesis unavailable.",
                "trending_topics": [],
                "emerging_themes": [],
                "market_signals": []
            },
            "forward_looking": {
                "summary": "Outlook unavailable.",
                "predictions": [],
                "scenarios": [],
                "watch_list": []
            }
        }
    })
}
