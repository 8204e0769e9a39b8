//! End-to-end pipeline runs against mocked backends.
//!
//! No network: every backend method is answered by `MockBackend`, scoring by
//! `MockScorer`, persistence by the in-memory store, time by `ManualClock`.

use std::sync::Arc;

use serde_json::{json, Value};

use orgsignal_common::{StageId, TrendDirection, Urgency, TAB_KEYS};
use orgsignal_orchestrator::pipeline::{Coordinator, PipelineRequest};
use orgsignal_orchestrator::testing::{
    acme, acme_backend, test_deps, ManualClock, MockBackend, MockScorer,
};

fn coordinator(backend: MockBackend, scorer: MockScorer) -> (Arc<MockBackend>, Arc<MockScorer>, Coordinator) {
    let backend = Arc::new(backend);
    let scorer = Arc::new(scorer);
    let clock = Arc::new(ManualClock::new());
    let coordinator = Coordinator::new(test_deps(backend.clone(), scorer.clone(), clock));
    (backend, scorer, coordinator)
}

fn count_nulls(value: &Value) -> usize {
    match value {
        Value::Null => 1,
        Value::Array(items) => items.iter().map(count_nulls).sum(),
        Value::Object(map) => map.values().map(count_nulls).sum(),
        _ => 0,
    }
}

fn assert_complete_tabs(tabs: &Value) {
    for key in TAB_KEYS {
        let tab = tabs[key].as_object().unwrap_or_else(|| panic!("missing tab {key}"));
        assert!(!tab.is_empty(), "empty tab {key}");
    }
    assert_eq!(count_nulls(tabs), 0, "tabs contain nulls: {tabs}");
}

#[tokio::test]
async fn acme_with_media_collector_down_still_completes() {
    let scorer = MockScorer::new()
        .on_stage(
            StageId::Competitive,
            vec![json!({"title": "Counter Globex price cut", "urgency": "this week", "confidence": 0.8})],
        )
        .on_comprehensive(vec![
            json!({"title": "Publish CE marking plan", "timeframe": "next quarter"}),
            json!({"title": "Brief TechCrunch on Series C", "urgency": "urgent", "confidence": 90}),
        ]);
    let (_, _, coordinator) = coordinator(acme_backend().failing("media_monitor"), scorer);

    let report = coordinator.run(PipelineRequest::new(acme())).await;

    let order: Vec<StageId> = report.stages.iter().map(|s| s.stage_id).collect();
    assert_eq!(order, StageId::ALL.to_vec());

    for stage in StageId::PRE_SYNTHESIS {
        let result = report.stage(stage).unwrap();
        if stage == StageId::Media {
            assert!(!result.success);
            assert!(result.error.is_some());
        } else {
            assert!(result.success, "{stage} failed: {:?}", result.error);
        }
    }

    assert!(report.success);
    assert!(report.stage(StageId::Synthesis).unwrap().success);
    assert_complete_tabs(&serde_json::to_value(&report.tabs).unwrap());
    assert_eq!(
        report.tabs.executive_summary.headline,
        "Acme is gaining ground as price pressure builds"
    );

    let titles: Vec<&str> = report.opportunities.iter().map(|o| o.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Brief TechCrunch on Series C",
            "Counter Globex price cut",
            "Publish CE marking plan"
        ]
    );
    assert_eq!(report.opportunities[0].urgency, Urgency::Urgent);
    assert_eq!(report.opportunities[2].confidence, 80);
}

#[tokio::test]
async fn canonical_intelligence_flattens_successful_stages() {
    let (_, _, coordinator) = coordinator(acme_backend(), MockScorer::new());
    let report = coordinator.run(PipelineRequest::new(acme())).await;
    let canonical = &report.canonical;

    let globex = canonical
        .entity_actions
        .iter()
        .find(|a| a.entity == "Globex" && a.entity_type == "competitor")
        .unwrap();
    assert_eq!(globex.impact, "high");
    assert!((globex.relevance - 0.9).abs() < 1e-9);

    let initech = canonical
        .entity_actions
        .iter()
        .find(|a| a.entity == "Initech")
        .unwrap();
    assert_eq!(initech.impact, "medium");
    assert!((initech.relevance - 0.7).abs() < 1e-9);

    assert!(canonical.entity_actions.iter().any(|a| a.entity_type == "legal"));
    assert!(canonical.entity_actions.iter().any(|a| a.entity_type == "media"));

    let automation = canonical
        .topic_trends
        .iter()
        .find(|t| t.topic == "automation")
        .unwrap();
    assert_eq!(automation.trend_direction, TrendDirection::Increasing);
    assert_eq!(automation.mention_count, 12);

    // Media coverage plus the social signal.
    assert_eq!(canonical.raw_signals.len(), 2);
}

#[tokio::test]
async fn extraction_enriches_the_reported_profile() {
    let (_, _, coordinator) = coordinator(acme_backend(), MockScorer::new());
    let report = coordinator.run(PipelineRequest::new(acme())).await;

    assert_eq!(report.organization.industry.as_deref(), Some("robotics"));
    assert_eq!(
        report.organization.stakeholders.competitors,
        vec!["Globex".to_string(), "Initech".to_string()]
    );
    assert!(report.organization.keywords.contains(&"cobots".to_string()));
}

#[tokio::test]
async fn synthesis_failure_returns_complete_fallback_report() {
    let (_, _, coordinator) = coordinator(
        acme_backend().failing("synthesize_intelligence"),
        MockScorer::new(),
    );
    let report = coordinator.run(PipelineRequest::new(acme())).await;

    assert!(!report.success);
    assert!(report.error.is_some());
    assert!(!report.stage(StageId::Synthesis).unwrap().success);
    assert!(report.tabs.executive_summary.headline.contains("unavailable"));
    assert_complete_tabs(&serde_json::to_value(&report.tabs).unwrap());
    assert!(report.stats().synthesis_fallback);
}

#[tokio::test]
async fn every_backend_down_still_yields_structured_report() {
    let (_, _, coordinator) = coordinator(MockBackend::new(), MockScorer::new().failing());
    let report = coordinator.run(PipelineRequest::new(acme())).await;

    assert_eq!(report.stages.len(), 6);
    assert!(report.stages.iter().all(|s| !s.success));
    assert!(report.stages.iter().all(|s| s.data.is_object()));
    assert!(report.canonical.entity_actions.is_empty());
    assert!(report.opportunities.is_empty());
    assert_complete_tabs(&serde_json::to_value(&report.tabs).unwrap());

    let stats = report.stats();
    assert_eq!(stats.stages_succeeded, 0);
    assert_eq!(stats.failed_stages.len(), 6);
}

#[tokio::test]
async fn opportunity_scoring_failure_is_not_fatal() {
    let (_, scorer, coordinator) = coordinator(acme_backend(), MockScorer::new().failing());
    let report = coordinator.run(PipelineRequest::new(acme())).await;

    assert!(report.success);
    assert!(report.opportunities.is_empty());
    // Five stage passes plus the comprehensive pass.
    assert_eq!(scorer.request_count(), 6);
    assert_eq!(scorer.modes().last().map(String::as_str), Some("comprehensive"));
}

#[tokio::test]
async fn concurrent_identical_runs_share_stage_producers() {
    let (backend, _, coordinator) = coordinator(acme_backend(), MockScorer::new());

    let (a, b) = tokio::join!(
        coordinator.run(PipelineRequest::new(acme())),
        coordinator.run(PipelineRequest::new(acme())),
    );

    assert!(a.success && b.success);
    for method in [
        "organization_discovery",
        "competitor_intelligence",
        "market_position",
        "media_monitor",
        "regulatory_tracker",
        "legal_filings",
        "trend_analyzer",
        "social_signals",
    ] {
        assert_eq!(backend.call_count(method), 1, "{method}");
    }
    assert_eq!(
        a.stage(StageId::Competitive).unwrap().completed_at,
        b.stage(StageId::Competitive).unwrap().completed_at
    );
}
