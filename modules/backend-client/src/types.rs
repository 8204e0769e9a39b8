use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, Result};

// --- Analysis backend ---

#[derive(Debug, Serialize)]
pub struct AnalysisRequest<'a> {
    pub method: &'a str,
    pub params: &'a Value,
}

/// Envelope returned by the analysis backend. Older endpoints put the result
/// under `analysis`, newer ones under `data`.
#[derive(Debug, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub analysis: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResponse {
    /// Unwrap the payload. `success: false` and an empty envelope are both
    /// errors so callers can treat them as a soft failure.
    pub fn into_payload(self) -> Result<Value> {
        if !self.success {
            return Err(BackendError::Rejected(
                self.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }
        self.data
            .filter(|v| !v.is_null())
            .or(self.analysis.filter(|v| !v.is_null()))
            .ok_or_else(|| BackendError::Decode("response carried neither data nor analysis".into()))
    }
}

// --- Opportunity scoring ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityRequest {
    pub organization: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_data: Option<Value>,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpportunityResponse {
    /// Absent means success; only an explicit `false` is a rejection.
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub opportunities: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OpportunityResponse {
    pub fn into_opportunities(self) -> Result<Vec<Value>> {
        if self.success == Some(false) {
            return Err(BackendError::Rejected(
                self.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }
        Ok(self.opportunities)
    }
}

// --- Persistence ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStageRequest<'a> {
    pub org_name: &'a str,
    pub stage: &'a str,
    pub payload: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> AnalysisResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn data_takes_precedence_over_analysis() {
        let payload = response(json!({"success": true, "data": {"a": 1}, "analysis": {"b": 2}}))
            .into_payload()
            .unwrap();
        assert_eq!(payload, json!({"a": 1}));
    }

    #[test]
    fn analysis_is_used_when_data_missing() {
        let payload = response(json!({"success": true, "analysis": {"b": 2}}))
            .into_payload()
            .unwrap();
        assert_eq!(payload, json!({"b": 2}));
    }

    #[test]
    fn success_false_is_rejected() {
        let err = response(json!({"success": false, "error": "quota"}))
            .into_payload()
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(msg) if msg == "quota"));
    }

    #[test]
    fn missing_success_is_rejected() {
        assert!(response(json!({"data": {"a": 1}})).into_payload().is_err());
    }

    #[test]
    fn empty_envelope_is_a_decode_error() {
        let err = response(json!({"success": true, "data": null}))
            .into_payload()
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[test]
    fn opportunity_response_without_success_flag_is_ok() {
        let resp: OpportunityResponse =
            serde_json::from_value(json!({"opportunities": [{"title": "x"}]})).unwrap();
        assert_eq!(resp.into_opportunities().unwrap().len(), 1);
    }

    #[test]
    fn opportunity_request_uses_camel_case() {
        let req = OpportunityRequest {
            organization: json!({"name": "Acme"}),
            stage_data: Some(json!({})),
            synthesis_data: None,
            mode: "stage".into(),
            stage: Some("media".into()),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("stageData").is_some());
        assert!(value.get("synthesisData").is_none());
    }
}
