//! Concurrent fan-out over independent collector calls.
//!
//! Every branch runs in its own task under its own deadline. A branch that
//! times out, errors, panics or returns an empty payload leaves `None` in its
//! slot; siblings are unaffected and nothing is raised to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::traits::AnalysisBackend;

/// Why one branch produced no value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollectorFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Error(String),
    #[error("empty payload")]
    EmptyPayload,
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Run named branches concurrently and wait for all of them.
///
/// Returns one settled outcome per branch, in input order. Never fails fast.
pub async fn join_settled<T, Fut>(
    branches: Vec<(String, Fut)>,
    deadline: Duration,
) -> Vec<(String, Result<T, CollectorFailure>)>
where
    T: Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let handles: Vec<_> = branches
        .into_iter()
        .map(|(name, branch)| {
            let handle = tokio::spawn(async move {
                match tokio::time::timeout(deadline, branch).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(CollectorFailure::Error(format!("{e:#}"))),
                    Err(_) => Err(CollectorFailure::Timeout(deadline)),
                }
            });
            (name, handle)
        })
        .collect();

    let mut settled = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let outcome = handle
            .await
            .unwrap_or_else(|e| Err(CollectorFailure::Panicked(e.to_string())));
        settled.push((name, outcome));
    }
    settled
}

/// One named call against the analysis backend.
#[derive(Debug, Clone)]
pub struct CollectorCall {
    pub name: String,
    pub method: String,
    pub params: Value,
}

impl CollectorCall {
    /// A call whose slot name is the backend method name.
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            name: method.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// name → value-or-null for every requested call.
#[derive(Debug, Clone, Default)]
pub struct FanOutResult {
    slots: BTreeMap<String, Option<Value>>,
    failures: BTreeMap<String, CollectorFailure>,
}

impl FanOutResult {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).and_then(Option::as_ref)
    }

    pub fn failure(&self, name: &str) -> Option<&CollectorFailure> {
        self.failures.get(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.slots.values().filter(|v| v.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.slots.values().filter(|v| v.is_none()).count()
    }

    /// True when there was at least one call and none produced a value.
    pub fn all_failed(&self) -> bool {
        !self.slots.is_empty() && self.succeeded() == 0
    }

    /// Successful payloads only, keyed by slot name.
    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.slots
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect()
    }
}

#[derive(Clone)]
pub struct FanOutExecutor {
    backend: Arc<dyn AnalysisBackend>,
    call_timeout: Duration,
}

impl FanOutExecutor {
    pub fn new(backend: Arc<dyn AnalysisBackend>, call_timeout: Duration) -> Self {
        Self {
            backend,
            call_timeout,
        }
    }

    /// Execute every call concurrently. Always returns a slot per call.
    pub async fn execute(&self, calls: Vec<CollectorCall>) -> FanOutResult {
        let branches = calls
            .into_iter()
            .map(|CollectorCall { name, method, params }| {
                let backend = self.backend.clone();
                let branch = async move { backend.call(&method, &params).await };
                (name, branch)
            })
            .collect();

        let mut result = FanOutResult::default();
        for (name, outcome) in join_settled(branches, self.call_timeout).await {
            let outcome = outcome.and_then(|value: Value| {
                if value.is_null() {
                    Err(CollectorFailure::EmptyPayload)
                } else {
                    Ok(value)
                }
            });
            match outcome {
                Ok(value) => {
                    debug!(collector = name.as_str(), "Collector succeeded");
                    result.slots.insert(name, Some(value));
                }
                Err(failure) => {
                    warn!(collector = name.as_str(), error = %failure, "Collector failed (non-fatal)");
                    result.slots.insert(name.clone(), None);
                    result.failures.insert(name, failure);
                }
            }
        }
        result
    }
}
