//! Multi-step workflow orchestration.
//!
//! Each step names a required capability, a semantic vector, and a payload.
//! The orchestrator queries the discovery registry per step, ranks candidate
//! peers by cosine similarity to the step's vector, and dispatches a signed
//! single-capability intent to the best-ranked peer. Steps run in parallel
//! under a per-step deadline.

use std::time::Duration;

use serde::Serialize;

use synapse_protocol::message::now_nanos;
use synapse_protocol::negotiation::{create_intent, rank_candidates};

use crate::error::HostError;
use crate::host::AgentHost;

/// One step in a distributed workflow.
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: String,
    /// Required capability tag for this step.
    pub capability: String,
    /// Semantic vector describing the step's goal.
    pub intent_vector: Vec<f32>,
    pub payload: String,
}

/// Outcome of a single workflow step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent_id: String,
    pub accepted: bool,
    pub reason: String,
    pub timestamp: i64,
}

/// Dispatches workflow steps to the best-matching peers.
pub struct WorkflowOrchestrator {
    host: AgentHost,
    step_timeout: Duration,
}

impl WorkflowOrchestrator {
    pub fn new(host: AgentHost, step_timeout: Duration) -> Self {
        Self { host, step_timeout }
    }

    /// Send one intent per step to the best-capable peer and collect the
    /// outcomes, in input order. A step that fails is still recorded, with
    /// `accepted = false` and the error as its reason; the first error is
    /// returned alongside the full result list.
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        steps: Vec<WorkflowStep>,
    ) -> (Vec<StepResult>, Option<HostError>) {
        let dispatches = steps.into_iter().map(|step| {
            let host = self.host.clone();
            let workflow_id = workflow_id.to_string();
            let step_timeout = self.step_timeout;
            async move {
                let step_id = step.id.clone();
                let outcome =
                    match tokio::time::timeout(step_timeout, execute_step(&host, &workflow_id, step))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(HostError::Deadline),
                    };
                (step_id, outcome)
            }
        });

        let mut results = Vec::new();
        let mut first_err = None;
        for (step_id, outcome) in futures::future::join_all(dispatches).await {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    results.push(StepResult {
                        step_id,
                        agent_id: String::new(),
                        accepted: false,
                        reason: e.to_string(),
                        timestamp: now_nanos(),
                    });
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match serde_json::to_string(&results) {
            Ok(report) => {
                tracing::info!(workflow = workflow_id, results = %report, "workflow complete")
            }
            Err(e) => tracing::warn!(workflow = workflow_id, error = %e, "report serialisation"),
        }
        (results, first_err)
    }
}

async fn execute_step(
    host: &AgentHost,
    workflow_id: &str,
    step: WorkflowStep,
) -> Result<StepResult, HostError> {
    let candidates = host.discovery().find_by_capability(&[step.capability.as_str()]);
    if candidates.is_empty() {
        return Err(HostError::NoCapablePeer(step.capability));
    }

    let ranked = rank_candidates(&step.intent_vector, candidates);
    let best = &ranked[0];

    let peer = host
        .peer_for_agent(&best.agent_id)
        .ok_or_else(|| HostError::UnknownPeer(best.agent_id.clone()))?;

    let mut intent = create_intent(
        host.agent(),
        step.intent_vector.clone(),
        vec![step.capability.clone()],
        step.payload.clone(),
    )?;
    intent.metadata.insert("workflow_id".to_string(), workflow_id.to_string());
    intent.metadata.insert("step_id".to_string(), step.id.clone());

    let response = host.send_intent(peer, intent).await?;
    Ok(StepResult {
        step_id: step.id,
        agent_id: response.agent_id,
        accepted: response.accepted,
        reason: response.reason,
        timestamp: now_nanos(),
    })
}
