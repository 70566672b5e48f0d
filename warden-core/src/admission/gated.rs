//! Event-gated admission

use super::{AdmissionController, AdmissionRequest, AdmittedInstance};
use crate::error::AdmissionError;
use crate::gate::{EventGateSource, GateDecision, GateDestination, GatePolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Admission governed by a named gate instead of capacity
pub struct GatedAdmission {
    policies: HashMap<String, GatePolicy>,
    source: Arc<dyn EventGateSource>,
    controller: Arc<AdmissionController>,
}

impl GatedAdmission {
    pub fn new(
        policies: impl IntoIterator<Item = GatePolicy>,
        source: Arc<dyn EventGateSource>,
        controller: Arc<AdmissionController>,
    ) -> Self {
        Self {
            policies: policies.into_iter().map(|p| (p.name.clone(), p)).collect(),
            source,
            controller,
        }
    }

    /// Policy for a gate
    pub fn policy(&self, gate: &str) -> Option<&GatePolicy> {
        self.policies.get(gate)
    }

    /// Current decision for a gate, without admitting anyone
    pub async fn decision(&self, gate: &str) -> Result<GateDecision, AdmissionError> {
        let policy = self
            .policy(gate)
            .ok_or_else(|| AdmissionError::UnknownGate(gate.to_string()))?;
        let state = self.source.current_state(gate).await;
        Ok(policy.decide(state.as_deref()))
    }

    /// Admit through `gate`.
    ///
    /// Fixed-area gates route the group without touching the registry or
    /// checking party leadership. Template gates hand the request to the
    /// admission controller with the gate's template substituted.
    pub async fn admit_gated(
        &self,
        request: &AdmissionRequest,
        gate: &str,
    ) -> Result<AdmittedInstance, AdmissionError> {
        let policy = self
            .policy(gate)
            .ok_or_else(|| AdmissionError::UnknownGate(gate.to_string()))?;
        let state = self.source.current_state(gate).await;

        match policy.decide(state.as_deref()) {
            GateDecision::Allow => {}
            GateDecision::DenyRetryable => {
                debug!(gate, state = ?state, player = request.player, "Gate closing");
                return Err(AdmissionError::GateRetryLater {
                    gate: gate.to_string(),
                    state: state.unwrap_or_default(),
                });
            }
            GateDecision::DenyNotYet => {
                debug!(gate, state = ?state, player = request.player, "Gate not open");
                return Err(AdmissionError::GateNotYet {
                    gate: gate.to_string(),
                    state,
                });
            }
        }

        match &policy.destination {
            GateDestination::Area { area, spawn_point } => {
                debug!(gate, area, player = request.player, "Gate admitted to fixed area");
                Ok(AdmittedInstance {
                    destination: *area,
                    spawn_point: spawn_point.clone(),
                    admitted: request.group(),
                    record: None,
                    created: false,
                })
            }
            GateDestination::Template { template } => {
                self.controller
                    .admit(&request.retarget(template.clone()))
                    .await
            }
        }
    }
}
