//! Event gates
//!
//! A gate is a named piece of world state (a boarding window, an elevator
//! position) that decides whether a gated admission may proceed. The warden
//! only ever reads gate state through [`EventGateSource`].
//!
//! Two sources are provided:
//! - [`GateBoard`]: a map the world layer writes to as its events fire
//! - [`GateSchedule`]: phases that cycle on the wall clock, aligned to the
//!   Unix epoch so every process agrees on the current phase

use crate::clock::Clock;
use crate::template::{AreaId, TemplateId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Read-only access to named gate state
#[async_trait]
pub trait EventGateSource: Send + Sync {
    /// Current state label of `gate`, or `None` if the gate is unknown or idle
    async fn current_state(&self, gate: &str) -> Option<String>;
}

/// Gate state pushed by the world layer
#[derive(Debug, Default)]
pub struct GateBoard {
    states: RwLock<HashMap<String, String>>,
}

impl GateBoard {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state of a gate
    pub async fn set(&self, gate: impl Into<String>, state: impl Into<String>) {
        let gate = gate.into();
        let state = state.into();
        tracing::debug!(gate = %gate, state = %state, "Gate state changed");
        self.states.write().await.insert(gate, state);
    }

    /// Forget a gate's state
    pub async fn clear(&self, gate: &str) -> Option<String> {
        self.states.write().await.remove(gate)
    }
}

#[async_trait]
impl EventGateSource for GateBoard {
    async fn current_state(&self, gate: &str) -> Option<String> {
        self.states.read().await.get(gate).cloned()
    }
}

/// One phase of a cycling gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePhase {
    /// State label while the phase is active
    pub state: String,
    /// How long the phase lasts
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl GatePhase {
    pub fn new(state: impl Into<String>, duration: Duration) -> Self {
        Self {
            state: state.into(),
            duration,
        }
    }
}

/// Gates whose state follows a fixed cycle of phases
pub struct GateSchedule {
    cycles: HashMap<String, Vec<GatePhase>>,
    clock: Arc<dyn Clock>,
}

impl GateSchedule {
    /// Create a schedule with no gates
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cycles: HashMap::new(),
            clock,
        }
    }

    /// Add a cycling gate; phases with zero duration are ignored
    pub fn with_gate(mut self, gate: impl Into<String>, phases: Vec<GatePhase>) -> Self {
        let phases: Vec<_> = phases
            .into_iter()
            .filter(|p| !p.duration.is_zero())
            .collect();
        if !phases.is_empty() {
            self.cycles.insert(gate.into(), phases);
        }
        self
    }

    /// Names of scheduled gates
    pub fn gates(&self) -> impl Iterator<Item = &str> {
        self.cycles.keys().map(String::as_str)
    }

    /// State of `gate` at `at`
    pub fn state_at(&self, gate: &str, at: DateTime<Utc>) -> Option<&str> {
        let phases = self.cycles.get(gate)?;
        let cycle_ms = phases
            .iter()
            .fold(0i64, |total, p| total.saturating_add(phase_millis(p.duration)));
        if cycle_ms <= 0 {
            return None;
        }

        let mut offset = at.timestamp_millis().rem_euclid(cycle_ms);
        for phase in phases {
            let len = phase_millis(phase.duration);
            if offset < len {
                return Some(phase.state.as_str());
            }
            offset -= len;
        }
        None
    }
}

fn phase_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventGateSource for GateSchedule {
    async fn current_state(&self, gate: &str) -> Option<String> {
        self.state_at(gate, self.clock.now()).map(str::to_string)
    }
}

/// Where an allowed gated admission is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateDestination {
    /// A fixed shared area; no instance record is created
    Area { area: AreaId, spawn_point: String },
    /// An instance template, admitted through the regular controller
    Template { template: TemplateId },
}

/// Verdict of a gate policy for the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Admission may proceed
    Allow,
    /// The gate is closing; the caller may try again for the next cycle
    DenyRetryable,
    /// The gate has not opened
    DenyNotYet,
}

/// Maps a gate's state labels to decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Gate name
    pub name: String,
    /// States in which admission is allowed
    pub allow: Vec<String>,
    /// States that deny with a retry-later outcome
    #[serde(default)]
    pub retry: Vec<String>,
    /// Where allowed admissions go
    pub destination: GateDestination,
}

impl GatePolicy {
    /// Policy routing to a fixed area
    pub fn to_area(name: impl Into<String>, area: AreaId, spawn_point: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow: Vec::new(),
            retry: Vec::new(),
            destination: GateDestination::Area {
                area,
                spawn_point: spawn_point.into(),
            },
        }
    }

    /// Policy routing to an instance template
    pub fn to_template(name: impl Into<String>, template: impl Into<TemplateId>) -> Self {
        Self {
            name: name.into(),
            allow: Vec::new(),
            retry: Vec::new(),
            destination: GateDestination::Template {
                template: template.into(),
            },
        }
    }

    pub fn allow(mut self, state: impl Into<String>) -> Self {
        self.allow.push(state.into());
        self
    }

    pub fn retry(mut self, state: impl Into<String>) -> Self {
        self.retry.push(state.into());
        self
    }

    /// Decide for the given state; unknown and missing states are "not yet"
    pub fn decide(&self, state: Option<&str>) -> GateDecision {
        match state {
            Some(s) if self.allow.iter().any(|a| a == s) => GateDecision::Allow,
            Some(s) if self.retry.iter().any(|r| r == s) => GateDecision::DenyRetryable,
            _ => GateDecision::DenyNotYet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn subway() -> GatePolicy {
        GatePolicy::to_area("CM_SUBWAY", 600010004, "sp")
            .allow("SUBWAY_BOARDING")
            .retry("SUBWAY_WAITING")
    }

    #[test]
    fn test_policy_decisions() {
        let policy = subway();
        assert_eq!(policy.decide(Some("SUBWAY_BOARDING")), GateDecision::Allow);
        assert_eq!(
            policy.decide(Some("SUBWAY_WAITING")),
            GateDecision::DenyRetryable
        );
        assert_eq!(
            policy.decide(Some("SUBWAY_DEPARTED")),
            GateDecision::DenyNotYet
        );
        assert_eq!(policy.decide(None), GateDecision::DenyNotYet);
    }

    #[tokio::test]
    async fn test_board_tracks_state() {
        let board = GateBoard::new();
        assert_eq!(board.current_state("CM_SUBWAY").await, None);

        board.set("CM_SUBWAY", "SUBWAY_WAITING").await;
        board.set("CM_SUBWAY", "SUBWAY_BOARDING").await;
        assert_eq!(
            board.current_state("CM_SUBWAY").await.as_deref(),
            Some("SUBWAY_BOARDING")
        );

        assert!(board.clear("CM_SUBWAY").await.is_some());
        assert_eq!(board.current_state("CM_SUBWAY").await, None);
    }

    #[tokio::test]
    async fn test_schedule_cycles_from_epoch() {
        let minute = Duration::from_secs(60);
        let start = DateTime::from_timestamp(1_700_000_040, 0).unwrap(); // whole minute
        let clock = ManualClock::new(start);
        let schedule = GateSchedule::new(Arc::new(clock.clone())).with_gate(
            "elevator",
            vec![
                GatePhase::new("GOING_DOWN", minute),
                GatePhase::new("2ND_FLOOR", minute),
                GatePhase::new("GOING_UP", minute),
                GatePhase::new("99TH_FLOOR", minute),
            ],
        );

        let first = schedule.current_state("elevator").await.unwrap();
        let mut seen = vec![first.clone()];
        for _ in 0..4 {
            clock.advance(minute);
            seen.push(schedule.current_state("elevator").await.unwrap());
        }

        // Four phases later the cycle is back where it started
        assert_eq!(seen[4], first);
        assert_ne!(seen[0], seen[1]);
        assert_eq!(schedule.current_state("unknown").await, None);
    }

    #[test]
    fn test_schedule_phase_boundaries() {
        let clock = ManualClock::default();
        let schedule = GateSchedule::new(Arc::new(clock)).with_gate(
            "CM_SUBWAY",
            vec![
                GatePhase::new("SUBWAY_BOARDING", Duration::from_secs(240)),
                GatePhase::new("SUBWAY_WAITING", Duration::from_secs(60)),
                GatePhase::new("SUBWAY_DEPARTED", Duration::ZERO),
            ],
        );

        let cycle_start = DateTime::from_timestamp(300 * 5_000_000, 0).unwrap();
        let at = |secs| cycle_start + chrono::TimeDelta::seconds(secs);

        assert_eq!(schedule.state_at("CM_SUBWAY", at(0)), Some("SUBWAY_BOARDING"));
        assert_eq!(schedule.state_at("CM_SUBWAY", at(239)), Some("SUBWAY_BOARDING"));
        assert_eq!(schedule.state_at("CM_SUBWAY", at(240)), Some("SUBWAY_WAITING"));
        assert_eq!(schedule.state_at("CM_SUBWAY", at(300)), Some("SUBWAY_BOARDING"));
    }

    #[test]
    fn test_schedule_with_huge_phases_does_not_overflow() {
        let schedule = GateSchedule::new(Arc::new(ManualClock::default())).with_gate(
            "eternal",
            vec![
                GatePhase::new("OPEN", Duration::MAX),
                GatePhase::new("CLOSED", Duration::MAX),
            ],
        );

        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(schedule.state_at("eternal", at), Some("OPEN"));
    }

    #[test]
    fn test_destination_serde() {
        let dest: GateDestination =
            serde_json::from_str(r#"{"type":"template","template":"orb_ferry"}"#).unwrap();
        assert_eq!(
            dest,
            GateDestination::Template {
                template: TemplateId::new("orb_ferry")
            }
        );
    }
}
