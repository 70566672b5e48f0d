//! Instance warden
//!
//! [`InstanceWarden`] wires the registry, admission controller, gated
//! admission and expiry scheduler together from a [`WardenConfig`]. It is
//! the entry point the scripting host holds on to.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::prelude::*;
//!
//! let (tx, mut evictions) = eviction_channel(256);
//! let warden = InstanceWarden::builder()
//!     .config(WardenConfig::load()?)
//!     .eviction_handler(Arc::new(ChannelEvictionHandler::new(tx)))
//!     .build()?;
//! let expiry = warden.start_expiry();
//!
//! let admitted = warden
//!     .admit(&AdmissionRequest::new(player, field, "treasure_island"))
//!     .await?;
//!
//! expiry.shutdown().await;
//! ```

use crate::admission::{
    AdmissionController, AdmissionRequest, AdmittedInstance, GatedAdmission, InstanceHandle,
};
use crate::clock::{Clock, SystemClock};
use crate::config::WardenConfig;
use crate::error::{AdmissionError, RegistryError, Result, WardenError};
use crate::events::{EventBus, LifecycleEvent, LoggingObserver};
use crate::expiry::{
    EvictionHandler, ExpiryHandle, ExpiryScheduler, LoggingEvictionHandler, SweepReport,
};
use crate::gate::{EventGateSource, GateDecision, GateDestination, GatePolicy, GateSchedule};
use crate::registry::InstanceRegistry;
use crate::template::{InstanceTemplate, PlayerId};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Admission control and expiry for a set of instance templates
pub struct InstanceWarden {
    config: WardenConfig,
    registry: Arc<InstanceRegistry>,
    controller: Arc<AdmissionController>,
    gated: GatedAdmission,
    scheduler: Arc<ExpiryScheduler>,
}

impl InstanceWarden {
    /// Start building a warden
    pub fn builder() -> WardenBuilder {
        WardenBuilder::new()
    }

    /// Admit a player (and companions) into an instance
    pub async fn admit(
        &self,
        request: &AdmissionRequest,
    ) -> std::result::Result<AdmittedInstance, AdmissionError> {
        self.controller.admit(request).await
    }

    /// Admit through a named gate
    pub async fn admit_gated(
        &self,
        request: &AdmissionRequest,
        gate: &str,
    ) -> std::result::Result<AdmittedInstance, AdmissionError> {
        self.gated.admit_gated(request, gate).await
    }

    /// What a gate would decide right now
    pub async fn gate_decision(
        &self,
        gate: &str,
    ) -> std::result::Result<GateDecision, AdmissionError> {
        self.gated.decision(gate).await
    }

    /// Remove a player from the instance they were admitted into.
    ///
    /// Returns true when the instance was released because it emptied.
    pub async fn leave(&self, handle: &InstanceHandle, player: PlayerId) -> Result<bool> {
        let mut guard = self.registry.lock(&handle.template).await?;

        match guard.find(&handle.key) {
            Some(record) if record.id == handle.instance_id => {}
            _ => {
                return Err(RegistryError::NotFound {
                    template: handle.template.clone(),
                    key: handle.key.clone(),
                }
                .into());
            }
        }

        let released = guard.remove_occupant(&handle.key, player)?;
        tracing::debug!(
            template = %handle.template,
            key = %handle.key,
            player,
            released,
            "Occupant left instance"
        );
        Ok(released)
    }

    /// Run one expiry sweep now
    pub async fn sweep(&self) -> SweepReport {
        self.scheduler.sweep().await
    }

    /// Start the periodic expiry loop on the configured tick
    pub fn start_expiry(&self) -> ExpiryHandle {
        tracing::info!(tick = ?self.config.expiry.tick, "Starting expiry scheduler");
        self.scheduler.clone().spawn(self.config.expiry.tick)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.registry.events().subscribe()
    }

    /// The underlying registry
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// The configuration the warden was built from
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }
}

/// Builder for [`InstanceWarden`]
pub struct WardenBuilder {
    config: WardenConfig,
    templates: Vec<InstanceTemplate>,
    gates: Vec<GatePolicy>,
    clock: Option<Arc<dyn Clock>>,
    eviction_handler: Option<Arc<dyn EvictionHandler>>,
    gate_source: Option<Arc<dyn EventGateSource>>,
    log_events: bool,
}

impl WardenBuilder {
    /// Create a builder with default configuration and no templates
    pub fn new() -> Self {
        Self {
            config: WardenConfig::default(),
            templates: Vec::new(),
            gates: Vec::new(),
            clock: None,
            eviction_handler: None,
            gate_source: None,
            log_events: false,
        }
    }

    /// Use a loaded configuration
    pub fn config(mut self, config: WardenConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a template on top of the configured ones
    pub fn template(mut self, template: InstanceTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Add a gate policy on top of the configured ones
    pub fn gate(mut self, policy: GatePolicy) -> Self {
        self.gates.push(policy);
        self
    }

    /// Clock for deadlines and gate schedules
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Receiver of eviction notices (defaults to logging them)
    pub fn eviction_handler(mut self, handler: Arc<dyn EvictionHandler>) -> Self {
        self.eviction_handler = Some(handler);
        self
    }

    /// External gate state (defaults to the configured gate cycles)
    pub fn gate_source(mut self, source: Arc<dyn EventGateSource>) -> Self {
        self.gate_source = Some(source);
        self
    }

    /// Log every lifecycle event through [`LoggingObserver`].
    ///
    /// The observer is spawned by [`build`](Self::build), which must then run
    /// inside a Tokio runtime.
    pub fn log_events(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Build the warden
    pub fn build(self) -> Result<InstanceWarden> {
        let mut config = self.config;
        config.templates.extend(self.templates);
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = EventBus::new(config.expiry.event_buffer);
        let registry = Arc::new(InstanceRegistry::new(
            config.templates.iter().cloned(),
            clock.clone(),
            events,
        )?);

        if self.log_events {
            // Exits once the registry, and with it the bus, is dropped
            LoggingObserver::spawn(registry.events());
        }

        let mut policies = config.policies()?;
        for policy in self.gates {
            if let GateDestination::Template { template } = &policy.destination
                && registry.template(template).is_none()
            {
                return Err(WardenError::Configuration(format!(
                    "Gate {} references unknown template {}",
                    policy.name, template
                )));
            }
            if policies.iter().any(|p| p.name == policy.name) {
                return Err(WardenError::Configuration(format!(
                    "Duplicate gate name: {}",
                    policy.name
                )));
            }
            policies.push(policy);
        }

        let gate_source = match self.gate_source {
            Some(source) => source,
            None => {
                let schedule = config
                    .gates
                    .iter()
                    .fold(GateSchedule::new(clock.clone()), |schedule, gate| {
                        schedule.with_gate(gate.name.clone(), gate.cycle.clone())
                    });
                Arc::new(schedule)
            }
        };

        let handler = self
            .eviction_handler
            .unwrap_or_else(|| Arc::new(LoggingEvictionHandler));

        let controller = Arc::new(AdmissionController::new(registry.clone()));
        let gated = GatedAdmission::new(policies, gate_source, controller.clone());
        let scheduler = Arc::new(
            ExpiryScheduler::new(registry.clone(), handler)
                .with_notify_timeout(config.expiry.notify_timeout),
        );

        tracing::info!(
            templates = config.templates.len(),
            gates = config.gates.len(),
            "Instance warden ready"
        );

        Ok(InstanceWarden {
            config,
            registry,
            controller,
            gated,
            scheduler,
        })
    }
}

impl Default for WardenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
