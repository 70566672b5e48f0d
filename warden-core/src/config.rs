//! Configuration types for the warden
//!
//! Configuration is layered with figment: built-in defaults, then
//! `warden.toml` in the working directory, then the file named by
//! `WARDEN_CONFIG_PATH`, then `WARDEN_*` environment variables (nested keys
//! separated by `__`, e.g. `WARDEN_EXPIRY__TICK=10s`).
//!
//! ```toml
//! [expiry]
//! tick = "5s"
//!
//! [[templates]]
//! id = "treasure_island"
//! destination = 251010410
//! spawn_point = "out00"
//! kind = "pooled"
//! capacity = 20
//! lifetime = "2h"
//!
//! [[gates]]
//! name = "CM_SUBWAY"
//! allow = ["SUBWAY_BOARDING"]
//! retry = ["SUBWAY_WAITING"]
//! area = 600010004
//! spawn_point = "sp"
//! ```

use crate::error::{Result, WardenError};
use crate::gate::{GateDestination, GatePhase, GatePolicy};
use crate::template::{AreaId, InstanceTemplate, TemplateId, TemplateKind};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main configuration for the warden
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    /// Expiry scheduler configuration
    #[serde(default)]
    pub expiry: ExpiryConfig,

    /// Instance templates
    #[serde(default)]
    pub templates: Vec<InstanceTemplate>,

    /// Event gate policies
    #[serde(default)]
    pub gates: Vec<GateConfig>,
}

/// Expiry scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Interval between sweeps
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Lifecycle event buffer per subscriber
    pub event_buffer: usize,

    /// Longest a single eviction notice may take to deliver
    #[serde(with = "humantime_serde")]
    pub notify_timeout: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            event_buffer: 256,
            notify_timeout: Duration::from_secs(2),
        }
    }
}

/// A gate as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Gate name, as known to the world layer
    pub name: String,

    /// States that allow admission
    #[serde(default)]
    pub allow: Vec<String>,

    /// States that deny with a retry-later outcome
    #[serde(default)]
    pub retry: Vec<String>,

    /// Route allowed admissions into this template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateId>,

    /// Route allowed admissions to this fixed area
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<AreaId>,

    /// Spawn point inside `area`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_point: Option<String>,

    /// Phases the gate cycles through when no world layer drives it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<GatePhase>,
}

impl GateConfig {
    /// Build the runtime policy for this gate
    pub fn policy(&self) -> Result<GatePolicy> {
        let destination = match (&self.template, self.area, &self.spawn_point) {
            (Some(template), None, None) => GateDestination::Template {
                template: template.clone(),
            },
            (None, Some(area), spawn_point) => GateDestination::Area {
                area,
                spawn_point: spawn_point.clone().unwrap_or_else(|| "sp".to_string()),
            },
            (Some(_), _, _) => {
                return Err(WardenError::Configuration(format!(
                    "Gate {} sets a template together with an area or spawn point",
                    self.name
                )));
            }
            (None, None, _) => {
                return Err(WardenError::Configuration(format!(
                    "Gate {} needs either a template or an area",
                    self.name
                )));
            }
        };

        Ok(GatePolicy {
            name: self.name.clone(),
            allow: self.allow.clone(),
            retry: self.retry.clone(),
            destination,
        })
    }
}

impl WardenConfig {
    /// Load configuration from defaults, `warden.toml`, `WARDEN_CONFIG_PATH`
    /// and `WARDEN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(WardenConfig::default()))
            .merge(Toml::file("warden.toml"));

        if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: WardenConfig = figment
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
            .map_err(|e| {
                WardenError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(WardenError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: WardenConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                WardenError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let config: WardenConfig = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Runtime policies for every configured gate
    pub fn policies(&self) -> Result<Vec<GatePolicy>> {
        self.gates.iter().map(GateConfig::policy).collect()
    }

    /// Look up a template by id
    pub fn template(&self, id: &str) -> Option<&InstanceTemplate> {
        self.templates.iter().find(|t| t.id.as_str() == id)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.expiry.tick.is_zero() {
            return Err(invalid("expiry.tick must be greater than zero"));
        }
        if self.expiry.notify_timeout.is_zero() {
            return Err(invalid("expiry.notify_timeout must be greater than zero"));
        }

        let mut template_ids = HashSet::new();
        for template in &self.templates {
            validate_template(template)?;
            if !template_ids.insert(template.id.as_str()) {
                return Err(invalid(format!("Duplicate template id: {}", template.id)));
            }
        }

        let mut gate_names = HashSet::new();
        for gate in &self.gates {
            if gate.name.trim().is_empty() {
                return Err(invalid("Gate name must not be empty"));
            }
            if !gate_names.insert(gate.name.as_str()) {
                return Err(invalid(format!("Duplicate gate name: {}", gate.name)));
            }
            if let Some(state) = gate.allow.iter().find(|s| gate.retry.contains(s)) {
                return Err(invalid(format!(
                    "Gate {} lists state {} as both allow and retry",
                    gate.name, state
                )));
            }
            if let GateDestination::Template { template } = gate.policy()?.destination
                && !template_ids.contains(template.as_str())
            {
                return Err(invalid(format!(
                    "Gate {} references unknown template {}",
                    gate.name, template
                )));
            }
        }

        Ok(())
    }
}

fn validate_template(template: &InstanceTemplate) -> Result<()> {
    let id = &template.id;
    if id.as_str().trim().is_empty() {
        return Err(invalid("Template id must not be empty"));
    }
    if template.lifetime.is_zero() {
        return Err(invalid(format!("Template {} has a zero lifetime", id)));
    }
    if TimeDelta::from_std(template.lifetime).is_err() {
        return Err(invalid(format!("Template {} lifetime is out of range", id)));
    }

    match template.kind {
        TemplateKind::PartyExclusive {
            max_occupants: Some(0),
        } => Err(invalid(format!("Template {} has max_occupants = 0", id))),
        TemplateKind::Pooled {
            occupants_per_slot: 0,
            ..
        } => Err(invalid(format!("Template {} has occupants_per_slot = 0", id))),
        TemplateKind::Pooled {
            capacity,
            occupants_per_slot,
        } if capacity > 0 && occupants_per_slot > capacity => Err(invalid(format!(
            "Template {} admits {} occupants per slot but only has {} slots",
            id, occupants_per_slot, capacity
        ))),
        _ => Ok(()),
    }
}

fn invalid(msg: impl Into<String>) -> WardenError {
    WardenError::Configuration(msg.into())
}
