//! Admission into instanced areas
//!
//! [`AdmissionController`] decides whether a player (and the party members
//! travelling with them) may enter an instance, finding or creating the
//! record under the template lock. [`GatedAdmission`] puts a named event
//! gate in front of that decision.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::admission::{AdmissionController, AdmissionRequest};
//!
//! let controller = AdmissionController::new(registry);
//! let request = AdmissionRequest::new(player, current_area, "drake_cave")
//!     .with_party(party_id, is_leader)
//!     .with_companions(members_in_field);
//!
//! match controller.admit(&request).await {
//!     Ok(admitted) => warp_all(&admitted.admitted, admitted.destination, &admitted.spawn_point),
//!     Err(e) => say(e.caller_outcome()),
//! }
//! ```

mod controller;
mod gated;

pub use controller::AdmissionController;
pub use gated::GatedAdmission;

use crate::registry::InstanceRecord;
use crate::template::{AllocationKey, AreaId, PartyId, PlayerId, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Party membership of the requester, as reported by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyContext {
    /// Party id
    pub party_id: PartyId,
    /// Whether the requester leads the party
    pub is_leader: bool,
}

/// A request to enter an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// Requesting player
    pub player: PlayerId,
    /// Area the requester is standing in
    pub current_area: AreaId,
    /// Party context (None = solo)
    #[serde(default)]
    pub party: Option<PartyContext>,
    /// Template to enter
    pub template: TemplateId,
    /// Return area overriding the template's
    #[serde(default)]
    pub origin_override: Option<AreaId>,
    /// Lifetime overriding the template's, used only when a record is created
    #[serde(default, with = "humantime_serde")]
    pub lifetime_override: Option<Duration>,
    /// Party members entering together with the requester
    #[serde(default)]
    pub companions: Vec<PlayerId>,
}

impl AdmissionRequest {
    /// Create a solo request
    pub fn new(player: PlayerId, current_area: AreaId, template: impl Into<TemplateId>) -> Self {
        Self {
            player,
            current_area,
            party: None,
            template: template.into(),
            origin_override: None,
            lifetime_override: None,
            companions: Vec::new(),
        }
    }

    /// Attach party membership
    pub fn with_party(mut self, party_id: PartyId, is_leader: bool) -> Self {
        self.party = Some(PartyContext {
            party_id,
            is_leader,
        });
        self
    }

    /// Return occupants here on expiry
    pub fn with_origin(mut self, area: AreaId) -> Self {
        self.origin_override = Some(area);
        self
    }

    /// Use a non-default lifetime for a newly created record
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime_override = Some(lifetime);
        self
    }

    /// Bring party members along
    pub fn with_companions(mut self, companions: impl IntoIterator<Item = PlayerId>) -> Self {
        self.companions.extend(companions);
        self
    }

    /// Same request aimed at another template
    pub fn retarget(&self, template: TemplateId) -> Self {
        Self {
            template,
            ..self.clone()
        }
    }

    /// Requester followed by companions, without duplicates
    pub fn group(&self) -> Vec<PlayerId> {
        let mut group = Vec::with_capacity(1 + self.companions.len());
        for player in std::iter::once(self.player).chain(self.companions.iter().copied()) {
            if !group.contains(&player) {
                group.push(player);
            }
        }
        group
    }
}

/// Reference to the record a player was admitted into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub template: TemplateId,
    pub key: AllocationKey,
    pub instance_id: Uuid,
}

/// Successful admission; the caller relocates `admitted` to `destination`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmittedInstance {
    /// Area to relocate into
    pub destination: AreaId,
    /// Spawn point inside the destination
    pub spawn_point: String,
    /// Players to relocate, requester first
    pub admitted: Vec<PlayerId>,
    /// The record at admission time (None for fixed-area gates)
    pub record: Option<InstanceRecord>,
    /// Whether this admission created the record
    pub created: bool,
}

impl AdmittedInstance {
    /// Handle for leaving the instance later
    pub fn handle(&self) -> Option<InstanceHandle> {
        self.record.as_ref().map(|r| InstanceHandle {
            template: r.template.clone(),
            key: r.key.clone(),
            instance_id: r.id,
        })
    }

    /// When the instance expires
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.record.as_ref().map(|r| r.expires_at)
    }
}
