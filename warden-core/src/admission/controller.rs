//! Admission controller
//!
//! Every admission runs under the template lock from key selection to
//! occupant insertion, so the choice of key cannot go stale before the
//! group is added.

use super::{AdmissionRequest, AdmittedInstance};
use crate::error::AdmissionError;
use crate::registry::{InstanceRegistry, PoolGuard};
use crate::template::{AllocationKey, InstanceTemplate, PlayerId, TemplateKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a group will be placed
struct Placement {
    key: AllocationKey,
    exists: bool,
}

/// Admits players into party-exclusive and pooled instances
pub struct AdmissionController {
    registry: Arc<InstanceRegistry>,
}

impl AdmissionController {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    /// The registry records are admitted into
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Admit the requester and companions into an instance of the requested template.
    ///
    /// Party-exclusive templates key on the party (or on the player when solo)
    /// and only the leader may open or enter them. Pooled templates take the
    /// lowest slot with room, creating a record there if none is live.
    pub async fn admit(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmittedInstance, AdmissionError> {
        let template = self
            .registry
            .template(&request.template)
            .ok_or_else(|| AdmissionError::UnknownTemplate(request.template.clone()))?;

        if template.is_party_exclusive()
            && let Some(party) = request.party
            && !party.is_leader
        {
            debug!(
                template = %template.id,
                player = request.player,
                party = party.party_id,
                "Non-leader tried to open a party instance"
            );
            return Err(AdmissionError::NotPartyLeader);
        }

        let lifetime = request.lifetime_override.unwrap_or(template.lifetime);
        if lifetime.is_zero()
            || template
                .deadline_from(self.registry.clock().now(), lifetime)
                .is_none()
        {
            debug!(
                template = %template.id,
                player = request.player,
                ?lifetime,
                "Rejected lifetime override"
            );
            return Err(AdmissionError::InvalidLifetime {
                template: template.id.clone(),
                lifetime,
            });
        }

        let group = request.group();
        let mut guard = self.registry.lock(&template.id).await?;

        let placement = match template.kind {
            TemplateKind::PartyExclusive { .. } => exclusive_placement(&guard, request)?,
            TemplateKind::Pooled { .. } => pooled_placement(&guard, &template, &group)?,
        };

        if !placement.exists {
            let limit = template.occupant_limit();
            if limit.is_some_and(|l| group.len() > l as usize) {
                warn!(
                    template = %template.id,
                    group = group.len(),
                    "Group larger than a single instance"
                );
                return Err(AdmissionError::CapacityExceeded {
                    template: template.id.clone(),
                    key: placement.key,
                });
            }

            let origin = request
                .origin_override
                .or(template.return_area)
                .unwrap_or(request.current_area);
            guard.create(placement.key.clone(), lifetime, origin)?;
        }

        let record = match guard.add_occupants(&placement.key, &group) {
            Ok(record) => record.clone(),
            Err(e) => {
                warn!(template = %template.id, key = %placement.key, error = %e, "Admission lost race for room");
                return Err(e.into());
            }
        };
        drop(guard);

        if placement.exists {
            debug!(
                template = %template.id,
                key = %record.key,
                instance_id = %record.id,
                players = ?group,
                "Joined existing instance"
            );
        } else {
            info!(
                template = %template.id,
                key = %record.key,
                instance_id = %record.id,
                players = ?group,
                expires_at = %record.expires_at,
                "Opened instance"
            );
        }

        Ok(AdmittedInstance {
            destination: template.destination,
            spawn_point: template.spawn_point.clone(),
            admitted: group,
            record: Some(record),
            created: !placement.exists,
        })
    }
}

fn exclusive_placement(
    guard: &PoolGuard<'_>,
    request: &AdmissionRequest,
) -> Result<Placement, AdmissionError> {
    let key = match request.party {
        Some(party) => AllocationKey::Party(party.party_id),
        None => AllocationKey::Solo(request.player),
    };

    match guard.find(&key) {
        // Past its deadline but not swept yet; the next sweep frees the key
        Some(record) if record.is_expired(guard.now()) => {
            warn!(template = %guard.template().id, key = %key, "Instance is closing");
            Err(AdmissionError::InstancesFull(guard.template().id.clone()))
        }
        Some(_) => Ok(Placement { key, exists: true }),
        None => Ok(Placement { key, exists: false }),
    }
}

/// First slot, lowest index first, that is either free or has room for the group
fn pooled_placement(
    guard: &PoolGuard<'_>,
    template: &InstanceTemplate,
    group: &[PlayerId],
) -> Result<Placement, AdmissionError> {
    let limit = template.occupant_limit();
    let now = guard.now();
    let slots = template.slot_count().map_or(u32::MAX, |n| n - 1);

    for slot in 0..=slots {
        let key = AllocationKey::Slot(slot);
        match guard.find(&key) {
            None => return Ok(Placement { key, exists: false }),
            Some(record) if !record.is_expired(now) && record.has_room_for(group, limit) => {
                return Ok(Placement { key, exists: true });
            }
            Some(_) => {}
        }
    }

    warn!(
        template = %template.id,
        slots = guard.len(),
        "All instances are in use"
    );
    Err(AdmissionError::InstancesFull(template.id.clone()))
}
