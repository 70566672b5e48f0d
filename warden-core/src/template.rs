//! Static instance templates and the keys records are allocated under

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Field / map id of an area in the game world
pub type AreaId = u32;

/// Character id of a player session
pub type PlayerId = u64;

/// Party id as assigned by the party service
pub type PartyId = u64;

/// Identifier of an [`InstanceTemplate`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    /// Create a template id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Key a live record is stored under, unique per template.
///
/// Party-exclusive templates key on the party (or on the player when they
/// enter solo); pooled templates key on the slot index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum AllocationKey {
    Party(PartyId),
    Solo(PlayerId),
    Slot(u32),
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationKey::Party(id) => write!(f, "party:{}", id),
            AllocationKey::Solo(id) => write!(f, "solo:{}", id),
            AllocationKey::Slot(idx) => write!(f, "slot:{}", idx),
        }
    }
}

/// How a template allocates records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateKind {
    /// One record per party, opened only by the party leader
    PartyExclusive {
        /// Upper bound on occupants of a single record (None = whole party)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_occupants: Option<u32>,
    },

    /// A fixed set of interchangeable slots, filled first-fit
    Pooled {
        /// Number of slots (0 = unbounded)
        capacity: u32,

        /// Occupants a single slot admits
        #[serde(default = "default_occupants_per_slot")]
        occupants_per_slot: u32,
    },
}

fn default_occupants_per_slot() -> u32 {
    1
}

/// When a live record is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Keep the record until its deadline, even once empty
    #[default]
    OnExpiry,
    /// Release as soon as the last occupant leaves, or at the deadline
    WhenEmpty,
}

/// Immutable descriptor of an instanced destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTemplate {
    /// Template id
    pub id: TemplateId,

    /// Area the occupants are relocated into
    pub destination: AreaId,

    /// Portal name occupants spawn at
    pub spawn_point: String,

    /// Allocation strategy
    #[serde(flatten)]
    pub kind: TemplateKind,

    /// Default time before the record expires
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,

    /// Area occupants return to on expiry, unless the request overrides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_area: Option<AreaId>,

    /// Teardown policy
    #[serde(default)]
    pub release: ReleasePolicy,
}

impl InstanceTemplate {
    /// Create a party-exclusive template
    pub fn party_exclusive(
        id: impl Into<String>,
        destination: AreaId,
        spawn_point: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        Self {
            id: TemplateId::new(id),
            destination,
            spawn_point: spawn_point.into(),
            kind: TemplateKind::PartyExclusive {
                max_occupants: None,
            },
            lifetime,
            return_area: None,
            release: ReleasePolicy::default(),
        }
    }

    /// Create a pooled template with `capacity` single-occupant slots
    pub fn pooled(
        id: impl Into<String>,
        destination: AreaId,
        spawn_point: impl Into<String>,
        capacity: u32,
        lifetime: Duration,
    ) -> Self {
        Self {
            id: TemplateId::new(id),
            destination,
            spawn_point: spawn_point.into(),
            kind: TemplateKind::Pooled {
                capacity,
                occupants_per_slot: default_occupants_per_slot(),
            },
            lifetime,
            return_area: None,
            release: ReleasePolicy::default(),
        }
    }

    /// Set the default return area
    pub fn with_return_area(mut self, area: AreaId) -> Self {
        self.return_area = Some(area);
        self
    }

    /// Set the release policy
    pub fn with_release(mut self, release: ReleasePolicy) -> Self {
        self.release = release;
        self
    }

    /// Builder: cap occupants of a party-exclusive record
    pub fn with_max_occupants(mut self, max: u32) -> Self {
        if let TemplateKind::PartyExclusive { max_occupants } = &mut self.kind {
            *max_occupants = Some(max);
        }
        self
    }

    /// Builder: set how many occupants share one pooled slot
    pub fn with_occupants_per_slot(mut self, per_slot: u32) -> Self {
        if let TemplateKind::Pooled {
            occupants_per_slot, ..
        } = &mut self.kind
        {
            *occupants_per_slot = per_slot;
        }
        self
    }

    /// Whether admission requires the party leader
    pub fn is_party_exclusive(&self) -> bool {
        matches!(self.kind, TemplateKind::PartyExclusive { .. })
    }

    /// Slot count for pooled templates (None = not pooled or unbounded)
    pub fn slot_count(&self) -> Option<u32> {
        match self.kind {
            TemplateKind::Pooled { capacity, .. } if capacity > 0 => Some(capacity),
            _ => None,
        }
    }

    /// Maximum occupants of a single record (None = unbounded)
    pub fn occupant_limit(&self) -> Option<u32> {
        match self.kind {
            TemplateKind::PartyExclusive { max_occupants } => max_occupants,
            TemplateKind::Pooled {
                occupants_per_slot, ..
            } => Some(occupants_per_slot),
        }
    }

    /// Absolute deadline for a record created at `now`
    pub fn deadline_from(&self, now: DateTime<Utc>, lifetime: Duration) -> Option<DateTime<Utc>> {
        let delta = TimeDelta::from_std(lifetime).ok()?;
        now.checked_add_signed(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_accessors() {
        let golem = InstanceTemplate::party_exclusive(
            "golem_temple",
            100040500,
            "out00",
            Duration::from_secs(7200),
        );
        assert!(golem.is_party_exclusive());
        assert_eq!(golem.slot_count(), None);
        assert_eq!(golem.occupant_limit(), None);
        assert_eq!(golem.with_max_occupants(6).occupant_limit(), Some(6));

        let sand = InstanceTemplate::pooled(
            "sandstorm_hill",
            260020630,
            "out00",
            50,
            Duration::from_secs(7200),
        );
        assert!(!sand.is_party_exclusive());
        assert_eq!(sand.slot_count(), Some(50));
        assert_eq!(sand.occupant_limit(), Some(1));

        let open = InstanceTemplate::pooled("open", 1, "sp", 0, Duration::from_secs(60));
        assert_eq!(open.slot_count(), None);
    }

    #[test]
    fn test_deadline_is_absolute() {
        let template = InstanceTemplate::pooled("t", 1, "sp", 1, Duration::from_secs(120));
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let deadline = template.deadline_from(now, template.lifetime).unwrap();
        assert_eq!((deadline - now).num_seconds(), 120);
    }

    #[test]
    fn test_allocation_key_display() {
        assert_eq!(AllocationKey::Party(3).to_string(), "party:3");
        assert_eq!(AllocationKey::Solo(9).to_string(), "solo:9");
        assert_eq!(AllocationKey::Slot(0).to_string(), "slot:0");
    }

    #[test]
    fn test_kind_is_flattened_into_template() {
        let template: InstanceTemplate = serde_json::from_str(
            r#"{
                "id": "treasure_island",
                "destination": 251010410,
                "spawn_point": "out00",
                "kind": "pooled",
                "capacity": 20,
                "lifetime": "2h"
            }"#,
        )
        .unwrap();
        assert_eq!(
            template.kind,
            TemplateKind::Pooled {
                capacity: 20,
                occupants_per_slot: 1
            }
        );
        assert_eq!(template.lifetime, Duration::from_secs(7200));
        assert_eq!(template.release, ReleasePolicy::OnExpiry);
    }
}
