//! Instance registry
//!
//! The registry is the only owner of live [`InstanceRecord`]s. Records are
//! grouped per template, and every template's records sit behind one async
//! mutex. Holding a [`PoolGuard`] therefore serializes find-then-create,
//! pooled slot scans, occupant changes and expiry for that template, which
//! is what keeps two sessions from both creating the same key or both
//! claiming the same empty slot.
//!
//! Every record is pushed onto the [`ExpiryQueue`] when it is created, so no
//! record can exist without a scheduled teardown.

use crate::clock::Clock;
use crate::error::{RegistryError, Result, WardenError};
use crate::events::{EventBus, LifecycleEvent, ReleaseReason};
use crate::expiry::{EvictionNotice, ExpiryQueue, ScheduledExpiry};
use crate::template::{AllocationKey, AreaId, InstanceTemplate, PlayerId, ReleasePolicy, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// A live instance of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Unique id of this incarnation
    pub id: Uuid,
    /// Template the record was created from
    pub template: TemplateId,
    /// Allocation key within the template
    pub key: AllocationKey,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Absolute expiry deadline
    pub expires_at: DateTime<Utc>,
    /// Area occupants are returned to on expiry
    pub origin_area: AreaId,
    occupants: BTreeSet<PlayerId>,
}

impl InstanceRecord {
    /// Players currently admitted
    pub fn occupants(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.occupants.iter().copied()
    }

    /// Number of players currently admitted
    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    /// Whether `player` is admitted
    pub fn contains(&self, player: PlayerId) -> bool {
        self.occupants.contains(&player)
    }

    /// Whether the record has no occupants
    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    /// Whether the deadline has been reached
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether `players` could all be admitted under `limit`
    pub fn has_room_for(&self, players: &[PlayerId], limit: Option<u32>) -> bool {
        let Some(limit) = limit else {
            return true;
        };
        let incoming = players
            .iter()
            .filter(|p| !self.occupants.contains(*p))
            .collect::<BTreeSet<_>>()
            .len();
        self.occupants.len() + incoming <= limit as usize
    }
}

#[derive(Debug, Default)]
struct TemplatePool {
    records: BTreeMap<AllocationKey, InstanceRecord>,
}

struct TemplateEntry {
    template: Arc<InstanceTemplate>,
    pool: Mutex<TemplatePool>,
}

/// Registry of live instance records
pub struct InstanceRegistry {
    entries: HashMap<TemplateId, TemplateEntry>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    expiry: ExpiryQueue,
}

impl InstanceRegistry {
    /// Create a registry over a fixed set of templates
    pub fn new(
        templates: impl IntoIterator<Item = InstanceTemplate>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self> {
        let mut entries = HashMap::new();
        for template in templates {
            let id = template.id.clone();
            let entry = TemplateEntry {
                template: Arc::new(template),
                pool: Mutex::new(TemplatePool::default()),
            };
            if entries.insert(id.clone(), entry).is_some() {
                return Err(WardenError::Configuration(format!(
                    "Duplicate template id: {}",
                    id
                )));
            }
        }

        Ok(Self {
            entries,
            events,
            clock,
            expiry: ExpiryQueue::new(),
        })
    }

    /// Look up a template
    pub fn template(&self, id: &TemplateId) -> Option<Arc<InstanceTemplate>> {
        self.entries.get(id).map(|e| e.template.clone())
    }

    /// All registered templates, sorted by id
    pub fn templates(&self) -> Vec<Arc<InstanceTemplate>> {
        let mut out: Vec<_> = self.entries.values().map(|e| e.template.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// The queue records are scheduled on
    pub fn expiry_queue(&self) -> &ExpiryQueue {
        &self.expiry
    }

    /// The lifecycle event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The clock deadlines are computed against
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Lock a template's records for a serialized sequence of operations
    pub async fn lock(
        &self,
        template: &TemplateId,
    ) -> std::result::Result<PoolGuard<'_>, RegistryError> {
        let entry = self
            .entries
            .get(template)
            .ok_or_else(|| RegistryError::UnknownTemplate(template.clone()))?;

        Ok(PoolGuard {
            template: entry.template.clone(),
            pool: entry.pool.lock().await,
            events: &self.events,
            clock: self.clock.as_ref(),
            expiry: &self.expiry,
        })
    }

    /// Find the live record for a key
    pub async fn find(
        &self,
        template: &TemplateId,
        key: &AllocationKey,
    ) -> std::result::Result<Option<InstanceRecord>, RegistryError> {
        let guard = self.lock(template).await?;
        Ok(guard.find(key).cloned())
    }

    /// Create a record; fails with `AlreadyExists` if the key is live
    pub async fn create(
        &self,
        template: &TemplateId,
        key: AllocationKey,
        lifetime: Duration,
        origin_area: AreaId,
    ) -> std::result::Result<InstanceRecord, RegistryError> {
        let mut guard = self.lock(template).await?;
        guard.create(key, lifetime, origin_area).cloned()
    }

    /// Release a record regardless of occupants
    pub async fn release(
        &self,
        template: &TemplateId,
        key: &AllocationKey,
    ) -> std::result::Result<InstanceRecord, RegistryError> {
        let mut guard = self.lock(template).await?;
        guard.release(key, ReleaseReason::Manual)
    }

    /// Add one occupant to a record
    pub async fn add_occupant(
        &self,
        template: &TemplateId,
        key: &AllocationKey,
        player: PlayerId,
    ) -> std::result::Result<InstanceRecord, RegistryError> {
        let mut guard = self.lock(template).await?;
        guard.add_occupants(key, &[player]).cloned()
    }

    /// Remove one occupant from a record.
    ///
    /// Returns true when this emptied a `when_empty` record and released it.
    pub async fn remove_occupant(
        &self,
        template: &TemplateId,
        key: &AllocationKey,
        player: PlayerId,
    ) -> std::result::Result<bool, RegistryError> {
        let mut guard = self.lock(template).await?;
        guard.remove_occupant(key, player)
    }

    /// Copies of all live records of a template, ordered by key
    pub async fn snapshot(
        &self,
        template: &TemplateId,
    ) -> std::result::Result<Vec<InstanceRecord>, RegistryError> {
        let guard = self.lock(template).await?;
        Ok(guard.records().cloned().collect())
    }

    /// Number of live records of a template
    pub async fn record_count(
        &self,
        template: &TemplateId,
    ) -> std::result::Result<usize, RegistryError> {
        let guard = self.lock(template).await?;
        Ok(guard.len())
    }
}

/// Exclusive access to one template's records
pub struct PoolGuard<'a> {
    template: Arc<InstanceTemplate>,
    pool: MutexGuard<'a, TemplatePool>,
    events: &'a EventBus,
    clock: &'a dyn Clock,
    expiry: &'a ExpiryQueue,
}

impl PoolGuard<'_> {
    /// The template these records belong to
    pub fn template(&self) -> &InstanceTemplate {
        &self.template
    }

    /// Find the live record for a key
    pub fn find(&self, key: &AllocationKey) -> Option<&InstanceRecord> {
        self.pool.records.get(key)
    }

    /// Live records ordered by key
    pub fn records(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.pool.records.values()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.pool.records.len()
    }

    /// Whether no records are live
    pub fn is_empty(&self) -> bool {
        self.pool.records.is_empty()
    }

    /// Current time on the registry clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a record and schedule its expiry
    pub fn create(
        &mut self,
        key: AllocationKey,
        lifetime: Duration,
        origin_area: AreaId,
    ) -> std::result::Result<&InstanceRecord, RegistryError> {
        if self.pool.records.contains_key(&key) {
            return Err(RegistryError::AlreadyExists {
                template: self.template.id.clone(),
                key,
            });
        }

        let now = self.clock.now();
        let expires_at = self
            .template
            .deadline_from(now, lifetime)
            .ok_or_else(|| RegistryError::InvalidLifetime {
                template: self.template.id.clone(),
                lifetime,
            })?;

        let record = InstanceRecord {
            id: Uuid::new_v4(),
            template: self.template.id.clone(),
            key: key.clone(),
            created_at: now,
            expires_at,
            origin_area,
            occupants: BTreeSet::new(),
        };

        self.expiry.schedule(ScheduledExpiry {
            deadline: expires_at,
            template: record.template.clone(),
            key: key.clone(),
            instance_id: record.id,
        });

        self.events.emit(LifecycleEvent::InstanceCreated {
            instance_id: record.id,
            template: record.template.clone(),
            key: key.clone(),
            destination: self.template.destination,
            expires_at,
            timestamp: now,
        });

        let record = self.pool.records.entry(key).or_insert(record);
        Ok(&*record)
    }

    /// Remove a record regardless of occupants
    pub fn release(
        &mut self,
        key: &AllocationKey,
        reason: ReleaseReason,
    ) -> std::result::Result<InstanceRecord, RegistryError> {
        let record = self
            .pool
            .records
            .remove(key)
            .ok_or_else(|| self.not_found(key))?;

        self.events.emit(LifecycleEvent::InstanceReleased {
            instance_id: record.id,
            template: record.template.clone(),
            key: record.key.clone(),
            reason,
            timestamp: self.clock.now(),
        });

        Ok(record)
    }

    /// Admit a group to a record, all or nothing
    pub fn add_occupants(
        &mut self,
        key: &AllocationKey,
        players: &[PlayerId],
    ) -> std::result::Result<&InstanceRecord, RegistryError> {
        let limit = self.template.occupant_limit();
        let template_id = self.template.id.clone();
        let now = self.clock.now();

        let not_found = self.not_found(key);
        let record = self.pool.records.get_mut(key).ok_or(not_found)?;

        if !record.has_room_for(players, limit) {
            return Err(RegistryError::CapacityExceeded {
                template: template_id,
                key: key.clone(),
                limit: limit.unwrap_or(u32::MAX),
            });
        }

        let added: Vec<PlayerId> = players
            .iter()
            .copied()
            .filter(|p| record.occupants.insert(*p))
            .collect();

        if !added.is_empty() {
            self.events.emit(LifecycleEvent::OccupantsAdmitted {
                instance_id: record.id,
                template: template_id,
                key: key.clone(),
                players: added,
                timestamp: now,
            });
        }

        Ok(&*record)
    }

    /// Remove one occupant, releasing an emptied `when_empty` record.
    ///
    /// Returns true when the record was released.
    pub fn remove_occupant(
        &mut self,
        key: &AllocationKey,
        player: PlayerId,
    ) -> std::result::Result<bool, RegistryError> {
        let not_found = self.not_found(key);
        let record = self.pool.records.get_mut(key).ok_or(not_found)?;

        if !record.occupants.remove(&player) {
            return Ok(false);
        }

        if record.occupants.is_empty() && self.template.release == ReleasePolicy::WhenEmpty {
            self.release(key, ReleaseReason::Emptied)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Evict every occupant of an expired record and release it.
    ///
    /// Returns the eviction notices to deliver once the guard is dropped.
    pub(crate) fn expire(
        &mut self,
        key: &AllocationKey,
    ) -> std::result::Result<Vec<EvictionNotice>, RegistryError> {
        let now = self.clock.now();
        let record = self.release_silently(key)?;

        let mut notices = Vec::with_capacity(record.occupants.len());
        for player in record.occupants() {
            self.events.emit(LifecycleEvent::OccupantEvicted {
                instance_id: record.id,
                template: record.template.clone(),
                key: record.key.clone(),
                player,
                origin_area: record.origin_area,
                timestamp: now,
            });
            notices.push(EvictionNotice {
                instance_id: record.id,
                template: record.template.clone(),
                player,
                origin_area: record.origin_area,
            });
        }

        self.events.emit(LifecycleEvent::InstanceReleased {
            instance_id: record.id,
            template: record.template.clone(),
            key: record.key.clone(),
            reason: ReleaseReason::Expired,
            timestamp: now,
        });

        Ok(notices)
    }

    fn release_silently(
        &mut self,
        key: &AllocationKey,
    ) -> std::result::Result<InstanceRecord, RegistryError> {
        let not_found = self.not_found(key);
        self.pool.records.remove(key).ok_or(not_found)
    }

    fn not_found(&self, key: &AllocationKey) -> RegistryError {
        RegistryError::NotFound {
            template: self.template.id.clone(),
            key: key.clone(),
        }
    }
}
