//! Instance lifecycle events for observability
//!
//! The registry and expiry scheduler publish a [`LifecycleEvent`] whenever a
//! record is created, gains occupants, evicts an occupant or is released.
//! Events are purely informational; nothing in the admission path waits on
//! a subscriber.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::events::{EventBus, LifecycleEvent};
//!
//! let bus = EventBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = rx.recv().await {
//!         println!("{} {}", event.event_type(), event.template());
//!     }
//! });
//! ```

use crate::template::{AllocationKey, AreaId, PlayerId, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Why a record was released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The deadline passed and the expiry sweep reclaimed it
    Expired,
    /// The last occupant left a `when_empty` record
    Emptied,
    /// Released explicitly through the registry
    Manual,
}

/// Events emitted over an instance's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A new record was allocated
    InstanceCreated {
        instance_id: Uuid,
        template: TemplateId,
        key: AllocationKey,
        destination: AreaId,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Players were added to a record
    OccupantsAdmitted {
        instance_id: Uuid,
        template: TemplateId,
        key: AllocationKey,
        players: Vec<PlayerId>,
        timestamp: DateTime<Utc>,
    },

    /// An occupant was forcibly removed at expiry
    OccupantEvicted {
        instance_id: Uuid,
        template: TemplateId,
        key: AllocationKey,
        player: PlayerId,
        origin_area: AreaId,
        timestamp: DateTime<Utc>,
    },

    /// A record was torn down
    InstanceReleased {
        instance_id: Uuid,
        template: TemplateId,
        key: AllocationKey,
        reason: ReleaseReason,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::InstanceCreated { .. } => "instance_created",
            LifecycleEvent::OccupantsAdmitted { .. } => "occupants_admitted",
            LifecycleEvent::OccupantEvicted { .. } => "occupant_evicted",
            LifecycleEvent::InstanceReleased { .. } => "instance_released",
        }
    }

    /// Template the event belongs to
    pub fn template(&self) -> &TemplateId {
        match self {
            LifecycleEvent::InstanceCreated { template, .. }
            | LifecycleEvent::OccupantsAdmitted { template, .. }
            | LifecycleEvent::OccupantEvicted { template, .. }
            | LifecycleEvent::InstanceReleased { template, .. } => template,
        }
    }

    /// Record the event belongs to
    pub fn instance_id(&self) -> Uuid {
        match self {
            LifecycleEvent::InstanceCreated { instance_id, .. }
            | LifecycleEvent::OccupantsAdmitted { instance_id, .. }
            | LifecycleEvent::OccupantEvicted { instance_id, .. }
            | LifecycleEvent::InstanceReleased { instance_id, .. } => *instance_id,
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::InstanceCreated { timestamp, .. }
            | LifecycleEvent::OccupantsAdmitted { timestamp, .. }
            | LifecycleEvent::OccupantEvicted { timestamp, .. }
            | LifecycleEvent::InstanceReleased { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize to a JSON value
    pub fn to_json(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Fan-out channel for lifecycle events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; dropped silently when nobody is subscribed
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Logs every lifecycle event through `tracing`
pub struct LoggingObserver;

impl LoggingObserver {
    /// Spawn a task that logs events from `bus` until the bus is dropped
    pub fn spawn(bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::log(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Lifecycle logger lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn log(event: &LifecycleEvent) {
        match event {
            LifecycleEvent::InstanceCreated {
                instance_id,
                template,
                key,
                expires_at,
                ..
            } => {
                tracing::info!(%instance_id, %template, %key, %expires_at, "Instance created");
            }
            LifecycleEvent::OccupantsAdmitted {
                instance_id,
                players,
                ..
            } => {
                tracing::debug!(%instance_id, ?players, "Occupants admitted");
            }
            LifecycleEvent::OccupantEvicted {
                instance_id,
                player,
                origin_area,
                ..
            } => {
                tracing::info!(%instance_id, player, origin_area, "Occupant evicted");
            }
            LifecycleEvent::InstanceReleased {
                instance_id,
                template,
                key,
                reason,
                ..
            } => {
                tracing::info!(%instance_id, %template, %key, ?reason, "Instance released");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released() -> LifecycleEvent {
        LifecycleEvent::InstanceReleased {
            instance_id: Uuid::new_v4(),
            template: TemplateId::new("drake_cave"),
            key: AllocationKey::Party(1),
            reason: ReleaseReason::Expired,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(released());

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.event_type(), "instance_released");
        assert_eq!(event.template().as_str(), "drake_cave");
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.emit(released());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_logging_observer_runs_until_bus_closes() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warden_core=debug")
            .with_test_writer()
            .try_init();

        let bus = EventBus::new(8);
        let observer = LoggingObserver::spawn(&bus);
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(released());
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(1), observer)
            .await
            .expect("observer stopped after the bus closed")
            .unwrap();
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = released().to_json().unwrap();
        assert_eq!(json["type"], "instance_released");
        assert_eq!(json["reason"], "expired");
        assert_eq!(json["key"]["type"], "party");
    }
}
