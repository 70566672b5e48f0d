//! # Warden - Instanced Area Admission Control
//!
//! Warden coordinates entry into instanced areas for a game server's
//! scripting host:
//! - Party-exclusive instances that only the party leader may open
//! - Pooled instances filled first-fit across a fixed number of slots
//! - Absolute expiry deadlines, with occupants evicted back to where they came from
//! - Event-gated admission driven by named world state (boarding windows, elevators)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warden_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let warden = InstanceWarden::builder()
//!         .config(WardenConfig::load()?)
//!         .build()?;
//!     let expiry = warden.start_expiry();
//!
//!     let request = AdmissionRequest::new(1001, 105020400, "drake_cave").with_party(42, true);
//!     match warden.admit(&request).await {
//!         Ok(admitted) => println!("warp to {} at {}", admitted.destination, admitted.spawn_point),
//!         Err(e) => println!("{} ({:?})", e, e.caller_outcome()),
//!     }
//!
//!     expiry.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Registry**: sole owner of live instance records, one lock per template
//! - **Admission**: key selection, leadership and capacity checks
//! - **Expiry**: deadline heap swept on a fixed tick
//! - **Gates**: state-to-decision policies over an external state source
//! - **Events**: lifecycle events broadcast for observability

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod gate;
pub mod registry;
pub mod template;
pub mod warden;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admission::{
        AdmissionController, AdmissionRequest, AdmittedInstance, GatedAdmission,
        InstanceHandle, PartyContext,
    };
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{ExpiryConfig, GateConfig, WardenConfig};
    pub use crate::error::{
        AdmissionError, CallerOutcome, RegistryError, Result, WardenError,
    };
    pub use crate::events::{EventBus, LifecycleEvent, LoggingObserver, ReleaseReason};
    pub use crate::expiry::{
        ChannelEvictionHandler, EvictionHandler, EvictionNotice, ExpiryHandle, ExpiryScheduler,
        LoggingEvictionHandler, SweepReport, eviction_channel,
    };
    pub use crate::gate::{
        EventGateSource, GateBoard, GateDecision, GateDestination, GatePhase, GatePolicy,
        GateSchedule,
    };
    pub use crate::registry::{InstanceRecord, InstanceRegistry};
    pub use crate::template::{
        AllocationKey, AreaId, InstanceTemplate, PartyId, PlayerId, ReleasePolicy, TemplateId,
        TemplateKind,
    };
    pub use crate::warden::{InstanceWarden, WardenBuilder};
}
