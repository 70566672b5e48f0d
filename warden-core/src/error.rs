//! Error types for warden operations

use crate::template::{AllocationKey, TemplateId};

/// Result type for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Error types for the warden subsystem
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry operation failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An occupant could not be notified of an eviction
    #[error("Eviction error: {0}")]
    Eviction(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for WardenError {
    fn from(err: anyhow::Error) -> Self {
        WardenError::Other(err.to_string())
    }
}

impl From<figment::Error> for WardenError {
    fn from(err: figment::Error) -> Self {
        WardenError::Configuration(err.to_string())
    }
}

/// Errors raised by the instance registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No template registered under this id
    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateId),

    /// A live record already exists for the key; callers must `find` first
    #[error("Instance {template}/{key} already exists")]
    AlreadyExists {
        template: TemplateId,
        key: AllocationKey,
    },

    /// Adding the occupants would exceed the per-instance limit
    #[error("Instance {template}/{key} is at capacity ({limit} occupants)")]
    CapacityExceeded {
        template: TemplateId,
        key: AllocationKey,
        limit: u32,
    },

    /// The lifetime cannot be added to the current time
    #[error("Lifetime {lifetime:?} of {template} is out of range")]
    InvalidLifetime {
        template: TemplateId,
        lifetime: std::time::Duration,
    },

    /// No live record for the key
    #[error("Instance {template}/{key} not found")]
    NotFound {
        template: TemplateId,
        key: AllocationKey,
    },
}

/// What the calling script should do with a failed admission.
///
/// Every [`AdmissionError`] maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerOutcome {
    /// Surface a generic failure and dispose the conversation
    GenericFailure,
    /// Tell the player they are not the party leader; do not retry
    NotLeader,
    /// Tell the player to try again later; retrying is permitted
    TryAgainLater,
    /// Tell the player the gate has not opened yet
    NotYetOpen,
}

/// Errors returned by `admit` and `admit_gated`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The requested template does not exist
    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateId),

    /// A party member other than the leader tried to open a party instance
    #[error("You are not the leader of the party.")]
    NotPartyLeader,

    /// Every pool slot is occupied
    #[error("All instances of {0} are in use right now, please try again later.")]
    InstancesFull(TemplateId),

    /// The record found or created could not take the group
    #[error("Instance {template}/{key} cannot accept more occupants")]
    CapacityExceeded {
        template: TemplateId,
        key: AllocationKey,
    },

    /// The requested lifetime is zero or cannot be added to the current time
    #[error("Lifetime {lifetime:?} requested for {template} is not valid")]
    InvalidLifetime {
        template: TemplateId,
        lifetime: std::time::Duration,
    },

    /// No policy configured for the named gate
    #[error("Unknown gate: {0}")]
    UnknownGate(String),

    /// The gate is in a closing state; the next cycle may be boarded
    #[error("Gate {gate} is not accepting entries right now ({state})")]
    GateRetryLater { gate: String, state: String },

    /// The gate has not opened for this cycle
    #[error("Gate {gate} has not opened yet")]
    GateNotYet { gate: String, state: Option<String> },

    /// A registry invariant was violated; indicates a defect
    #[error("Internal admission error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Stable snake_case code for diagnostics and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::UnknownTemplate(_) => "unknown_template",
            AdmissionError::NotPartyLeader => "not_party_leader",
            AdmissionError::InstancesFull(_) => "instances_full",
            AdmissionError::CapacityExceeded { .. } => "capacity_exceeded",
            AdmissionError::InvalidLifetime { .. } => "invalid_lifetime",
            AdmissionError::UnknownGate(_) => "unknown_gate",
            AdmissionError::GateRetryLater { .. } => "gate_retry_later",
            AdmissionError::GateNotYet { .. } => "gate_not_yet",
            AdmissionError::Internal(_) => "internal",
        }
    }

    /// Whether re-invoking admission later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.caller_outcome(),
            CallerOutcome::TryAgainLater | CallerOutcome::NotYetOpen
        )
    }

    /// The single caller-visible outcome for this error
    pub fn caller_outcome(&self) -> CallerOutcome {
        match self {
            AdmissionError::UnknownTemplate(_)
            | AdmissionError::UnknownGate(_)
            | AdmissionError::InvalidLifetime { .. }
            | AdmissionError::Internal(_) => CallerOutcome::GenericFailure,
            AdmissionError::NotPartyLeader => CallerOutcome::NotLeader,
            AdmissionError::InstancesFull(_)
            | AdmissionError::CapacityExceeded { .. }
            | AdmissionError::GateRetryLater { .. } => CallerOutcome::TryAgainLater,
            AdmissionError::GateNotYet { .. } => CallerOutcome::NotYetOpen,
        }
    }
}

impl From<RegistryError> for AdmissionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTemplate(id) => AdmissionError::UnknownTemplate(id),
            RegistryError::CapacityExceeded { template, key, .. } => {
                AdmissionError::CapacityExceeded { template, key }
            }
            RegistryError::InvalidLifetime { template, lifetime } => {
                AdmissionError::InvalidLifetime { template, lifetime }
            }
            other => {
                tracing::error!(error = %other, "Registry invariant violated during admission");
                AdmissionError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_outcomes() {
        let full = AdmissionError::InstancesFull(TemplateId::new("sand"));
        assert_eq!(full.caller_outcome(), CallerOutcome::TryAgainLater);
        assert!(full.is_retryable());

        assert_eq!(
            AdmissionError::NotPartyLeader.caller_outcome(),
            CallerOutcome::NotLeader
        );
        assert!(!AdmissionError::NotPartyLeader.is_retryable());

        let not_yet = AdmissionError::GateNotYet {
            gate: "CM_SUBWAY".to_string(),
            state: None,
        };
        assert_eq!(not_yet.caller_outcome(), CallerOutcome::NotYetOpen);

        let unknown = AdmissionError::UnknownTemplate(TemplateId::new("nope"));
        assert_eq!(unknown.caller_outcome(), CallerOutcome::GenericFailure);
        assert!(!unknown.is_retryable());
    }

    #[test]
    fn test_registry_error_conversion() {
        let template = TemplateId::new("drake_cave");
        let key = AllocationKey::Party(7);

        let err: AdmissionError = RegistryError::CapacityExceeded {
            template: template.clone(),
            key: key.clone(),
            limit: 6,
        }
        .into();
        assert_eq!(err.kind(), "capacity_exceeded");

        let err: AdmissionError = RegistryError::InvalidLifetime {
            template: template.clone(),
            lifetime: std::time::Duration::MAX,
        }
        .into();
        assert_eq!(err.kind(), "invalid_lifetime");
        assert_eq!(err.caller_outcome(), CallerOutcome::GenericFailure);

        let err: AdmissionError = RegistryError::AlreadyExists { template, key }.into();
        assert_eq!(err.kind(), "internal");
    }
}
