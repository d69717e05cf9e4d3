//! Engine state machines and the status snapshot.

use serde::Serialize;

use crate::storage::Tier;

/// Load lifecycle: `Uninitialized -> Loading -> (Migrating) -> Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Loading,
    Migrating,
    Ready,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Migrating => "migrating",
            Self::Ready => "ready",
        }
    }

    /// Whether moving to `next` follows the lifecycle order.
    ///
    /// There is no way back from `Ready`; a reload stays `Ready`.
    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Loading)
                | (Self::Loading, Self::Migrating)
                | (Self::Loading, Self::Ready)
                | (Self::Migrating, Self::Ready)
        )
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistence sub-state: `Clean <-> Dirty <-> Saving -> Clean | SaveFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceState {
    /// In-memory document matches the last successful write (or load)
    Clean,
    /// A write is scheduled
    Dirty,
    /// A write is in flight
    Saving,
    /// The last write failed after retries; in-memory changes are unsaved
    SaveFailed,
}

impl PersistenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Saving => "saving",
            Self::SaveFailed => "save_failed",
        }
    }
}

impl std::fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of the engine for hosts and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub lifecycle: Lifecycle,
    pub persistence: PersistenceState,
    /// In-memory changes not yet durably written
    pub unsaved_changes: bool,
    /// Storage holds a document from a newer build; saving is suspended
    pub outdated_build: bool,
    /// Tier-1 storage was abandoned this session
    pub degraded: bool,
    pub storage_tier: Tier,
    pub storage_location: String,
    pub schema_version: u32,
    pub updated_at: u64,
    pub session_id: String,
    pub session_overrides: usize,
    /// Description of the most recent save failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Lifecycle::Uninitialized.can_transition_to(Lifecycle::Loading));
        assert!(Lifecycle::Loading.can_transition_to(Lifecycle::Ready));
        assert!(Lifecycle::Loading.can_transition_to(Lifecycle::Migrating));
        assert!(Lifecycle::Migrating.can_transition_to(Lifecycle::Ready));
        assert!(!Lifecycle::Ready.can_transition_to(Lifecycle::Loading));

        assert!(!Lifecycle::Uninitialized.can_transition_to(Lifecycle::Ready));
        assert!(!Lifecycle::Ready.can_transition_to(Lifecycle::Migrating));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(Lifecycle::Migrating.to_string(), "migrating");
        assert_eq!(PersistenceState::SaveFailed.to_string(), "save_failed");
        assert_eq!(
            serde_json::to_value(PersistenceState::Dirty).unwrap(),
            "dirty"
        );
    }
}
