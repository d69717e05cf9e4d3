//! Engine events.
//!
//! Non-fatal conditions (degraded storage, recovered corruption, outdated
//! build, unsaved changes) are never returned as errors. They are logged and
//! broadcast as [`EngineEvent`]s so a host can surface them.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::Lifecycle;
use crate::storage::Tier;

/// Capacity of the event channel. Slow subscribers lag rather than block.
pub const EVENT_CAPACITY: usize = 64;

/// Something a host may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    LifecycleChanged {
        from: Lifecycle,
        to: Lifecycle,
    },
    /// Storage fell back to a lower tier for the rest of the session.
    Degraded {
        from: Tier,
        to: Tier,
        reason: String,
    },
    /// A stored record was unusable; factory defaults were loaded instead.
    CorruptionRecovered {
        reason: String,
    },
    /// A stored document could not be migrated; factory defaults were loaded instead.
    MigrationFailed {
        reason: String,
    },
    /// Storage holds a document from a newer build. Saving is suspended.
    OutdatedBuild {
        found: u32,
        supported: u32,
    },
    Migrated {
        from: u32,
        to: u32,
    },
    Saved {
        checksum: String,
        updated_at: u64,
        tier: Tier,
    },
    /// A write failed after all retries. In-memory changes are kept.
    SaveFailed {
        attempts: u32,
        reason: String,
    },
    Reset,
}

impl EngineEvent {
    /// Short machine-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LifecycleChanged { .. } => "lifecycle_changed",
            Self::Degraded { .. } => "degraded",
            Self::CorruptionRecovered { .. } => "corruption_recovered",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::OutdatedBuild { .. } => "outdated_build",
            Self::Migrated { .. } => "migrated",
            Self::Saved { .. } => "saved",
            Self::SaveFailed { .. } => "save_failed",
            Self::Reset => "reset",
        }
    }
}

/// Broadcasting handle for engine events. Clones share one channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Send an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
