//! Progress events broadcast during a pipeline run.
//!
//! Emission is lossy and non-blocking: a lagged subscriber misses events
//! rather than stalling the pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Listener queue capacity. A subscriber that falls further behind than
/// this starts losing events.
const CHANNEL_CAPACITY: usize = 64;

/// Pipeline phase identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    PoolAnalysis,
    NarrativeArc,
    TrackAssignment,
    TrackOrdering,
    Assembly,
    Complete,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelinePhase::PoolAnalysis => "pool_analysis",
            PipelinePhase::NarrativeArc => "narrative_arc",
            PipelinePhase::TrackAssignment => "track_assignment",
            PipelinePhase::TrackOrdering => "track_ordering",
            PipelinePhase::Assembly => "assembly",
            PipelinePhase::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// One event on the progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        phase: PipelinePhase,
        detail: String,
        percent: u8,
    },
    Done {
        set_id: String,
        percent: u8,
    },
    Stopped,
    Error {
        detail: String,
    },
}

/// Broadcast bus for progress events. Cloneable; all clones share the
/// same channel.
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a new listener. Each receiver gets its own bounded queue.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never blocks; with no listeners the event is dropped.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, phase: PipelinePhase, detail: impl Into<String>, percent: u8) {
        let detail = detail.into();
        log::info!("[{phase}] ({percent}%) {detail}");
        self.emit(ProgressEvent::Progress {
            phase,
            detail,
            percent,
        });
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_receives_events() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe();
        bus.progress(PipelinePhase::PoolAnalysis, "analyzing", 2);
        let event = rx.try_recv().unwrap();
        match event {
            ProgressEvent::Progress { phase, percent, .. } => {
                assert_eq!(phase, PipelinePhase::PoolAnalysis);
                assert_eq!(percent, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let bus = ProgressBus::new();
        bus.progress(PipelinePhase::Assembly, "no one listening", 90);
    }

    #[test]
    fn test_multiple_subscribers_get_same_events() {
        let bus = ProgressBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.emit(ProgressEvent::Stopped);
        assert!(matches!(rx1.try_recv().unwrap(), ProgressEvent::Stopped));
        assert!(matches!(rx2.try_recv().unwrap(), ProgressEvent::Stopped));
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = ProgressEvent::Progress {
            phase: PipelinePhase::TrackAssignment,
            detail: "scoring".into(),
            percent: 32,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["phase"], "track_assignment");

        let done = ProgressEvent::Done {
            set_id: "abc123".into(),
            percent: 100,
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["event"], "done");
    }
}
