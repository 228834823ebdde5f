//! Lifecycle notifications.
//!
//! Emission is fire-and-forget: a sink must not block, and callers ignore
//! its errors.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use quarry_core::{JobId, JobStage};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    JobStarted {
        job_id: JobId,
        version_id: i64,
    },
    JobCompleted {
        job_id: JobId,
        version_id: i64,
    },
    JobFailed {
        job_id: JobId,
        version_id: i64,
        stage: JobStage,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
        version_id: i64,
        stage: JobStage,
    },
    StageStarted {
        job_id: JobId,
        stage: JobStage,
    },
    StageCompleted {
        job_id: JobId,
        stage: JobStage,
        items_total: usize,
        items_processed: usize,
    },
    ParseSkipped {
        job_id: JobId,
        language: String,
    },
    ChunkSkipped {
        job_id: JobId,
        path: String,
        language: String,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &IngestEvent) -> Result<(), SinkError>;
}

/// Emit `event`, dropping any sink failure after a debug log.
pub fn emit(sink: &dyn EventSink, event: IngestEvent) {
    if let Err(e) = sink.emit(&event) {
        debug!(error = %e, ?event, "event dropped");
    }
}

// ── Sinks ───────────────────────────────────────────────────────────

/// Writes every event to the `quarry::events` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &IngestEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_string(event).map_err(|e| SinkError::Unavailable(e.to_string()))?;
        info!(target: "quarry::events", %payload, "event");
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
///
/// Slow subscribers lag and lose old events; the sender never waits.
pub struct BroadcastSink {
    sender: broadcast::Sender<IngestEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &IngestEvent) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| SinkError::Unavailable("no subscribers".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_without_subscribers_is_an_ignorable_error() {
        let sink = BroadcastSink::new(8);
        let event = IngestEvent::StageStarted {
            job_id: 1,
            stage: JobStage::Fetch,
        };
        assert!(sink.emit(&event).is_err());
        // must not panic
        emit(&sink, event);
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        emit(&sink, IngestEvent::JobStarted { job_id: 1, version_id: 2 });
        emit(&sink, IngestEvent::JobCompleted { job_id: 1, version_id: 2 });

        assert!(matches!(rx.try_recv().unwrap(), IngestEvent::JobStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), IngestEvent::JobCompleted { .. }));
    }

    #[test]
    fn events_serialize_with_tag() {
        let v = serde_json::to_value(IngestEvent::JobFailed {
            job_id: 3,
            version_id: 4,
            stage: JobStage::Embed,
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(v["event"], "job_failed");
        assert_eq!(v["stage"], "embed");
    }
}
