use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::pipeline::job::{JobId, JobState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Submitted,
    Transition { from: JobState, to: JobState },
    CacheHit { distance: u32 },
    CacheMiss,
    ExtractionStarted,
    /// `inserted` is false when another job cached the fingerprint first.
    CacheStored { inserted: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn now(job_id: JobId, kind: EventKind) -> Self {
        PipelineEvent { job_id, kind, at: Utc::now() }
    }
}

/// Receives pipeline events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        let job_id = event.job_id;
        match event.kind {
            EventKind::Submitted => info!(job_id = %job_id, "job submitted"),
            EventKind::Transition { from, to } => info!(job_id = %job_id, %from, %to, "job transition"),
            EventKind::CacheHit { distance } => info!(job_id = %job_id, distance, "cache hit"),
            EventKind::CacheMiss => debug!(job_id = %job_id, "cache miss"),
            EventKind::ExtractionStarted => debug!(job_id = %job_id, "extraction started"),
            EventKind::CacheStored { inserted } => debug!(job_id = %job_id, inserted, "artifact cached"),
        }
    }
}

/// Forwards events into an unbounded channel; a closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_and_survives_drop() {
        let (sink, mut rx) = ChannelSink::new();
        let id = JobId::new();
        sink.emit(PipelineEvent::now(id, EventKind::CacheMiss));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.job_id, id);
        assert_eq!(got.kind, EventKind::CacheMiss);

        drop(rx);
        sink.emit(PipelineEvent::now(id, EventKind::ExtractionStarted));
    }

    #[test]
    fn test_event_json_is_flat() {
        let event = PipelineEvent::now(
            JobId::new(),
            EventKind::Transition { from: JobState::Pending, to: JobState::Processing },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "transition");
        assert_eq!(json["from"], "pending");
        assert_eq!(json["to"], "processing");
    }
}
