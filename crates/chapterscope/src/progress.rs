//! Progress event types and broadcast channel for extraction telemetry.
//!
//! The coordinator and downloader emit `ProgressEvent`s as an attempt moves
//! through its phases. Events flow through a `tokio::sync::broadcast`
//! channel to any subscriber (CLI log, UI). With no subscriber they are
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::StrategyId;

/// A progress event emitted during one extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The request ID this event belongs to.
    pub request_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// The kind of progress event.
    pub event: ProgressEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEventKind {
    /// The coordinator entered a new phase.
    PhaseChanged { phase: ExtractionPhase },
    /// A strategy finished.
    StrategyCompleted {
        strategy: StrategyId,
        candidates: u32,
        duration_ms: u64,
    },
    /// The pagination walk visited a page.
    WalkStep { page: u32, accumulated: u32 },
    /// A ranked image was fetched (or served from cache) and decoded.
    ImageDecoded {
        url: String,
        width: u32,
        height: u32,
        cached: bool,
    },
    /// A ranked image was skipped or failed.
    ImageSkipped { url: String, reason: String },
    /// A retry attempt is starting.
    AttemptStarted { attempt: u32, max_attempts: u32 },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Coordinator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionPhase {
    Idle,
    Running,
    Evaluating,
    Escalating,
    Aggregated,
    Ranking,
    Done,
    Cancelled,
    Failed,
}

impl std::fmt::Display for ExtractionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Evaluating => "Evaluating",
            Self::Escalating => "Escalating",
            Self::Aggregated => "Aggregated",
            Self::Ranking => "Ranking",
            Self::Done => "Done",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Sender handle for emitting progress events.
///
/// When no listeners exist, `send()` returns an error which is ignored.
pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressEvent>;

/// Receiver handle for consuming progress events.
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Create a new progress broadcast channel with a bounded buffer.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Emit a progress event, ignoring send errors.
pub fn emit(
    tx: &Option<ProgressSender>,
    request_id: &str,
    seq: &mut u64,
    event: ProgressEventKind,
) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(ProgressEvent {
            request_id: request_id.to_string(),
            seq: *seq,
            event,
        });
    }
}

/// Per-request emitter carrying the request id and a shared sequence counter.
///
/// Clones share the counter, so events from retries and the watchdog stay
/// in one monotonic sequence.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: Option<ProgressSender>,
    request_id: String,
    seq: Arc<AtomicU64>,
}

impl ProgressEmitter {
    pub fn new(tx: Option<ProgressSender>, request_id: impl Into<String>) -> Self {
        Self {
            tx,
            request_id: request_id.into(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// An emitter that drops everything.
    pub fn silent() -> Self {
        Self::new(None, "")
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn emit(&self, event: ProgressEventKind) {
        if self.tx.is_none() {
            return;
        }
        let mut seq = self.seq.fetch_add(1, Ordering::SeqCst);
        emit(&self.tx, &self.request_id, &mut seq, event);
    }

    /// Log a non-fatal problem and forward it to subscribers.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.request_id, message);
        self.emit(ProgressEventKind::Warning { message });
    }

    pub fn phase(&self, phase: ExtractionPhase) {
        tracing::debug!("[{}] phase -> {}", self.request_id, phase);
        self.emit(ProgressEventKind::PhaseChanged { phase });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_serialization() {
        let event = ProgressEvent {
            request_id: "pages-1".to_string(),
            seq: 1,
            event: ProgressEventKind::StrategyCompleted {
                strategy: StrategyId::HtmlSource,
                candidates: 12,
                duration_ms: 40,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StrategyCompleted"));
        assert!(json.contains("html_source"));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, "pages-1");
        assert_eq!(parsed.seq, 1);
    }

    #[test]
    fn test_channel_no_receivers() {
        let (tx, rx) = channel();
        drop(rx);
        emit(
            &Some(tx),
            "test",
            &mut 0,
            ProgressEventKind::Warning {
                message: "test".to_string(),
            },
        );
    }

    #[tokio::test]
    async fn test_emitter_sequences_phases() {
        let (tx, mut rx) = channel();
        let emitter = ProgressEmitter::new(Some(tx), "req-7");
        let retry_emitter = emitter.clone();
        emitter.phase(ExtractionPhase::Running);
        retry_emitter.phase(ExtractionPhase::Done);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(matches!(
            second.event,
            ProgressEventKind::PhaseChanged {
                phase: ExtractionPhase::Done
            }
        ));
    }

    #[test]
    fn test_silent_emitter() {
        let emitter = ProgressEmitter::silent();
        emitter.phase(ExtractionPhase::Idle);
        assert_eq!(emitter.request_id(), "");
    }
}
