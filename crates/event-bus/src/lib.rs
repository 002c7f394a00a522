//! Batched progress-event delivery.
//!
//! The execution loop produces a steady trickle of status and log events.
//! Observers should not be woken for every single one, so events are
//! buffered per run and flushed as a batch on whichever comes first of a
//! size threshold or an age threshold measured from the first buffered
//! event. Delivery order within a run is preserved, and all buffers are
//! force-flushed on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use webpilot_core_types::{LogLevel, RunId, RunStatus};

/// Errors surfaced by event delivery.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("sink rejected batch: {0}")]
    Sink(String),
}

/// Event category: lifecycle status changes versus log lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Status,
    Log,
}

/// One progress message bound for external observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: RunId,
    pub kind: ProgressKind,
    pub data: serde_json::Value,
}

impl ProgressEvent {
    pub fn status(run_id: RunId, status: RunStatus) -> Self {
        Self {
            run_id,
            kind: ProgressKind::Status,
            data: serde_json::json!({ "status": status.name() }),
        }
    }

    pub fn log(run_id: RunId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            run_id,
            kind: ProgressKind::Log,
            data: serde_json::json!({ "level": level, "message": message.into() }),
        }
    }
}

/// External transport for flushed batches. The sink must preserve the order
/// of events within each batch.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn deliver(&self, batch: Vec<ProgressEvent>) -> Result<(), BusError>;
}

/// Default sink backed by a tokio broadcast channel; used by the CLI and
/// by tests to observe delivery.
pub struct BroadcastSink {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn deliver(&self, batch: Vec<ProgressEvent>) -> Result<(), BusError> {
        for event in batch {
            // A send error only means no receiver is currently subscribed.
            let _ = self.sender.send(event);
        }
        Ok(())
    }
}

/// Per-run buffering front of a [`ProgressSink`].
pub struct ProgressBus {
    sink: Arc<dyn ProgressSink>,
    buffers: Mutex<HashMap<RunId, Vec<ProgressEvent>>>,
    /// Both batch extraction and delivery happen under this gate. A flush
    /// that merely delivered under the gate but extracted outside it could
    /// lose the gate race to a later flush and deliver its earlier batch
    /// second.
    deliver_gate: tokio::sync::Mutex<()>,
    max_batch: usize,
    max_age: Duration,
    /// Handle to self for the age-flush timer tasks.
    weak_self: Weak<ProgressBus>,
}

impl ProgressBus {
    pub fn new(sink: Arc<dyn ProgressSink>, max_batch: usize, max_age: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            sink,
            buffers: Mutex::new(HashMap::new()),
            deliver_gate: tokio::sync::Mutex::new(()),
            max_batch: max_batch.max(1),
            max_age,
            weak_self: weak_self.clone(),
        })
    }

    /// Buffer one event. Flushes immediately when the size threshold is
    /// reached; otherwise the first event of a batch arms a timer that
    /// flushes the run after `max_age`.
    pub async fn publish(&self, event: ProgressEvent) {
        let run_id = event.run_id.clone();
        let (due, arm_timer) = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers.entry(run_id.clone()).or_default();
            let was_empty = buffer.is_empty();
            buffer.push(event);
            let due = buffer.len() >= self.max_batch;
            (due, was_empty && !due)
        };

        // Extraction is deferred to `flush_run` so it happens under the
        // delivery gate.
        if due {
            self.flush_run(&run_id).await;
        }

        if arm_timer {
            let bus = self.weak_self.clone();
            let max_age = self.max_age;
            tokio::spawn(async move {
                sleep(max_age).await;
                // The bus may already be gone on shutdown.
                if let Some(bus) = bus.upgrade() {
                    bus.flush_run(&run_id).await;
                }
            });
        }
    }

    /// Drain and deliver whatever is buffered for one run. The batch is
    /// taken while already holding the delivery gate: whichever flush
    /// extracts first also delivers first, so a run's batches cannot
    /// reorder.
    pub async fn flush_run(&self, run_id: &RunId) {
        let _gate = self.deliver_gate.lock().await;
        let batch = {
            let mut buffers = self.buffers.lock();
            match buffers.get_mut(run_id) {
                Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
                _ => return,
            }
        };
        self.deliver(batch).await;
    }

    /// Drain every buffer. Called on shutdown and at run finalization.
    pub async fn flush_all(&self) {
        let _gate = self.deliver_gate.lock().await;
        let batches: Vec<Vec<ProgressEvent>> = {
            let mut buffers = self.buffers.lock();
            buffers
                .values_mut()
                .filter(|b| !b.is_empty())
                .map(std::mem::take)
                .collect()
        };
        for batch in batches {
            self.deliver(batch).await;
        }
    }

    /// Drop a run's buffer entirely once the run record is finalized.
    pub async fn close_run(&self, run_id: &RunId) {
        self.flush_run(run_id).await;
        self.buffers.lock().remove(run_id);
    }

    /// Callers hold the delivery gate.
    async fn deliver(&self, batch: Vec<ProgressEvent>) {
        let count = batch.len();
        if let Err(err) = self.sink.deliver(batch).await {
            warn!(events = count, error = %err, "progress sink rejected batch");
        } else {
            debug!(events = count, "progress batch delivered");
        }
    }

    /// Number of currently buffered events for a run (observability only).
    pub fn buffered(&self, run_id: &RunId) -> usize {
        self.buffers
            .lock()
            .get(run_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webpilot_core_types::LogLevel;

    fn recv_now(rx: &mut broadcast::Receiver<ProgressEvent>) -> Option<ProgressEvent> {
        rx.try_recv().ok()
    }

    #[tokio::test]
    async fn size_threshold_flushes_batch() {
        let sink = BroadcastSink::new(64);
        let mut rx = sink.subscribe();
        let bus = ProgressBus::new(sink, 3, Duration::from_secs(60));
        let run_id = RunId::new();

        for i in 0..3 {
            bus.publish(ProgressEvent::log(
                run_id.clone(),
                LogLevel::Info,
                format!("line {i}"),
            ))
            .await;
        }

        for i in 0..3 {
            let event = recv_now(&mut rx).expect("event delivered");
            assert_eq!(
                event.data.get("message").and_then(|v| v.as_str()),
                Some(format!("line {i}").as_str()),
                "delivery order must match publish order"
            );
        }
        assert_eq!(bus.buffered(&run_id), 0);
    }

    #[tokio::test]
    async fn below_threshold_stays_buffered_until_flush() {
        let sink = BroadcastSink::new(64);
        let mut rx = sink.subscribe();
        let bus = ProgressBus::new(sink, 20, Duration::from_secs(60));
        let run_id = RunId::new();

        bus.publish(ProgressEvent::status(run_id.clone(), RunStatus::Running))
            .await;
        assert_eq!(bus.buffered(&run_id), 1);
        assert!(recv_now(&mut rx).is_none());

        bus.flush_run(&run_id).await;
        assert_eq!(bus.buffered(&run_id), 0);
        let event = recv_now(&mut rx).expect("flushed event");
        assert_eq!(event.kind, ProgressKind::Status);
    }

    #[tokio::test(start_paused = true)]
    async fn age_threshold_flushes_batch() {
        let sink = BroadcastSink::new(64);
        let mut rx = sink.subscribe();
        let bus = ProgressBus::new(sink, 20, Duration::from_millis(200));
        let run_id = RunId::new();

        bus.publish(ProgressEvent::log(run_id.clone(), LogLevel::Info, "slow"))
            .await;
        assert!(recv_now(&mut rx).is_none());

        // Let the armed timer fire.
        tokio::time::sleep(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;

        let event = recv_now(&mut rx).expect("timer flush");
        assert_eq!(
            event.data.get("message").and_then(|v| v.as_str()),
            Some("slow")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_timer_and_size_flushes_keep_publish_order() {
        let sink = BroadcastSink::new(256);
        let mut rx = sink.subscribe();
        // Tiny thresholds so timer flushes and size flushes constantly
        // compete for the same run.
        let bus = ProgressBus::new(sink, 3, Duration::from_millis(1));
        let run_id = RunId::new();

        for i in 0..60u32 {
            bus.publish(ProgressEvent::log(
                run_id.clone(),
                LogLevel::Info,
                format!("seq {i}"),
            ))
            .await;
            if i % 7 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
        bus.flush_all().await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let message = event
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .expect("log message")
                .to_string();
            seen.push(message);
        }
        assert_eq!(seen.len(), 60);
        for (i, message) in seen.iter().enumerate() {
            assert_eq!(message, &format!("seq {i}"));
        }
    }

    #[tokio::test]
    async fn flush_all_drains_every_run() {
        let sink = BroadcastSink::new(64);
        let mut rx = sink.subscribe();
        let bus = ProgressBus::new(sink, 20, Duration::from_secs(60));

        let a = RunId::new();
        let b = RunId::new();
        bus.publish(ProgressEvent::log(a.clone(), LogLevel::Warn, "a"))
            .await;
        bus.publish(ProgressEvent::log(b.clone(), LogLevel::Warn, "b"))
            .await;

        bus.flush_all().await;
        assert_eq!(bus.buffered(&a), 0);
        assert_eq!(bus.buffered(&b), 0);
        assert!(recv_now(&mut rx).is_some());
        assert!(recv_now(&mut rx).is_some());
    }
}
