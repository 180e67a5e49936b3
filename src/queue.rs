//! The ingest/consume boundary as a port, matching the teacher's split
//! between an Axum handler that accepts work and a background task that
//! drains it. The original system used Redis pub/sub as this transport;
//! here it is an in-process channel, since nothing in this deployment
//! crosses a process boundary. A Redis-backed `Queue` could be dropped in
//! without touching `Routine` or `http`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::model::ReportMessage;

#[async_trait]
pub trait QueueSender: Send + Sync {
    /// Enqueues a report for asynchronous processing. Returns an error only
    /// if the consumer side has shut down.
    async fn send(&self, msg: ReportMessage) -> Result<(), PipelineError>;

    /// Number of messages currently queued, for the `/enqueue` response.
    fn queue_size(&self) -> usize;
}

pub struct QueueReceiver {
    rx: mpsc::Receiver<ReportMessage>,
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<ReportMessage> {
        self.rx.recv().await
    }
}

#[derive(Clone)]
pub struct MpscQueue {
    tx: mpsc::Sender<ReportMessage>,
}

#[async_trait]
impl QueueSender for MpscQueue {
    async fn send(&self, msg: ReportMessage) -> Result<(), PipelineError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| PipelineError::Shutdown)
    }

    fn queue_size(&self) -> usize {
        QUEUE_CAPACITY - self.tx.capacity()
    }
}

/// Capacity chosen generously: unlike the teacher's bounded channel, which
/// returns 503 on a full persist queue, this pipeline never backpressures
/// ingest onto the HTTP response — a full channel here indicates the
/// consumer has stalled, which is an operational alarm, not a client error.
pub const QUEUE_CAPACITY: usize = 10_000;

pub fn channel() -> (MpscQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (MpscQueue { tx }, QueueReceiver { rx })
}
