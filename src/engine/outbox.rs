use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::limits::MAX_OUTBOX_BATCH;
use crate::model::*;
use crate::notify::NotifyHub;

use super::{Engine, EngineError};

/// Downstream delivery. The drain loop publishes each pending event through
/// this seam and records the outcome.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), String>;
}

/// Production publisher: logs the event and delivers it to the in-process
/// broadcast hub, the stand-in for an external broker.
pub struct BroadcastPublisher {
    hub: Arc<NotifyHub>,
}

impl BroadcastPublisher {
    pub fn new(hub: Arc<NotifyHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), String> {
        tracing::info!("outbox -> {}: {}", event.event_type, event.payload);
        self.hub.send(event);
        Ok(())
    }
}

impl Engine {
    /// Drain up to `batch_size` pending events in creation order (FIFO).
    /// Each is published and then marked published or error; errored events
    /// are left for an explicit repair pass, never retried here. The batch
    /// is never reordered.
    pub async fn drain_outbox(
        &self,
        publisher: &dyn Publisher,
        batch_size: usize,
    ) -> Result<usize, EngineError> {
        let batch_size = batch_size.min(MAX_OUTBOX_BATCH);
        // The log is append-ordered, so a front-to-back scan preserves
        // creation order without blocking writers.
        let pending: Vec<OutboxEvent> = {
            let log = self.store.outbox.read().await;
            log.iter()
                .filter(|e| e.status == OutboxStatus::Pending)
                .take(batch_size)
                .cloned()
                .collect()
        };

        let mut published = 0;
        for event in pending {
            match publisher.publish(&event).await {
                Ok(()) => {
                    let at = now_ms();
                    self.persist(&Commit::one(Op::MarkOutbox {
                        event_id: event.id,
                        status: OutboxStatus::Published,
                        published_at: Some(at),
                    }))
                    .await?;
                    self.store
                        .mark_outbox(event.id, OutboxStatus::Published, Some(at))
                        .await;
                    metrics::counter!(crate::observability::OUTBOX_PUBLISHED_TOTAL).increment(1);
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!("publish failed for {} ({}): {e}", event.id, event.event_type);
                    self.persist(&Commit::one(Op::MarkOutbox {
                        event_id: event.id,
                        status: OutboxStatus::Error,
                        published_at: None,
                    }))
                    .await?;
                    self.store
                        .mark_outbox(event.id, OutboxStatus::Error, None)
                        .await;
                    metrics::counter!(crate::observability::OUTBOX_ERRORS_TOTAL).increment(1);
                }
            }
        }
        Ok(published)
    }

    /// Explicit out-of-band repair: flip errored events back to pending so
    /// the next drain retries them.
    pub async fn repair_outbox(&self) -> Result<usize, EngineError> {
        let errored: Vec<Ulid> = {
            let log = self.store.outbox.read().await;
            log.iter()
                .filter(|e| e.status == OutboxStatus::Error)
                .map(|e| e.id)
                .collect()
        };
        for id in &errored {
            self.persist(&Commit::one(Op::MarkOutbox {
                event_id: *id,
                status: OutboxStatus::Pending,
                published_at: None,
            }))
            .await?;
            self.store
                .mark_outbox(*id, OutboxStatus::Pending, None)
                .await;
        }
        if !errored.is_empty() {
            tracing::info!("outbox repair reset {} events", errored.len());
        }
        Ok(errored.len())
    }
}
