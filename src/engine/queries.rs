use ulid::Ulid;

use crate::model::*;

use super::booking::parse_eta;
use super::{Engine, EngineError};

impl Engine {
    /// Booking plus its backup candidates.
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<BookingView, EngineError> {
        let arc = self
            .store
            .get_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let booking = arc.read().await.clone();
        Ok(BookingView {
            booking_id,
            slot_id: booking.slot_id,
            eta_minute: booking.eta_minute,
            mode: booking.mode,
            status: booking.status,
            p_free_at_hold: booking.p_free_at_hold,
            backups: self.backup_views(&booking_id),
        })
    }

    /// Offers for an arrival time: every slot with a probability signal
    /// inside the window, ranked by descending p_free then ascending price.
    /// Slots with no in-window forecast are excluded — a missing signal is
    /// never reported as p_free = 0.
    pub async fn search_offers(
        &self,
        eta_iso: &str,
        window_min: i64,
    ) -> Result<Vec<Offer>, EngineError> {
        let target = minute_floor(parse_eta(eta_iso)?);
        let window = window_min.max(1) * MINUTE_MS;

        let mut offers = Vec::new();
        for slot_id in self.store.slot_ids() {
            let Some(point) = self.lookup_probability(&slot_id, target, window).await else {
                continue;
            };
            let Some(slot) = self.store.get_slot(&slot_id) else {
                continue;
            };
            let slot = slot.read().await.clone();
            offers.push(Offer {
                slot_id: slot.slot_id,
                cluster_id: slot.cluster_id,
                p_free: point.p_free,
                price: slot.dynamic_price,
                is_ev: slot.is_ev,
                is_accessible: slot.is_accessible,
            });
        }
        offers.sort_by(|a, b| {
            b.p_free
                .total_cmp(&a.p_free)
                .then(a.price.total_cmp(&b.price))
        });
        metrics::counter!(crate::observability::OFFER_SEARCHES_TOTAL).increment(1);
        Ok(offers)
    }

    pub async fn get_slot_snapshot(&self, slot_id: &str) -> Result<Slot, EngineError> {
        let slot = self
            .store
            .get_slot(slot_id)
            .ok_or_else(|| EngineError::SlotNotFound(slot_id.to_string()))?;
        let snapshot = slot.read().await.clone();
        Ok(snapshot)
    }

    pub async fn list_outbox(&self, status: Option<OutboxStatus>) -> Vec<OutboxEvent> {
        let log = self.store.outbox.read().await;
        log.iter()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect()
    }

    pub async fn pending_outbox_count(&self) -> usize {
        let log = self.store.outbox.read().await;
        log.iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .count()
    }

    pub fn slot_count(&self) -> usize {
        self.store.slots.len()
    }
}
