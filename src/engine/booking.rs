use serde_json::json;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Parse an ISO-8601 arrival time, rejecting malformed input and timestamps
/// outside the supported range.
pub(super) fn parse_eta(iso: &str) -> Result<Ms, EngineError> {
    let t = parse_iso(iso).ok_or_else(|| EngineError::InvalidTimestamp(iso.to_string()))?;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::InvalidTimestamp(iso.to_string()));
    }
    Ok(t)
}

impl Engine {
    /// Resolve a raw slot id, or a cluster id that names exactly one slot.
    /// Anything else is `SlotNotFound`.
    pub(super) fn resolve_slot_id(&self, id: &str) -> Result<String, EngineError> {
        if self.store.slots.contains_key(id) {
            return Ok(id.to_string());
        }
        let members = self.store.cluster_members(id);
        match members.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(EngineError::SlotNotFound(id.to_string())),
        }
    }

    /// Rank same-cluster alternates by their own nearest-in-window
    /// probability, descending. Slots with no signal are skipped.
    async fn rank_backups(
        &self,
        cluster_id: &str,
        primary_slot: &str,
        eta_minute: Ms,
        window: Ms,
        limit: usize,
    ) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = Vec::new();
        for alt_id in self
            .store
            .cluster_members(cluster_id)
            .into_iter()
            .filter(|s| s != primary_slot)
            .take(MAX_CLUSTER_ALTERNATES)
        {
            if let Some(point) = self.lookup_probability(&alt_id, eta_minute, window).await {
                ranked.push((alt_id, point.p_free));
            }
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }

    /// Create a booking. Guaranteed mode confirms unconditionally; smart
    /// hold starts held and, when the probability signal is absent or below
    /// the reliability threshold, records ranked backup candidates.
    ///
    /// Booking row, candidate rows and the `booking.created` event are one
    /// commit — a failed append leaves no trace of any of them.
    pub async fn create_booking(
        &self,
        slot_or_cluster: &str,
        eta_iso: &str,
        mode: BookingMode,
        window_min: Option<i64>,
    ) -> Result<BookingView, EngineError> {
        // Threshold and backup limit are captured at request entry; a config
        // swap mid-flight never changes this decision.
        let threshold = self.config().reliability_threshold;
        let backups_limit = self.config().backups_limit;
        let window = (window_min.unwrap_or(self.config().default_lookup_window_min) * MINUTE_MS)
            .clamp(MINUTE_MS, MAX_LOOKUP_WINDOW_MS);

        let eta_minute = minute_floor(parse_eta(eta_iso)?);

        let slot_id = self.resolve_slot_id(slot_or_cluster)?;
        let slot = self
            .store
            .get_slot(&slot_id)
            .ok_or_else(|| EngineError::SlotNotFound(slot_id.clone()))?;
        let cluster_id = slot.read().await.cluster_id.clone();

        let p = self
            .lookup_probability(&slot_id, eta_minute, window)
            .await
            .map(|pt| pt.p_free);

        let status = match mode {
            BookingMode::Guaranteed => BookingStatus::Confirmed,
            BookingMode::SmartHold => BookingStatus::Held,
        };
        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            slot_id: slot_id.clone(),
            cluster_id: cluster_id.clone(),
            eta_minute,
            mode,
            status,
            p_free_at_hold: p,
            created_at: now,
        };

        let mut candidates = vec![BookingCandidate {
            booking_id: booking.id,
            slot_id: slot_id.clone(),
            role: CandidateRole::Primary,
            confidence_at_add: p,
        }];
        let mut backups: Vec<(String, f64)> = Vec::new();
        if mode == BookingMode::SmartHold && p.is_none_or(|p| p < threshold) {
            backups = self
                .rank_backups(&cluster_id, &slot_id, eta_minute, window, backups_limit)
                .await;
            for (alt_id, confidence) in &backups {
                candidates.push(BookingCandidate {
                    booking_id: booking.id,
                    slot_id: alt_id.clone(),
                    role: CandidateRole::Backup,
                    confidence_at_add: Some(*confidence),
                });
            }
        }

        let event = OutboxEvent::new(
            "booking.created",
            json!({
                "booking_id": booking.id.to_string(),
                "slot_id": slot_id,
                "cluster_id": cluster_id,
                "eta_minute": to_iso(eta_minute),
                "mode": mode.as_str(),
                "status": status.as_str(),
                "p_free_at_hold": p,
                "backups": backups
                    .iter()
                    .map(|(s, c)| json!({"slot_id": s, "confidence": c}))
                    .collect::<Vec<_>>(),
                "at": to_iso(now),
            }),
            now,
        );

        let commit = Commit {
            ops: vec![
                Op::InsertBooking {
                    booking: booking.clone(),
                },
                Op::AddCandidates {
                    booking_id: booking.id,
                    candidates: candidates.clone(),
                },
                Op::AppendOutbox {
                    event: event.clone(),
                },
            ],
        };
        self.persist(&commit).await?;

        self.store.insert_booking(booking.clone());
        self.store.add_candidates(booking.id, candidates);
        self.store.push_outbox(event).await;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "mode" => mode.as_str())
            .increment(1);
        tracing::info!(
            "booking {} created: slot={slot_id} mode={} status={} p={:?}",
            booking.id,
            mode.as_str(),
            status.as_str(),
            p
        );

        Ok(BookingView {
            booking_id: booking.id,
            slot_id: booking.slot_id,
            eta_minute,
            mode,
            status,
            p_free_at_hold: p,
            backups: backups
                .into_iter()
                .map(|(slot_id, confidence)| BackupView {
                    slot_id,
                    confidence: Some(confidence),
                })
                .collect(),
        })
    }

    /// Move a booking to a different slot. An explicit swap supersedes
    /// probabilistic-hold semantics: status is forced to confirmed.
    /// Candidate history is append-only and stays untouched.
    pub async fn swap_booking(
        &self,
        booking_id: Ulid,
        new_slot_id: &str,
    ) -> Result<BookingView, EngineError> {
        if !self.store.slots.contains_key(new_slot_id) {
            return Err(EngineError::SlotNotFound(new_slot_id.to_string()));
        }
        let arc = self
            .store
            .get_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let mut guard = arc.write().await;

        if !matches!(guard.status, BookingStatus::Held | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                to: BookingStatus::Confirmed,
            });
        }

        // Candidate state is read under the booking write lock, so a
        // concurrent swap can never see it stale.
        let backups = self.backup_views(&booking_id);
        let old_slot_id = guard.slot_id.clone();
        let now = now_ms();
        let event = OutboxEvent::new(
            "booking.swapped",
            json!({
                "booking_id": booking_id.to_string(),
                "old_slot_id": old_slot_id,
                "new_slot_id": new_slot_id,
                "status": BookingStatus::Confirmed.as_str(),
                "backups": backups
                    .iter()
                    .map(|b| json!({"slot_id": b.slot_id, "confidence": b.confidence}))
                    .collect::<Vec<_>>(),
                "at": to_iso(now),
            }),
            now,
        );

        let commit = Commit {
            ops: vec![
                Op::SetBookingSlot {
                    booking_id,
                    slot_id: new_slot_id.to_string(),
                },
                Op::SetBookingStatus {
                    booking_id,
                    status: BookingStatus::Confirmed,
                },
                Op::AppendOutbox {
                    event: event.clone(),
                },
            ],
        };
        self.persist(&commit).await?;

        guard.slot_id = new_slot_id.to_string();
        guard.status = BookingStatus::Confirmed;
        let view = BookingView {
            booking_id,
            slot_id: guard.slot_id.clone(),
            eta_minute: guard.eta_minute,
            mode: guard.mode,
            status: guard.status,
            p_free_at_hold: guard.p_free_at_hold,
            backups,
        };
        drop(guard);

        self.store.push_outbox(event).await;
        metrics::counter!(crate::observability::BOOKINGS_SWAPPED_TOTAL).increment(1);
        tracing::info!("booking {booking_id} swapped {old_slot_id} -> {new_slot_id}");
        Ok(view)
    }

    /// Cancel a booking, subject to the status state machine.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let arc = self
            .store
            .get_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let mut guard = arc.write().await;

        if !guard.status.can_transition(BookingStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                to: BookingStatus::Cancelled,
            });
        }

        let now = now_ms();
        let event = OutboxEvent::new(
            "booking.cancelled",
            json!({
                "booking_id": booking_id.to_string(),
                "slot_id": guard.slot_id,
                "at": to_iso(now),
            }),
            now,
        );
        let commit = Commit {
            ops: vec![
                Op::SetBookingStatus {
                    booking_id,
                    status: BookingStatus::Cancelled,
                },
                Op::AppendOutbox {
                    event: event.clone(),
                },
            ],
        };
        self.persist(&commit).await?;

        guard.status = BookingStatus::Cancelled;
        drop(guard);
        self.store.push_outbox(event).await;
        Ok(())
    }

    pub(super) fn backup_views(&self, booking_id: &Ulid) -> Vec<BackupView> {
        self.store
            .candidates_for(booking_id)
            .into_iter()
            .filter(|c| c.role == CandidateRole::Backup)
            .map(|c| BackupView {
                slot_id: c.slot_id,
                confidence: c.confidence_at_add,
            })
            .collect()
    }
}
