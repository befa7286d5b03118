use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSlot = Arc<RwLock<Slot>>;
pub type SharedBooking = Arc<RwLock<Booking>>;
pub type SharedSeries = Arc<RwLock<PredictionSeries>>;
pub type SharedSession = Arc<RwLock<Session>>;
pub type SharedPayment = Arc<RwLock<Payment>>;

/// In-memory tables. The store is the sole synchronization primitive:
/// row-level RwLocks serialize same-row mutation, everything else is
/// independent.
pub struct Store {
    pub slots: DashMap<String, SharedSlot>,
    /// cluster_id → member slot ids, insertion order.
    pub clusters: DashMap<String, Vec<String>>,
    pub predictions: DashMap<String, SharedSeries>,
    pub bookings: DashMap<Ulid, SharedBooking>,
    /// Append-only candidate history, guarded by the booking row lock.
    pub candidates: DashMap<Ulid, Vec<BookingCandidate>>,
    /// Ordered event log; FIFO by position.
    pub outbox: RwLock<Vec<OutboxEvent>>,
    pub alerts: RwLock<Vec<Alert>>,
    pub sessions: DashMap<Ulid, SharedSession>,
    pub payments: DashMap<Ulid, SharedPayment>,
    pub payment_by_booking: DashMap<Ulid, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            clusters: DashMap::new(),
            predictions: DashMap::new(),
            bookings: DashMap::new(),
            candidates: DashMap::new(),
            outbox: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            sessions: DashMap::new(),
            payments: DashMap::new(),
            payment_by_booking: DashMap::new(),
        }
    }

    // ── Row access ───────────────────────────────────────────

    pub fn get_slot(&self, id: &str) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn get_series(&self, slot_id: &str) -> Option<SharedSeries> {
        self.predictions.get(slot_id).map(|e| e.value().clone())
    }

    pub fn get_session(&self, id: &Ulid) -> Option<SharedSession> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn get_payment(&self, id: &Ulid) -> Option<SharedPayment> {
        self.payments.get(id).map(|e| e.value().clone())
    }

    pub fn cluster_members(&self, cluster_id: &str) -> Vec<String> {
        self.clusters
            .get(cluster_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn slot_ids(&self) -> Vec<String> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }

    pub fn booking_ids(&self) -> Vec<Ulid> {
        self.bookings.iter().map(|e| *e.key()).collect()
    }

    // ── Insert helpers (shared by live path and replay) ──────

    pub fn insert_slot(&self, slot: Slot) {
        let id = slot.slot_id.clone();
        self.clusters
            .entry(slot.cluster_id.clone())
            .or_default()
            .push(id.clone());
        self.slots.insert(id, Arc::new(RwLock::new(slot)));
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings
            .insert(booking.id, Arc::new(RwLock::new(booking)));
    }

    pub fn add_candidates(&self, booking_id: Ulid, mut new: Vec<BookingCandidate>) {
        self.candidates
            .entry(booking_id)
            .or_default()
            .append(&mut new);
    }

    pub fn candidates_for(&self, booking_id: &Ulid) -> Vec<BookingCandidate> {
        self.candidates
            .get(booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub async fn push_outbox(&self, event: OutboxEvent) {
        self.outbox.write().await.push(event);
    }

    pub async fn mark_outbox(&self, event_id: Ulid, status: OutboxStatus, published_at: Option<Ms>) {
        let mut log = self.outbox.write().await;
        if let Some(evt) = log.iter_mut().find(|e| e.id == event_id) {
            evt.status = status;
            evt.published_at = published_at;
        }
    }

    pub async fn push_alert(&self, alert: Alert) {
        self.alerts.write().await.push(alert);
    }

    pub fn insert_session(&self, session: Session) {
        self.sessions
            .insert(session.id, Arc::new(RwLock::new(session)));
    }

    pub fn insert_payment(&self, payment: Payment) {
        self.payment_by_booking
            .insert(payment.booking_id, payment.id);
        self.payments
            .insert(payment.id, Arc::new(RwLock::new(payment)));
    }

    pub fn series_entry(&self, slot_id: &str) -> SharedSeries {
        self.predictions
            .entry(slot_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(PredictionSeries::default())))
            .value()
            .clone()
    }

    /// Replay-only: live writers take the series lock asynchronously.
    fn upsert_series(&self, point: PredictionPoint) {
        let series = self.series_entry(&point.slot_id);
        series
            .try_write()
            .expect("replay: uncontended write")
            .upsert(point);
    }

    // ── Replay ───────────────────────────────────────────────

    /// Fold one journaled commit into the tables. Replay/compaction only —
    /// there is no concurrent access, so row locks are always free.
    pub fn apply_commit(&self, commit: &Commit) {
        for op in &commit.ops {
            self.apply_op(op);
        }
    }

    fn apply_op(&self, op: &Op) {
        match op {
            Op::RegisterSlot { slot } => self.insert_slot(slot.clone()),
            Op::UpsertPredictions { points } => {
                for p in points {
                    self.upsert_series(p.clone());
                }
            }
            Op::PrunePredictions { before } => {
                for entry in self.predictions.iter() {
                    let series = entry.value().clone();
                    series
                        .try_write()
                        .expect("replay: uncontended write")
                        .prune(*before);
                }
            }
            Op::InsertBooking { booking } => self.insert_booking(booking.clone()),
            Op::AddCandidates {
                booking_id,
                candidates,
            } => self.add_candidates(*booking_id, candidates.clone()),
            Op::SetBookingSlot { booking_id, slot_id } => {
                if let Some(b) = self.get_booking(booking_id) {
                    b.try_write().expect("replay: uncontended write").slot_id = slot_id.clone();
                }
            }
            Op::SetBookingStatus { booking_id, status } => {
                if let Some(b) = self.get_booking(booking_id) {
                    b.try_write().expect("replay: uncontended write").status = *status;
                }
            }
            Op::SetPrice { slot_id, price } => {
                if let Some(s) = self.get_slot(slot_id) {
                    s.try_write().expect("replay: uncontended write").dynamic_price = *price;
                }
            }
            Op::AppendOutbox { event } => {
                self.outbox
                    .try_write()
                    .expect("replay: uncontended write")
                    .push(event.clone());
            }
            Op::MarkOutbox {
                event_id,
                status,
                published_at,
            } => {
                let mut log = self.outbox.try_write().expect("replay: uncontended write");
                if let Some(evt) = log.iter_mut().find(|e| e.id == *event_id) {
                    evt.status = *status;
                    evt.published_at = *published_at;
                }
            }
            Op::RaiseAlert { alert } => {
                self.alerts
                    .try_write()
                    .expect("replay: uncontended write")
                    .push(alert.clone());
            }
            Op::ResolveAlert { alert_id, at } => {
                let mut alerts = self.alerts.try_write().expect("replay: uncontended write");
                if let Some(a) = alerts.iter_mut().find(|a| a.id == *alert_id) {
                    a.resolved_at = Some(*at);
                }
            }
            Op::InsertSession { session } => self.insert_session(session.clone()),
            Op::SetSessionValidation {
                session_id,
                method,
                bay_label,
            } => {
                if let Some(s) = self.get_session(session_id) {
                    let mut guard = s.try_write().expect("replay: uncontended write");
                    guard.validation_method = Some(*method);
                    guard.bay_label = bay_label.clone();
                }
            }
            Op::SetSessionGrace {
                session_id,
                grace_ends_at,
            } => {
                if let Some(s) = self.get_session(session_id) {
                    s.try_write().expect("replay: uncontended write").grace_ends_at =
                        *grace_ends_at;
                }
            }
            Op::EndSession { session_id, ended_at } => {
                if let Some(s) = self.get_session(session_id) {
                    s.try_write().expect("replay: uncontended write").ended_at = Some(*ended_at);
                }
            }
            Op::InsertPayment { payment } => self.insert_payment(payment.clone()),
            Op::SetPaymentCaptured { payment_id, amount } => {
                if let Some(p) = self.get_payment(payment_id) {
                    let mut guard = p.try_write().expect("replay: uncontended write");
                    guard.amount_captured = Some(*amount);
                    guard.status = PaymentStatus::Captured;
                }
            }
            Op::SetPaymentStatus { payment_id, status } => {
                if let Some(p) = self.get_payment(payment_id) {
                    p.try_write().expect("replay: uncontended write").status = *status;
                }
            }
        }
    }
}
