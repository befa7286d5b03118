use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Truncate a timestamp to its minute. Prediction keys and booking ETAs are
/// minute-granular.
pub fn minute_floor(t: Ms) -> Ms {
    t - t.rem_euclid(MINUTE_MS)
}

/// Parse an ISO-8601 timestamp to unix ms. `None` on malformed input.
pub fn parse_iso(s: &str) -> Option<Ms> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub fn to_iso(t: Ms) -> String {
    match Utc.timestamp_millis_opt(t).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => t.to_string(),
    }
}

// ── Inventory ────────────────────────────────────────────────────

/// A parking slot. `dynamic_price` is mutated only by the pricing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub slot_id: String,
    /// Interchangeability group used for backup selection.
    pub cluster_id: String,
    pub base_price: f64,
    pub dynamic_price: f64,
    #[serde(default)]
    pub is_ev: bool,
    #[serde(default)]
    pub is_accessible: bool,
}

/// One forecast observation: probability that `slot_id` is free at `eta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub slot_id: String,
    /// Minute-floored target time.
    pub eta: Ms,
    pub p_free: f64,
    pub conf_low: Option<f64>,
    pub conf_high: Option<f64>,
    pub model_version: String,
}

/// Per-slot forecast series, sorted by `eta`. Writes upsert by key — a
/// re-run forecast batch replaces, never duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSeries {
    pub points: Vec<PredictionPoint>,
}

impl PredictionSeries {
    /// Insert or replace the point with the same eta, keeping sort order.
    pub fn upsert(&mut self, point: PredictionPoint) {
        match self.points.binary_search_by_key(&point.eta, |p| p.eta) {
            Ok(pos) => self.points[pos] = point,
            Err(pos) => self.points.insert(pos, point),
        }
    }

    /// Drop every point with eta < `before`.
    pub fn prune(&mut self, before: Ms) {
        let cut = self.points.partition_point(|p| p.eta < before);
        self.points.drain(..cut);
    }

    /// Latest point with eta <= `target`.
    pub fn latest_at_or_before(&self, target: Ms) -> Option<&PredictionPoint> {
        let idx = self.points.partition_point(|p| p.eta <= target);
        idx.checked_sub(1).map(|i| &self.points[i])
    }

    /// Earliest point with eta >= `target`.
    pub fn earliest_at_or_after(&self, target: Ms) -> Option<&PredictionPoint> {
        let idx = self.points.partition_point(|p| p.eta < target);
        self.points.get(idx)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingMode {
    Guaranteed,
    SmartHold,
}

impl BookingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "guaranteed" => Some(BookingMode::Guaranteed),
            "smart_hold" => Some(BookingMode::SmartHold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingMode::Guaranteed => "guaranteed",
            BookingMode::SmartHold => "smart_hold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Held,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// held → {confirmed, active, cancelled}; confirmed → {active, cancelled};
    /// active → completed; completed/cancelled terminal.
    pub fn can_transition(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Held, Confirmed)
                | (Held, Active)
                | (Held, Cancelled)
                | (Confirmed, Active)
                | (Confirmed, Cancelled)
                | (Active, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Held => "held",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    /// Mutable on swap. Candidate history is never rewritten.
    pub slot_id: String,
    pub cluster_id: String,
    pub eta_minute: Ms,
    pub mode: BookingMode,
    pub status: BookingStatus,
    /// Frozen at creation, never recomputed.
    pub p_free_at_hold: Option<f64>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRole {
    Primary,
    Backup,
}

/// Append-only record of a slot considered for a booking. Exactly one
/// primary per booking; backups ordered by descending confidence at add time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingCandidate {
    pub booking_id: Ulid,
    pub slot_id: String,
    pub role: CandidateRole,
    pub confidence_at_add: Option<f64>,
}

// ── Outbox ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    Error,
}

/// Durable domain event, written in the same commit as the mutation it
/// documents. Immutable except `status`/`published_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Ulid,
    pub event_type: String,
    /// JSON-encoded payload.
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: Ms,
    pub published_at: Option<Ms>,
}

impl OutboxEvent {
    pub fn new(event_type: &str, payload: serde_json::Value, at: Ms) -> Self {
        Self {
            id: Ulid::new(),
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            status: OutboxStatus::Pending,
            created_at: at,
            published_at: None,
        }
    }

    /// Topic a published event is delivered on: the event-type prefix
    /// (`booking.created` → `booking`).
    pub fn topic(&self) -> &str {
        self.event_type
            .split_once('.')
            .map_or(self.event_type.as_str(), |(t, _)| t)
    }
}

// ── Alerts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Trust,
    DataQuality,
    Violation,
    Incentive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Ulid,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: Ms,
    pub resolved_at: Option<Ms>,
}

// ── Sessions & payments ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    Qr,
    Nfc,
    Plate,
}

impl ValidationMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qr" => Some(ValidationMethod::Qr),
            "nfc" => Some(ValidationMethod::Nfc),
            "plate" => Some(ValidationMethod::Plate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMethod::Qr => "qr",
            ValidationMethod::Nfc => "nfc",
            ValidationMethod::Plate => "plate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub started_at: Ms,
    pub ended_at: Option<Ms>,
    pub validation_method: Option<ValidationMethod>,
    pub bay_label: Option<String>,
    pub grace_ends_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Init,
    PreauthOk,
    Captured,
    Refunded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount_authorized: f64,
    pub amount_captured: Option<f64>,
    pub status: PaymentStatus,
    pub created_at: Ms,
}

// ── Journal record format ────────────────────────────────────────

/// Flat single-table operations. A `Commit` groups the ops of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    RegisterSlot { slot: Slot },
    UpsertPredictions { points: Vec<PredictionPoint> },
    PrunePredictions { before: Ms },
    InsertBooking { booking: Booking },
    AddCandidates { booking_id: Ulid, candidates: Vec<BookingCandidate> },
    SetBookingSlot { booking_id: Ulid, slot_id: String },
    SetBookingStatus { booking_id: Ulid, status: BookingStatus },
    SetPrice { slot_id: String, price: f64 },
    AppendOutbox { event: OutboxEvent },
    MarkOutbox { event_id: Ulid, status: OutboxStatus, published_at: Option<Ms> },
    RaiseAlert { alert: Alert },
    ResolveAlert { alert_id: Ulid, at: Ms },
    InsertSession { session: Session },
    SetSessionValidation { session_id: Ulid, method: ValidationMethod, bay_label: Option<String> },
    SetSessionGrace { session_id: Ulid, grace_ends_at: Ms },
    EndSession { session_id: Ulid, ended_at: Ms },
    InsertPayment { payment: Payment },
    SetPaymentCaptured { payment_id: Ulid, amount: f64 },
    SetPaymentStatus { payment_id: Ulid, status: PaymentStatus },
}

/// One atomically-committed unit of state change — the WAL record format.
///
/// Every op of a commit lands or none do: a booking row never appears
/// without its candidates and its outbox event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub ops: Vec<Op>,
}

impl Commit {
    pub fn one(op: Op) -> Self {
        Self { ops: vec![op] }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BackupView {
    pub slot_id: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingView {
    pub booking_id: Ulid,
    pub slot_id: String,
    pub eta_minute: Ms,
    pub mode: BookingMode,
    pub status: BookingStatus,
    pub p_free_at_hold: Option<f64>,
    pub backups: Vec<BackupView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub slot_id: String,
    pub cluster_id: String,
    pub p_free: f64,
    pub price: f64,
    pub is_ev: bool,
    pub is_accessible: bool,
}
