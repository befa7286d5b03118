use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    SlotNotFound(String),
    BookingNotFound(Ulid),
    SessionNotFound(Ulid),
    PaymentNotFound(Ulid),
    InvalidTimestamp(String),
    InvalidMode(String),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    PaymentState(&'static str),
    LimitExceeded(&'static str),
    StoreError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotNotFound(id) => write!(f, "slot not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::SessionNotFound(id) => write!(f, "session not found: {id}"),
            EngineError::PaymentNotFound(id) => write!(f, "payment not found: {id}"),
            EngineError::InvalidTimestamp(s) => write!(f, "invalid timestamp: {s}"),
            EngineError::InvalidMode(s) => write!(f, "invalid booking mode: {s}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {} -> {}", from.as_str(), to.as_str())
            }
            EngineError::PaymentState(msg) => write!(f, "payment state: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreError(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
