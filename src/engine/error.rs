use ulid::Ulid;

use crate::model::{AppointmentStatus, InvalidValue};

use super::resolver::Rejection;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The acting user may not touch this entity.
    Forbidden(Ulid),
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// A booking was attempted on a slot the resolver rejected.
    SlotUnavailable(Rejection),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    /// Failure of an external schedule store.
    Storage(String),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(id) => write!(f, "not permitted on: {id}"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "appointment {id} cannot go from {from} to {to}")
            }
            EngineError::SlotUnavailable(rejection) => write!(f, "slot unavailable: {rejection}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidValue> for EngineError {
    fn from(value: InvalidValue) -> Self {
        EngineError::InvalidInput(value.0)
    }
}
