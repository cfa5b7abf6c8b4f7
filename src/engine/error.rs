use ulid::Ulid;

use crate::gateway::GatewayError;
use crate::model::ReservationStatus;

/// Coarse classification a transport layer maps onto its envelope (HTTP
/// status, error code field). Internal detail never leaves the engine:
/// `Internal` errors log the cause and show callers nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Gateway,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Gateway => "gateway",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(&'static str),
    LimitExceeded(&'static str),
    /// What was looked up ("reservation", "unit", ...) plus the id.
    NotFound(&'static str, Ulid),
    /// The unit already has a conflicting claim for the window.
    UnitConflict(Ulid),
    /// The unit is administratively disabled.
    UnitInactive(Ulid),
    /// The hold's expiry has passed; payment can no longer land.
    HoldExpired(Ulid),
    /// The reservation's current status does not permit the operation.
    IllegalTransition {
        status: ReservationStatus,
        op: &'static str,
    },
    /// A gateway transaction is already recorded for this reservation.
    AlreadyCaptured(Ulid),
    /// Completion needs every handed-out item back first.
    ItemsStillOut(Ulid),
    Gateway(GatewayError),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::UnitConflict(_)
            | EngineError::UnitInactive(_)
            | EngineError::HoldExpired(_)
            | EngineError::IllegalTransition { .. }
            | EngineError::AlreadyCaptured(_)
            | EngineError::ItemsStillOut(_) => ErrorKind::Conflict,
            EngineError::Gateway(_) => ErrorKind::Gateway,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::UnitConflict(id) => write!(f, "unit already booked: {id}"),
            EngineError::UnitInactive(id) => write!(f, "unit not rentable: {id}"),
            EngineError::HoldExpired(id) => write!(f, "hold expired: {id}"),
            EngineError::IllegalTransition { status, op } => {
                write!(f, "cannot {op} a {} reservation", status.name())
            }
            EngineError::AlreadyCaptured(id) => {
                write!(f, "payment already captured for reservation: {id}")
            }
            EngineError::ItemsStillOut(id) => {
                write!(f, "items still checked out on reservation: {id}")
            }
            EngineError::Gateway(e) => write!(f, "payment gateway: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GatewayError> for EngineError {
    fn from(e: GatewayError) -> Self {
        EngineError::Gateway(e)
    }
}
