use ulid::Ulid;

use crate::engine::lifecycle::Action;
use crate::model::{AvailabilityWindow, ReservationState};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// `end <= start`.
    InvalidRange,
    /// Interval not contained in any permitted window.
    OutsideWindow,
    /// Overlaps the reservation with this id.
    SlotTaken(Ulid),
    InvalidTransition {
        from: ReservationState,
        action: Action,
    },
    /// Actor is not allowed to act on this resource or reservation.
    NotOwner(Ulid),
    InvalidPrice,
    InvalidWindow(AvailabilityWindow),
    LimitExceeded(&'static str),
    /// Money arithmetic left `Decimal`'s range.
    AmountOverflow,
    /// Match has no free places left.
    MatchFull(Ulid),
    /// Player is already on this match's roster.
    AlreadyJoined(Ulid),
    /// Match was closed by its organizer.
    MatchNotOpen(Ulid),
    /// Blank title or capacity out of range.
    InvalidMatch(&'static str),
    WalError(String),
    /// Broken internal invariant. Never a client error.
    Internal(&'static str),
}

impl EngineError {
    /// Outcomes a caller may reasonably retry with a different interval.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::SlotTaken(_) | EngineError::OutsideWindow)
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidRange => "invalid_range",
            EngineError::OutsideWindow => "outside_window",
            EngineError::SlotTaken(_) => "slot_taken",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::NotOwner(_) => "not_owner",
            EngineError::InvalidPrice => "invalid_price",
            EngineError::InvalidWindow(_) => "invalid_window",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::AmountOverflow => "amount_overflow",
            EngineError::MatchFull(_) => "match_full",
            EngineError::AlreadyJoined(_) => "already_joined",
            EngineError::MatchNotOpen(_) => "match_not_open",
            EngineError::InvalidMatch(_) => "invalid_match",
            EngineError::WalError(_) => "wal_error",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange => write!(f, "end must be after start"),
            EngineError::OutsideWindow => {
                write!(f, "requested interval is outside the court's availability")
            }
            EngineError::SlotTaken(id) => write!(f, "slot taken by reservation: {id}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a {from} reservation")
            }
            EngineError::NotOwner(actor) => write!(f, "{actor} is not permitted to do this"),
            EngineError::InvalidPrice => write!(f, "hourly price out of range"),
            EngineError::InvalidWindow(w) => {
                write!(f, "invalid availability window [{}, {})", w.start, w.end)
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::AmountOverflow => write!(f, "amount out of range"),
            EngineError::MatchFull(id) => write!(f, "match is full: {id}"),
            EngineError::AlreadyJoined(player) => write!(f, "{player} already joined this match"),
            EngineError::MatchNotOpen(id) => write!(f, "match is not open: {id}"),
            EngineError::InvalidMatch(msg) => write!(f, "invalid match: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
