use crate::model::ReservationState;

use super::EngineError;

/// A lifecycle move requested on a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Owner approves a pending reservation.
    Confirm,
    /// Owner turns down a pending reservation.
    Reject,
    /// Requester cancels their own pending reservation.
    Withdraw,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Confirm => "confirm",
            Action::Reject => "reject",
            Action::Withdraw => "withdraw",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner-side decisions accepted by `Engine::transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerAction {
    Confirm,
    Reject,
}

impl From<OwnerAction> for Action {
    fn from(a: OwnerAction) -> Self {
        match a {
            OwnerAction::Confirm => Action::Confirm,
            OwnerAction::Reject => Action::Reject,
        }
    }
}

/// State reached by applying `action` to a reservation in `from`.
///
/// Only `Pending` has outgoing edges. `Withdraw` lands in `Cancelled` here;
/// the engine additionally drops the record.
pub fn next_state(from: ReservationState, action: Action) -> Result<ReservationState, EngineError> {
    match (from, action) {
        (ReservationState::Pending, Action::Confirm) => Ok(ReservationState::Confirmed),
        (ReservationState::Pending, Action::Reject | Action::Withdraw) => {
            Ok(ReservationState::Cancelled)
        }
        (ReservationState::Confirmed | ReservationState::Cancelled, _) => {
            Err(EngineError::InvalidTransition { from, action })
        }
    }
}
