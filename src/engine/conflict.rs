use chrono::TimeDelta;

use crate::limits::MAX_RESERVATION_HOURS;
use crate::model::*;

use super::availability::permits;
use super::EngineError;

/// Admission checks that need no lock: a well-formed range the court's schedule admits.
/// Pure validation, safe to run before taking any lock.
pub(crate) fn validate_request(schedule: &Schedule, start: Ts, end: Ts) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidRange)?;
    if span.duration() > TimeDelta::hours(MAX_RESERVATION_HOURS) {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    if !permits(schedule, &span) {
        return Err(EngineError::OutsideWindow);
    }
    Ok(span)
}

/// Overlap check and insert. Caller holds the resource write lock.
pub(crate) fn reserve(
    rs: &mut ResourceState,
    id: ulid::Ulid,
    span: Span,
    policy: ConflictPolicy,
) -> Result<IntervalHandle, EngineError> {
    rs.index
        .try_reserve(id, span, policy)
        .map_err(|Conflict(other)| EngineError::SlotTaken(other))
}

/// A reservation may only become confirmed if no other confirmed interval
/// overlaps it. Under `PendingBlocks` nothing overlaps at all, so this only
/// bites with `ConfirmedOnly`.
pub(crate) fn check_confirmable(rs: &ResourceState, handle: IntervalHandle) -> Result<(), EngineError> {
    let entry = rs
        .index
        .get(handle)
        .ok_or(EngineError::Internal("pending reservation missing from interval index"))?;
    match rs
        .index
        .first_conflict(&entry.span, ConflictPolicy::ConfirmedOnly, Some(handle))
    {
        Some(other) => Err(EngineError::SlotTaken(other)),
        None => Ok(()),
    }
}
