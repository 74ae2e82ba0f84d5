use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Venue-local wall-clock timestamp. No time zones are involved.
pub type Ts = NaiveDateTime;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ts,
    pub end: Ts,
}

impl Span {
    pub fn new(start: Ts, end: Ts) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ts, end: Ts) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whole hours, truncated, never less than one.
    pub fn billable_hours(&self) -> i64 {
        self.duration().num_hours().max(1)
    }
}

/// A recurring daily time-of-day range during which a court may be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AvailabilityWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.start && end <= self.end
    }
}

/// Availability configuration of a court: explicit windows, or a fallback open/close pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub windows: Vec<AvailabilityWindow>,
    pub open: Option<NaiveTime>,
    pub close: Option<NaiveTime>,
}

impl Schedule {
    pub fn windows(windows: Vec<AvailabilityWindow>) -> Self {
        Self { windows, open: None, close: None }
    }

    pub fn open_close(open: Option<NaiveTime>, close: Option<NaiveTime>) -> Self {
        Self { windows: Vec::new(), open, close }
    }

    pub fn unrestricted() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReservationState {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Pending => "pending",
            ReservationState::Confirmed => "confirmed",
            ReservationState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Pending)
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which reservation states take part in conflict checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Unconfirmed reservations hold their slot until confirmed or rejected.
    #[default]
    PendingBlocks,
    /// Only confirmed reservations block. Overlapping pending requests may coexist;
    /// the first one confirmed wins.
    ConfirmedOnly,
}

impl ConflictPolicy {
    pub fn blocks(self, state: ReservationState) -> bool {
        match self {
            ConflictPolicy::PendingBlocks => state != ReservationState::Cancelled,
            ConflictPolicy::ConfirmedOnly => state == ReservationState::Confirmed,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending-blocks" | "pending_blocks" => Some(ConflictPolicy::PendingBlocks),
            "confirmed-only" | "confirmed_only" => Some(ConflictPolicy::ConfirmedOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub span: Span,
    pub state: ReservationState,
    pub amount: Decimal,
}

impl Reservation {
    pub fn date(&self) -> NaiveDate {
        self.span.start.date()
    }
}

// ── Interval index ───────────────────────────────────────────────

/// Opaque reference to an interval held in an [`IntervalIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalHandle(Ulid);

impl IntervalHandle {
    pub fn id(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for IntervalHandle {
    fn from(id: Ulid) -> Self {
        Self(id)
    }
}

/// The slot is already occupied by the interval with this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: Ulid,
    pub span: Span,
    pub state: ReservationState,
}

/// Non-cancelled reservation intervals of one court, sorted by `span.start`.
///
/// Not synchronized: the owning `ResourceState` lives behind a per-resource
/// lock, and every mutation happens while that lock is held for writing.
#[derive(Debug, Clone, Default)]
pub struct IntervalIndex {
    entries: Vec<IndexEntry>,
}

impl IntervalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    pub fn get(&self, handle: IntervalHandle) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.id == handle.0)
    }

    /// Return only entries whose span overlaps the query window.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &IndexEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// First entry that blocks `span` under `policy`, ignoring `except`.
    pub fn first_conflict(
        &self,
        span: &Span,
        policy: ConflictPolicy,
        except: Option<IntervalHandle>,
    ) -> Option<Ulid> {
        self.overlapping(span)
            .filter(|e| except.is_none_or(|h| h.0 != e.id))
            .find(|e| policy.blocks(e.state))
            .map(|e| e.id)
    }

    pub fn overlaps(&self, span: &Span, policy: ConflictPolicy) -> bool {
        self.first_conflict(span, policy, None).is_some()
    }

    /// Check-then-insert as one step. The caller must hold the resource's
    /// write lock across the whole call.
    pub fn try_reserve(
        &mut self,
        id: Ulid,
        span: Span,
        policy: ConflictPolicy,
    ) -> Result<IntervalHandle, Conflict> {
        if let Some(other) = self.first_conflict(&span, policy, None) {
            return Err(Conflict(other));
        }
        self.insert(IndexEntry { id, span, state: ReservationState::Pending });
        Ok(IntervalHandle(id))
    }

    /// Insert maintaining sort order by span.start, without a conflict check.
    /// Used when replaying already-admitted reservations.
    pub fn insert(&mut self, entry: IndexEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, handle: IntervalHandle) -> Option<IndexEntry> {
        let pos = self.entries.iter().position(|e| e.id == handle.0)?;
        Some(self.entries.remove(pos))
    }

    /// Returns false if the handle is not present.
    pub fn set_state(&mut self, handle: IntervalHandle, state: ReservationState) -> bool {
        match self.entries.iter_mut().find(|e| e.id == handle.0) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Spans of every entry that blocks under `policy`, in start order.
    pub fn blocking_spans(&self, policy: ConflictPolicy) -> Vec<Span> {
        self.entries
            .iter()
            .filter(|e| policy.blocks(e.state))
            .map(|e| e.span)
            .collect()
    }
}

/// A pick-up game published on a court that players can join until it is
/// full or its organizer closes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub organizer_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub at: Ts,
    pub capacity: u32,
    /// In join order, no duplicates.
    pub players: Vec<Ulid>,
    pub open: bool,
}

impl Match {
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity as usize
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub hourly_price: Decimal,
    pub schedule: Schedule,
    /// Live intervals used for admission control.
    pub index: IntervalIndex,
    /// Every retained reservation record, cancelled ones included.
    pub reservations: HashMap<Ulid, Reservation>,
    /// Matches published on this court, closed ones included.
    pub matches: HashMap<Ulid, Match>,
    /// Set under the write lock when the resource is deleted, so a proposal
    /// that fetched the state before removal cannot commit into it.
    pub deleted: bool,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        hourly_price: Decimal,
        schedule: Schedule,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            hourly_price,
            schedule,
            index: IntervalIndex::new(),
            reservations: HashMap::new(),
            matches: HashMap::new(),
            deleted: false,
        }
    }

    /// `None` if the product leaves `Decimal`'s range.
    pub fn amount_for(&self, span: &Span) -> Option<Decimal> {
        self.hourly_price.checked_mul(Decimal::from(span.billable_hours()))
    }

    pub fn has_reservations_after(&self, t: Ts) -> bool {
        self.reservations.values().any(|r| r.span.start > t)
    }
}

/// One WAL record. Replaying every event in order rebuilds the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        hourly_price: Decimal,
        schedule: Schedule,
    },
    ResourceUpdated {
        id: Ulid,
        name: Option<String>,
        hourly_price: Decimal,
    },
    ScheduleReplaced {
        id: Ulid,
        schedule: Schedule,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationProposed {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        span: Span,
        amount: Decimal,
    },
    ReservationConfirmed {
        id: Ulid,
        resource_id: Ulid,
    },
    ReservationRejected {
        id: Ulid,
        resource_id: Ulid,
    },
    /// Requester withdrew a pending reservation; the record is dropped.
    ReservationWithdrawn {
        id: Ulid,
        resource_id: Ulid,
    },
    MatchPublished {
        id: Ulid,
        resource_id: Ulid,
        organizer_id: Ulid,
        title: String,
        description: Option<String>,
        at: Ts,
        capacity: u32,
    },
    MatchJoined {
        id: Ulid,
        resource_id: Ulid,
        player_id: Ulid,
    },
    MatchClosed {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub hourly_price: Decimal,
    pub schedule: Schedule,
    pub has_future_reservations: bool,
}

/// Whose reservations a listing or report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Resource(Ulid),
    Owner(Ulid),
    Requester(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Date,
    StartTime,
    EndTime,
    State,
    Amount,
    Resource,
}

impl SortKey {
    /// Unknown keys sort by date.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "start_time" | "time" => SortKey::StartTime,
            "end" | "end_time" => SortKey::EndTime,
            "state" | "status" => SortKey::State,
            "amount" => SortKey::Amount,
            "resource" | "resource_id" | "court" => SortKey::Resource,
            _ => SortKey::Date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub state: Option<ReservationState>,
    /// Inclusive, compared against the start date.
    pub from: Option<NaiveDate>,
    /// Inclusive, compared against the start date.
    pub to: Option<NaiveDate>,
    pub sort: SortKey,
    pub direction: SortDirection,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        let date = r.date();
        self.state.is_none_or(|s| s == r.state)
            && self.from.is_none_or(|from| date >= from)
            && self.to.is_none_or(|to| date <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> Ts {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn span(h1: u32, m1: u32, h2: u32, m2: u32) -> Span {
        Span::new(at(h1, m1), at(h2, m2))
    }

    fn pending(s: Span) -> IndexEntry {
        IndexEntry { id: Ulid::new(), span: s, state: ReservationState::Pending }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = span(9, 0, 10, 0);
        let b = span(9, 30, 11, 0);
        let c = span(10, 0, 11, 0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back
        assert!(Span::try_new(at(10, 0), at(10, 0)).is_none());
    }

    #[test]
    fn billable_hours_truncates_with_floor_of_one() {
        assert_eq!(span(9, 0, 9, 45).billable_hours(), 1);
        assert_eq!(span(9, 0, 10, 30).billable_hours(), 1);
        assert_eq!(span(9, 0, 11, 10).billable_hours(), 2);
        assert_eq!(span(9, 0, 12, 0).billable_hours(), 3);
    }

    #[test]
    fn amount_overflow_is_none() {
        let mut rs = ResourceState::new(Ulid::new(), Ulid::new(), None, Decimal::from(15), Schedule::unrestricted());
        assert_eq!(rs.amount_for(&span(9, 0, 11, 0)), Some(Decimal::from(30)));
        rs.hourly_price = Decimal::MAX;
        assert_eq!(rs.amount_for(&span(9, 0, 11, 0)), None);
        assert_eq!(rs.amount_for(&span(9, 0, 10, 0)), Some(Decimal::MAX));
    }

    #[test]
    fn index_keeps_start_order() {
        let mut idx = IntervalIndex::new();
        idx.insert(pending(span(15, 0, 16, 0)));
        idx.insert(pending(span(9, 0, 10, 0)));
        idx.insert(pending(span(12, 0, 13, 0)));
        let starts: Vec<_> = idx.iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![at(9, 0), at(12, 0), at(15, 0)]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut idx = IntervalIndex::new();
        idx.insert(pending(span(8, 0, 9, 0)));
        idx.insert(pending(span(10, 30, 12, 0)));
        idx.insert(pending(span(18, 0, 19, 0)));
        let hits: Vec<_> = idx.overlapping(&span(11, 0, 14, 0)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, span(10, 30, 12, 0));
    }

    #[test]
    fn overlapping_large_entry_spanning_query() {
        let mut idx = IntervalIndex::new();
        idx.insert(pending(span(6, 0, 22, 0)));
        assert_eq!(idx.overlapping(&span(12, 0, 12, 30)).count(), 1);
    }

    #[test]
    fn try_reserve_rejects_overlap_and_accepts_adjacent() {
        let mut idx = IntervalIndex::new();
        let first = Ulid::new();
        idx.try_reserve(first, span(9, 0, 10, 30), ConflictPolicy::PendingBlocks)
            .unwrap();

        let err = idx
            .try_reserve(Ulid::new(), span(10, 0, 11, 0), ConflictPolicy::PendingBlocks)
            .unwrap_err();
        assert_eq!(err, Conflict(first));

        idx.try_reserve(Ulid::new(), span(10, 30, 11, 30), ConflictPolicy::PendingBlocks)
            .unwrap();
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn remove_frees_the_slot() {
        let mut idx = IntervalIndex::new();
        let handle = idx
            .try_reserve(Ulid::new(), span(9, 0, 10, 0), ConflictPolicy::PendingBlocks)
            .unwrap();
        assert!(idx.remove(handle).is_some());
        assert!(idx.remove(handle).is_none());
        assert!(!idx.overlaps(&span(9, 0, 10, 0), ConflictPolicy::PendingBlocks));
    }

    #[test]
    fn confirmed_only_policy_lets_pending_overlap() {
        let mut idx = IntervalIndex::new();
        let a = idx
            .try_reserve(Ulid::new(), span(9, 0, 10, 0), ConflictPolicy::ConfirmedOnly)
            .unwrap();
        idx.try_reserve(Ulid::new(), span(9, 30, 10, 30), ConflictPolicy::ConfirmedOnly)
            .unwrap();

        assert!(idx.set_state(a, ReservationState::Confirmed));
        let blocked =
            idx.try_reserve(Ulid::new(), span(9, 15, 9, 45), ConflictPolicy::ConfirmedOnly);
        assert_eq!(blocked, Err(Conflict(a.id())));
    }

    #[test]
    fn first_conflict_ignores_excepted_handle() {
        let mut idx = IntervalIndex::new();
        let h = idx
            .try_reserve(Ulid::new(), span(9, 0, 10, 0), ConflictPolicy::PendingBlocks)
            .unwrap();
        let s = span(9, 0, 10, 0);
        assert!(idx.first_conflict(&s, ConflictPolicy::PendingBlocks, Some(h)).is_none());
        assert_eq!(idx.first_conflict(&s, ConflictPolicy::PendingBlocks, None), Some(h.id()));
    }

    #[test]
    fn policy_parse() {
        assert_eq!(ConflictPolicy::parse("Pending-Blocks"), Some(ConflictPolicy::PendingBlocks));
        assert_eq!(ConflictPolicy::parse("confirmed_only"), Some(ConflictPolicy::ConfirmedOnly));
        assert_eq!(ConflictPolicy::parse("whatever"), None);
        assert!(!ConflictPolicy::PendingBlocks.blocks(ReservationState::Cancelled));
        assert!(!ConflictPolicy::ConfirmedOnly.blocks(ReservationState::Pending));
    }

    #[test]
    fn filter_matches_state_and_inclusive_dates() {
        let r = Reservation {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            requester_id: Ulid::new(),
            span: span(9, 0, 10, 0),
            state: ReservationState::Confirmed,
            amount: Decimal::from(10),
        };
        let day = r.date();
        let f = ReservationFilter { from: Some(day), to: Some(day), ..Default::default() };
        assert!(f.matches(&r));
        let f = ReservationFilter { state: Some(ReservationState::Pending), ..Default::default() };
        assert!(!f.matches(&r));
        let f = ReservationFilter { from: day.succ_opt(), ..Default::default() };
        assert!(!f.matches(&r));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationProposed {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            requester_id: Ulid::new(),
            span: span(9, 0, 10, 30),
            amount: Decimal::new(1250, 2),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
