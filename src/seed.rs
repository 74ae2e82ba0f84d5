use chrono::{NaiveDate, NaiveTime, TimeDelta, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, OwnerAction};
use crate::limits::{MAX_SEED_COUNT, SEED_ATTEMPTS_PER_RESERVATION};
use crate::model::{ResourceInfo, Schedule};

const DEFAULT_OPEN_HOUR: u32 = 8;
const DEFAULT_CLOSE_HOUR: u32 = 22;
const DEFAULT_RANGE_DAYS: i64 = 30;
const MIN_REQUESTERS: usize = 5;

/// What to generate for one owner's courts.
#[derive(Debug, Clone)]
pub struct SeedRequest {
    pub owner_id: Ulid,
    /// Existing requesters to book on behalf of. Topped up with fresh ids
    /// when fewer than `max(5, count / 3)`.
    pub requesters: Vec<Ulid>,
    pub count: usize,
    /// Defaults to 30 days before `today`.
    pub from: Option<NaiveDate>,
    /// Defaults to 30 days after `today`.
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedOutcome {
    /// Reservations admitted. May fall short of the requested count.
    pub created: usize,
    pub attempts: usize,
    /// Requester ids generated to top up the pool.
    pub requesters: usize,
}

/// Earliest opening and latest closing time across a schedule.
fn bounds(schedule: &Schedule) -> (NaiveTime, NaiveTime) {
    let default_open = NaiveTime::from_hms_opt(DEFAULT_OPEN_HOUR, 0, 0).unwrap_or_default();
    let default_close = NaiveTime::from_hms_opt(DEFAULT_CLOSE_HOUR, 0, 0).unwrap_or_default();
    if schedule.windows.is_empty() {
        return (
            schedule.open.unwrap_or(default_open),
            schedule.close.unwrap_or(default_close),
        );
    }
    let open = schedule.windows.iter().map(|w| w.start).min().unwrap_or(default_open);
    let close = schedule.windows.iter().map(|w| w.end).max().unwrap_or(default_close);
    (open, close)
}

/// Deterministic generator of demo reservations. Books only through
/// `Engine::propose` and `Engine::transition`.
pub struct SeedGenerator {
    rng: StdRng,
}

impl SeedGenerator {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// On-the-hour start and an end one or two hours later, or `None` when
    /// the court's hours leave no room.
    fn pick_times(&mut self, schedule: &Schedule) -> Option<(NaiveTime, NaiveTime)> {
        let (open, close) = bounds(schedule);
        let first = open.hour() as i64;
        let last = close.hour() as i64 - 2;
        if last <= first {
            return None;
        }
        let hour = self.rng.gen_range(first..=last) as u32;
        let start = NaiveTime::from_hms_opt(hour, 0, 0)?;
        let hours = if self.rng.gen_bool(0.5) { 1 } else { 2 };
        let mut end = NaiveTime::from_hms_opt(hour + hours, 0, 0)?;
        if end > close {
            end = NaiveTime::from_hms_opt(hour + 1, 0, 0)?;
            if end > close {
                return None;
            }
        }
        Some((start, end))
    }

    fn pick_decision(&mut self) -> Option<OwnerAction> {
        match self.rng.gen_range(0..5) {
            0..=2 => Some(OwnerAction::Confirm),
            3 => None,
            _ => Some(OwnerAction::Reject),
        }
    }

    pub async fn generate(
        &mut self,
        engine: &Engine,
        request: SeedRequest,
        today: NaiveDate,
    ) -> Result<SeedOutcome, EngineError> {
        if request.count > MAX_SEED_COUNT {
            return Err(EngineError::LimitExceeded("seed count too large"));
        }
        let from = request.from.unwrap_or(today - TimeDelta::days(DEFAULT_RANGE_DAYS));
        let to = request.to.unwrap_or(today + TimeDelta::days(DEFAULT_RANGE_DAYS));
        let span_days = (to - from).num_days();
        if span_days < 0 {
            return Err(EngineError::InvalidRange);
        }

        let now = today.and_time(NaiveTime::default());
        let courts: Vec<ResourceInfo> = engine.list_resources(Some(request.owner_id), now).await;
        if courts.is_empty() {
            return Err(EngineError::NotFound(request.owner_id));
        }

        let mut requesters = request.requesters;
        let needed = MIN_REQUESTERS.max(request.count / 3);
        let generated = needed.saturating_sub(requesters.len());
        for _ in 0..generated {
            requesters.push(Ulid::from_parts(0, self.rng.r#gen()));
        }

        let max_attempts = request.count * SEED_ATTEMPTS_PER_RESERVATION;
        let mut created = 0;
        let mut attempts = 0;
        while created < request.count && attempts < max_attempts {
            attempts += 1;

            let court = &courts[self.rng.gen_range(0..courts.len())];
            let requester = requesters[self.rng.gen_range(0..requesters.len())];
            let date = from + TimeDelta::days(self.rng.gen_range(0..=span_days));
            let Some((start, end)) = self.pick_times(&court.schedule) else {
                continue;
            };

            let reservation = match engine
                .propose(Ulid::new(), court.id, requester, date.and_time(start), date.and_time(end))
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_retriable() => {
                    debug!(court = %court.id, %date, error = %e, "seed attempt rejected");
                    continue;
                }
                Err(e) => return Err(e),
            };
            created += 1;

            if let Some(decision) = self.pick_decision() {
                match engine.transition(reservation.id, court.owner_id, decision).await {
                    Ok(_) => {}
                    // Another confirmed reservation overlaps under a lenient
                    // policy; leave this one pending.
                    Err(e) if e.is_retriable() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        info!(owner = %request.owner_id, created, attempts, requesters = generated, "seeded reservations");
        Ok(SeedOutcome { created, attempts, requesters: generated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtside_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    #[test]
    fn bounds_span_all_windows() {
        let s = Schedule::windows(vec![
            AvailabilityWindow::new(t(14), t(18)),
            AvailabilityWindow::new(t(9), t(12)),
        ]);
        assert_eq!(bounds(&s), (t(9), t(18)));
        assert_eq!(bounds(&Schedule::unrestricted()), (t(8), t(22)));
        assert_eq!(bounds(&Schedule::open_close(Some(t(10)), None)), (t(10), t(22)));
    }

    #[test]
    fn picked_times_stay_inside_hours() {
        let mut seed = SeedGenerator::new(7);
        let s = Schedule::open_close(Some(t(9)), Some(t(13)));
        for _ in 0..200 {
            let (start, end) = seed.pick_times(&s).unwrap();
            assert!(start >= t(9) && end <= t(13));
            assert_eq!(start.minute(), 0);
            let hours = (end - start).num_hours();
            assert!(hours == 1 || hours == 2);
        }
    }

    #[test]
    fn too_short_day_yields_nothing() {
        let mut seed = SeedGenerator::new(7);
        let s = Schedule::open_close(Some(t(9)), Some(t(11)));
        assert!(seed.pick_times(&s).is_none());
    }

    #[tokio::test]
    async fn generate_books_without_overlap() {
        let engine = Engine::new(test_wal_path("generate.wal"), ConflictPolicy::default()).unwrap();
        let owner = Ulid::new();
        let court = Ulid::new();
        engine
            .create_resource(court, owner, Some("Center".into()), Decimal::from(40), Schedule::unrestricted())
            .await
            .unwrap();

        let mut seed = SeedGenerator::new(42);
        let outcome = seed
            .generate(
                &engine,
                SeedRequest { owner_id: owner, requesters: vec![], count: 30, from: None, to: None },
                today(),
            )
            .await
            .unwrap();

        assert!(outcome.created > 0 && outcome.created <= 30);
        assert!(outcome.attempts <= 300);
        assert_eq!(outcome.requesters, 10);

        let all = engine
            .list_reservations(Scope::Owner(owner), &ReservationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), outcome.created);
        let live: Vec<_> = all.iter().filter(|r| r.state != ReservationState::Cancelled).collect();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert!(!a.span.overlaps(&b.span), "{:?} overlaps {:?}", a.span, b.span);
            }
        }
    }

    #[tokio::test]
    async fn same_seed_same_shape() {
        let mut shapes = Vec::new();
        for run in 0..2 {
            let engine = Engine::new(
                test_wal_path(&format!("deterministic_{run}.wal")),
                ConflictPolicy::default(),
            )
            .unwrap();
            let owner = Ulid::new();
            engine
                .create_resource(Ulid::new(), owner, None, Decimal::from(10), Schedule::unrestricted())
                .await
                .unwrap();
            let outcome = SeedGenerator::new(99)
                .generate(
                    &engine,
                    SeedRequest { owner_id: owner, requesters: vec![], count: 12, from: None, to: None },
                    today(),
                )
                .await
                .unwrap();
            let mut spans: Vec<_> = engine
                .list_reservations(Scope::Owner(owner), &ReservationFilter::default())
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.span, r.state))
                .collect();
            spans.sort_by_key(|(s, st)| (s.start, s.end, *st));
            shapes.push((outcome, spans));
        }
        assert_eq!(shapes[0], shapes[1]);
    }

    #[tokio::test]
    async fn owner_without_courts_is_not_found() {
        let engine = Engine::new(test_wal_path("no_courts.wal"), ConflictPolicy::default()).unwrap();
        let owner = Ulid::new();
        let err = SeedGenerator::new(1)
            .generate(
                &engine,
                SeedRequest { owner_id: owner, requesters: vec![], count: 5, from: None, to: None },
                today(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(id) if id == owner));
    }
}
