use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use ulid::Ulid;

use courtside::engine::{Engine, EngineError, OwnerAction};
use courtside::model::{
    AvailabilityWindow, ConflictPolicy, ReservationFilter, ReservationState, Schedule, Scope,
};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("courtside_test_concurrent");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, 6)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

async fn court(engine: &Engine, owner: Ulid) -> Ulid {
    let id = Ulid::new();
    let window = AvailabilityWindow::new(
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
    );
    engine
        .create_resource(id, owner, Some("Padel 1".into()), Decimal::from(12), Schedule::windows(vec![window]))
        .await
        .unwrap();
    id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn identical_requests_have_exactly_one_winner() {
    let engine = Arc::new(Engine::new(test_wal_path("one_winner.wal"), ConflictPolicy::default()).unwrap());
    let rid = court(&engine, Ulid::new()).await;

    let n = 64;
    let mut handles = Vec::new();
    for _ in 0..n {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.propose(Ulid::new(), rid, Ulid::new(), at(19, 0), at(20, 30)).await
        }));
    }

    let mut winners = Vec::new();
    let mut taken = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(r) => winners.push(r),
            Err(EngineError::SlotTaken(_)) => taken += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(taken, n - 1);

    let all = engine
        .list_reservations(Scope::Resource(rid), &ReservationFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, winners[0].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn partially_overlapping_requests_never_overlap() {
    let engine = Arc::new(Engine::new(test_wal_path("no_overlap.wal"), ConflictPolicy::default()).unwrap());
    let rid = court(&engine, Ulid::new()).await;

    // Staggered half-hour starts, 90 minutes each, across the evening.
    let mut handles = Vec::new();
    for i in 0..40u32 {
        let engine = engine.clone();
        let start = at(8 + (i % 24) / 2, (i % 2) * 30);
        let end = start + chrono::TimeDelta::minutes(90);
        handles.push(tokio::spawn(async move {
            engine.propose(Ulid::new(), rid, Ulid::new(), start, end).await
        }));
    }
    for h in handles {
        match h.await.unwrap() {
            Ok(_) | Err(EngineError::SlotTaken(_)) | Err(EngineError::OutsideWindow) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let live: Vec<_> = engine
        .list_reservations(Scope::Resource(rid), &ReservationFilter::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.state != ReservationState::Cancelled)
        .collect();
    assert!(!live.is_empty());
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{:?} overlaps {:?}", a.span, b.span);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_courts_do_not_block_each_other() {
    let engine = Arc::new(Engine::new(test_wal_path("independent.wal"), ConflictPolicy::default()).unwrap());
    let owner = Ulid::new();
    let busy = court(&engine, owner).await;
    let free = court(&engine, owner).await;

    // Hold the busy court's lock while proposing on the other one.
    let rs = engine.get_resource(&busy).unwrap();
    let guard = rs.write().await;

    let reservation = tokio::time::timeout(
        Duration::from_secs(2),
        engine.propose(Ulid::new(), free, Ulid::new(), at(10, 0), at(11, 0)),
    )
    .await
    .expect("proposal on an idle court must not wait on another court")
    .unwrap();
    assert_eq!(reservation.resource_id, free);
    drop(guard);

    engine.propose(Ulid::new(), busy, Ulid::new(), at(10, 0), at(11, 0)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejection_race_reopens_slot_once() {
    let engine = Arc::new(Engine::new(test_wal_path("reject_race.wal"), ConflictPolicy::default()).unwrap());
    let owner = Ulid::new();
    let rid = court(&engine, owner).await;

    let first = engine
        .propose(Ulid::new(), rid, Ulid::new(), at(18, 0), at(19, 0))
        .await
        .unwrap();
    engine.transition(first.id, owner, OwnerAction::Reject).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.propose(Ulid::new(), rid, Ulid::new(), at(18, 0), at(19, 0)).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_reuse_of_one_id_admits_once() {
    let engine = Arc::new(Engine::new(test_wal_path("id_race.wal"), ConflictPolicy::default()).unwrap());
    let owner = Ulid::new();
    let courts = [court(&engine, owner).await, court(&engine, owner).await];

    // Same reservation id, disjoint slots, spread over two courts.
    let id = Ulid::new();
    let mut handles = Vec::new();
    for i in 0..16u32 {
        let engine = engine.clone();
        let rid = courts[(i % 2) as usize];
        handles.push(tokio::spawn(async move {
            engine.propose(id, rid, Ulid::new(), at(8 + i / 2, 0), at(8 + i / 2, 30)).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);

    let mut stored = 0;
    for rid in courts {
        stored += engine
            .list_reservations(Scope::Resource(rid), &ReservationFilter::default())
            .await
            .unwrap()
            .len();
    }
    assert_eq!(stored, 1);

    // Same court id created concurrently.
    let court_id = Ulid::new();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_resource(court_id, owner, None, Decimal::from(12), Schedule::unrestricted())
                .await
        }));
    }
    let mut created = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => created += 1,
            Err(EngineError::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 1);
}
