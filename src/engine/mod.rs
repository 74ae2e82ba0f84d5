mod availability;
mod conflict;
mod error;
pub mod lifecycle;
mod matches;
mod mutations;
mod queries;
pub mod report;

pub use availability::{day_spans, free_slots, merge_overlapping, permits, subtract_intervals};
pub use error::EngineError;
pub use lifecycle::{next_state, Action, OwnerAction};
pub use report::{aggregate, is_recognized, Period, PeriodRow};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

/// One court's state behind its own lock. Admission for a court serializes
/// on this lock; different courts never contend.
pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        // Appends are always batched by the caller loop.
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → court id
    pub(super) reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Reverse lookup: match id → court id
    pub(super) match_to_resource: DashMap<Ulid, Ulid>,
    pub(super) policy: ConflictPolicy,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an append to the old file.
    pub(super) compaction_gate: RwLock<()>,
}

/// The engine's reverse id maps, updated alongside court state.
struct Lookups<'a> {
    reservations: &'a DashMap<Ulid, Ulid>,
    matches: &'a DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ResourceState. Caller holds the lock.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, maps: &Lookups<'_>) {
    match event {
        Event::ResourceUpdated { name, hourly_price, .. } => {
            rs.name = name.clone();
            rs.hourly_price = *hourly_price;
        }
        Event::ScheduleReplaced { schedule, .. } => {
            rs.schedule = schedule.clone();
        }
        Event::ReservationProposed {
            id,
            resource_id,
            requester_id,
            span,
            amount,
        } => {
            // Live admission already inserted the interval under the lock;
            // replay has to put it back.
            if rs.index.get(IntervalHandle::from(*id)).is_none() {
                rs.index.insert(IndexEntry {
                    id: *id,
                    span: *span,
                    state: ReservationState::Pending,
                });
            }
            rs.reservations.insert(
                *id,
                Reservation {
                    id: *id,
                    resource_id: *resource_id,
                    requester_id: *requester_id,
                    span: *span,
                    state: ReservationState::Pending,
                    amount: *amount,
                },
            );
            maps.reservations.insert(*id, *resource_id);
        }
        Event::ReservationConfirmed { id, .. } => {
            rs.index
                .set_state(IntervalHandle::from(*id), ReservationState::Confirmed);
            if let Some(r) = rs.reservations.get_mut(id) {
                r.state = ReservationState::Confirmed;
            }
        }
        Event::ReservationRejected { id, .. } => {
            rs.index.remove(IntervalHandle::from(*id));
            if let Some(r) = rs.reservations.get_mut(id) {
                r.state = ReservationState::Cancelled;
            }
        }
        Event::ReservationWithdrawn { id, .. } => {
            rs.index.remove(IntervalHandle::from(*id));
            rs.reservations.remove(id);
            maps.reservations.remove(id);
        }
        Event::MatchPublished {
            id,
            resource_id,
            organizer_id,
            title,
            description,
            at,
            capacity,
        } => {
            rs.matches.insert(
                *id,
                Match {
                    id: *id,
                    resource_id: *resource_id,
                    organizer_id: *organizer_id,
                    title: title.clone(),
                    description: description.clone(),
                    at: *at,
                    capacity: *capacity,
                    players: Vec::new(),
                    open: true,
                },
            );
            maps.matches.insert(*id, *resource_id);
        }
        Event::MatchJoined { id, player_id, .. } => {
            if let Some(m) = rs.matches.get_mut(id)
                && !m.players.contains(player_id)
            {
                m.players.push(*player_id);
            }
        }
        Event::MatchClosed { id, .. } => {
            if let Some(m) = rs.matches.get_mut(id) {
                m.open = false;
            }
        }
        // ResourceCreated/Deleted are handled at the DashMap level, not here
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
    }
}

impl Engine {
    /// Open the engine over the WAL at `wal_path`, replaying it first.
    /// Must be called inside a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, policy: ConflictPolicy) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            reservation_to_resource: DashMap::new(),
            match_to_resource: DashMap::new(),
            policy,
            compaction_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceCreated { id, owner_id, name, hourly_price, schedule } => {
                    let rs = ResourceState::new(*id, *owner_id, name.clone(), *hourly_price, schedule.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceDeleted { id } => {
                    if let Some((_, rs)) = engine.state.remove(id) {
                        let guard = rs
                            .try_read()
                            .map_err(|_| io::Error::other("replay: resource locked"))?;
                        engine.unmap_children(&guard);
                    }
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(rs) = engine.get_resource(&resource_id)
                    {
                        let mut guard = rs
                            .try_write()
                            .map_err(|_| io::Error::other("replay: resource locked"))?;
                        apply_to_resource(&mut guard, other, &engine.lookups());
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            events = events.len(),
            resources = engine.state.len(),
            reservations = engine.reservation_to_resource.len(),
            matches = engine.match_to_resource.len(),
            "engine replayed"
        );
        Ok(engine)
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_resource
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.lookups());
        Ok(())
    }

    fn lookups(&self) -> Lookups<'_> {
        Lookups {
            reservations: &self.reservation_to_resource,
            matches: &self.match_to_resource,
        }
    }

    /// Drop the reverse entries of everything a deleted court held.
    pub(super) fn unmap_children(&self, rs: &ResourceState) {
        for id in rs.reservations.keys() {
            self.reservation_to_resource.remove(id);
        }
        for id in rs.matches.keys() {
            self.match_to_resource.remove(id);
        }
    }

    /// Lookup reservation → court, get court, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted || !guard.reservations.contains_key(reservation_id) {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok((resource_id, guard))
    }

    /// Fetch a live court and take its write lock.
    pub(super) async fn resource_write(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self.get_resource(id).ok_or(EngineError::NotFound(*id))?;
        let guard = rs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }
}

/// Extract the court id from an event (for non-Create/Delete events).
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationProposed { resource_id, .. }
        | Event::ReservationConfirmed { resource_id, .. }
        | Event::ReservationRejected { resource_id, .. }
        | Event::ReservationWithdrawn { resource_id, .. }
        | Event::MatchPublished { resource_id, .. }
        | Event::MatchJoined { resource_id, .. }
        | Event::MatchClosed { resource_id, .. } => Some(*resource_id),
        Event::ResourceUpdated { id, .. } | Event::ScheduleReplaced { id, .. } => Some(*id),
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => None,
    }
}
