use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    PROPOSALS_TOTAL, PROPOSE_DURATION_SECONDS, RESOURCES_ACTIVE, TRANSITIONS_TOTAL,
};

use super::conflict::{check_confirmable, reserve, validate_request};
use super::lifecycle::{next_state, Action, OwnerAction};
use super::{Engine, EngineError, WalCommand};

fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), EngineError> {
    if price < Decimal::ZERO || price > Decimal::from(MAX_HOURLY_PRICE) {
        return Err(EngineError::InvalidPrice);
    }
    Ok(())
}

fn validate_schedule(schedule: &Schedule) -> Result<(), EngineError> {
    if schedule.windows.len() > MAX_WINDOWS_PER_RESOURCE {
        return Err(EngineError::LimitExceeded("too many availability windows"));
    }
    if let Some(w) = schedule.windows.iter().find(|w| !w.is_valid()) {
        return Err(EngineError::InvalidWindow(*w));
    }
    if let (Some(open), Some(close)) = (schedule.open, schedule.close)
        && open >= close
    {
        return Err(EngineError::InvalidWindow(AvailabilityWindow::new(open, close)));
    }
    Ok(())
}

impl Engine {
    // ── Courts ───────────────────────────────────────────

    pub async fn create_resource(
        &self,
        id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        hourly_price: Decimal,
        schedule: Schedule,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_price(hourly_price)?;
        validate_schedule(&schedule)?;
        let _gate = self.compaction_gate.read().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        // The court is published already write-locked; readers wait until
        // the WAL append settles, and see a tombstone if it failed.
        let rs = Arc::new(RwLock::new(ResourceState::new(
            id,
            owner_id,
            name.clone(),
            hourly_price,
            schedule.clone(),
        )));
        let mut guard = rs
            .clone()
            .try_write_owned()
            .map_err(|_| EngineError::Internal("fresh court lock contended"))?;
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(rs);
            }
        }

        let event = Event::ResourceCreated {
            id,
            owner_id,
            name,
            hourly_price,
            schedule,
        };
        if let Err(e) = self.wal_append(&event).await {
            guard.deleted = true;
            drop(guard);
            self.state.remove(&id);
            return Err(e);
        }
        drop(guard);
        metrics::gauge!(RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!(resource = %id, owner = %owner_id, "court created");
        Ok(())
    }

    /// Rename or reprice a court. Existing reservations keep their amount.
    pub async fn update_resource(
        &self,
        id: Ulid,
        actor: Ulid,
        name: Option<String>,
        hourly_price: Decimal,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_price(hourly_price)?;
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resource_write(&id).await?;
        if guard.owner_id != actor {
            return Err(EngineError::NotOwner(actor));
        }

        let event = Event::ResourceUpdated { id, name, hourly_price };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace the court's availability. Reservations already admitted are
    /// not re-validated against the new schedule.
    pub async fn set_availability(
        &self,
        id: Ulid,
        actor: Ulid,
        schedule: Schedule,
    ) -> Result<(), EngineError> {
        validate_schedule(&schedule)?;
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resource_write(&id).await?;
        if guard.owner_id != actor {
            return Err(EngineError::NotOwner(actor));
        }

        let event = Event::ScheduleReplaced { id, schedule };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Delete a court together with all of its reservations.
    pub async fn delete_resource(&self, id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resource_write(&id).await?;
        if guard.owner_id != actor {
            return Err(EngineError::NotOwner(actor));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        guard.deleted = true;
        self.unmap_children(&guard);
        let dropped = guard.reservations.len();
        let matches = guard.matches.len();
        drop(guard);
        self.state.remove(&id);
        metrics::gauge!(RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!(resource = %id, reservations = dropped, matches, "court deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────

    /// Admit a new PENDING reservation for `[start, end)` on a court.
    ///
    /// Range and window checks run before the court lock is taken; the
    /// overlap check and the insert happen under it.
    pub async fn propose(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        start: Ts,
        end: Ts,
    ) -> Result<Reservation, EngineError> {
        let timer = std::time::Instant::now();
        let result = self.propose_inner(id, resource_id, requester_id, start, end).await;
        metrics::histogram!(PROPOSE_DURATION_SECONDS).record(timer.elapsed().as_secs_f64());

        match &result {
            Ok(r) => {
                metrics::counter!(PROPOSALS_TOTAL, "outcome" => "accepted").increment(1);
                debug!(reservation = %r.id, resource = %resource_id, amount = %r.amount, "proposal accepted");
            }
            Err(e) => {
                metrics::counter!(PROPOSALS_TOTAL, "outcome" => e.label()).increment(1);
                debug!(resource = %resource_id, error = %e, "proposal rejected");
            }
        }
        result
    }

    async fn propose_inner(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        start: Ts,
        end: Ts,
    ) -> Result<Reservation, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        // The schedule may be replaced concurrently; a clone keeps this
        // validation off the write lock.
        let schedule = rs.read().await.schedule.clone();
        let span = validate_request(&schedule, start, end)?;

        let _gate = self.compaction_gate.read().await;
        // Claim the id across all courts; released again unless admitted.
        match self.reservation_to_resource.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
            }
        }
        let result = self.admit(id, resource_id, requester_id, span, &schedule).await;
        if result.is_err() {
            self.reservation_to_resource.remove(&id);
        }
        result
    }

    /// Overlap check, amount and WAL commit under the court's write lock.
    /// The caller holds the compaction gate and the id claim.
    async fn admit(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        span: Span,
        validated_against: &Schedule,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resource_write(&resource_id).await?;
        if guard.schedule != *validated_against && !super::permits(&guard.schedule, &span) {
            return Err(EngineError::OutsideWindow);
        }
        if guard.index.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on court"));
        }
        let amount = guard.amount_for(&span).ok_or(EngineError::AmountOverflow)?;

        let handle = reserve(&mut guard, id, span, self.policy)?;
        let event = Event::ReservationProposed {
            id,
            resource_id,
            requester_id,
            span,
            amount,
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            // Not durable, so not admitted.
            guard.index.remove(handle);
            return Err(e);
        }

        guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(EngineError::Internal("admitted reservation missing"))
    }

    /// Owner decision on a PENDING reservation.
    pub async fn transition(
        &self,
        reservation_id: Ulid,
        actor: Ulid,
        action: OwnerAction,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        if guard.owner_id != actor {
            return Err(EngineError::NotOwner(actor));
        }
        let current = guard
            .reservations
            .get(&reservation_id)
            .map(|r| r.state)
            .ok_or(EngineError::NotFound(reservation_id))?;
        next_state(current, action.into())?;

        let event = match action {
            OwnerAction::Confirm => {
                check_confirmable(&guard, IntervalHandle::from(reservation_id))?;
                Event::ReservationConfirmed { id: reservation_id, resource_id }
            }
            OwnerAction::Reject => Event::ReservationRejected { id: reservation_id, resource_id },
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let action = Action::from(action);
        metrics::counter!(TRANSITIONS_TOTAL, "action" => action.as_str()).increment(1);
        info!(reservation = %reservation_id, resource = %resource_id, %action, "reservation decided");

        guard
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(EngineError::Internal("decided reservation missing"))
    }

    /// Requester cancels their own PENDING reservation. The record is
    /// removed and the slot freed; the returned copy shows it as cancelled.
    pub async fn withdraw(&self, reservation_id: Ulid, actor: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let mut snapshot = guard
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))?;
        if snapshot.requester_id != actor {
            return Err(EngineError::NotOwner(actor));
        }
        snapshot.state = next_state(snapshot.state, Action::Withdraw)?;

        let event = Event::ReservationWithdrawn { id: reservation_id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(TRANSITIONS_TOTAL, "action" => Action::Withdraw.as_str()).increment(1);
        info!(reservation = %reservation_id, resource = %resource_id, "reservation withdrawn");
        Ok(snapshot)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            events.push(Event::ResourceCreated {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                hourly_price: guard.hourly_price,
                schedule: guard.schedule.clone(),
            });

            let mut reservations: Vec<&Reservation> = guard.reservations.values().collect();
            reservations.sort_by_key(|r| r.id);
            for r in reservations {
                events.push(Event::ReservationProposed {
                    id: r.id,
                    resource_id: r.resource_id,
                    requester_id: r.requester_id,
                    span: r.span,
                    amount: r.amount,
                });
                match r.state {
                    ReservationState::Pending => {}
                    ReservationState::Confirmed => events.push(Event::ReservationConfirmed {
                        id: r.id,
                        resource_id: r.resource_id,
                    }),
                    ReservationState::Cancelled => events.push(Event::ReservationRejected {
                        id: r.id,
                        resource_id: r.resource_id,
                    }),
                }
            }

            let mut matches: Vec<&Match> = guard.matches.values().collect();
            matches.sort_by_key(|m| m.id);
            for m in matches {
                events.push(Event::MatchPublished {
                    id: m.id,
                    resource_id: m.resource_id,
                    organizer_id: m.organizer_id,
                    title: m.title.clone(),
                    description: m.description.clone(),
                    at: m.at,
                    capacity: m.capacity,
                });
                events.extend(m.players.iter().map(|&player_id| Event::MatchJoined {
                    id: m.id,
                    resource_id: m.resource_id,
                    player_id,
                }));
                if !m.open {
                    events.push(Event::MatchClosed { id: m.id, resource_id: m.resource_id });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
