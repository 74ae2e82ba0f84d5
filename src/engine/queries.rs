use std::cmp::Ordering;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability;
use super::report::{aggregate, Period, PeriodRow};
use super::{Engine, EngineError};

fn compare(a: &Reservation, b: &Reservation, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Date => a.date().cmp(&b.date()),
        SortKey::StartTime => a.span.start.time().cmp(&b.span.start.time()),
        SortKey::EndTime => a.span.end.time().cmp(&b.span.end.time()),
        SortKey::State => a.state.cmp(&b.state),
        SortKey::Amount => a.amount.cmp(&b.amount),
        SortKey::Resource => a.resource_id.cmp(&b.resource_id),
    };
    primary
        .then_with(|| a.span.start.cmp(&b.span.start))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort in place by `key`, ties broken by start then id.
pub fn sort_reservations(reservations: &mut [Reservation], key: SortKey, direction: SortDirection) {
    reservations.sort_by(|a, b| match direction {
        SortDirection::Asc => compare(a, b, key),
        SortDirection::Desc => compare(b, a, key),
    });
}

fn info_of(rs: &ResourceState, now: Ts) -> ResourceInfo {
    ResourceInfo {
        id: rs.id,
        owner_id: rs.owner_id,
        name: rs.name.clone(),
        hourly_price: rs.hourly_price,
        schedule: rs.schedule.clone(),
        has_future_reservations: rs.has_reservations_after(now),
    }
}

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self
            .get_resource_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Copies of every reservation in `scope` matching `keep`, each court
    /// read under its own short read lock.
    async fn collect_reservations(
        &self,
        scope: Scope,
        keep: impl Fn(&Reservation) -> bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        if let Scope::Resource(id) = scope {
            let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
            let guard = rs.read().await;
            return Ok(guard.reservations.values().filter(|r| keep(*r)).cloned().collect());
        }

        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            match scope {
                Scope::Owner(owner) if guard.owner_id != owner => continue,
                Scope::Requester(requester) => out.extend(
                    guard
                        .reservations
                        .values()
                        .filter(|r| r.requester_id == requester && keep(*r))
                        .cloned(),
                ),
                _ => out.extend(guard.reservations.values().filter(|r| keep(*r)).cloned()),
            }
        }
        Ok(out)
    }

    pub async fn list_reservations(
        &self,
        scope: Scope,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = self.collect_reservations(scope, |r| filter.matches(r)).await?;
        sort_reservations(&mut out, filter.sort, filter.direction);
        Ok(out)
    }

    pub async fn resource_info(&self, id: Ulid, now: Ts) -> Result<ResourceInfo, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(info_of(&guard, now))
    }

    /// Courts, optionally only those of `owner`, sorted by id.
    pub async fn list_resources(&self, owner: Option<Ulid>, now: Ts) -> Vec<ResourceInfo> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(resources.len());
        for rs in resources {
            let guard = rs.read().await;
            if !guard.deleted && owner.is_none_or(|o| o == guard.owner_id) {
                out.push(info_of(&guard, now));
            }
        }
        out.sort_by_key(|info| info.id);
        out
    }

    pub async fn free_slots(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(availability::free_slots(&guard, date, self.policy))
    }

    /// Revenue report rows for a court or an owner's courts.
    ///
    /// Reservations are copied out under each court's read lock and
    /// aggregated afterwards, so a row never reflects a half-applied write.
    pub async fn report(&self, scope: Scope, period: Period, now: Ts) -> Result<Vec<PeriodRow>, EngineError> {
        let first = period.first_date(now.date());
        let snapshot = self.collect_reservations(scope, |r| r.date() >= first).await?;
        aggregate(&snapshot, period, now)
    }
}
