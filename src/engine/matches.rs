use dashmap::mapref::entry::Entry;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::MATCH_JOINS_TOTAL;

use super::{Engine, EngineError};

fn validate_match(title: &str, description: &Option<String>, capacity: u32) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidMatch("title must not be blank"));
    }
    if title.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("match title too long"));
    }
    if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("match description too long"));
    }
    if capacity == 0 || capacity > MAX_MATCH_CAPACITY {
        return Err(EngineError::InvalidMatch("capacity out of range"));
    }
    Ok(())
}

/// Why `player_id` may not join `m`, checked in order: closed, full, already in.
fn check_joinable(m: &Match, player_id: Ulid) -> Result<(), EngineError> {
    if !m.open {
        return Err(EngineError::MatchNotOpen(m.id));
    }
    if m.is_full() {
        return Err(EngineError::MatchFull(m.id));
    }
    if m.players.contains(&player_id) {
        return Err(EngineError::AlreadyJoined(player_id));
    }
    Ok(())
}

impl Engine {
    /// Publish an open match on a court. Any player may organize one.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_match(
        &self,
        id: Ulid,
        resource_id: Ulid,
        organizer_id: Ulid,
        title: String,
        description: Option<String>,
        at: Ts,
        capacity: u32,
    ) -> Result<Match, EngineError> {
        validate_match(&title, &description, capacity)?;
        let _gate = self.compaction_gate.read().await;
        match self.match_to_resource.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
            }
        }

        let result = async {
            let mut guard = self.resource_write(&resource_id).await?;
            if guard.matches.len() >= MAX_MATCHES_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many matches on court"));
            }
            let event = Event::MatchPublished {
                id,
                resource_id,
                organizer_id,
                title,
                description,
                at,
                capacity,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            guard
                .matches
                .get(&id)
                .cloned()
                .ok_or(EngineError::Internal("published match missing"))
        }
        .await;

        match &result {
            Ok(m) => info!(match_id = %id, resource = %resource_id, capacity = m.capacity, "match published"),
            Err(_) => {
                self.match_to_resource.remove(&id);
            }
        }
        result
    }

    /// Add a player to an open match with a free place.
    pub async fn join_match(&self, match_id: Ulid, player_id: Ulid) -> Result<Match, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let result = async {
            let (resource_id, mut guard) = self.resolve_match_write(&match_id).await?;
            let m = guard
                .matches
                .get(&match_id)
                .ok_or(EngineError::NotFound(match_id))?;
            check_joinable(m, player_id)?;

            let event = Event::MatchJoined { id: match_id, resource_id, player_id };
            self.persist_and_apply(&mut guard, &event).await?;
            guard
                .matches
                .get(&match_id)
                .cloned()
                .ok_or(EngineError::Internal("joined match missing"))
        }
        .await;

        match &result {
            Ok(m) => {
                metrics::counter!(MATCH_JOINS_TOTAL, "outcome" => "joined").increment(1);
                info!(match_id = %match_id, player = %player_id, players = m.players.len(), "player joined match");
            }
            Err(e) => {
                metrics::counter!(MATCH_JOINS_TOTAL, "outcome" => e.label()).increment(1);
                debug!(match_id = %match_id, player = %player_id, error = %e, "join refused");
            }
        }
        result
    }

    /// Stop accepting players. Organizer only.
    pub async fn close_match(&self, match_id: Ulid, actor: Ulid) -> Result<Match, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_match_write(&match_id).await?;
        let m = guard
            .matches
            .get(&match_id)
            .ok_or(EngineError::NotFound(match_id))?;
        if m.organizer_id != actor {
            return Err(EngineError::NotOwner(actor));
        }
        if !m.open {
            return Err(EngineError::MatchNotOpen(match_id));
        }

        let event = Event::MatchClosed { id: match_id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(match_id = %match_id, "match closed");
        guard
            .matches
            .get(&match_id)
            .cloned()
            .ok_or(EngineError::Internal("closed match missing"))
    }

    pub async fn get_match(&self, match_id: Ulid) -> Result<Match, EngineError> {
        let resource_id = self
            .match_to_resource
            .get(&match_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(match_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(match_id))?;
        let guard = rs.read().await;
        guard.matches.get(&match_id).cloned().ok_or(EngineError::NotFound(match_id))
    }

    /// Open matches, optionally on one court only, by time then id.
    /// Full matches stay listed until their organizer closes them.
    pub async fn list_open_matches(&self, resource: Option<Ulid>) -> Vec<Match> {
        let resources: Vec<_> = match resource {
            Some(id) => self.get_resource(&id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            out.extend(guard.matches.values().filter(|m| m.open).cloned());
        }
        out.sort_by_key(|m| (m.at, m.id));
        out
    }

    async fn resolve_match_write(
        &self,
        match_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .match_to_resource
            .get(match_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*match_id))?;
        let guard = self
            .resource_write(&resource_id)
            .await
            .map_err(|_| EngineError::NotFound(*match_id))?;
        if !guard.matches.contains_key(match_id) {
            return Err(EngineError::NotFound(*match_id));
        }
        Ok((resource_id, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample(capacity: u32) -> Match {
        Match {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            organizer_id: Ulid::new(),
            title: "Friday doubles".into(),
            description: None,
            at: NaiveDate::from_ymd_opt(2025, 6, 6).unwrap().and_hms_opt(19, 0, 0).unwrap(),
            capacity,
            players: Vec::new(),
            open: true,
        }
    }

    #[test]
    fn validation_rules() {
        assert!(validate_match("Doubles", &None, 4).is_ok());
        assert!(matches!(validate_match("   ", &None, 4), Err(EngineError::InvalidMatch(_))));
        assert!(matches!(validate_match("Doubles", &None, 0), Err(EngineError::InvalidMatch(_))));
        assert!(matches!(
            validate_match("Doubles", &None, MAX_MATCH_CAPACITY + 1),
            Err(EngineError::InvalidMatch(_))
        ));
        assert!(matches!(
            validate_match("Doubles", &Some("x".repeat(MAX_DESCRIPTION_LEN + 1)), 4),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn join_checks_closed_before_full_before_duplicate() {
        let player = Ulid::new();
        let mut m = sample(1);
        assert!(check_joinable(&m, player).is_ok());

        m.players.push(player);
        assert!(matches!(check_joinable(&m, player), Err(EngineError::MatchFull(_))));

        m.capacity = 2;
        assert!(matches!(check_joinable(&m, player), Err(EngineError::AlreadyJoined(p)) if p == player));

        m.open = false;
        assert!(matches!(check_joinable(&m, Ulid::new()), Err(EngineError::MatchNotOpen(_))));
    }
}
