//! Known points of interest and their freshness.
//!
//! Scans are radius-limited, so a stop missing from one scan is still known.
//! Only explicit expiry timestamps and explicit consumption remove entries.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::core::geo::distance_m;
use crate::core::types::{
    CellId, EncounterKey, Millis, Position, PriorityEncounter, PriorityKind, Stop, WildEncounter,
};

/// One decoded area scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    pub stops: Vec<Stop>,
    pub wild: Vec<WildEncounter>,
    pub lures: Vec<PriorityEncounter>,
    /// Per-cell "since" cursor reported by the remote.
    pub cursors: Vec<(CellId, Millis)>,
}

/// Counts of what one `ingest` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub new_stops: usize,
    pub new_wild: usize,
}

/// Stop id -> last visit time, expiring after the revisit interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitedSet {
    entries: BTreeMap<String, Millis>,
    revisit_interval_ms: Millis,
}

impl VisitedSet {
    pub fn new(revisit_interval_ms: Millis) -> Self {
        Self {
            entries: BTreeMap::new(),
            revisit_interval_ms,
        }
    }

    /// Rebuild from persisted timestamps, dropping entries that already expired.
    pub fn restore(
        revisit_interval_ms: Millis,
        entries: impl IntoIterator<Item = (String, Millis)>,
        now: Millis,
    ) -> Self {
        let mut set = Self::new(revisit_interval_ms);
        set.entries.extend(entries);
        set.prune(now);
        set
    }

    pub fn mark(&mut self, stop_id: &str, now: Millis) {
        self.entries.insert(stop_id.to_string(), now);
    }

    pub fn is_visited(&self, stop_id: &str, now: Millis) -> bool {
        self.entries
            .get(stop_id)
            .is_some_and(|at| now - at < self.revisit_interval_ms)
    }

    pub fn visited_at(&self, stop_id: &str) -> Option<Millis> {
        self.entries.get(stop_id).copied()
    }

    pub fn prune(&mut self, now: Millis) {
        let interval = self.revisit_interval_ms;
        self.entries.retain(|_, at| now - *at < interval);
    }

    pub fn entries(&self) -> &BTreeMap<String, Millis> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoiStore {
    stops: BTreeMap<String, Stop>,
    wild: BTreeMap<EncounterKey, WildEncounter>,
    priority: BTreeMap<PriorityKind, PriorityEncounter>,
    cursors: HashMap<CellId, Millis>,
    /// Consumed encounter ids and their expiry, so a stale scan cannot revive them.
    consumed: HashMap<u64, Millis>,
}

impl PoiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, scan: ScanResult) -> IngestStats {
        let mut stats = IngestStats::default();

        for stop in scan.stops {
            match self.stops.get_mut(&stop.id) {
                Some(existing) => {
                    existing.position = stop.position;
                    existing.has_bonus = stop.has_bonus;
                    existing.cooldown_until = match (stop.cooldown_until, existing.cooldown_until) {
                        (Some(reported), Some(local)) => Some(reported.max(local)),
                        (reported, local) => reported.or(local),
                    };
                    if stop.visited_at.is_some() {
                        existing.visited_at = stop.visited_at;
                    }
                }
                None => {
                    stats.new_stops += 1;
                    self.stops.insert(stop.id.clone(), stop);
                }
            }
        }

        for wild in scan.wild {
            if self.consumed.contains_key(&wild.encounter_id) {
                continue;
            }
            match self.wild.get(&wild.key) {
                Some(existing) if existing.encounter_id == wild.encounter_id => {}
                Some(existing) => {
                    debug!(key = %wild.key, old = existing.encounter_id, new = wild.encounter_id, "spawn replaced");
                    stats.new_wild += 1;
                }
                None => stats.new_wild += 1,
            }
            self.wild.insert(wild.key.clone(), wild);
        }

        for lure in scan.lures {
            self.offer_priority(lure);
        }

        for (cell, since) in scan.cursors {
            let entry = self.cursors.entry(cell).or_insert(since);
            *entry = (*entry).max(since);
        }

        stats
    }

    /// Fill the single slot for this kind unless the encounter was already consumed.
    pub fn offer_priority(&mut self, encounter: PriorityEncounter) {
        if self.consumed.contains_key(&encounter.encounter_id) {
            return;
        }
        self.priority.insert(encounter.kind, encounter);
    }

    /// Remove wild encounters whose expiry has passed. Returns how many were removed.
    pub fn expire(&mut self, now: Millis) -> usize {
        let before = self.wild.len();
        self.wild.retain(|_, wild| now <= wild.expires_at);
        self.priority
            .retain(|_, enc| enc.expires_at.is_none_or(|at| now <= at));
        self.consumed.retain(|_, expires| now <= *expires);
        before - self.wild.len()
    }

    /// Unvisited, non-cooling stops.
    pub fn candidates<'a>(&'a self, now: Millis, visited: &VisitedSet) -> Vec<&'a Stop> {
        self.stops
            .values()
            .filter(|stop| !stop.is_cooling(now) && !visited.is_visited(&stop.id, now))
            .collect()
    }

    /// Candidates within `radius_m` of `position`, nearest first.
    pub fn spinnable_in_range<'a>(
        &'a self,
        position: &Position,
        radius_m: f64,
        now: Millis,
        visited: &VisitedSet,
    ) -> Vec<&'a Stop> {
        let mut near: Vec<(f64, &Stop)> = self
            .candidates(now, visited)
            .into_iter()
            .map(|stop| (distance_m(position, &stop.position), stop))
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        near.sort_by(|a, b| a.0.total_cmp(&b.0));
        near.into_iter().map(|(_, stop)| stop).collect()
    }

    /// Record a completed spin: visited now and, if reported, the cooldown.
    pub fn record_spin(
        &mut self,
        stop_id: &str,
        now: Millis,
        cooldown_until: Option<Millis>,
        visited: &mut VisitedSet,
    ) {
        visited.mark(stop_id, now);
        if let Some(stop) = self.stops.get_mut(stop_id) {
            stop.visited_at = Some(now);
            if cooldown_until.is_some() {
                stop.cooldown_until = cooldown_until;
            }
        }
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    pub fn stops(&self) -> impl Iterator<Item = &Stop> {
        self.stops.values()
    }

    pub fn wild(&self) -> impl Iterator<Item = &WildEncounter> {
        self.wild.values()
    }

    pub fn priority(&self) -> impl Iterator<Item = &PriorityEncounter> {
        self.priority.values()
    }

    /// Wild encounters within `radius_m`, nearest first.
    pub fn wild_in_range(&self, position: &Position, radius_m: f64) -> Vec<WildEncounter> {
        let mut near: Vec<(f64, &WildEncounter)> = self
            .wild
            .values()
            .map(|wild| (distance_m(position, &wild.position), wild))
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        near.sort_by(|a, b| a.0.total_cmp(&b.0));
        near.into_iter().map(|(_, wild)| wild.clone()).collect()
    }

    pub fn nearest_wild(&self, position: &Position) -> Option<&WildEncounter> {
        self.wild.values().min_by(|a, b| {
            distance_m(position, &a.position).total_cmp(&distance_m(position, &b.position))
        })
    }

    pub fn nearest_priority(&self, position: &Position) -> Option<&PriorityEncounter> {
        self.priority.values().min_by(|a, b| {
            distance_m(position, &a.position).total_cmp(&distance_m(position, &b.position))
        })
    }

    /// Remove a wild encounter after an engagement attempt, whatever its outcome.
    pub fn consume_wild(&mut self, key: &EncounterKey) -> Option<WildEncounter> {
        let removed = self.wild.remove(key)?;
        self.consumed.insert(removed.encounter_id, removed.expires_at);
        Some(removed)
    }

    pub fn take_priority(&mut self, kind: PriorityKind, now: Millis) -> Option<PriorityEncounter> {
        let removed = self.priority.remove(&kind)?;
        // Without an expiry, remember the id for a generous half hour.
        let forget_at = removed.expires_at.unwrap_or(now + 30 * 60 * 1000);
        self.consumed.insert(removed.encounter_id, forget_at);
        Some(removed)
    }

    /// Cursor timestamps aligned with `cells`, zero for never-scanned cells.
    pub fn cursor_timestamps(&self, cells: &[CellId]) -> Vec<Millis> {
        cells
            .iter()
            .map(|cell| self.cursors.get(cell).copied().unwrap_or(0))
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    pub fn wild_count(&self) -> usize {
        self.wild.len()
    }
}
