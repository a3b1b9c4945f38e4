//! One operational tick of the session.
//!
//! A tick refreshes remote state, decides and executes inventory work, scans,
//! spins, engages, loads incubators, recycles, picks a route target and moves.
//! Every phase reads the [`SessionState`] left by the previous one.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::capture::BallBag;
use crate::core::geo::distance_m;
use crate::core::geofence::Geofence;
use crate::core::movement::{Destination, Wanderer, pick_destination};
use crate::core::poi_store::{PoiStore, VisitedSet};
use crate::core::route::{select_target, target_still_valid};
use crate::core::triage::{
    EvolutionCosts, StoragePressure, evolution_costs, order_promotions, plan_culls,
    plan_evolutions, plan_incubators, plan_recycling,
};
use crate::core::types::{
    BallTier, EncounterKey, InventorySnapshot, ItemId, Millis, Position, TrainerSnapshot,
};
use crate::engage::{
    EncounterSource, EngageContext, EngagementOutcome, EngagementTarget, resolve,
};
use crate::inventory::Actions;
use crate::io::cells::CellIndex;
use crate::io::clock::Clock;
use crate::io::config::AgentConfig;
use crate::io::remote::{ErrorClass, RemoteError, RemoteService, SpinStatus};
use crate::io::retry::CallKind;
use crate::io::session_store::{ConfigEcho, SessionSnapshot};
use crate::io::tick_log::TickSummary;

/// Decide passes per tick; a pass repeats only while the previous one changed something.
const MAX_DECIDE_PASSES: u32 = 3;

/// Why a tick ended early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TickError {
    /// Retries were exhausted on a transient error; the loop should back off.
    #[error("remote throttled the session: {0}")]
    Throttled(RemoteError),
    #[error("remote session expired; re-authentication required")]
    AuthExpired,
}

/// Sort a remote error into "skip this phase" or a tick-ending [`TickError`].
fn absorb<T>(phase: &'static str, result: Result<T, RemoteError>) -> Result<Option<T>, TickError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => match err.class() {
            ErrorClass::Phase => {
                error!(phase, error = %err, "phase failed; continuing with next phase");
                Ok(None)
            }
            ErrorClass::Transient => Err(TickError::Throttled(err)),
            ErrorClass::Fatal => Err(TickError::AuthExpired),
        },
    }
}

/// Promotions and releases computed from one inventory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionBundle {
    pub promotions: Vec<u64>,
    pub releases: Vec<u64>,
}

impl DecisionBundle {
    pub fn compute(inventory: &InventorySnapshot, config: &AgentConfig, costs: &EvolutionCosts) -> Self {
        let planned = plan_evolutions(&inventory.units, &inventory.candies, costs);
        let promotions = order_promotions(&inventory.units, &inventory.candies, costs);
        let releases = if inventory.units.len() >= config.min_units_before_cull {
            let promoted: BTreeSet<u64> = promotions.iter().copied().collect();
            plan_culls(
                &inventory.units,
                &planned,
                config.power_quotient,
                &config.whitelist,
            )
            .into_iter()
            .filter(|id| !promoted.contains(id))
            .collect()
        } else {
            Vec::new()
        };
        Self {
            promotions,
            releases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.promotions.is_empty() && self.releases.is_empty()
    }
}

/// Totals across every tick of this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub spins: u64,
    pub catches: u64,
    pub releases: u64,
    pub promotions: u64,
    pub recycled: u64,
    pub eggs_hatched: u64,
    pub xp: u64,
}

impl SessionTotals {
    pub fn add(&mut self, tick: &TickSummary) {
        self.spins += u64::from(tick.spins);
        self.catches += u64::from(tick.catches);
        self.releases += u64::from(tick.releases);
        self.promotions += u64::from(tick.promotions);
        self.recycled += u64::from(tick.recycled);
        self.eggs_hatched += u64::from(tick.eggs_hatched);
        self.xp += tick.xp;
    }
}

/// Everything the session carries from one tick to the next.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub position: Position,
    pub store: PoiStore,
    pub visited: VisitedSet,
    pub trainer: Option<TrainerSnapshot>,
    pub inventory: Option<InventorySnapshot>,
    pub route_target: Option<String>,
    pub softban_until: Option<Millis>,
    pub wanderer: Wanderer,
    pub last_scan_at: Option<Millis>,
    pub last_move_at: Option<Millis>,
    /// Highest level whose rewards were collected.
    pub rewarded_level: u32,
    /// Ticks completed, including earlier runs restored from a snapshot.
    pub ticks: u64,
    pub totals: SessionTotals,
}

impl SessionState {
    pub fn new(config: &AgentConfig, now: Millis) -> Self {
        Self {
            position: config.location,
            store: PoiStore::new(),
            visited: VisitedSet::new(config.revisit_interval_ms()),
            trainer: None,
            inventory: None,
            route_target: None,
            softban_until: None,
            wanderer: Wanderer::new(0.0, now),
            last_scan_at: None,
            last_move_at: None,
            rewarded_level: 0,
            ticks: 0,
            totals: SessionTotals::default(),
        }
    }

    /// Resume position, heading, softban and unexpired visits from a snapshot.
    pub fn resume(snapshot: Option<SessionSnapshot>, config: &AgentConfig, now: Millis) -> Self {
        let mut state = Self::new(config, now);
        if let Some(snapshot) = snapshot {
            state.position = snapshot.position;
            let keep_heading_until = now + (config.wander.min_heading_secs as Millis) * 1000;
            state.wanderer = Wanderer::new(snapshot.heading_deg, keep_heading_until);
            state.visited =
                VisitedSet::restore(config.revisit_interval_ms(), snapshot.visited, now);
            state.softban_until = snapshot.softban_until.filter(|until| *until > now);
            state.ticks = snapshot.ticks;
        }
        state
    }

    pub fn snapshot(&self, config: &AgentConfig, now: Millis) -> SessionSnapshot {
        SessionSnapshot {
            position: self.position,
            heading_deg: self.wanderer.heading_deg,
            visited: self.visited.entries().clone(),
            softban_until: self.softban_until,
            ticks: self.ticks,
            saved_at: now,
            config: ConfigEcho::from(config),
        }
    }

    pub fn is_softbanned(&self, now: Millis) -> bool {
        self.softban_until.is_some_and(|until| until > now)
    }
}

/// Drives ticks against a remote, a clock and a cell index.
pub struct Session<'a, R: RemoteService, C: Clock, I: CellIndex> {
    remote: &'a R,
    clock: &'a C,
    cells: &'a I,
    config: &'a AgentConfig,
    costs: EvolutionCosts,
    geofence: Option<Geofence>,
    rng: StdRng,
    state: SessionState,
    /// Positions walked through during the current tick.
    trace: Vec<Position>,
}

impl<'a, R: RemoteService, C: Clock, I: CellIndex> Session<'a, R, C, I> {
    pub fn new(
        remote: &'a R,
        clock: &'a C,
        cells: &'a I,
        config: &'a AgentConfig,
        state: SessionState,
        rng: StdRng,
    ) -> Self {
        Self {
            remote,
            clock,
            cells,
            config,
            costs: evolution_costs(&config.evolution),
            geofence: config.geofence(),
            rng,
            state,
            trace: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &'a AgentConfig {
        self.config
    }

    pub fn clock(&self) -> &'a C {
        self.clock
    }

    pub fn remote(&self) -> &'a R {
        self.remote
    }

    /// Positions walked through during the last tick, starting with where it began.
    pub fn trace(&self) -> &[Position] {
        &self.trace
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot(self.config, self.clock.now_ms())
    }

    fn actions(&self) -> Actions<'a, R, C> {
        Actions {
            remote: self.remote,
            clock: self.clock,
            retry: &self.config.retry,
        }
    }

    fn query<T>(
        &self,
        name: &'static str,
        op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        self.config
            .retry
            .call(self.clock, CallKind::Query, name, op)
    }

    fn action<T>(
        &self,
        name: &'static str,
        op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        self.config
            .retry
            .call(self.clock, CallKind::Action, name, op)
    }

    /// Run every phase once.
    #[instrument(skip_all, fields(tick = self.state.ticks + 1))]
    pub fn run_tick(&mut self) -> Result<TickSummary, TickError> {
        let now = self.clock.now_ms();
        let mut summary = TickSummary {
            tick: self.state.ticks + 1,
            at: now,
            ..TickSummary::default()
        };
        self.trace.clear();
        self.trace.push(self.state.position);

        self.refresh(&mut summary)?;
        self.decide(&mut summary)?;
        self.scan(now)?;
        if self.config.spin {
            self.spin_in_range(now, &mut summary)?;
        }
        if self.config.catch && !self.state.is_softbanned(now) {
            self.engage_in_range(now, &mut summary)?;
        }
        self.incubate(&mut summary)?;
        self.recycle(&mut summary)?;
        self.choose_route_target(now);
        self.advance(now, &mut summary)?;

        self.state.ticks += 1;
        summary.position = Some(self.state.position);
        summary.softbanned = self.state.is_softbanned(now);
        self.state.totals.add(&summary);
        debug!(?summary, "tick complete");
        Ok(summary)
    }

    fn refresh(&mut self, summary: &mut TickSummary) -> Result<(), TickError> {
        let remote = self.remote;
        if let Some(trainer) = absorb(
            "refresh",
            self.query("get_trainer_snapshot", || remote.get_trainer_snapshot()),
        )? {
            self.state.trainer = Some(trainer);
        }

        if let Some(report) = absorb(
            "refresh",
            self.action("get_hatched_eggs", || remote.get_hatched_eggs()),
        )? {
            if !report.hatched_unit_ids.is_empty() {
                info!(count = report.hatched_unit_ids.len(), "eggs hatched");
            }
            summary.eggs_hatched += report.hatched_unit_ids.len() as u32;
            summary.xp += report.award.xp;
        }

        if let Some(inventory) = absorb(
            "refresh",
            self.query("get_inventory_snapshot", || remote.get_inventory_snapshot()),
        )? {
            self.state.inventory = Some(inventory);
        }

        let level = self.state.inventory.as_ref().map_or(0, |inv| inv.level);
        if level > self.state.rewarded_level {
            let response = absorb(
                "refresh",
                self.action("collect_level_rewards", || remote.collect_level_rewards(level)),
            )?;
            if response.is_some_and(|response| response.status.completed()) {
                info!(level, "level rewards collected");
                self.state.rewarded_level = level;
            }
        }
        Ok(())
    }

    fn decide(&mut self, summary: &mut TickSummary) -> Result<(), TickError> {
        let remote = self.remote;
        for pass in 1..=MAX_DECIDE_PASSES {
            let Some(inventory) = self.state.inventory.as_mut() else {
                return Ok(());
            };
            let bundle = DecisionBundle::compute(inventory, self.config, &self.costs);
            if bundle.is_empty() {
                return Ok(());
            }
            debug!(pass, promotions = bundle.promotions.len(), releases = bundle.releases.len(), "decision bundle");

            let actions = Actions {
                remote: self.remote,
                clock: self.clock,
                retry: &self.config.retry,
            };
            let promoted = absorb("decide", actions.evolve(&bundle.promotions))?
                .map_or(0, |done| done.done.len());
            let released = absorb("decide", actions.release(&bundle.releases, inventory))?
                .map_or(0, |done| done.done.len());
            summary.promotions += promoted as u32;
            summary.releases += released as u32;
            if promoted + released == 0 {
                return Ok(());
            }

            match absorb(
                "decide",
                self.query("get_inventory_snapshot", || remote.get_inventory_snapshot()),
            )? {
                Some(fresh) => self.state.inventory = Some(fresh),
                None => return Ok(()),
            }
        }
        Ok(())
    }

    fn scan(&mut self, now: Millis) -> Result<(), TickError> {
        let due = self.state.last_scan_at.is_none_or(|at| {
            now - at >= (self.config.scan_interval_secs as Millis).saturating_mul(1000)
        });
        if due {
            let remote = self.remote;
            let position = self.state.position;
            let cells = self.cells.cells(&position, self.config.scan_radius);
            let cursors = self.state.store.cursor_timestamps(&cells);
            if let Some(scan) = absorb(
                "scan",
                self.query("scan_area", || remote.scan_area(&position, &cells, &cursors)),
            )? {
                let stats = self.state.store.ingest(scan);
                debug!(new_stops = stats.new_stops, new_wild = stats.new_wild, "scan ingested");
                self.state.last_scan_at = Some(now);
            }
            if let Some(Some(incense)) = absorb(
                "scan",
                self.query("probe_incense", || remote.probe_incense(&position)),
            )? {
                self.state.store.offer_priority(incense);
            }
        }
        let expired = self.state.store.expire(now);
        if expired > 0 {
            debug!(expired, "wild encounters expired");
        }
        self.state.visited.prune(now);
        Ok(())
    }

    fn spin_in_range(&mut self, now: Millis, summary: &mut TickSummary) -> Result<(), TickError> {
        let stops: Vec<(String, Position)> = self
            .state
            .store
            .spinnable_in_range(
                &self.state.position,
                self.config.spin_range_m,
                now,
                &self.state.visited,
            )
            .into_iter()
            .map(|stop| (stop.id.clone(), stop.position))
            .collect();
        for (stop_id, stop_position) in stops {
            match self.spin(&stop_id, &stop_position, now, summary)? {
                SpinVerdict::Continue => {}
                SpinVerdict::Stop => break,
            }
        }
        Ok(())
    }

    /// Spin one stop, falling back to a spin storm on the softban signal.
    fn spin(
        &mut self,
        stop_id: &str,
        stop_position: &Position,
        now: Millis,
        summary: &mut TickSummary,
    ) -> Result<SpinVerdict, TickError> {
        let remote = self.remote;
        let player = self.state.position;
        let spin_once = |session: &Self| {
            session.action("spin_stop", || remote.spin_stop(stop_id, stop_position, &player))
        };
        let Some(mut response) = absorb("spin", spin_once(self))? else {
            return Ok(SpinVerdict::Stop);
        };

        if response.status == SpinStatus::Softbanned {
            warn!(stop = stop_id, "spin looks softbanned; starting spin storm");
            let mut attempts = 0;
            while response.status == SpinStatus::Softbanned && attempts < self.config.spin_storm_attempts {
                attempts += 1;
                match absorb("spin", spin_once(self))? {
                    Some(next) => response = next,
                    None => break,
                }
            }
            if response.status == SpinStatus::Softbanned {
                let until = now + (self.config.softban_cooldown_secs as Millis) * 1000;
                warn!(attempts, until, "softban persists; pausing engagements");
                self.state.softban_until = Some(until);
                return Ok(SpinVerdict::Stop);
            }
            info!(attempts, "softban cleared");
            self.state.softban_until = None;
        }

        match response.status {
            SpinStatus::Success => {
                self.state
                    .store
                    .record_spin(stop_id, now, response.cooldown_until, &mut self.state.visited);
                summary.spins += 1;
                summary.xp += response.xp;
                debug!(stop = stop_id, items = response.items_awarded, "spun");
                Ok(SpinVerdict::Continue)
            }
            SpinStatus::InCooldown => {
                self.state
                    .store
                    .record_spin(stop_id, now, response.cooldown_until, &mut self.state.visited);
                Ok(SpinVerdict::Continue)
            }
            SpinStatus::OutOfRange => Ok(SpinVerdict::Continue),
            SpinStatus::InventoryFull => {
                debug!("item storage full; no more spins this tick");
                Ok(SpinVerdict::Stop)
            }
            SpinStatus::Softbanned => Ok(SpinVerdict::Stop),
        }
    }

    fn engage_in_range(&mut self, now: Millis, summary: &mut TickSummary) -> Result<(), TickError> {
        let Some(inventory) = self.state.inventory.as_ref() else {
            return Ok(());
        };
        let mut bag = BallBag::from_items(&inventory.items);
        let assist_item = self.config.capture.assist_item;
        let mut assist_held = inventory.item_count(assist_item);

        let position = self.state.position;
        let range = self.config.catch_range_m;
        let mut targets: Vec<EngagementTarget> = self
            .state
            .store
            .priority()
            .filter(|enc| distance_m(&position, &enc.position) <= range)
            .map(|enc| EngagementTarget {
                source: EncounterSource::Priority(enc.kind),
                encounter_id: enc.encounter_id,
                spawn_id: enc.spawn_id.clone(),
                species: enc.species,
            })
            .collect();
        targets.extend(
            self.state
                .store
                .wild_in_range(&position, range)
                .into_iter()
                .map(|wild| EngagementTarget {
                    source: EncounterSource::Wild,
                    encounter_id: wild.encounter_id,
                    spawn_id: wild.key.spawn_point_id,
                    species: wild.key.species,
                }),
        );
        if targets.is_empty() {
            return Ok(());
        }

        let ctx = EngageContext {
            remote: self.remote,
            clock: self.clock,
            retry: &self.config.retry,
            capture: &self.config.capture,
            player: position,
        };
        let total = targets.len();
        for (attempted, target) in targets.into_iter().enumerate() {
            if bag.is_empty() {
                debug!(left = total - attempted, "out of balls; leaving encounters in place");
                break;
            }
            // A tick-ending error leaves the target for the next tick.
            let report = absorb(
                "engage",
                resolve(&ctx, &target, &mut bag, &mut assist_held, &mut self.rng),
            )?;
            claim(&mut self.state.store, &target, now);
            let Some(report) = report else {
                break;
            };
            summary.xp += report.award.xp;
            debug!(species = target.species, outcome = ?report.outcome, throws = report.throws, "engagement resolved");
            match report.outcome {
                EngagementOutcome::Captured { .. } => summary.catches += 1,
                EngagementOutcome::Softbanned => {
                    let until = now + (self.config.softban_cooldown_secs as Millis) * 1000;
                    warn!(until, "throw softbanned; pausing engagements");
                    self.state.softban_until = Some(until);
                    break;
                }
                EngagementOutcome::OutOfBalls | EngagementOutcome::StorageFull => break,
                EngagementOutcome::Fled
                | EngagementOutcome::Errored
                | EngagementOutcome::Unavailable
                | EngagementOutcome::Abandoned => {}
            }
        }

        if let Some(inventory) = self.state.inventory.as_mut() {
            sync_spent(inventory, &bag, assist_item, assist_held);
        }
        Ok(())
    }

    fn incubate(&mut self, summary: &mut TickSummary) -> Result<(), TickError> {
        let actions = self.actions();
        let Some(inventory) = self.state.inventory.as_mut() else {
            return Ok(());
        };
        let plan = plan_incubators(&inventory.eggs, &inventory.incubators);
        if plan.is_empty() {
            return Ok(());
        }
        if let Some(done) = absorb("incubate", actions.load_incubators(&plan, inventory))? {
            summary.incubators_loaded += done.done.len() as u32;
        }
        Ok(())
    }

    fn recycle(&mut self, summary: &mut TickSummary) -> Result<(), TickError> {
        let actions = self.actions();
        let cap = self.state.trainer.as_ref().map_or(0, |t| t.max_item_storage);
        let Some(inventory) = self.state.inventory.as_mut() else {
            return Ok(());
        };
        let pressure = StoragePressure::from_counts(inventory.total_items(), cap);
        let plan = plan_recycling(&inventory.items, pressure, &self.config.recycle);
        if plan.is_empty() {
            return Ok(());
        }
        debug!(?pressure, items = plan.len(), "recycling");
        if let Some(done) = absorb("recycle", actions.recycle(&plan, inventory))? {
            summary.recycled += done.done.iter().map(|(_, count)| count).sum::<u32>();
        }
        Ok(())
    }

    fn choose_route_target(&mut self, now: Millis) {
        if let Some(target) = self.state.route_target.as_deref() {
            if target_still_valid(target, &self.state.store, &self.state.visited, now) {
                return;
            }
            debug!(stop = target, "route target no longer valid");
            self.state.route_target = None;
        }
        let candidates = self.state.store.candidates(now, &self.state.visited);
        let deadline = Instant::now() + Duration::from_millis(self.config.route.refine_budget_ms);
        self.state.route_target = select_target(
            &self.state.position,
            &candidates,
            &self.config.route,
            deadline,
            &mut self.rng,
        );
        if let Some(target) = &self.state.route_target {
            debug!(stop = %target, candidates = candidates.len(), "route target selected");
        }
    }

    fn advance(&mut self, now: Millis, summary: &mut TickSummary) -> Result<(), TickError> {
        let elapsed_secs = match self.state.last_move_at {
            Some(at) => (now - at) as f64 / 1000.0,
            None => self.config.tick_interval_secs as f64,
        };
        let engaging = self.config.catch && !self.state.is_softbanned(now);
        let goal = pick_destination(
            &self.state.position,
            &self.state.store,
            self.state.route_target.as_deref(),
            engaging,
        );
        let step = self.state.wanderer.advance(
            &self.state.position,
            elapsed_secs,
            self.config.speed_kmh,
            goal.as_ref(),
            self.geofence.as_ref(),
            now,
            &self.config.wander,
            &mut self.rng,
        );
        self.state.last_move_at = Some(now);
        if step.moved_m > 0.0 {
            self.state.position = step.position;
            self.trace.push(step.position);
            let remote = self.remote;
            let position = step.position;
            absorb(
                "move",
                self.query("update_position", || remote.update_position(&position)),
            )?;
        }

        if let (true, Some(Destination::Route { stop_id, position })) = (step.arrived, goal) {
            if self.state.is_softbanned(now) {
                // The in-range spin phase retries the stop next tick.
                debug!(stop = %stop_id, "arrived while softbanned; holding route target");
                return Ok(());
            }
            if self.config.spin {
                self.spin(&stop_id, &position, now, summary)?;
            } else {
                self.state.visited.mark(&stop_id, now);
            }
            self.state.route_target = None;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpinVerdict {
    Continue,
    Stop,
}

/// Drop an attempted encounter from the store so it is not engaged twice.
fn claim(store: &mut PoiStore, target: &EngagementTarget, now: Millis) {
    match target.source {
        EncounterSource::Priority(kind) => {
            store.take_priority(kind, now);
        }
        EncounterSource::Wild => {
            store.consume_wild(&EncounterKey {
                spawn_point_id: target.spawn_id.clone(),
                species: target.species,
            });
        }
    }
}

/// Write spent balls and assist items back into the local snapshot.
fn sync_spent(inventory: &mut InventorySnapshot, bag: &BallBag, assist_item: ItemId, assist_held: u32) {
    for tier in BallTier::ALL {
        let count = bag.count(tier);
        if count == 0 {
            inventory.items.remove(&tier.item());
        } else {
            inventory.items.insert(tier.item(), count);
        }
    }
    if assist_held == 0 {
        inventory.items.remove(&assist_item);
    } else {
        inventory.items.insert(assist_item, assist_held);
    }
}

/// Seed the session RNG from config, or from entropy when no seed is set.
pub fn session_rng(seed: Option<u64>) -> StdRng {
    use rand::SeedableRng;
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::seed_from_u64(rand::thread_rng().r#gen()),
    }
}
