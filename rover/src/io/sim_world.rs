//! A seeded, in-process [`RemoteService`] used for dry runs.
//!
//! Stops are generated lazily per grid cell from the seed, so the same seed
//! always produces the same map. Spawns, throws and awards draw from one world
//! RNG. Nothing here talks to a network.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::core::capture::AimParameters;
use crate::core::geo::{destination, distance_m};
use crate::core::poi_store::ScanResult;
use crate::core::triage::EvolutionRule;
use crate::core::types::{
    Award, BallTier, CellId, EncounterKey, Egg, HeldUnit, Incubator, InventorySnapshot, ItemId,
    Millis, Position, PriorityEncounter, PriorityKind, Stop, TrainerSnapshot, WildEncounter,
};
use crate::io::cells::GridCellIndex;
use crate::io::clock::Clock;
use crate::io::remote::{
    ActionResponse, ActionStatus, CaptureItemResponse, CatchStatus, EncounterResponse,
    EncounterStatus, HatchReport, RemoteError, RemoteService, SpinResponse, SpinStatus,
    ThrowResponse,
};

const STOP_CHANCE: f64 = 0.2;
const BONUS_CHANCE: f64 = 0.1;
const SPAWN_CHANCE: f64 = 0.004;
const INCENSE_CHANCE: f64 = 0.05;
const FLEE_CHANCE: f64 = 0.1;
const MAX_WILD: usize = 40;
const SPAWN_LIFETIME_MS: Millis = 15 * 60 * 1000;
const STOP_COOLDOWN_MS: Millis = 5 * 60 * 1000;
const SPIN_RANGE_M: f64 = 80.0;
const ENCOUNTER_RANGE_M: f64 = 100.0;
const XP_PER_LEVEL: u64 = 5_000;
const MAX_LEVEL: u32 = 40;

struct Species {
    id: u32,
    family: u32,
    evolves_to: Option<u32>,
    cost: u32,
    /// Poke ball capture rate; stronger tiers scale it up.
    base_capture: f64,
}

const SPECIES: &[Species] = &[
    Species { id: 1, family: 1, evolves_to: Some(2), cost: 25, base_capture: 0.2 },
    Species { id: 2, family: 1, evolves_to: Some(3), cost: 100, base_capture: 0.1 },
    Species { id: 3, family: 1, evolves_to: None, cost: 0, base_capture: 0.05 },
    Species { id: 10, family: 10, evolves_to: Some(11), cost: 12, base_capture: 0.5 },
    Species { id: 11, family: 10, evolves_to: Some(12), cost: 50, base_capture: 0.25 },
    Species { id: 12, family: 10, evolves_to: None, cost: 0, base_capture: 0.12 },
    Species { id: 16, family: 16, evolves_to: Some(17), cost: 12, base_capture: 0.5 },
    Species { id: 17, family: 16, evolves_to: Some(18), cost: 50, base_capture: 0.25 },
    Species { id: 18, family: 16, evolves_to: None, cost: 0, base_capture: 0.12 },
    Species { id: 19, family: 19, evolves_to: Some(20), cost: 25, base_capture: 0.4 },
    Species { id: 20, family: 19, evolves_to: None, cost: 0, base_capture: 0.2 },
    Species { id: 129, family: 129, evolves_to: Some(130), cost: 400, base_capture: 0.7 },
    Species { id: 130, family: 129, evolves_to: None, cost: 0, base_capture: 0.05 },
    Species { id: 147, family: 147, evolves_to: Some(148), cost: 25, base_capture: 0.15 },
    Species { id: 148, family: 147, evolves_to: None, cost: 0, base_capture: 0.05 },
];

const SPAWNABLE: &[u32] = &[1, 10, 10, 16, 16, 16, 19, 19, 129, 147];

fn species(id: u32) -> Option<&'static Species> {
    SPECIES.iter().find(|sp| sp.id == id)
}

fn tier_multiplier(tier: BallTier) -> f64 {
    match tier {
        BallTier::Poke => 1.0,
        BallTier::Great => 1.5,
        BallTier::Ultra => 2.0,
        BallTier::Master => f64::INFINITY,
    }
}

#[derive(Debug, Clone)]
struct SimStop {
    position: Position,
    has_bonus: bool,
    cooldown_until: Option<Millis>,
}

#[derive(Debug, Clone)]
struct SimSpawn {
    spawn_id: String,
    species: u32,
    position: Position,
    expires_at: Millis,
    kind: Option<PriorityKind>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveEncounter {
    encounter_id: u64,
    species: u32,
    multiplier: f64,
}

struct WorldState {
    authenticated: bool,
    rng: StdRng,
    player: Position,
    generated_cells: HashSet<CellId>,
    stops: BTreeMap<String, SimStop>,
    spawns: BTreeMap<u64, SimSpawn>,
    lures_served: HashSet<(String, Millis)>,
    active: Option<ActiveEncounter>,
    inventory: InventorySnapshot,
    egg_started_km: BTreeMap<u64, f64>,
    xp: u64,
    stardust: u64,
    rewarded_levels: BTreeSet<u32>,
    next_id: u64,
}

impl WorldState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn level(&self) -> u32 {
        let level = 1 + self.xp / XP_PER_LEVEL;
        u32::try_from(level).unwrap_or(MAX_LEVEL).min(MAX_LEVEL)
    }

    fn add_item(&mut self, item: ItemId, count: u32) {
        *self.inventory.items.entry(item).or_insert(0) += count;
    }

    fn take_item(&mut self, item: ItemId) -> bool {
        match self.inventory.items.get_mut(&item) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.inventory.items.remove(&item);
                }
                true
            }
            _ => false,
        }
    }

    fn random_unit(&mut self, species_id: u32) -> HeldUnit {
        let family = species(species_id).map_or(species_id, |sp| sp.family);
        HeldUnit {
            id: self.next_id(),
            species: species_id,
            family,
            attack: self.rng.gen_range(0..=15),
            defense: self.rng.gen_range(0..=15),
            stamina: self.rng.gen_range(0..=15),
            favorite: false,
        }
    }
}

/// Simulated remote world.
pub struct SimulatedWorld<C: Clock> {
    clock: C,
    grid: GridCellIndex,
    seed: u64,
    max_item_storage: u32,
    max_unit_storage: u32,
    state: RefCell<WorldState>,
}

impl<C: Clock> SimulatedWorld<C> {
    pub fn new(clock: C, seed: u64, start: Position) -> Self {
        let inventory = InventorySnapshot {
            units: Vec::new(),
            eggs: vec![
                Egg {
                    id: 1,
                    target_km: 2.0,
                    incubator_id: None,
                },
                Egg {
                    id: 2,
                    target_km: 5.0,
                    incubator_id: None,
                },
            ],
            incubators: vec![Incubator {
                id: "incubator-unlimited".to_string(),
                egg_id: None,
                uses_remaining: None,
            }],
            candies: BTreeMap::new(),
            items: BTreeMap::from([
                (ItemId::POKE_BALL, 40),
                (ItemId::GREAT_BALL, 10),
                (ItemId::ULTRA_BALL, 3),
                (ItemId::POTION, 25),
                (ItemId::RAZZ_BERRY, 5),
            ]),
            level: 1,
            km_walked: 0.0,
        };
        Self {
            clock,
            grid: GridCellIndex::default(),
            seed,
            max_item_storage: 350,
            max_unit_storage: 250,
            state: RefCell::new(WorldState {
                authenticated: false,
                rng: StdRng::seed_from_u64(seed),
                player: start,
                generated_cells: HashSet::new(),
                stops: BTreeMap::new(),
                spawns: BTreeMap::new(),
                lures_served: HashSet::new(),
                active: None,
                inventory,
                egg_started_km: BTreeMap::new(),
                xp: 0,
                stardust: 0,
                rewarded_levels: BTreeSet::new(),
                next_id: 1_000,
            }),
        }
    }

    /// The cell index the world lays its stops out on.
    pub fn grid(&self) -> GridCellIndex {
        self.grid
    }

    /// Evolution costs of every species that can evolve here.
    pub fn evolution_rules() -> Vec<EvolutionRule> {
        SPECIES
            .iter()
            .filter(|sp| sp.evolves_to.is_some())
            .map(|sp| EvolutionRule {
                species: sp.id,
                cost: sp.cost,
            })
            .collect()
    }

    /// Drop the authenticated session, as a server-side expiry would.
    pub fn expire_session(&self) {
        self.state.borrow_mut().authenticated = false;
    }

    pub fn player_position(&self) -> Position {
        self.state.borrow().player
    }

    fn session(&self) -> Result<std::cell::RefMut<'_, WorldState>, RemoteError> {
        let state = self.state.borrow_mut();
        if !state.authenticated {
            return Err(RemoteError::AuthExpired);
        }
        Ok(state)
    }

    fn generate_cell(&self, state: &mut WorldState, cell: CellId) {
        if !state.generated_cells.insert(cell) {
            return;
        }
        let mut rng = StdRng::seed_from_u64(self.seed ^ cell.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        if rng.r#gen::<f64>() >= STOP_CHANCE {
            return;
        }
        let origin = self.grid.origin(cell);
        let position = Position::new(
            origin.latitude + rng.gen_range(0.0..self.grid.cell_deg),
            origin.longitude + rng.gen_range(0.0..self.grid.cell_deg),
        );
        state.stops.insert(
            format!("stop-{cell:016x}"),
            SimStop {
                position,
                has_bonus: rng.r#gen::<f64>() < BONUS_CHANCE,
                cooldown_until: None,
            },
        );
    }

    fn spawn_wild(&self, state: &mut WorldState, cell: CellId, now: Millis) {
        if state.spawns.len() >= MAX_WILD || state.rng.r#gen::<f64>() >= SPAWN_CHANCE {
            return;
        }
        let origin = self.grid.origin(cell);
        let position = Position::new(
            origin.latitude + state.rng.gen_range(0.0..self.grid.cell_deg),
            origin.longitude + state.rng.gen_range(0.0..self.grid.cell_deg),
        );
        let species_id = SPAWNABLE[state.rng.gen_range(0..SPAWNABLE.len())];
        let encounter_id = state.next_id();
        state.spawns.insert(
            encounter_id,
            SimSpawn {
                spawn_id: format!("sp-{cell:016x}"),
                species: species_id,
                position,
                expires_at: now + SPAWN_LIFETIME_MS,
                kind: None,
            },
        );
    }

    fn open_encounter(
        state: &mut WorldState,
        encounter_id: u64,
        max_units: u32,
        now: Millis,
    ) -> EncounterResponse {
        let Some(spawn) = state.spawns.get(&encounter_id) else {
            return EncounterResponse {
                status: EncounterStatus::NotAvailable,
                species: None,
                capture_probability: Vec::new(),
            };
        };
        if spawn.expires_at < now {
            return EncounterResponse {
                status: EncounterStatus::NotAvailable,
                species: None,
                capture_probability: Vec::new(),
            };
        }
        if state.inventory.total_units() >= max_units as usize {
            return EncounterResponse {
                status: EncounterStatus::StorageFull,
                species: Some(spawn.species),
                capture_probability: Vec::new(),
            };
        }
        let species_id = spawn.species;
        let base = species(species_id).map_or(0.3, |sp| sp.base_capture);
        state.active = Some(ActiveEncounter {
            encounter_id,
            species: species_id,
            multiplier: 1.0,
        });
        EncounterResponse {
            status: EncounterStatus::Success,
            species: Some(species_id),
            capture_probability: BallTier::ALL
                .into_iter()
                .map(|tier| (base * tier_multiplier(tier)).min(1.0))
                .collect(),
        }
    }
}

impl<C: Clock> RemoteService for SimulatedWorld<C> {
    fn authenticate(&self) -> Result<(), RemoteError> {
        self.state.borrow_mut().authenticated = true;
        debug!("simulated session authenticated");
        Ok(())
    }

    fn get_trainer_snapshot(&self) -> Result<TrainerSnapshot, RemoteError> {
        let state = self.session()?;
        Ok(TrainerSnapshot {
            username: "simulated".to_string(),
            max_item_storage: self.max_item_storage,
            max_unit_storage: self.max_unit_storage,
            stardust: state.stardust,
        })
    }

    fn get_inventory_snapshot(&self) -> Result<InventorySnapshot, RemoteError> {
        let state = self.session()?;
        let mut snapshot = state.inventory.clone();
        snapshot.level = state.level();
        Ok(snapshot)
    }

    fn scan_area(
        &self,
        position: &Position,
        cells: &[CellId],
        _cursors: &[Millis],
    ) -> Result<ScanResult, RemoteError> {
        let now = self.clock.now_ms();
        let mut state = self.session()?;
        state.spawns.retain(|_, spawn| spawn.expires_at >= now);
        for &cell in cells {
            self.generate_cell(&mut state, cell);
            self.spawn_wild(&mut state, cell, now);
        }
        let requested: HashSet<CellId> = cells.iter().copied().collect();

        let mut result = ScanResult::default();
        let mut lures = Vec::new();
        for (id, stop) in &state.stops {
            if !requested.contains(&self.grid.cell_of(&stop.position)) {
                continue;
            }
            result.stops.push(Stop {
                id: id.clone(),
                position: stop.position,
                has_bonus: stop.has_bonus,
                cooldown_until: stop.cooldown_until.filter(|until| *until > now),
                visited_at: None,
            });
            if stop.has_bonus && distance_m(position, &stop.position) <= ENCOUNTER_RANGE_M {
                lures.push((id.clone(), stop.position));
            }
        }
        for (&encounter_id, spawn) in &state.spawns {
            if spawn.kind.is_some() || !requested.contains(&self.grid.cell_of(&spawn.position)) {
                continue;
            }
            result.wild.push(WildEncounter {
                key: EncounterKey {
                    spawn_point_id: spawn.spawn_id.clone(),
                    species: spawn.species,
                },
                encounter_id,
                position: spawn.position,
                expires_at: spawn.expires_at,
            });
        }
        // One lure encounter per lured stop per spawn window.
        let window = now / SPAWN_LIFETIME_MS;
        for (stop_id, stop_position) in lures {
            if !state.lures_served.insert((stop_id.clone(), window)) {
                continue;
            }
            let species_id = SPAWNABLE[state.rng.gen_range(0..SPAWNABLE.len())];
            let encounter_id = state.next_id();
            let expires_at = (window + 1) * SPAWN_LIFETIME_MS;
            state.spawns.insert(
                encounter_id,
                SimSpawn {
                    spawn_id: stop_id.clone(),
                    species: species_id,
                    position: stop_position,
                    expires_at,
                    kind: Some(PriorityKind::Lure),
                },
            );
            result.lures.push(PriorityEncounter {
                kind: PriorityKind::Lure,
                encounter_id,
                spawn_id: stop_id,
                species: species_id,
                position: stop_position,
                expires_at: Some(expires_at),
            });
        }
        result.cursors = cells.iter().map(|cell| (*cell, now)).collect();
        Ok(result)
    }

    fn spin_stop(
        &self,
        stop_id: &str,
        _stop_position: &Position,
        player: &Position,
    ) -> Result<SpinResponse, RemoteError> {
        let now = self.clock.now_ms();
        let max_items = self.max_item_storage;
        let mut state = self.session()?;
        let Some(stop) = state.stops.get(stop_id).cloned() else {
            return Err(RemoteError::Rejected(format!("unknown stop {stop_id}")));
        };
        let refused = |status| SpinResponse {
            status,
            xp: 0,
            items_awarded: 0,
            cooldown_until: stop.cooldown_until,
        };
        if distance_m(player, &stop.position) > SPIN_RANGE_M {
            return Ok(refused(SpinStatus::OutOfRange));
        }
        if stop.cooldown_until.is_some_and(|until| until > now) {
            return Ok(refused(SpinStatus::InCooldown));
        }
        if state.inventory.total_items() >= max_items {
            return Ok(refused(SpinStatus::InventoryFull));
        }
        let cooldown_until = now + STOP_COOLDOWN_MS;
        if let Some(stop) = state.stops.get_mut(stop_id) {
            stop.cooldown_until = Some(cooldown_until);
        }
        let awarded = state.rng.gen_range(2..=4);
        for _ in 0..awarded {
            let item = match state.rng.gen_range(0..10) {
                0..=5 => ItemId::POKE_BALL,
                6 => ItemId::GREAT_BALL,
                7 => ItemId::POTION,
                8 => ItemId::RAZZ_BERRY,
                _ => ItemId::REVIVE,
            };
            state.add_item(item, 1);
        }
        state.xp += 50;
        if state.rng.r#gen::<f64>() < 0.05 {
            let egg_id = state.next_id();
            let target_km = [2.0, 5.0, 10.0][state.rng.gen_range(0..3)];
            state.inventory.eggs.push(Egg {
                id: egg_id,
                target_km,
                incubator_id: None,
            });
        }
        Ok(SpinResponse {
            status: SpinStatus::Success,
            xp: 50,
            items_awarded: awarded,
            cooldown_until: Some(cooldown_until),
        })
    }

    fn encounter_wild(
        &self,
        encounter_id: u64,
        _spawn_id: &str,
        player: &Position,
    ) -> Result<EncounterResponse, RemoteError> {
        let now = self.clock.now_ms();
        let max_units = self.max_unit_storage;
        let mut state = self.session()?;
        let out_of_range = state
            .spawns
            .get(&encounter_id)
            .is_some_and(|spawn| distance_m(player, &spawn.position) > ENCOUNTER_RANGE_M);
        if out_of_range {
            return Err(RemoteError::Rejected("encounter out of range".to_string()));
        }
        Ok(Self::open_encounter(&mut state, encounter_id, max_units, now))
    }

    fn probe_incense(&self, player: &Position) -> Result<Option<PriorityEncounter>, RemoteError> {
        let now = self.clock.now_ms();
        let mut state = self.session()?;
        let pending = state
            .spawns
            .iter()
            .find(|(_, spawn)| spawn.kind == Some(PriorityKind::Incense));
        if let Some((&encounter_id, spawn)) = pending {
            return Ok(Some(PriorityEncounter {
                kind: PriorityKind::Incense,
                encounter_id,
                spawn_id: spawn.spawn_id.clone(),
                species: spawn.species,
                position: spawn.position,
                expires_at: Some(spawn.expires_at),
            }));
        }
        if state.rng.r#gen::<f64>() >= INCENSE_CHANCE {
            return Ok(None);
        }
        let bearing = state.rng.gen_range(0.0..360.0);
        let position = destination(player, bearing, 20.0);
        let species_id = SPAWNABLE[state.rng.gen_range(0..SPAWNABLE.len())];
        let encounter_id = state.next_id();
        let spawn = SimSpawn {
            spawn_id: format!("incense-{encounter_id}"),
            species: species_id,
            position,
            expires_at: now + SPAWN_LIFETIME_MS,
            kind: Some(PriorityKind::Incense),
        };
        let encounter = PriorityEncounter {
            kind: PriorityKind::Incense,
            encounter_id,
            spawn_id: spawn.spawn_id.clone(),
            species: species_id,
            position,
            expires_at: Some(spawn.expires_at),
        };
        state.spawns.insert(encounter_id, spawn);
        Ok(Some(encounter))
    }

    fn encounter_priority(
        &self,
        _kind: PriorityKind,
        encounter_id: u64,
        _spawn_id: &str,
    ) -> Result<EncounterResponse, RemoteError> {
        let now = self.clock.now_ms();
        let max_units = self.max_unit_storage;
        let mut state = self.session()?;
        Ok(Self::open_encounter(&mut state, encounter_id, max_units, now))
    }

    fn throw_ball(
        &self,
        encounter_id: u64,
        _spawn_id: &str,
        tier: BallTier,
        aim: &AimParameters,
    ) -> Result<ThrowResponse, RemoteError> {
        let mut state = self.session()?;
        let active = match state.active {
            Some(active) if active.encounter_id == encounter_id => active,
            _ => {
                return Ok(ThrowResponse {
                    status: CatchStatus::Errored,
                    captured_unit_id: None,
                    award: Award::default(),
                });
            }
        };
        if !state.take_item(tier.item()) {
            return Err(RemoteError::Rejected(format!("no {tier:?} balls left")));
        }
        if !aim.hit {
            return Ok(ThrowResponse {
                status: CatchStatus::Missed,
                captured_unit_id: None,
                award: Award::default(),
            });
        }
        let base = species(active.species).map_or(0.3, |sp| sp.base_capture);
        let chance = (base * tier_multiplier(tier) * active.multiplier).min(1.0);
        if state.rng.r#gen::<f64>() < chance {
            let unit = state.random_unit(active.species);
            let unit_id = unit.id;
            let family = unit.family;
            state.inventory.units.push(unit);
            *state.inventory.candies.entry(family).or_insert(0) += 3;
            state.xp += 100;
            state.stardust += 100;
            state.spawns.remove(&encounter_id);
            state.active = None;
            return Ok(ThrowResponse {
                status: CatchStatus::Captured,
                captured_unit_id: Some(unit_id),
                award: Award {
                    xp: 100,
                    candy: 3,
                    stardust: 100,
                },
            });
        }
        if state.rng.r#gen::<f64>() < FLEE_CHANCE {
            state.spawns.remove(&encounter_id);
            state.active = None;
            return Ok(ThrowResponse {
                status: CatchStatus::Fled,
                captured_unit_id: None,
                award: Award::default(),
            });
        }
        Ok(ThrowResponse {
            status: CatchStatus::Escaped,
            captured_unit_id: None,
            award: Award::default(),
        })
    }

    fn use_capture_item(
        &self,
        encounter_id: u64,
        _spawn_id: &str,
        item: ItemId,
    ) -> Result<CaptureItemResponse, RemoteError> {
        let mut state = self.session()?;
        let active = state
            .active
            .filter(|active| active.encounter_id == encounter_id);
        let Some(mut active) = active else {
            return Ok(CaptureItemResponse {
                success: false,
                multiplier: 1.0,
            });
        };
        if item != ItemId::RAZZ_BERRY || !state.take_item(item) {
            return Ok(CaptureItemResponse {
                success: false,
                multiplier: 1.0,
            });
        }
        active.multiplier = 1.5;
        state.active = Some(active);
        Ok(CaptureItemResponse {
            success: true,
            multiplier: 1.5,
        })
    }

    fn release_unit(&self, unit_id: u64) -> Result<ActionResponse, RemoteError> {
        let mut state = self.session()?;
        let Some(idx) = state.inventory.units.iter().position(|unit| unit.id == unit_id) else {
            return Ok(ActionResponse {
                status: ActionStatus::AlreadyDone,
                candy_awarded: 0,
            });
        };
        let unit = state.inventory.units.remove(idx);
        *state.inventory.candies.entry(unit.family).or_insert(0) += 1;
        Ok(ActionResponse {
            status: ActionStatus::Success,
            candy_awarded: 1,
        })
    }

    fn evolve_unit(&self, unit_id: u64) -> Result<ActionResponse, RemoteError> {
        let mut state = self.session()?;
        let failed = ActionResponse {
            status: ActionStatus::Failed,
            candy_awarded: 0,
        };
        let Some(idx) = state.inventory.units.iter().position(|unit| unit.id == unit_id) else {
            return Ok(failed);
        };
        let unit = state.inventory.units[idx].clone();
        let Some((next, cost)) =
            species(unit.species).and_then(|sp| sp.evolves_to.map(|next| (next, sp.cost)))
        else {
            return Ok(failed);
        };
        let candy = state.inventory.candies.entry(unit.family).or_insert(0);
        if *candy < cost {
            return Ok(failed);
        }
        *candy = *candy - cost + 1;
        state.inventory.units[idx].species = next;
        state.xp += 500;
        Ok(ActionResponse {
            status: ActionStatus::Success,
            candy_awarded: 1,
        })
    }

    fn recycle_item(&self, item: ItemId, count: u32) -> Result<ActionResponse, RemoteError> {
        let mut state = self.session()?;
        let held = state.inventory.item_count(item);
        if count == 0 || count > held {
            return Ok(ActionResponse {
                status: ActionStatus::Failed,
                candy_awarded: 0,
            });
        }
        if held == count {
            state.inventory.items.remove(&item);
        } else {
            state.inventory.items.insert(item, held - count);
        }
        Ok(ActionResponse {
            status: ActionStatus::Success,
            candy_awarded: 0,
        })
    }

    fn assign_egg_to_incubator(
        &self,
        incubator_id: &str,
        egg_id: u64,
    ) -> Result<ActionResponse, RemoteError> {
        let mut state = self.session()?;
        let km = state.inventory.km_walked;
        let egg_bound = state
            .inventory
            .eggs
            .iter()
            .find(|egg| egg.id == egg_id)
            .map(|egg| egg.incubator_id.clone());
        let incubator_busy = state
            .inventory
            .incubators
            .iter()
            .find(|inc| inc.id == incubator_id)
            .map(|inc| inc.egg_id);
        let status = match (egg_bound, incubator_busy) {
            (Some(Some(bound)), _) if bound == incubator_id => ActionStatus::AlreadyDone,
            (Some(None), Some(None)) => {
                for egg in &mut state.inventory.eggs {
                    if egg.id == egg_id {
                        egg.incubator_id = Some(incubator_id.to_string());
                    }
                }
                for inc in &mut state.inventory.incubators {
                    if inc.id == incubator_id {
                        inc.egg_id = Some(egg_id);
                    }
                }
                state.egg_started_km.insert(egg_id, km);
                ActionStatus::Success
            }
            _ => ActionStatus::Failed,
        };
        Ok(ActionResponse {
            status,
            candy_awarded: 0,
        })
    }

    fn get_hatched_eggs(&self) -> Result<HatchReport, RemoteError> {
        let mut state = self.session()?;
        let km = state.inventory.km_walked;
        let ready: Vec<(u64, String)> = state
            .inventory
            .eggs
            .iter()
            .filter_map(|egg| {
                let incubator = egg.incubator_id.clone()?;
                let started = state.egg_started_km.get(&egg.id).copied().unwrap_or(km);
                (km - started >= egg.target_km).then_some((egg.id, incubator))
            })
            .collect();
        let mut report = HatchReport::default();
        for (egg_id, incubator_id) in ready {
            state.inventory.eggs.retain(|egg| egg.id != egg_id);
            state.egg_started_km.remove(&egg_id);
            state.inventory.incubators.retain_mut(|inc| {
                if inc.id != incubator_id {
                    return true;
                }
                inc.egg_id = None;
                match inc.uses_remaining.as_mut() {
                    Some(uses) => {
                        *uses = uses.saturating_sub(1);
                        *uses > 0
                    }
                    None => true,
                }
            });
            let species_id = SPAWNABLE[state.rng.gen_range(0..SPAWNABLE.len())];
            let unit = state.random_unit(species_id);
            report.hatched_unit_ids.push(unit.id);
            *state.inventory.candies.entry(unit.family).or_insert(0) += 10;
            state.inventory.units.push(unit);
            report.award += Award {
                xp: 200,
                candy: 10,
                stardust: 400,
            };
        }
        state.xp += report.award.xp;
        state.stardust += report.award.stardust;
        Ok(report)
    }

    fn collect_level_rewards(&self, level: u32) -> Result<ActionResponse, RemoteError> {
        let mut state = self.session()?;
        if level > state.level() {
            return Ok(ActionResponse {
                status: ActionStatus::Failed,
                candy_awarded: 0,
            });
        }
        if !state.rewarded_levels.insert(level) {
            return Ok(ActionResponse {
                status: ActionStatus::AlreadyDone,
                candy_awarded: 0,
            });
        }
        if level > 1 {
            state.add_item(ItemId::POKE_BALL, 10);
            state.add_item(ItemId::RAZZ_BERRY, 2);
        }
        Ok(ActionResponse {
            status: ActionStatus::Success,
            candy_awarded: 0,
        })
    }

    fn update_position(&self, position: &Position) -> Result<(), RemoteError> {
        let mut state = self.session()?;
        let walked = distance_m(&state.player, position);
        state.inventory.km_walked += walked / 1000.0;
        state.player = *position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::cells::CellIndex;
    use crate::test_support::ManualClock;

    const START: Position = Position::new(40.7680, -73.9819);

    fn world(clock: &ManualClock) -> SimulatedWorld<&ManualClock> {
        let world = SimulatedWorld::new(clock, 7, START);
        world.authenticate().expect("auth");
        world
    }

    #[test]
    fn calls_before_authentication_fail() {
        let clock = ManualClock::new(0);
        let world = SimulatedWorld::new(&clock, 7, START);
        assert_eq!(world.get_inventory_snapshot(), Err(RemoteError::AuthExpired));
        world.authenticate().expect("auth");
        assert!(world.get_inventory_snapshot().is_ok());
        world.expire_session();
        assert_eq!(world.get_trainer_snapshot(), Err(RemoteError::AuthExpired));
    }

    #[test]
    fn same_seed_same_stops() {
        let clock = ManualClock::new(0);
        let a = world(&clock);
        let b = world(&clock);
        let cells = a.grid().cells(&START, 5);
        let scan_a = a.scan_area(&START, &cells, &[]).expect("scan");
        let scan_b = b.scan_area(&START, &cells, &[]).expect("scan");
        let ids_a: Vec<_> = scan_a.stops.iter().map(|stop| &stop.id).collect();
        let ids_b: Vec<_> = scan_b.stops.iter().map(|stop| &stop.id).collect();
        assert!(!ids_a.is_empty());
        assert_eq!(ids_a, ids_b);
        assert_eq!(scan_a.cursors.len(), cells.len());
    }

    #[test]
    fn spin_sets_cooldown_and_repeats_report_cooldown() {
        let clock = ManualClock::new(1_000);
        let world = world(&clock);
        let cells = world.grid().cells(&START, 5);
        let scan = world.scan_area(&START, &cells, &[]).expect("scan");
        let stop = scan.stops.first().expect("a stop").clone();
        world.update_position(&stop.position).expect("move");

        let first = world
            .spin_stop(&stop.id, &stop.position, &stop.position)
            .expect("spin");
        assert_eq!(first.status, SpinStatus::Success);
        assert!(first.items_awarded >= 2);

        let second = world
            .spin_stop(&stop.id, &stop.position, &stop.position)
            .expect("spin");
        assert_eq!(second.status, SpinStatus::InCooldown);
    }

    #[test]
    fn release_twice_is_already_done() {
        let clock = ManualClock::new(0);
        let world = world(&clock);
        let unit = {
            let mut state = world.state.borrow_mut();
            let unit = state.random_unit(16);
            state.inventory.units.push(unit.clone());
            unit
        };
        let first = world.release_unit(unit.id).expect("release");
        assert_eq!(first.status, ActionStatus::Success);
        let second = world.release_unit(unit.id).expect("release");
        assert_eq!(second.status, ActionStatus::AlreadyDone);
    }

    #[test]
    fn incubated_egg_hatches_after_walking() {
        let clock = ManualClock::new(0);
        let world = world(&clock);
        world
            .assign_egg_to_incubator("incubator-unlimited", 1)
            .expect("assign");
        assert!(
            world
                .get_hatched_eggs()
                .expect("hatch")
                .hatched_unit_ids
                .is_empty()
        );
        // Egg 1 needs 2 km.
        world
            .update_position(&destination(&START, 0.0, 2_100.0))
            .expect("walk");
        let report = world.get_hatched_eggs().expect("hatch");
        assert_eq!(report.hatched_unit_ids.len(), 1);
        let inventory = world.get_inventory_snapshot().expect("inventory");
        assert_eq!(inventory.incubators[0].egg_id, None);
        assert!(inventory.eggs.iter().all(|egg| egg.id != 1));
    }

    #[test]
    fn double_bind_is_refused() {
        let clock = ManualClock::new(0);
        let world = world(&clock);
        let first = world
            .assign_egg_to_incubator("incubator-unlimited", 1)
            .expect("assign");
        assert_eq!(first.status, ActionStatus::Success);
        let other_egg = world
            .assign_egg_to_incubator("incubator-unlimited", 2)
            .expect("assign");
        assert_eq!(other_egg.status, ActionStatus::Failed);
        let repeat = world
            .assign_egg_to_incubator("incubator-unlimited", 1)
            .expect("assign");
        assert_eq!(repeat.status, ActionStatus::AlreadyDone);
    }
}
