//! Test-only fakes and fixture builders.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::capture::AimParameters;
use crate::core::poi_store::ScanResult;
use crate::core::types::{
    Award, BallTier, CellId, EncounterKey, HeldUnit, InventorySnapshot, ItemId, Millis, Position,
    PriorityEncounter, PriorityKind, Stop, TrainerSnapshot, WildEncounter,
};
use crate::io::clock::Clock;
use crate::io::init::{InitOptions, RoverPaths, init_rover};
use crate::io::remote::{
    ActionResponse, ActionStatus, CaptureItemResponse, CatchStatus, EncounterResponse,
    EncounterStatus, HatchReport, RemoteError, RemoteService, SpinResponse, SpinStatus,
    ThrowResponse,
};

/// A spinnable stop with no bonus.
pub fn stop_at(id: &str, latitude: f64, longitude: f64) -> Stop {
    Stop {
        id: id.to_string(),
        position: Position::new(latitude, longitude),
        has_bonus: false,
        cooldown_until: None,
        visited_at: None,
    }
}

pub fn wild_at(
    spawn_point_id: &str,
    species: u32,
    encounter_id: u64,
    latitude: f64,
    longitude: f64,
    expires_at: Millis,
) -> WildEncounter {
    WildEncounter {
        key: EncounterKey {
            spawn_point_id: spawn_point_id.to_string(),
            species,
        },
        encounter_id,
        position: Position::new(latitude, longitude),
        expires_at,
    }
}

pub fn lure_at(stop_id: &str, encounter_id: u64, latitude: f64, longitude: f64) -> PriorityEncounter {
    PriorityEncounter {
        kind: PriorityKind::Lure,
        encounter_id,
        spawn_id: stop_id.to_string(),
        species: 129,
        position: Position::new(latitude, longitude),
        expires_at: None,
    }
}

/// A held unit whose power quotient lands within one point of `quotient`.
pub fn unit(id: u64, species: u32, family: u32, quotient: u32) -> HeldUnit {
    let total = (f64::from(quotient.min(100)) * 45.0 / 100.0).round() as u32;
    let attack = total.min(15);
    let defense = (total - attack).min(15);
    let stamina = total - attack - defense;
    HeldUnit {
        id,
        species,
        family,
        attack: attack as u8,
        defense: defense as u8,
        stamina: stamina as u8,
        favorite: false,
    }
}

/// Clock that only moves when slept or advanced, and records every sleep.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Millis>,
    sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Cell::new(start),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn advance_ms(&self, ms: Millis) {
        self.now.set(self.now.get() + ms);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        let ms = Millis::try_from(duration.as_millis()).unwrap_or(Millis::MAX);
        self.now.set(self.now.get().saturating_add(ms));
    }
}

/// A temp directory with `.rover/` initialized.
pub fn temp_root() -> (TempDir, RoverPaths) {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_rover(temp.path(), &InitOptions { force: false }).expect("init rover");
    (temp, paths)
}

pub fn full_bag_inventory() -> InventorySnapshot {
    InventorySnapshot {
        items: [(ItemId::POKE_BALL, 20), (ItemId::GREAT_BALL, 5), (ItemId::ULTRA_BALL, 2)]
            .into_iter()
            .collect(),
        level: 1,
        ..InventorySnapshot::default()
    }
}

/// Remote fake driven by per-call queues.
///
/// Each call pops its queue and falls back to a successful default when the
/// queue is empty. `fail_next(name, err)` makes the next call with that method
/// name fail instead. Every call is appended to `calls()` as `name` or
/// `name:arg`.
pub struct ScriptedRemote {
    trainer: RefCell<TrainerSnapshot>,
    inventory: RefCell<InventorySnapshot>,
    scans: RefCell<VecDeque<ScanResult>>,
    spins: RefCell<VecDeque<SpinResponse>>,
    encounters: RefCell<VecDeque<EncounterResponse>>,
    incense: RefCell<VecDeque<Option<PriorityEncounter>>>,
    throws: RefCell<VecDeque<ThrowResponse>>,
    capture_items: RefCell<VecDeque<CaptureItemResponse>>,
    actions: RefCell<VecDeque<ActionResponse>>,
    hatches: RefCell<VecDeque<HatchReport>>,
    failures: RefCell<VecDeque<(String, RemoteError)>>,
    calls: RefCell<Vec<String>>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            trainer: RefCell::new(TrainerSnapshot {
                username: "scripted".to_string(),
                max_item_storage: 350,
                max_unit_storage: 250,
                stardust: 0,
            }),
            inventory: RefCell::new(full_bag_inventory()),
            scans: RefCell::default(),
            spins: RefCell::default(),
            encounters: RefCell::default(),
            incense: RefCell::default(),
            throws: RefCell::default(),
            capture_items: RefCell::default(),
            actions: RefCell::default(),
            hatches: RefCell::default(),
            failures: RefCell::default(),
            calls: RefCell::default(),
        }
    }

    pub fn set_inventory(&self, inventory: InventorySnapshot) {
        *self.inventory.borrow_mut() = inventory;
    }

    pub fn set_trainer(&self, trainer: TrainerSnapshot) {
        *self.trainer.borrow_mut() = trainer;
    }

    pub fn push_scan(&self, scan: ScanResult) {
        self.scans.borrow_mut().push_back(scan);
    }

    pub fn push_spin(&self, spin: SpinResponse) {
        self.spins.borrow_mut().push_back(spin);
    }

    pub fn push_encounter(&self, encounter: EncounterResponse) {
        self.encounters.borrow_mut().push_back(encounter);
    }

    pub fn push_incense(&self, incense: Option<PriorityEncounter>) {
        self.incense.borrow_mut().push_back(incense);
    }

    pub fn push_throw(&self, status: CatchStatus) {
        self.throws.borrow_mut().push_back(ThrowResponse {
            status,
            captured_unit_id: (status == CatchStatus::Captured).then_some(1),
            award: Award::default(),
        });
    }

    pub fn push_capture_item(&self, response: CaptureItemResponse) {
        self.capture_items.borrow_mut().push_back(response);
    }

    /// Response for the next release/evolve/recycle/incubate/level-reward call.
    pub fn push_action(&self, status: ActionStatus) {
        self.actions.borrow_mut().push_back(ActionResponse {
            status,
            candy_awarded: 0,
        });
    }

    pub fn push_hatch(&self, report: HatchReport) {
        self.hatches.borrow_mut().push_back(report);
    }

    pub fn fail_next(&self, method: &str, err: RemoteError) {
        self.failures
            .borrow_mut()
            .push_back((method.to_string(), err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls whose name (before any `:`) is `method`.
    pub fn count(&self, method: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.split(':').next() == Some(method))
            .count()
    }

    fn record(&self, method: &str, arg: Option<String>) -> Result<(), RemoteError> {
        let entry = match arg {
            Some(arg) => format!("{method}:{arg}"),
            None => method.to_string(),
        };
        self.calls.borrow_mut().push(entry);
        let mut failures = self.failures.borrow_mut();
        if let Some(idx) = failures.iter().position(|(name, _)| name == method) {
            if let Some((_, err)) = failures.remove(idx) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn next_action(&self) -> ActionResponse {
        self.actions.borrow_mut().pop_front().unwrap_or(ActionResponse {
            status: ActionStatus::Success,
            candy_awarded: 0,
        })
    }
}

fn default_encounter() -> EncounterResponse {
    EncounterResponse {
        status: EncounterStatus::Success,
        species: Some(16),
        capture_probability: vec![0.5, 0.7, 0.9, 1.0],
    }
}

impl RemoteService for ScriptedRemote {
    fn authenticate(&self) -> Result<(), RemoteError> {
        self.record("authenticate", None)
    }

    fn get_trainer_snapshot(&self) -> Result<TrainerSnapshot, RemoteError> {
        self.record("get_trainer_snapshot", None)?;
        Ok(self.trainer.borrow().clone())
    }

    fn get_inventory_snapshot(&self) -> Result<InventorySnapshot, RemoteError> {
        self.record("get_inventory_snapshot", None)?;
        Ok(self.inventory.borrow().clone())
    }

    fn scan_area(
        &self,
        _position: &Position,
        cells: &[CellId],
        _cursors: &[Millis],
    ) -> Result<ScanResult, RemoteError> {
        self.record("scan_area", Some(cells.len().to_string()))?;
        Ok(self.scans.borrow_mut().pop_front().unwrap_or_default())
    }

    fn spin_stop(
        &self,
        stop_id: &str,
        _stop_position: &Position,
        _player: &Position,
    ) -> Result<SpinResponse, RemoteError> {
        self.record("spin_stop", Some(stop_id.to_string()))?;
        Ok(self.spins.borrow_mut().pop_front().unwrap_or(SpinResponse {
            status: SpinStatus::Success,
            xp: 50,
            items_awarded: 3,
            cooldown_until: None,
        }))
    }

    fn encounter_wild(
        &self,
        encounter_id: u64,
        _spawn_id: &str,
        _player: &Position,
    ) -> Result<EncounterResponse, RemoteError> {
        self.record("encounter_wild", Some(encounter_id.to_string()))?;
        Ok(self
            .encounters
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(default_encounter))
    }

    fn probe_incense(&self, _player: &Position) -> Result<Option<PriorityEncounter>, RemoteError> {
        self.record("probe_incense", None)?;
        Ok(self.incense.borrow_mut().pop_front().flatten())
    }

    fn encounter_priority(
        &self,
        _kind: PriorityKind,
        encounter_id: u64,
        _spawn_id: &str,
    ) -> Result<EncounterResponse, RemoteError> {
        self.record("encounter_priority", Some(encounter_id.to_string()))?;
        Ok(self
            .encounters
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(default_encounter))
    }

    fn throw_ball(
        &self,
        _encounter_id: u64,
        _spawn_id: &str,
        tier: BallTier,
        _aim: &AimParameters,
    ) -> Result<ThrowResponse, RemoteError> {
        self.record("throw_ball", Some(format!("{tier:?}")))?;
        Ok(self.throws.borrow_mut().pop_front().unwrap_or(ThrowResponse {
            status: CatchStatus::Captured,
            captured_unit_id: Some(1),
            award: Award {
                xp: 100,
                candy: 3,
                stardust: 100,
            },
        }))
    }

    fn use_capture_item(
        &self,
        _encounter_id: u64,
        _spawn_id: &str,
        item: ItemId,
    ) -> Result<CaptureItemResponse, RemoteError> {
        self.record("use_capture_item", Some(item.0.to_string()))?;
        Ok(self
            .capture_items
            .borrow_mut()
            .pop_front()
            .unwrap_or(CaptureItemResponse {
                success: true,
                multiplier: 1.5,
            }))
    }

    fn release_unit(&self, unit_id: u64) -> Result<ActionResponse, RemoteError> {
        self.record("release_unit", Some(unit_id.to_string()))?;
        let response = self.next_action();
        if response.status.completed() {
            self.inventory
                .borrow_mut()
                .units
                .retain(|unit| unit.id != unit_id);
        }
        Ok(response)
    }

    fn evolve_unit(&self, unit_id: u64) -> Result<ActionResponse, RemoteError> {
        self.record("evolve_unit", Some(unit_id.to_string()))?;
        Ok(self.next_action())
    }

    fn recycle_item(&self, item: ItemId, count: u32) -> Result<ActionResponse, RemoteError> {
        self.record("recycle_item", Some(format!("{}x{count}", item.0)))?;
        let response = self.next_action();
        if response.status.completed() {
            if let Some(held) = self.inventory.borrow_mut().items.get_mut(&item) {
                *held = held.saturating_sub(count);
            }
        }
        Ok(response)
    }

    fn assign_egg_to_incubator(
        &self,
        incubator_id: &str,
        egg_id: u64,
    ) -> Result<ActionResponse, RemoteError> {
        self.record(
            "assign_egg_to_incubator",
            Some(format!("{incubator_id}<-{egg_id}")),
        )?;
        Ok(self.next_action())
    }

    fn get_hatched_eggs(&self) -> Result<HatchReport, RemoteError> {
        self.record("get_hatched_eggs", None)?;
        Ok(self.hatches.borrow_mut().pop_front().unwrap_or_default())
    }

    fn collect_level_rewards(&self, level: u32) -> Result<ActionResponse, RemoteError> {
        self.record("collect_level_rewards", Some(level.to_string()))?;
        Ok(self.next_action())
    }

    fn update_position(&self, position: &Position) -> Result<(), RemoteError> {
        self.record("update_position", Some(position.to_string()))
    }
}
