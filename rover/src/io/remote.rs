//! Remote collaborator abstraction.
//!
//! The [`RemoteService`] trait decouples the session from the wire transport
//! (login, request signing, protocol encoding). Each call returns a typed payload
//! or a typed [`RemoteError`]; implementations decode responses once, here at the
//! boundary. Tests use a scripted implementation and the CLI ships an in-process
//! simulated world.

use thiserror::Error;

use crate::core::capture::AimParameters;
use crate::core::poi_store::ScanResult;
use crate::core::types::{
    Award, BallTier, CellId, InventorySnapshot, ItemId, Millis, Position, PriorityEncounter,
    PriorityKind, TrainerSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote rate limited the request")]
    RateLimited,
    #[error("remote call timed out")]
    Timeout,
    #[error("session is no longer authenticated")]
    AuthExpired,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// How the session reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry, then back off the whole loop.
    Transient,
    /// Stop the loop and re-authenticate.
    Fatal,
    /// Log, skip the rest of the current phase, keep going.
    Phase,
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::RateLimited | RemoteError::Timeout | RemoteError::Transport(_) => {
                ErrorClass::Transient
            }
            RemoteError::AuthExpired => ErrorClass::Fatal,
            RemoteError::Malformed(_) | RemoteError::Rejected(_) => ErrorClass::Phase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinStatus {
    Success,
    OutOfRange,
    /// Already spun; the remote treats it as done.
    InCooldown,
    InventoryFull,
    /// Success-shaped response with nothing awarded: the softban signal for spins.
    Softbanned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpinResponse {
    pub status: SpinStatus,
    pub xp: u64,
    pub items_awarded: u32,
    pub cooldown_until: Option<Millis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterStatus {
    Success,
    /// Despawned, already caught, or otherwise unavailable.
    NotAvailable,
    StorageFull,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncounterResponse {
    pub status: EncounterStatus,
    pub species: Option<u32>,
    /// Capture probability per ball tier, weakest first, when the remote reports it.
    pub capture_probability: Vec<f64>,
}

impl EncounterResponse {
    pub fn probability_for(&self, tier: BallTier) -> Option<f64> {
        self.capture_probability.get(tier.index()).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchStatus {
    Captured,
    Escaped,
    Fled,
    Missed,
    Errored,
    Softbanned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrowResponse {
    pub status: CatchStatus,
    pub captured_unit_id: Option<u64>,
    pub award: Award,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureItemResponse {
    pub success: bool,
    pub multiplier: f64,
}

/// Result of a one-shot inventory action (release, evolve, recycle, incubate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    /// The remote says the effect already happened.
    AlreadyDone,
    Failed,
}

impl ActionStatus {
    pub fn completed(self) -> bool {
        matches!(self, ActionStatus::Success | ActionStatus::AlreadyDone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionResponse {
    pub status: ActionStatus,
    pub candy_awarded: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HatchReport {
    pub hatched_unit_ids: Vec<u64>,
    pub award: Award,
}

/// Abstraction over the remote game service.
pub trait RemoteService {
    /// (Re-)establish an authenticated session.
    fn authenticate(&self) -> Result<(), RemoteError>;

    fn get_trainer_snapshot(&self) -> Result<TrainerSnapshot, RemoteError>;

    fn get_inventory_snapshot(&self) -> Result<InventorySnapshot, RemoteError>;

    /// `cursors` is aligned with `cells`.
    fn scan_area(
        &self,
        position: &Position,
        cells: &[CellId],
        cursors: &[Millis],
    ) -> Result<ScanResult, RemoteError>;

    fn spin_stop(
        &self,
        stop_id: &str,
        stop_position: &Position,
        player: &Position,
    ) -> Result<SpinResponse, RemoteError>;

    fn encounter_wild(
        &self,
        encounter_id: u64,
        spawn_id: &str,
        player: &Position,
    ) -> Result<EncounterResponse, RemoteError>;

    /// Pending incense encounter near `player`, if any.
    fn probe_incense(&self, player: &Position) -> Result<Option<PriorityEncounter>, RemoteError>;

    fn encounter_priority(
        &self,
        kind: PriorityKind,
        encounter_id: u64,
        spawn_id: &str,
    ) -> Result<EncounterResponse, RemoteError>;

    fn throw_ball(
        &self,
        encounter_id: u64,
        spawn_id: &str,
        tier: BallTier,
        aim: &AimParameters,
    ) -> Result<ThrowResponse, RemoteError>;

    fn use_capture_item(
        &self,
        encounter_id: u64,
        spawn_id: &str,
        item: ItemId,
    ) -> Result<CaptureItemResponse, RemoteError>;

    fn release_unit(&self, unit_id: u64) -> Result<ActionResponse, RemoteError>;

    fn evolve_unit(&self, unit_id: u64) -> Result<ActionResponse, RemoteError>;

    fn recycle_item(&self, item: ItemId, count: u32) -> Result<ActionResponse, RemoteError>;

    fn assign_egg_to_incubator(
        &self,
        incubator_id: &str,
        egg_id: u64,
    ) -> Result<ActionResponse, RemoteError>;

    fn get_hatched_eggs(&self) -> Result<HatchReport, RemoteError>;

    fn collect_level_rewards(&self, level: u32) -> Result<ActionResponse, RemoteError>;

    /// Report the simulated position after a movement step.
    fn update_position(&self, position: &Position) -> Result<(), RemoteError>;
}
