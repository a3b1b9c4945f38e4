//! Shared domain types for the agent core.
//!
//! These types are the decoded form of everything the remote service reports.
//! Decoding happens once at the `io::remote` boundary; core logic never sees
//! untyped payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds since the Unix epoch.
pub type Millis = i64;

/// Opaque cell identifier produced by a [`crate::io::cells::CellIndex`].
pub type CellId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl Position {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5},{:.5})", self.latitude, self.longitude)
    }
}

/// A stationary interactable location.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub position: Position,
    /// Active lure or similar bonus.
    pub has_bonus: bool,
    /// Absent means spinnable.
    pub cooldown_until: Option<Millis>,
    pub visited_at: Option<Millis>,
}

impl Stop {
    pub fn is_cooling(&self, now: Millis) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// Identity of a wild spawn: origin point plus creature kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncounterKey {
    pub spawn_point_id: String,
    pub species: u32,
}

impl fmt::Display for EncounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.spawn_point_id, self.species)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WildEncounter {
    pub key: EncounterKey,
    pub encounter_id: u64,
    pub position: Position,
    pub expires_at: Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityKind {
    Incense,
    Lure,
}

/// Single-slot encounter produced by an incense or a lured stop.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityEncounter {
    pub kind: PriorityKind,
    pub encounter_id: u64,
    /// Spawn point for incense, stop id for lures.
    pub spawn_id: String,
    pub species: u32,
    pub position: Position,
    pub expires_at: Option<Millis>,
}

/// Capture ball tiers, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BallTier {
    Poke,
    Great,
    Ultra,
    Master,
}

impl BallTier {
    pub const ALL: [BallTier; 4] = [
        BallTier::Poke,
        BallTier::Great,
        BallTier::Ultra,
        BallTier::Master,
    ];

    pub const fn weakest() -> Self {
        BallTier::Poke
    }

    pub const fn strongest() -> Self {
        BallTier::Master
    }

    /// Next stronger tier, saturating at the strongest.
    pub fn stronger(self) -> Self {
        match self {
            BallTier::Poke => BallTier::Great,
            BallTier::Great => BallTier::Ultra,
            BallTier::Ultra | BallTier::Master => BallTier::Master,
        }
    }

    pub const fn item(self) -> ItemId {
        match self {
            BallTier::Poke => ItemId::POKE_BALL,
            BallTier::Great => ItemId::GREAT_BALL,
            BallTier::Ultra => ItemId::ULTRA_BALL,
            BallTier::Master => ItemId::MASTER_BALL,
        }
    }

    pub fn from_item(item: ItemId) -> Option<Self> {
        BallTier::ALL.into_iter().find(|tier| tier.item() == item)
    }

    /// Position in [`BallTier::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Remote item type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl ItemId {
    pub const POKE_BALL: ItemId = ItemId(1);
    pub const GREAT_BALL: ItemId = ItemId(2);
    pub const ULTRA_BALL: ItemId = ItemId(3);
    pub const MASTER_BALL: ItemId = ItemId(4);
    pub const POTION: ItemId = ItemId(101);
    pub const SUPER_POTION: ItemId = ItemId(102);
    pub const REVIVE: ItemId = ItemId(201);
    pub const RAZZ_BERRY: ItemId = ItemId(701);
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// A captured creature held in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldUnit {
    pub id: u64,
    pub species: u32,
    pub family: u32,
    pub attack: u8,
    pub defense: u8,
    pub stamina: u8,
    pub favorite: bool,
}

impl HeldUnit {
    /// Normalized 0-100 quality score from the three sub-scores (each 0-15).
    pub fn power_quotient(&self) -> u32 {
        let total = u32::from(self.attack) + u32::from(self.defense) + u32::from(self.stamina);
        (f64::from(total) * 100.0 / 45.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Egg {
    pub id: u64,
    /// Walking distance needed to hatch.
    pub target_km: f64,
    pub incubator_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Incubator {
    pub id: String,
    pub egg_id: Option<u64>,
    pub uses_remaining: Option<u32>,
}

/// Everything the inventory call reports, decoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InventorySnapshot {
    pub units: Vec<HeldUnit>,
    pub eggs: Vec<Egg>,
    pub incubators: Vec<Incubator>,
    pub candies: BTreeMap<u32, u32>,
    pub items: BTreeMap<ItemId, u32>,
    pub level: u32,
    pub km_walked: f64,
}

impl InventorySnapshot {
    pub fn item_count(&self, item: ItemId) -> u32 {
        self.items.get(&item).copied().unwrap_or(0)
    }

    pub fn total_items(&self) -> u32 {
        self.items.values().sum()
    }

    /// Held units plus eggs, which share storage.
    pub fn total_units(&self) -> usize {
        self.units.len() + self.eggs.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainerSnapshot {
    pub username: String,
    pub max_item_storage: u32,
    pub max_unit_storage: u32,
    pub stardust: u64,
}

/// Experience, candy and dust reported by a remote action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Award {
    pub xp: u64,
    pub candy: u64,
    pub stardust: u64,
}

impl std::ops::AddAssign for Award {
    fn add_assign(&mut self, rhs: Self) {
        self.xp += rhs.xp;
        self.candy += rhs.candy;
        self.stardust += rhs.stardust;
    }
}
