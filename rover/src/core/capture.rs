//! Pure capture decisions: which ball, which aim, whether to use an assist item.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::types::{BallTier, ItemId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Always throw the strongest ball available.
    pub best_balls_first: bool,
    /// Capture probability below which an assist item is used.
    pub assist_threshold: f64,
    pub assist_item: ItemId,
    /// Hard cap on throws per engagement.
    pub max_throws: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            best_balls_first: false,
            assist_threshold: 0.35,
            assist_item: ItemId::RAZZ_BERRY,
            max_throws: 12,
        }
    }
}

/// Ball counts by tier, shared across engagements within a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BallBag {
    counts: [u32; 4],
}

impl BallBag {
    pub fn from_items(items: &BTreeMap<ItemId, u32>) -> Self {
        let mut bag = Self::default();
        for tier in BallTier::ALL {
            bag.counts[tier.index()] = items.get(&tier.item()).copied().unwrap_or(0);
        }
        bag
    }

    pub fn with(mut self, tier: BallTier, count: u32) -> Self {
        self.counts[tier.index()] = count;
        self
    }

    pub fn count(&self, tier: BallTier) -> u32 {
        self.counts[tier.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn strongest(&self) -> Option<BallTier> {
        BallTier::ALL
            .into_iter()
            .rev()
            .find(|tier| self.count(*tier) > 0)
    }

    /// Remove one ball. Returns false when none of that tier is left.
    pub fn take(&mut self, tier: BallTier) -> bool {
        let slot = &mut self.counts[tier.index()];
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }
}

/// Running minimum-tier policy for one engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallPolicy {
    min_tier: BallTier,
    best_first: bool,
}

impl BallPolicy {
    pub fn new(best_first: bool) -> Self {
        Self {
            min_tier: BallTier::weakest(),
            best_first,
        }
    }

    pub fn min_tier(&self) -> BallTier {
        self.min_tier
    }

    /// Exact minimum tier if held, otherwise the strongest held ball.
    pub fn choose(&self, bag: &BallBag) -> Option<BallTier> {
        if self.best_first {
            return bag.strongest();
        }
        if bag.count(self.min_tier) > 0 {
            return Some(self.min_tier);
        }
        bag.strongest()
    }

    /// Called on an escape. No-op when best-first is on.
    pub fn escalate(&mut self) {
        if !self.best_first {
            self.min_tier = self.min_tier.stronger();
        }
    }
}

/// Whether to spend an assist item on this encounter.
pub fn should_assist(hint: Option<f64>, assist_held: u32, threshold: f64) -> bool {
    assist_held > 0 && hint.is_some_and(|p| p < threshold)
}

/// Throw shape sent with every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AimParameters {
    pub normalized_reticle_size: f64,
    pub normalized_hit_position: f64,
    pub spin_modifier: f64,
    pub hit: bool,
}

impl AimParameters {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            normalized_reticle_size: 1.95 - rng.gen_range(0.0..0.5),
            normalized_hit_position: 1.0,
            spin_modifier: 1.0 - rng.gen_range(0.0..0.1),
            hit: true,
        }
    }
}
