//! Simulated walking.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::geo::{bearing_deg, destination, distance_m, normalize_deg};
use crate::core::geofence::Geofence;
use crate::core::poi_store::PoiStore;
use crate::core::types::{EncounterKey, Millis, Position, PriorityKind};

/// Where the agent is heading this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Priority {
        kind: PriorityKind,
        position: Position,
    },
    Wild {
        key: EncounterKey,
        position: Position,
    },
    Route {
        stop_id: String,
        position: Position,
    },
}

impl Destination {
    pub fn position(&self) -> &Position {
        match self {
            Destination::Priority { position, .. }
            | Destination::Wild { position, .. }
            | Destination::Route { position, .. } => position,
        }
    }
}

/// Priority encounter, then nearest wild encounter, then the route target.
///
/// Encounters are only chased while `engaging`; otherwise the route target
/// is the sole destination.
pub fn pick_destination(
    position: &Position,
    store: &PoiStore,
    route_target: Option<&str>,
    engaging: bool,
) -> Option<Destination> {
    if let Some(enc) = store.nearest_priority(position).filter(|_| engaging) {
        return Some(Destination::Priority {
            kind: enc.kind,
            position: enc.position,
        });
    }
    if let Some(wild) = store.nearest_wild(position).filter(|_| engaging) {
        return Some(Destination::Wild {
            key: wild.key.clone(),
            position: wild.position,
        });
    }
    let stop = store.stop(route_target?)?;
    Some(Destination::Route {
        stop_id: stop.id.clone(),
        position: stop.position,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WanderConfig {
    pub min_heading_secs: u64,
    pub max_heading_secs: u64,
    /// Random offset added to the 180 degree reflection at a boundary.
    pub reflect_jitter_deg: f64,
    pub reflect_attempts: u32,
    /// Elapsed time per step is clamped to this, so a stalled clock cannot teleport.
    pub max_step_secs: f64,
}

impl Default for WanderConfig {
    fn default() -> Self {
        Self {
            min_heading_secs: 60,
            max_heading_secs: 300,
            reflect_jitter_deg: 45.0,
            reflect_attempts: 8,
            max_step_secs: 30.0,
        }
    }
}

/// Outcome of one `advance`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub position: Position,
    /// Snapped exactly onto the destination.
    pub arrived: bool,
    pub moved_m: f64,
}

/// Movement state that survives between ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct Wanderer {
    pub heading_deg: f64,
    pub next_heading_change: Millis,
}

impl Wanderer {
    pub fn new(heading_deg: f64, next_heading_change: Millis) -> Self {
        Self {
            heading_deg,
            next_heading_change,
        }
    }

    /// Move for `elapsed_secs` at `speed_kmh` toward `goal`, or wander without one.
    #[allow(clippy::too_many_arguments)]
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        position: &Position,
        elapsed_secs: f64,
        speed_kmh: f64,
        goal: Option<&Destination>,
        geofence: Option<&Geofence>,
        now: Millis,
        config: &WanderConfig,
        rng: &mut R,
    ) -> Step {
        let elapsed = if elapsed_secs.is_finite() {
            elapsed_secs.clamp(0.0, config.max_step_secs)
        } else {
            0.0
        };
        let step_m = speed_kmh.max(0.0) * 1000.0 / 3600.0 * elapsed;
        let stay = Step {
            position: *position,
            arrived: false,
            moved_m: 0.0,
        };
        if step_m <= 0.0 {
            return stay;
        }

        if let Some(fence) = geofence.filter(|fence| !fence.contains(position)) {
            // Starting outside: head for the middle without the containment check.
            let centroid = fence.centroid();
            let next = destination_or_snap(position, &centroid, step_m);
            return Step {
                position: next,
                arrived: false,
                moved_m: distance_m(position, &next),
            };
        }

        if let Some(goal) = goal {
            let target = goal.position();
            let remaining = distance_m(position, target);
            let next = destination_or_snap(position, target, step_m);
            if geofence.is_none_or(|fence| fence.contains(&next)) {
                return Step {
                    position: next,
                    arrived: remaining <= step_m,
                    moved_m: remaining.min(step_m),
                };
            }
            // Target lies beyond the fence; fall through to wandering.
            self.heading_deg = bearing_deg(position, target);
        }

        if now >= self.next_heading_change {
            self.heading_deg = rng.gen_range(0.0..360.0);
            self.schedule_heading_change(now, config, rng);
        }

        let mut heading = self.heading_deg;
        for _ in 0..=config.reflect_attempts {
            let next = destination(position, heading, step_m);
            if geofence.is_none_or(|fence| fence.contains(&next)) {
                self.heading_deg = heading;
                return Step {
                    position: next,
                    arrived: false,
                    moved_m: step_m,
                };
            }
            let jitter = if config.reflect_jitter_deg > 0.0 {
                rng.gen_range(-config.reflect_jitter_deg..=config.reflect_jitter_deg)
            } else {
                0.0
            };
            heading = normalize_deg(heading + 180.0 + jitter);
        }
        self.heading_deg = heading;
        stay
    }

    fn schedule_heading_change<R: Rng + ?Sized>(
        &mut self,
        now: Millis,
        config: &WanderConfig,
        rng: &mut R,
    ) {
        let min = config.min_heading_secs.min(config.max_heading_secs);
        let max = config.max_heading_secs.max(min);
        let secs = rng.gen_range(min..=max);
        self.next_heading_change = now + (secs as Millis) * 1000;
    }
}

fn destination_or_snap(position: &Position, target: &Position, step_m: f64) -> Position {
    if distance_m(position, target) <= step_m {
        return *target;
    }
    destination(position, bearing_deg(position, target), step_m)
}
