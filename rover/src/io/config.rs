//! Agent configuration stored under `.rover/config.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffConfig;
use crate::core::capture::CaptureConfig;
use crate::core::geofence::Geofence;
use crate::core::movement::WanderConfig;
use crate::core::route::RouteConfig;
use crate::core::triage::{EvolutionRule, ItemLimit};
use crate::core::types::{ItemId, Position};
use crate::io::retry::RetryConfig;

/// Agent configuration (TOML).
///
/// Meant to be edited by hand. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Start position when no session snapshot exists.
    pub location: Position,

    /// Travel speed in km/h.
    pub speed_kmh: f64,

    /// Seconds between ticks when nothing goes wrong.
    pub tick_interval_secs: u64,

    /// Minimum seconds between area scans.
    pub scan_interval_secs: u64,

    /// Cell radius passed to the cell index.
    pub scan_radius: u32,

    /// Seconds before a spun stop becomes a route candidate again.
    pub revisit_interval_secs: u64,

    pub spin_range_m: f64,
    pub catch_range_m: f64,

    pub spin: bool,
    pub catch: bool,

    /// Units below this power quotient (0-100) may be released.
    pub power_quotient: u32,
    /// No releases while holding fewer units than this.
    pub min_units_before_cull: usize,
    /// Families never released.
    pub whitelist: BTreeSet<u32>,

    pub softban_cooldown_secs: u64,
    /// Spin attempts made on one stop when a spin looks softbanned.
    pub spin_storm_attempts: u32,

    /// Times the CLI re-authenticates after the loop reports an expired session.
    pub max_reauth: u32,

    /// Fixed seed for reproducible runs; random when absent.
    pub seed: Option<u64>,

    /// Geofence polygon as `[latitude, longitude]` pairs.
    pub bounds: Option<Vec<[f64; 2]>>,

    pub route: RouteConfig,
    pub capture: CaptureConfig,
    pub wander: WanderConfig,
    pub backoff: BackoffConfig,
    pub retry: RetryConfig,

    pub recycle: Vec<ItemLimit>,
    pub evolution: Vec<EvolutionRule>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            location: Position::new(40.7680, -73.9819),
            speed_kmh: 8.0,
            tick_interval_secs: 5,
            scan_interval_secs: 10,
            scan_radius: 10,
            revisit_interval_secs: 30 * 60,
            spin_range_m: 50.0,
            catch_range_m: 60.0,
            spin: true,
            catch: true,
            power_quotient: 0,
            min_units_before_cull: 0,
            whitelist: BTreeSet::new(),
            softban_cooldown_secs: 10 * 60,
            spin_storm_attempts: 40,
            max_reauth: 3,
            seed: None,
            bounds: None,
            route: RouteConfig::default(),
            capture: CaptureConfig::default(),
            wander: WanderConfig::default(),
            backoff: BackoffConfig::default(),
            retry: RetryConfig::default(),
            recycle: default_recycle_limits(),
            evolution: Vec::new(),
        }
    }
}

fn default_recycle_limits() -> Vec<ItemLimit> {
    [
        (ItemId::POTION, 20, 10),
        (ItemId::SUPER_POTION, 20, 10),
        (ItemId::REVIVE, 15, 5),
        (ItemId::RAZZ_BERRY, 30, 10),
    ]
    .into_iter()
    .map(|(item, target, minimum)| ItemLimit {
        item,
        target,
        minimum,
    })
    .collect()
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.location.latitude)
            || !(-180.0..=180.0).contains(&self.location.longitude)
        {
            return Err(anyhow!("location must be a valid latitude/longitude"));
        }
        if !self.speed_kmh.is_finite() || self.speed_kmh <= 0.0 {
            return Err(anyhow!("speed_kmh must be > 0"));
        }
        if self.revisit_interval_secs == 0 {
            return Err(anyhow!("revisit_interval_secs must be > 0"));
        }
        if self.power_quotient > 100 {
            return Err(anyhow!("power_quotient must be within 0..=100"));
        }
        if self.spin_range_m <= 0.0 || self.catch_range_m <= 0.0 {
            return Err(anyhow!("spin_range_m and catch_range_m must be > 0"));
        }
        if self.route.noise_mean < 0.0 || !self.route.noise_mean.is_finite() {
            return Err(anyhow!("route.noise_mean must be >= 0"));
        }
        if self.route.bonus_window == 0 {
            return Err(anyhow!("route.bonus_window must be > 0"));
        }
        if self.wander.min_heading_secs > self.wander.max_heading_secs {
            return Err(anyhow!(
                "wander.min_heading_secs must not exceed wander.max_heading_secs"
            ));
        }
        if self.backoff.base_secs == 0 {
            return Err(anyhow!("backoff.base_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        for limit in &self.recycle {
            if limit.minimum > limit.target {
                return Err(anyhow!(
                    "recycle limit for {} has minimum above target",
                    limit.item
                ));
            }
        }
        if let Some(bounds) = &self.bounds {
            let fence = self
                .geofence()
                .ok_or_else(|| anyhow!("bounds need at least 3 vertices, got {}", bounds.len()))?;
            if !fence.contains(&self.location) {
                tracing::warn!("configured location lies outside bounds; will walk inward");
            }
        }
        Ok(())
    }

    pub fn geofence(&self) -> Option<Geofence> {
        let bounds = self.bounds.as_ref()?;
        Geofence::new(bounds.iter().map(|[lat, lng]| (*lat, *lng)).collect())
    }

    pub fn revisit_interval_ms(&self) -> i64 {
        (self.revisit_interval_secs as i64).saturating_mul(1000)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
