//! Inventory triage: what to evolve, release, recycle, and incubate.
//!
//! All functions here are pure. They return plans; `crate::inventory` issues
//! the matching remote calls.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::types::{Egg, HeldUnit, Incubator, ItemId};

/// Candy cost to evolve one unit of `species`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionRule {
    pub species: u32,
    pub cost: u32,
}

/// Species -> candy cost.
pub type EvolutionCosts = BTreeMap<u32, u32>;

pub fn evolution_costs(rules: &[EvolutionRule]) -> EvolutionCosts {
    rules
        .iter()
        .filter(|rule| rule.cost > 0)
        .map(|rule| (rule.species, rule.cost))
        .collect()
}

/// Promotions a family can currently afford.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyPromotions {
    pub cost: u32,
    pub affordable: u32,
    pub candy_left: u32,
}

/// Per family holding at least one evolvable unit: `floor(candy / cost)` using the
/// cheapest evolvable species held in that family.
pub fn plan_evolutions(
    units: &[HeldUnit],
    candies: &BTreeMap<u32, u32>,
    costs: &EvolutionCosts,
) -> BTreeMap<u32, FamilyPromotions> {
    let mut cheapest: BTreeMap<u32, u32> = BTreeMap::new();
    for unit in units {
        if let Some(&cost) = costs.get(&unit.species) {
            let entry = cheapest.entry(unit.family).or_insert(cost);
            *entry = (*entry).min(cost);
        }
    }

    cheapest
        .into_iter()
        .filter_map(|(family, cost)| {
            let candy = candies.get(&family).copied().unwrap_or(0);
            let affordable = candy / cost;
            (affordable > 0).then_some((
                family,
                FamilyPromotions {
                    cost,
                    affordable,
                    candy_left: candy - affordable * cost,
                },
            ))
        })
        .collect()
}

/// Concrete units to evolve, cheapest per-unit cost first so the same candy buys
/// the most promotions. Within one species the best unit goes first.
pub fn order_promotions(
    units: &[HeldUnit],
    candies: &BTreeMap<u32, u32>,
    costs: &EvolutionCosts,
) -> Vec<u64> {
    let mut eligible: Vec<(&HeldUnit, u32)> = units
        .iter()
        .filter_map(|unit| costs.get(&unit.species).map(|&cost| (unit, cost)))
        .collect();
    eligible.sort_by(|(a, cost_a), (b, cost_b)| {
        cost_a
            .cmp(cost_b)
            .then(b.power_quotient().cmp(&a.power_quotient()))
            .then(a.id.cmp(&b.id))
    });

    let mut budget = candies.clone();
    let mut picked = Vec::new();
    for (unit, cost) in eligible {
        let Some(candy) = budget.get_mut(&unit.family) else {
            continue;
        };
        if *candy >= cost {
            *candy -= cost;
            picked.push(unit.id);
        }
    }
    picked
}

/// Units safe to release.
///
/// Per family, at most `N - P` units below `threshold` are released, where `N` is
/// the family's held count and `P` its planned promotions. Whitelisted families and
/// favourites are never released. Lowest quotient goes first.
pub fn plan_culls(
    units: &[HeldUnit],
    planned: &BTreeMap<u32, FamilyPromotions>,
    threshold: u32,
    whitelist: &BTreeSet<u32>,
) -> Vec<u64> {
    let mut families: BTreeMap<u32, Vec<&HeldUnit>> = BTreeMap::new();
    for unit in units {
        families.entry(unit.family).or_default().push(unit);
    }

    let mut releases = Vec::new();
    for (family, members) in families {
        if whitelist.contains(&family) {
            continue;
        }
        let reserved = planned.get(&family).map_or(0, |plan| plan.affordable) as usize;
        let surplus = members.len().saturating_sub(reserved);

        let mut weak: Vec<&HeldUnit> = members
            .into_iter()
            .filter(|unit| !unit.favorite && unit.power_quotient() < threshold)
            .collect();
        weak.sort_by_key(|unit| (unit.power_quotient(), unit.id));
        releases.extend(weak.into_iter().take(surplus).map(|unit| unit.id));
    }
    releases
}

/// Per-item limits for the two storage pressure tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLimit {
    pub item: ItemId,
    /// Kept while storage has room.
    pub target: u32,
    /// Kept once storage is at the cap.
    pub minimum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePressure {
    Relaxed,
    Full,
}

impl StoragePressure {
    pub fn from_counts(total: u32, cap: u32) -> Self {
        if cap > 0 && total >= cap {
            StoragePressure::Full
        } else {
            StoragePressure::Relaxed
        }
    }
}

/// Quantities to discard, in item order.
pub fn plan_recycling(
    items: &BTreeMap<ItemId, u32>,
    pressure: StoragePressure,
    limits: &[ItemLimit],
) -> Vec<(ItemId, u32)> {
    let mut plan = Vec::new();
    for (&item, &count) in items {
        let Some(limit) = limits.iter().find(|limit| limit.item == item) else {
            continue;
        };
        let keep = match pressure {
            StoragePressure::Relaxed => limit.target,
            StoragePressure::Full => limit.minimum,
        };
        let excess = count.saturating_sub(keep);
        if excess > 0 {
            plan.push((item, excess));
        }
    }
    plan
}

/// `(incubator id, egg id)` bindings: longest-distance free egg into each empty slot.
///
/// An egg bound anywhere (by its own record or by any incubator) is never offered
/// again, and no egg is offered twice.
pub fn plan_incubators(eggs: &[Egg], incubators: &[Incubator]) -> Vec<(String, u64)> {
    let mut bound: HashSet<u64> = incubators.iter().filter_map(|inc| inc.egg_id).collect();
    bound.extend(
        eggs.iter()
            .filter(|egg| egg.incubator_id.is_some())
            .map(|egg| egg.id),
    );

    let mut free: Vec<&Egg> = eggs.iter().filter(|egg| !bound.contains(&egg.id)).collect();
    free.sort_by(|a, b| b.target_km.total_cmp(&a.target_km).then(a.id.cmp(&b.id)));

    let empty = incubators
        .iter()
        .filter(|inc| inc.egg_id.is_none() && inc.uses_remaining != Some(0));

    let mut plan = Vec::new();
    let mut free = free.into_iter();
    for incubator in empty {
        let Some(egg) = free.next() else { break };
        if bound.insert(egg.id) {
            plan.push((incubator.id.clone(), egg.id));
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unit;

    fn costs(pairs: &[(u32, u32)]) -> EvolutionCosts {
        pairs.iter().copied().collect()
    }

    #[test]
    fn plan_evolutions_floors_candy_by_cost() {
        let units = vec![unit(1, 10, 10, 30)];
        let candies = BTreeMap::from([(10, 60)]);
        let plan = plan_evolutions(&units, &candies, &costs(&[(10, 25)]));
        assert_eq!(
            plan.get(&10),
            Some(&FamilyPromotions {
                cost: 25,
                affordable: 2,
                candy_left: 10
            })
        );
    }

    #[test]
    fn plan_evolutions_uses_cheapest_species_and_skips_broke_families() {
        let units = vec![unit(1, 16, 16, 30), unit(2, 17, 16, 30), unit(3, 19, 19, 30)];
        let candies = BTreeMap::from([(16, 30), (19, 10)]);
        let plan = plan_evolutions(&units, &candies, &costs(&[(16, 12), (17, 50), (19, 25)]));
        assert_eq!(plan.get(&16).map(|p| p.affordable), Some(2));
        assert!(!plan.contains_key(&19));
    }

    #[test]
    fn culls_never_eat_into_promotion_reserve() {
        // Five weak units, three promotions planned: at most two released.
        let units: Vec<HeldUnit> = (1..=5).map(|id| unit(id, 10, 10, 10)).collect();
        let planned = BTreeMap::from([(
            10,
            FamilyPromotions {
                cost: 12,
                affordable: 3,
                candy_left: 0,
            },
        )]);
        let culls = plan_culls(&units, &planned, 50, &BTreeSet::new());
        assert_eq!(culls.len(), 2);

        let planned_more = BTreeMap::from([(
            10,
            FamilyPromotions {
                cost: 12,
                affordable: 9,
                candy_left: 0,
            },
        )]);
        assert!(plan_culls(&units, &planned_more, 50, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn culls_use_threshold_alone_without_promotions() {
        let units = vec![unit(1, 10, 10, 20), unit(2, 10, 10, 90), unit(3, 10, 10, 40)];
        let culls = plan_culls(&units, &BTreeMap::new(), 50, &BTreeSet::new());
        assert_eq!(culls.len(), 2);
        assert!(culls.contains(&1));
        assert!(culls.contains(&3));
    }

    #[test]
    fn culls_skip_whitelist_and_favorites() {
        let mut fav = unit(1, 10, 10, 5);
        fav.favorite = true;
        let units = vec![fav, unit(2, 20, 20, 5)];
        let whitelist = BTreeSet::from([20]);
        assert!(plan_culls(&units, &BTreeMap::new(), 50, &whitelist).is_empty());
    }

    #[test]
    fn culls_release_weakest_first() {
        let units = vec![unit(1, 10, 10, 40), unit(2, 10, 10, 10), unit(3, 10, 10, 20)];
        let planned = BTreeMap::from([(
            10,
            FamilyPromotions {
                cost: 12,
                affordable: 2,
                candy_left: 0,
            },
        )]);
        assert_eq!(plan_culls(&units, &planned, 50, &BTreeSet::new()), vec![2]);
    }

    #[test]
    fn recycling_switches_table_at_cap() {
        let items = BTreeMap::from([(ItemId::POTION, 30), (ItemId::REVIVE, 5)]);
        let limits = [
            ItemLimit {
                item: ItemId::POTION,
                target: 20,
                minimum: 5,
            },
            ItemLimit {
                item: ItemId::REVIVE,
                target: 10,
                minimum: 2,
            },
        ];
        let relaxed = plan_recycling(
            &items,
            StoragePressure::from_counts(35, 350),
            &limits,
        );
        assert_eq!(relaxed, vec![(ItemId::POTION, 10)]);

        let full = plan_recycling(&items, StoragePressure::from_counts(350, 350), &limits);
        assert_eq!(full, vec![(ItemId::POTION, 25), (ItemId::REVIVE, 3)]);
    }

    #[test]
    fn incubators_get_longest_free_egg_once() {
        let eggs = vec![
            Egg {
                id: 1,
                target_km: 2.0,
                incubator_id: None,
            },
            Egg {
                id: 2,
                target_km: 10.0,
                incubator_id: Some("inc-a".to_string()),
            },
            Egg {
                id: 3,
                target_km: 5.0,
                incubator_id: None,
            },
        ];
        let incubators = vec![
            Incubator {
                id: "inc-a".to_string(),
                egg_id: Some(2),
                uses_remaining: None,
            },
            Incubator {
                id: "inc-b".to_string(),
                egg_id: None,
                uses_remaining: Some(3),
            },
            Incubator {
                id: "inc-c".to_string(),
                egg_id: None,
                uses_remaining: None,
            },
            Incubator {
                id: "inc-d".to_string(),
                egg_id: None,
                uses_remaining: None,
            },
        ];
        let plan = plan_incubators(&eggs, &incubators);
        assert_eq!(
            plan,
            vec![("inc-b".to_string(), 3), ("inc-c".to_string(), 1)]
        );
        let eggs_used: HashSet<u64> = plan.iter().map(|(_, egg)| *egg).collect();
        assert_eq!(eggs_used.len(), plan.len());
    }

    #[test]
    fn promotions_prefer_cheap_species() {
        // One family, 50 candy: two cheap evolutions beat one expensive one.
        let units = vec![unit(1, 17, 16, 90), unit(2, 16, 16, 10), unit(3, 16, 16, 50)];
        let candies = BTreeMap::from([(16, 50)]);
        let order = order_promotions(&units, &candies, &costs(&[(16, 12), (17, 50)]));
        assert_eq!(order, vec![3, 2]);
    }
}
