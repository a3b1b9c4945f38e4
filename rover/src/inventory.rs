//! Issues the remote calls for triage plans and keeps the local inventory
//! snapshot in step with what completed.

use tracing::{debug, error, info};

use crate::core::types::{InventorySnapshot, ItemId};
use crate::io::clock::Clock;
use crate::io::remote::{ActionResponse, ErrorClass, RemoteError, RemoteService};
use crate::io::retry::{CallKind, RetryConfig};

pub struct Actions<'a, R: RemoteService, C: Clock> {
    pub remote: &'a R,
    pub clock: &'a C,
    pub retry: &'a RetryConfig,
}

/// Ids or items whose action the remote reported as done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completed<T> {
    pub done: Vec<T>,
    /// Actions the remote answered with a failure status.
    pub refused: u32,
}

impl<R: RemoteService, C: Clock> Actions<'_, R, C> {
    /// Run one action per item in order.
    ///
    /// A per-call rejection is logged and ends the batch; transient and auth
    /// errors are returned for the tick to handle.
    fn batch<T: Clone + std::fmt::Debug>(
        &self,
        name: &'static str,
        items: &[T],
        mut op: impl FnMut(&T) -> Result<ActionResponse, RemoteError>,
    ) -> Result<Completed<T>, RemoteError> {
        let mut completed = Completed {
            done: Vec::new(),
            refused: 0,
        };
        for item in items {
            match self
                .retry
                .call(self.clock, CallKind::Action, name, || op(item))
            {
                Ok(response) if response.status.completed() => completed.done.push(item.clone()),
                Ok(response) => {
                    debug!(call = name, ?item, status = ?response.status, "action refused");
                    completed.refused += 1;
                }
                Err(err) if err.class() == ErrorClass::Phase => {
                    error!(call = name, ?item, error = %err, "action rejected; skipping rest of batch");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(completed)
    }

    /// Species and candy change remotely; the caller re-fetches the inventory.
    pub fn evolve(&self, unit_ids: &[u64]) -> Result<Completed<u64>, RemoteError> {
        let remote = self.remote;
        let completed = self.batch("evolve_unit", unit_ids, |id| remote.evolve_unit(*id))?;
        if !completed.done.is_empty() {
            info!(count = completed.done.len(), "units evolved");
        }
        Ok(completed)
    }

    pub fn release(
        &self,
        unit_ids: &[u64],
        inventory: &mut InventorySnapshot,
    ) -> Result<Completed<u64>, RemoteError> {
        let remote = self.remote;
        let completed = self.batch("release_unit", unit_ids, |id| remote.release_unit(*id))?;
        inventory
            .units
            .retain(|unit| !completed.done.contains(&unit.id));
        if !completed.done.is_empty() {
            info!(count = completed.done.len(), "units released");
        }
        Ok(completed)
    }

    pub fn recycle(
        &self,
        plan: &[(ItemId, u32)],
        inventory: &mut InventorySnapshot,
    ) -> Result<Completed<(ItemId, u32)>, RemoteError> {
        let remote = self.remote;
        let completed = self.batch("recycle_item", plan, |(item, count)| {
            remote.recycle_item(*item, *count)
        })?;
        for (item, count) in &completed.done {
            if let Some(held) = inventory.items.get_mut(item) {
                *held = held.saturating_sub(*count);
            }
        }
        inventory.items.retain(|_, count| *count > 0);
        Ok(completed)
    }

    pub fn load_incubators(
        &self,
        plan: &[(String, u64)],
        inventory: &mut InventorySnapshot,
    ) -> Result<Completed<(String, u64)>, RemoteError> {
        let remote = self.remote;
        let completed = self.batch("assign_egg_to_incubator", plan, |(incubator, egg)| {
            remote.assign_egg_to_incubator(incubator, *egg)
        })?;
        for (incubator_id, egg_id) in &completed.done {
            if let Some(egg) = inventory.eggs.iter_mut().find(|egg| egg.id == *egg_id) {
                egg.incubator_id = Some(incubator_id.clone());
            }
            if let Some(incubator) = inventory
                .incubators
                .iter_mut()
                .find(|inc| inc.id == *incubator_id)
            {
                incubator.egg_id = Some(*egg_id);
            }
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Egg, Incubator};
    use crate::io::remote::ActionStatus;
    use crate::test_support::{ManualClock, ScriptedRemote, unit};
    use std::collections::BTreeMap;

    fn actions<'a>(
        remote: &'a ScriptedRemote,
        clock: &'a ManualClock,
        retry: &'a RetryConfig,
    ) -> Actions<'a, ScriptedRemote, ManualClock> {
        Actions {
            remote,
            clock,
            retry,
        }
    }

    #[test]
    fn release_removes_completed_and_already_done() {
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(0);
        let retry = RetryConfig::default();
        remote.push_action(ActionStatus::Success);
        remote.push_action(ActionStatus::AlreadyDone);
        remote.push_action(ActionStatus::Failed);
        let mut inventory = InventorySnapshot {
            units: vec![unit(1, 10, 10, 5), unit(2, 10, 10, 5), unit(3, 10, 10, 5)],
            ..InventorySnapshot::default()
        };

        let completed = actions(&remote, &clock, &retry)
            .release(&[1, 2, 3], &mut inventory)
            .expect("release");

        assert_eq!(completed.done, vec![1, 2]);
        assert_eq!(completed.refused, 1);
        let left: Vec<u64> = inventory.units.iter().map(|unit| unit.id).collect();
        assert_eq!(left, vec![3]);
    }

    #[test]
    fn rejection_ends_batch_without_error() {
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(0);
        let retry = RetryConfig::default();
        remote.fail_next("evolve_unit", RemoteError::Rejected("bad id".into()));
        let completed = actions(&remote, &clock, &retry)
            .evolve(&[1, 2])
            .expect("evolve");

        assert!(completed.done.is_empty());
        assert_eq!(remote.count("evolve_unit"), 1);
    }

    #[test]
    fn throttling_propagates() {
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(0);
        let retry = RetryConfig {
            max_attempts: 1,
            delay_ms: 0,
        };
        remote.fail_next("recycle_item", RemoteError::RateLimited);
        let mut inventory = InventorySnapshot::default();
        let err = actions(&remote, &clock, &retry)
            .recycle(&[(ItemId::POTION, 3)], &mut inventory)
            .unwrap_err();
        assert_eq!(err, RemoteError::RateLimited);
    }

    #[test]
    fn recycle_updates_local_counts() {
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(0);
        let retry = RetryConfig::default();
        let mut inventory = InventorySnapshot {
            items: BTreeMap::from([(ItemId::POTION, 30), (ItemId::REVIVE, 5)]),
            ..InventorySnapshot::default()
        };
        actions(&remote, &clock, &retry)
            .recycle(&[(ItemId::POTION, 10), (ItemId::REVIVE, 5)], &mut inventory)
            .expect("recycle");
        assert_eq!(inventory.item_count(ItemId::POTION), 20);
        assert!(!inventory.items.contains_key(&ItemId::REVIVE));
        assert_eq!(
            remote.calls(),
            vec!["recycle_item:101x10".to_string(), "recycle_item:201x5".to_string()]
        );
    }

    #[test]
    fn incubator_binding_updates_both_sides() {
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(0);
        let retry = RetryConfig::default();
        let mut inventory = InventorySnapshot {
            eggs: vec![Egg {
                id: 5,
                target_km: 5.0,
                incubator_id: None,
            }],
            incubators: vec![Incubator {
                id: "inc".to_string(),
                egg_id: None,
                uses_remaining: None,
            }],
            ..InventorySnapshot::default()
        };
        let completed = actions(&remote, &clock, &retry)
            .load_incubators(&[("inc".to_string(), 5)], &mut inventory)
            .expect("incubate");
        assert_eq!(completed.done.len(), 1);
        assert_eq!(inventory.eggs[0].incubator_id.as_deref(), Some("inc"));
        assert_eq!(inventory.incubators[0].egg_id, Some(5));
    }
}
