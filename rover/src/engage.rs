//! Capture engagement: open an encounter, optionally use an assist item, then
//! throw until the encounter resolves.

use rand::Rng;
use tracing::{debug, warn};

use crate::core::capture::{AimParameters, BallBag, BallPolicy, CaptureConfig, should_assist};
use crate::core::types::{Award, BallTier, Position, PriorityKind};
use crate::io::clock::Clock;
use crate::io::remote::{
    CatchStatus, EncounterResponse, EncounterStatus, ErrorClass, RemoteError, RemoteService,
};
use crate::io::retry::{CallKind, RetryConfig};

/// Where an encounter came from, which decides the opening call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterSource {
    Wild,
    Priority(PriorityKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementTarget {
    pub source: EncounterSource,
    pub encounter_id: u64,
    pub spawn_id: String,
    pub species: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementOutcome {
    Captured { unit_id: Option<u64> },
    Fled,
    Errored,
    /// No balls left, either before the first throw or mid-engagement.
    OutOfBalls,
    /// A throw came back with the softban signal.
    Softbanned,
    /// Despawned or otherwise gone before the first throw.
    Unavailable,
    /// Unit storage is full; nothing was thrown.
    StorageFull,
    /// `max_throws` reached without a resolution.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementReport {
    pub outcome: EngagementOutcome,
    pub throws: u32,
    /// Tier of every ball thrown, in order.
    pub balls_used: Vec<BallTier>,
    pub award: Award,
    pub assist_used: bool,
}

impl EngagementReport {
    fn new(outcome: EngagementOutcome) -> Self {
        Self {
            outcome,
            throws: 0,
            balls_used: Vec::new(),
            award: Award::default(),
            assist_used: false,
        }
    }
}

/// Shared inputs for every engagement in a tick.
pub struct EngageContext<'a, R: RemoteService, C: Clock> {
    pub remote: &'a R,
    pub clock: &'a C,
    pub retry: &'a RetryConfig,
    pub capture: &'a CaptureConfig,
    pub player: Position,
}

/// Run one engagement to completion.
///
/// `bag` and `assist_held` are decremented as balls and assist items are spent.
/// Transient and auth errors are returned for the caller to classify; a
/// per-call rejection of the assist item is logged and the throws go ahead.
pub fn resolve<R, C, G>(
    ctx: &EngageContext<'_, R, C>,
    target: &EngagementTarget,
    bag: &mut BallBag,
    assist_held: &mut u32,
    rng: &mut G,
) -> Result<EngagementReport, RemoteError>
where
    R: RemoteService,
    C: Clock,
    G: Rng + ?Sized,
{
    if bag.is_empty() {
        debug!(encounter = target.encounter_id, "no balls; skipping engagement");
        return Ok(EngagementReport::new(EngagementOutcome::OutOfBalls));
    }

    let opened = open(ctx, target)?;
    match opened.status {
        EncounterStatus::Success => {}
        EncounterStatus::NotAvailable => {
            return Ok(EngagementReport::new(EngagementOutcome::Unavailable));
        }
        EncounterStatus::StorageFull => {
            return Ok(EngagementReport::new(EngagementOutcome::StorageFull));
        }
        EncounterStatus::Error => return Ok(EngagementReport::new(EngagementOutcome::Errored)),
    }

    let mut report = EngagementReport::new(EngagementOutcome::Abandoned);
    let mut policy = BallPolicy::new(ctx.capture.best_balls_first);
    let hint = policy
        .choose(bag)
        .and_then(|tier| opened.probability_for(tier));

    if should_assist(hint, *assist_held, ctx.capture.assist_threshold) {
        match use_assist(ctx, target) {
            Ok(Some(multiplier)) => {
                *assist_held -= 1;
                report.assist_used = true;
                let boosted = hint.unwrap_or(0.0) * multiplier;
                if boosted < ctx.capture.assist_threshold {
                    policy.escalate();
                }
            }
            Ok(None) => {}
            Err(err) if err.class() == ErrorClass::Phase => {
                warn!(encounter = target.encounter_id, error = %err, "assist item rejected");
            }
            Err(err) => return Err(err),
        }
    }

    while report.throws < ctx.capture.max_throws {
        let Some(tier) = policy.choose(bag) else {
            report.outcome = EngagementOutcome::OutOfBalls;
            return Ok(report);
        };
        bag.take(tier);
        report.throws += 1;
        report.balls_used.push(tier);
        let aim = AimParameters::sample(rng);
        let response = ctx.retry.call(ctx.clock, CallKind::Action, "throw_ball", || {
            ctx.remote
                .throw_ball(target.encounter_id, &target.spawn_id, tier, &aim)
        })?;
        report.award += response.award;
        debug!(encounter = target.encounter_id, ?tier, status = ?response.status, "throw");
        match response.status {
            CatchStatus::Captured => {
                report.outcome = EngagementOutcome::Captured {
                    unit_id: response.captured_unit_id,
                };
                return Ok(report);
            }
            CatchStatus::Escaped => policy.escalate(),
            CatchStatus::Missed => {}
            CatchStatus::Fled => {
                report.outcome = EngagementOutcome::Fled;
                return Ok(report);
            }
            CatchStatus::Errored => {
                report.outcome = EngagementOutcome::Errored;
                return Ok(report);
            }
            CatchStatus::Softbanned => {
                report.outcome = EngagementOutcome::Softbanned;
                return Ok(report);
            }
        }
    }
    Ok(report)
}

fn open<R: RemoteService, C: Clock>(
    ctx: &EngageContext<'_, R, C>,
    target: &EngagementTarget,
) -> Result<EncounterResponse, RemoteError> {
    match target.source {
        EncounterSource::Wild => {
            ctx.retry
                .call(ctx.clock, CallKind::Action, "encounter_wild", || {
                    ctx.remote
                        .encounter_wild(target.encounter_id, &target.spawn_id, &ctx.player)
                })
        }
        EncounterSource::Priority(kind) => {
            ctx.retry
                .call(ctx.clock, CallKind::Action, "encounter_priority", || {
                    ctx.remote
                        .encounter_priority(kind, target.encounter_id, &target.spawn_id)
                })
        }
    }
}

/// Multiplier reported for the assist item, or `None` when the remote refused it.
fn use_assist<R: RemoteService, C: Clock>(
    ctx: &EngageContext<'_, R, C>,
    target: &EngagementTarget,
) -> Result<Option<f64>, RemoteError> {
    let response = ctx
        .retry
        .call(ctx.clock, CallKind::Action, "use_capture_item", || {
            ctx.remote.use_capture_item(
                target.encounter_id,
                &target.spawn_id,
                ctx.capture.assist_item,
            )
        })?;
    Ok(response.success.then_some(response.multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::remote::CaptureItemResponse;
    use crate::test_support::{ManualClock, ScriptedRemote};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn target() -> EngagementTarget {
        EngagementTarget {
            source: EncounterSource::Wild,
            encounter_id: 77,
            spawn_id: "sp".to_string(),
            species: 16,
        }
    }

    fn encounter(probabilities: Vec<f64>) -> EncounterResponse {
        EncounterResponse {
            status: EncounterStatus::Success,
            species: Some(16),
            capture_probability: probabilities,
        }
    }

    struct Harness {
        remote: ScriptedRemote,
        clock: ManualClock,
        retry: RetryConfig,
        capture: CaptureConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                remote: ScriptedRemote::new(),
                clock: ManualClock::new(0),
                retry: RetryConfig::default(),
                capture: CaptureConfig::default(),
            }
        }

        fn run(&self, bag: &mut BallBag, assist_held: &mut u32) -> Result<EngagementReport, RemoteError> {
            let ctx = EngageContext {
                remote: &self.remote,
                clock: &self.clock,
                retry: &self.retry,
                capture: &self.capture,
                player: Position::new(0.0, 0.0),
            };
            let mut rng = StdRng::seed_from_u64(3);
            resolve(&ctx, &target(), bag, assist_held, &mut rng)
        }
    }

    #[test]
    fn empty_bag_makes_no_remote_calls() {
        let harness = Harness::new();
        let report = harness
            .run(&mut BallBag::default(), &mut 5)
            .expect("resolve");
        assert_eq!(report.outcome, EngagementOutcome::OutOfBalls);
        assert!(harness.remote.calls().is_empty());
    }

    #[test]
    fn escape_escalates_min_tier() {
        let harness = Harness::new();
        harness.remote.push_throw(CatchStatus::Escaped);
        harness.remote.push_throw(CatchStatus::Escaped);
        harness.remote.push_throw(CatchStatus::Captured);
        let mut bag = BallBag::default()
            .with(BallTier::Poke, 10)
            .with(BallTier::Great, 10)
            .with(BallTier::Ultra, 10);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.outcome, EngagementOutcome::Captured { unit_id: Some(1) });
        assert_eq!(
            report.balls_used,
            vec![BallTier::Poke, BallTier::Great, BallTier::Ultra]
        );
        assert_eq!(bag.total(), 27);
    }

    #[test]
    fn miss_does_not_escalate() {
        let harness = Harness::new();
        harness.remote.push_throw(CatchStatus::Missed);
        harness.remote.push_throw(CatchStatus::Captured);
        let mut bag = BallBag::default()
            .with(BallTier::Poke, 5)
            .with(BallTier::Great, 5);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.balls_used, vec![BallTier::Poke, BallTier::Poke]);
    }

    #[test]
    fn falls_back_to_strongest_when_min_tier_missing() {
        let harness = Harness::new();
        let mut bag = BallBag::default()
            .with(BallTier::Great, 1)
            .with(BallTier::Ultra, 1);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.balls_used, vec![BallTier::Ultra]);
    }

    #[test]
    fn best_balls_first_always_throws_strongest() {
        let mut harness = Harness::new();
        harness.capture.best_balls_first = true;
        harness.remote.push_throw(CatchStatus::Escaped);
        harness.remote.push_throw(CatchStatus::Captured);
        let mut bag = BallBag::default()
            .with(BallTier::Poke, 5)
            .with(BallTier::Ultra, 5);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.balls_used, vec![BallTier::Ultra, BallTier::Ultra]);
    }

    #[test]
    fn running_out_mid_engagement_stops() {
        let harness = Harness::new();
        harness.remote.push_throw(CatchStatus::Escaped);
        let mut bag = BallBag::default().with(BallTier::Poke, 1);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.outcome, EngagementOutcome::OutOfBalls);
        assert_eq!(report.throws, 1);
        assert_eq!(harness.remote.count("throw_ball"), 1);
    }

    #[test]
    fn softban_throw_abandons_encounter() {
        let harness = Harness::new();
        harness.remote.push_throw(CatchStatus::Softbanned);
        let mut bag = BallBag::default().with(BallTier::Poke, 5);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.outcome, EngagementOutcome::Softbanned);
        assert_eq!(harness.remote.count("throw_ball"), 1);
    }

    #[test]
    fn fled_and_errored_stop_throwing() {
        for (status, outcome) in [
            (CatchStatus::Fled, EngagementOutcome::Fled),
            (CatchStatus::Errored, EngagementOutcome::Errored),
        ] {
            let harness = Harness::new();
            harness.remote.push_throw(status);
            let mut bag = BallBag::default().with(BallTier::Poke, 5);
            let report = harness.run(&mut bag, &mut 0).expect("resolve");
            assert_eq!(report.outcome, outcome);
            assert_eq!(report.throws, 1);
        }
    }

    #[test]
    fn unavailable_encounter_throws_nothing() {
        let harness = Harness::new();
        harness.remote.push_encounter(EncounterResponse {
            status: EncounterStatus::NotAvailable,
            species: None,
            capture_probability: Vec::new(),
        });
        let mut bag = BallBag::default().with(BallTier::Poke, 5);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.outcome, EngagementOutcome::Unavailable);
        assert_eq!(bag.total(), 5);
        assert_eq!(harness.remote.count("throw_ball"), 0);
    }

    #[test]
    fn assist_used_on_low_hint_and_escalates_if_still_low() {
        let harness = Harness::new();
        harness.remote.push_encounter(encounter(vec![0.1, 0.3, 0.5, 1.0]));
        harness.remote.push_capture_item(CaptureItemResponse {
            success: true,
            multiplier: 1.5,
        });
        let mut bag = BallBag::default()
            .with(BallTier::Poke, 5)
            .with(BallTier::Great, 5);
        let mut assist = 2;
        let report = harness.run(&mut bag, &mut assist).expect("resolve");
        assert!(report.assist_used);
        assert_eq!(assist, 1);
        // 0.1 * 1.5 is still under 0.35, so the first throw is a great ball.
        assert_eq!(report.balls_used, vec![BallTier::Great]);
    }

    #[test]
    fn assist_that_lifts_hint_keeps_min_tier() {
        let harness = Harness::new();
        harness.remote.push_encounter(encounter(vec![0.3, 0.5, 0.7, 1.0]));
        let mut bag = BallBag::default()
            .with(BallTier::Poke, 5)
            .with(BallTier::Great, 5);
        let mut assist = 1;
        let report = harness.run(&mut bag, &mut assist).expect("resolve");
        assert!(report.assist_used);
        assert_eq!(report.balls_used, vec![BallTier::Poke]);
    }

    #[test]
    fn missing_hint_or_item_skips_assist() {
        let harness = Harness::new();
        harness.remote.push_encounter(encounter(Vec::new()));
        let mut bag = BallBag::default().with(BallTier::Poke, 5);
        let mut assist = 3;
        let report = harness.run(&mut bag, &mut assist).expect("resolve");
        assert!(!report.assist_used);
        assert_eq!(assist, 3);
        assert_eq!(harness.remote.count("use_capture_item"), 0);

        let harness = Harness::new();
        harness.remote.push_encounter(encounter(vec![0.1, 0.2, 0.3, 1.0]));
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert!(!report.assist_used);
        assert_eq!(report.balls_used, vec![BallTier::Poke]);
    }

    #[test]
    fn max_throws_abandons() {
        let mut harness = Harness::new();
        harness.capture.max_throws = 2;
        harness.capture.best_balls_first = true;
        for _ in 0..3 {
            harness.remote.push_throw(CatchStatus::Missed);
        }
        let mut bag = BallBag::default().with(BallTier::Poke, 10);
        let report = harness.run(&mut bag, &mut 0).expect("resolve");
        assert_eq!(report.outcome, EngagementOutcome::Abandoned);
        assert_eq!(report.throws, 2);
    }

    #[test]
    fn throw_timeout_is_not_retried() {
        let harness = Harness::new();
        harness.remote.fail_next("throw_ball", RemoteError::Timeout);
        let mut bag = BallBag::default().with(BallTier::Poke, 5);
        let err = harness.run(&mut bag, &mut 0).unwrap_err();
        assert_eq!(err, RemoteError::Timeout);
        assert_eq!(harness.remote.count("throw_ball"), 1);
    }
}
