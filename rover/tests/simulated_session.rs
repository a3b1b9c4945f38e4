//! Loop-level tests against the simulated world.
//!
//! These drive `run_loop` for a bounded number of ticks on virtual time and
//! check what lands in `.rover/`: the snapshot, the tick log, and a resumed
//! session picking up where the last one stopped.

use rand::SeedableRng;
use rand::rngs::StdRng;

use rover::core::geo::distance_m;
use rover::core::types::Millis;
use rover::io::clock::{Clock, VirtualClock};
use rover::io::config::AgentConfig;
use rover::io::remote::RemoteService;
use rover::io::session_store::load_session;
use rover::io::sim_world::SimulatedWorld;
use rover::io::tick_log::read_ticks;
use rover::looping::{LoopOptions, LoopStop, run_loop};
use rover::test_support::temp_root;
use rover::tick::{Session, SessionState};

const START: Millis = 1_700_000_000_000;

fn config() -> AgentConfig {
    AgentConfig {
        seed: Some(42),
        evolution: SimulatedWorld::<VirtualClock>::evolution_rules(),
        ..AgentConfig::default()
    }
}

/// Two minutes of walking: every tick is logged, the snapshot matches the
/// final state, and the agent gets something done along the way.
#[test]
fn bounded_run_persists_snapshot_and_tick_log() {
    let (_temp, paths) = temp_root();
    let cfg = config();
    let clock = VirtualClock::new(START);
    let world = SimulatedWorld::new(&clock, 7, cfg.location);
    let cells = world.grid();
    world.authenticate().expect("authenticate");
    let state = SessionState::new(&cfg, clock.now_ms());
    let mut session = Session::new(&world, &clock, &cells, &cfg, state, StdRng::seed_from_u64(42));

    let outcome = run_loop(
        &mut session,
        &paths,
        &LoopOptions {
            max_ticks: Some(120),
        },
        || false,
        |_| {},
    );

    assert_eq!(outcome.stop, LoopStop::TickLimit);
    assert_eq!(outcome.ticks_run, 120);
    assert_eq!(outcome.throttled, 0);

    let ticks = read_ticks(&paths.tick_log_path).expect("read ticks");
    assert_eq!(ticks.len(), 120);
    let numbers: Vec<u64> = ticks.iter().map(|entry| entry.summary.tick).collect();
    assert_eq!(numbers, (1..=120).collect::<Vec<_>>());

    let snapshot = load_session(&paths.session_path)
        .expect("load session")
        .expect("snapshot written");
    assert_eq!(snapshot.ticks, 120);
    let position = session.state().position;
    assert!(distance_m(&snapshot.position, &position) < 0.01);
    assert_eq!(position, world.player_position());
    assert!(distance_m(&position, &cfg.location) > 0.0);
    let totals = session.state().totals;
    assert!(totals.spins + totals.catches > 0);
}

/// An expired remote session stops the loop; after re-authenticating the
/// same session continues counting ticks.
#[test]
fn auth_expiry_stops_loop_until_reauthenticated() {
    let (_temp, paths) = temp_root();
    let cfg = config();
    let clock = VirtualClock::new(START);
    let world = SimulatedWorld::new(&clock, 9, cfg.location);
    let cells = world.grid();
    world.authenticate().expect("authenticate");
    let state = SessionState::new(&cfg, clock.now_ms());
    let mut session = Session::new(&world, &clock, &cells, &cfg, state, StdRng::seed_from_u64(1));

    let first = run_loop(
        &mut session,
        &paths,
        &LoopOptions { max_ticks: Some(3) },
        || false,
        |_| {},
    );
    assert_eq!(first.ticks_run, 3);

    world.expire_session();
    let expired = run_loop(&mut session, &paths, &LoopOptions::default(), || false, |_| {});
    assert_eq!(expired.stop, LoopStop::AuthExpired);
    assert_eq!(expired.ticks_run, 0);

    world.authenticate().expect("re-authenticate");
    let resumed = run_loop(
        &mut session,
        &paths,
        &LoopOptions { max_ticks: Some(2) },
        || false,
        |_| {},
    );
    assert_eq!(resumed.ticks_run, 2);
    assert_eq!(session.state().ticks, 5);
    assert_eq!(read_ticks(&paths.tick_log_path).expect("ticks").len(), 5);
}

/// A second process resumes position, visits and the tick count from disk.
#[test]
fn resumed_session_continues_from_snapshot() {
    let (_temp, paths) = temp_root();
    let cfg = config();
    let clock = VirtualClock::new(START);
    let cells;
    {
        let world = SimulatedWorld::new(&clock, 5, cfg.location);
        cells = world.grid();
        world.authenticate().expect("authenticate");
        let state = SessionState::new(&cfg, clock.now_ms());
        let mut session =
            Session::new(&world, &clock, &cells, &cfg, state, StdRng::seed_from_u64(5));
        run_loop(
            &mut session,
            &paths,
            &LoopOptions {
                max_ticks: Some(60),
            },
            || false,
            |_| {},
        );
    }

    let snapshot = load_session(&paths.session_path)
        .expect("load")
        .expect("snapshot");
    let visited = snapshot.visited.len();
    let position = snapshot.position;
    let state = SessionState::resume(Some(snapshot), &cfg, clock.now_ms());
    assert_eq!(state.position, position);
    assert_eq!(state.ticks, 60);
    assert_eq!(state.visited.len(), visited);
    assert_eq!(state.store.stop_count(), 0);

    let world = SimulatedWorld::new(&clock, 5, state.position);
    world.authenticate().expect("authenticate");
    let mut session = Session::new(&world, &clock, &cells, &cfg, state, StdRng::seed_from_u64(6));
    let outcome = run_loop(
        &mut session,
        &paths,
        &LoopOptions { max_ticks: Some(1) },
        || false,
        |summary| assert_eq!(summary.tick, 61),
    );
    assert_eq!(outcome.ticks_run, 1);
    assert_eq!(
        load_session(&paths.session_path)
            .expect("load")
            .expect("snapshot")
            .ticks,
        61
    );
}
