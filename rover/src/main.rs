//! Location-based automation agent.
//!
//! Keeps its config, session snapshot and tick log under `.rover/` in the
//! working root. `rover simulate` drives the session loop against an
//! in-process simulated world.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use tracing::warn;

use rover::core::types::Millis;
use rover::exit_codes;
use rover::io::clock::{Clock, SystemClock, VirtualClock};
use rover::io::config::{AgentConfig, load_config};
use rover::io::init::{InitOptions, RoverPaths, init_rover};
use rover::io::remote::RemoteService;
use rover::io::session_store::load_session;
use rover::io::sim_world::SimulatedWorld;
use rover::io::tick_log::{TickSummary, read_ticks};
use rover::logging;
use rover::looping::{LoopOptions, LoopStop, run_loop};
use rover::tick::{Session, SessionState, session_rng};

#[derive(Parser)]
#[command(name = "rover", version, about = "Location-based automation agent")]
struct Cli {
    /// Working root containing `.rover/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Log progress at info level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.rover/` with a default config.
    Init {
        /// Reset an existing config to defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective config, the saved session and the last tick.
    Show,
    /// Run the session loop against the simulated world.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct SimulateArgs {
    /// Stop after this many tick attempts.
    #[arg(long)]
    ticks: Option<u64>,
    /// Override the config seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Sleep for real between ticks instead of advancing virtual time.
    #[arg(long)]
    realtime: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Show => cmd_show(&cli.root),
        Command::Simulate(args) => cmd_simulate(&cli.root, &args),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_rover(root, &InitOptions { force })?;
    println!("initialized {}", paths.rover_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_show(root: &Path) -> Result<i32> {
    let paths = RoverPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let rendered = toml::to_string_pretty(&config).context("serialize config")?;
    println!("# {}", paths.config_path.display());
    print!("{rendered}");

    match load_session(&paths.session_path)? {
        Some(snapshot) => {
            println!();
            println!("# {}", paths.session_path.display());
            println!("position = {}", snapshot.position);
            println!("heading_deg = {:.1}", snapshot.heading_deg);
            println!("ticks = {}", snapshot.ticks);
            println!("visited = {}", snapshot.visited.len());
            if let Some(until) = snapshot.softban_until {
                println!("softban_until = {until}");
            }
        }
        None => println!("\n# no saved session"),
    }

    let ticks = read_ticks(&paths.tick_log_path)?;
    if let Some(last) = ticks.last() {
        println!();
        println!("# {} ({} entries)", paths.tick_log_path.display(), ticks.len());
        println!("{}", tick_line(&last.summary));
    }
    Ok(exit_codes::OK)
}

fn cmd_simulate(root: &Path, args: &SimulateArgs) -> Result<i32> {
    let paths = RoverPaths::new(root);
    let mut config = load_config(&paths.config_path)?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if config.evolution.is_empty() {
        config.evolution = SimulatedWorld::<SystemClock>::evolution_rules();
    }
    config.validate()?;

    if args.realtime {
        simulate_with(&SystemClock, &paths, &config, args.ticks)
    } else {
        let clock = VirtualClock::new(chrono::Utc::now().timestamp_millis());
        simulate_with(&clock, &paths, &config, args.ticks)
    }
}

fn simulate_with<C: Clock>(
    clock: &C,
    paths: &RoverPaths,
    config: &AgentConfig,
    ticks: Option<u64>,
) -> Result<i32> {
    let snapshot = load_session(&paths.session_path)?;
    let state = SessionState::resume(snapshot, config, clock.now_ms());
    let mut rng = session_rng(config.seed);
    let world = SimulatedWorld::new(clock, rng.r#gen(), state.position);
    let cells = world.grid();
    world.authenticate().context("authenticate with simulated world")?;

    let started_at = clock.now_ms();
    let mut session = Session::new(&world, clock, &cells, config, state, rng);
    let mut remaining = ticks;
    let mut reauths = 0;
    loop {
        let outcome = run_loop(
            &mut session,
            paths,
            &LoopOptions {
                max_ticks: remaining,
            },
            || false,
            |summary| println!("{}", tick_line(summary)),
        );
        remaining = remaining.map(|max| max.saturating_sub(outcome.ticks_run + outcome.throttled));
        match outcome.stop {
            LoopStop::AuthExpired if reauths < config.max_reauth => {
                reauths += 1;
                warn!(attempt = reauths, "session expired; re-authenticating");
                world.authenticate().context("re-authenticate with simulated world")?;
            }
            LoopStop::AuthExpired => {
                eprintln!(
                    "rover simulate: session expired after {reauths} re-authentication attempts"
                );
                return Ok(exit_codes::AUTH_EXPIRED);
            }
            LoopStop::TickLimit | LoopStop::Stopped => break,
        }
    }

    let totals = session.state().totals;
    let elapsed_secs = (clock.now_ms() - started_at) / 1000;
    println!(
        "done: {elapsed_secs}s simulated, spins={} catches={} releases={} promotions={} recycled={} hatched={} xp={}",
        totals.spins,
        totals.catches,
        totals.releases,
        totals.promotions,
        totals.recycled,
        totals.eggs_hatched,
        totals.xp
    );
    Ok(exit_codes::OK)
}

fn tick_line(summary: &TickSummary) -> String {
    let position = summary
        .position
        .map_or_else(|| "-".to_string(), |pos| pos.to_string());
    let softban = if summary.softbanned { " softbanned" } else { "" };
    format!(
        "tick {} @{}: spins={} catches={} releases={} promotions={} recycled={} pos={position}{softban}",
        summary.tick,
        format_at(summary.at),
        summary.spins,
        summary.catches,
        summary.releases,
        summary.promotions,
        summary.recycled,
    )
}

fn format_at(at: Millis) -> String {
    chrono::DateTime::from_timestamp_millis(at)
        .map_or_else(|| at.to_string(), |dt| dt.format("%H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["rover", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["rover", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_simulate_with_globals_after_subcommand() {
        let cli = Cli::parse_from([
            "rover", "simulate", "--ticks", "20", "--seed", "7", "--root", "/tmp/x", "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.root, PathBuf::from("/tmp/x"));
        match cli.command {
            Command::Simulate(args) => assert_eq!(
                args,
                SimulateArgs {
                    ticks: Some(20),
                    seed: Some(7),
                    realtime: false,
                }
            ),
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn simulate_runs_bounded_ticks_in_temp_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_rover(temp.path(), &InitOptions { force: false }).expect("init");
        let args = SimulateArgs {
            ticks: Some(4),
            seed: Some(11),
            realtime: false,
        };

        let code = cmd_simulate(temp.path(), &args).expect("simulate");

        assert_eq!(code, exit_codes::OK);
        let paths = RoverPaths::new(temp.path());
        assert_eq!(read_ticks(&paths.tick_log_path).expect("ticks").len(), 4);
        let snapshot = load_session(&paths.session_path)
            .expect("load")
            .expect("snapshot");
        assert_eq!(snapshot.ticks, 4);
    }

    #[test]
    fn tick_line_marks_softban() {
        let line = tick_line(&TickSummary {
            tick: 3,
            softbanned: true,
            ..TickSummary::default()
        });
        assert!(line.starts_with("tick 3 @"));
        assert!(line.ends_with("pos=- softbanned"));
    }
}
