use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use meta_controller::config::{load_config, render_toml, ControllerProfile};
use meta_controller::engine::{all_states, MetaController, ParetoEvolver};
use meta_controller::safety::{Policy, PolicyAction};
use meta_controller::types::FeatureObservation;

#[derive(Parser)]
#[command(name = "metactl")]
#[command(version = "0.1.0")]
#[command(about = "Online meta-controller for trading strategy selection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML, optional)
    #[arg(short, long)]
    config: Option<String>,

    /// Preset to start from: conservative, balanced, exploratory
    #[arg(short, long, default_value = "balanced")]
    profile: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller over a synthetic stream with a regime shift
    Simulate {
        /// Number of ticks
        #[arg(short, long, default_value = "1000")]
        ticks: usize,
        /// Tick at which the target level and strategy payoffs change
        #[arg(long, default_value = "500")]
        shift_at: usize,
        /// Random seed for the synthetic stream
        #[arg(long, default_value = "7")]
        seed: u64,
        /// Write the final controller snapshot as JSON to this path
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
    /// List the built-in presets
    Profiles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    if cli.json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let profile = ControllerProfile::from_name(&cli.profile)
        .ok_or_else(|| anyhow!("unknown profile '{}'", cli.profile))?;

    match cli.command {
        Commands::Simulate { ticks, shift_at, seed, snapshot } => {
            let config = load_config(cli.config.as_deref(), profile)?;
            run_simulation(config, ticks, shift_at, seed, snapshot.as_deref())?;
        }
        Commands::ShowConfig => {
            let config = load_config(cli.config.as_deref(), profile)?;
            println!("{}", render_toml(&config)?);
        }
        Commands::Profiles => {
            for profile in ControllerProfile::all() {
                println!("{:<14} {}", profile.name(), profile.description());
            }
        }
    }

    Ok(())
}

/// Mean payoff of each synthetic strategy before and after the shift
fn payoff(strategy_index: usize, shifted: bool) -> f64 {
    const BEFORE: [f64; 4] = [0.6, 0.2, -0.1, 0.1];
    const AFTER: [f64; 4] = [-0.2, 0.1, 0.5, 0.2];
    let table = if shifted { AFTER } else { BEFORE };
    table.get(strategy_index).copied().unwrap_or(0.0)
}

fn run_simulation(
    config: meta_controller::ControllerConfig,
    ticks: usize,
    shift_at: usize,
    seed: u64,
    snapshot_path: Option<&str>,
) -> Result<()> {
    info!("Simulating {} ticks (shift at {}, seed {})", ticks, shift_at, seed);

    let strategies = config.strategies.clone();
    let mut controller = MetaController::with_parts(
        config.clone(),
        Policy::uniform(
            &all_states(config.meta.confidence_buckets),
            &strategies[0],
            1.0 / strategies.len() as f64,
        ),
        Box::new(ParetoEvolver::default()),
    )?;

    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| anyhow!("invalid simulation start time"))?;

    let mut regime_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_reward = 0.0;
    let mut flagged = 0usize;

    for tick in 0..ticks {
        let shifted = tick >= shift_at;
        let level = if shifted { 2.0 } else { 0.0 };

        let mut features = BTreeMap::new();
        for j in 0..6 {
            features.insert(format!("f{}", j), rng.gen_range(-1.0..1.0));
        }
        let signal = features.get("f0").copied().unwrap_or(0.0);
        let target = level + 0.8 * signal + rng.gen_range(-0.1..0.1);
        let observation = FeatureObservation::new(features, target)
            .with_timestamp(start + Duration::minutes(tick as i64));

        let decision = controller.make_decision(&observation, None)?;
        if !decision.safety_flags.is_clear() {
            flagged += 1;
        }
        *regime_counts.entry(decision.regime.to_string()).or_default() += 1;

        // Settlement: a noisy payoff for whichever strategy was chosen
        let index = strategies
            .iter()
            .position(|s| *s == decision.selected_strategy)
            .unwrap_or(usize::MAX);
        let reward = payoff(index, shifted) + rng.gen_range(-0.3..0.3);
        total_reward += reward;
        controller.update_strategy_performance(&decision.selected_strategy, reward)?;

        // Propose a policy favoring the current best arm halfway to the shift
        if tick + 1 == shift_at / 2 {
            if let Some(best) = controller
                .stats()
                .arms
                .iter()
                .max_by(|a, b| a.average_reward.total_cmp(&b.average_reward))
            {
                let base_probability = 1.0 / strategies.len() as f64;
                let mut candidate = controller.baseline_policy().clone();
                for state in all_states(config.meta.confidence_buckets) {
                    candidate = candidate.with_action(
                        &state,
                        PolicyAction::new(&best.id, (base_probability + 0.2).min(1.0))
                            .with_expected_value(best.average_reward),
                    );
                }
                info!("Submitting candidate policy favoring '{}'", best.id);
                controller.submit_policy_candidate(candidate);
            }
        }

        if tick % 100 == 0 {
            info!("Tick {}: {}", tick, decision.rationale);
        }
    }

    let stats = controller.stats();
    info!("Simulation finished: total reward {:.2}, {} flagged decisions", total_reward, flagged);
    for arm in &stats.arms {
        info!(
            "  {:<16} pulls={:<5} avg reward={:+.3}",
            arm.id, arm.pull_count, arm.average_reward
        );
    }
    for (regime, count) in &regime_counts {
        info!("  regime {:<10} {} ticks", regime, count);
    }
    match controller.last_safety_assessment() {
        Some(assessment) => info!(
            "  last safety assessment: {:?}, margin {:.3}, improvement {:+.4}",
            assessment.status, assessment.safety_margin, assessment.performance_improvement
        ),
        None => warn!("  no safety assessment ran"),
    }

    if let Some(path) = snapshot_path {
        let json = controller.export_state().to_json()?;
        std::fs::write(path, json).with_context(|| format!("failed to write snapshot to {}", path))?;
        info!("Snapshot written to {}", path);
    }

    Ok(())
}
