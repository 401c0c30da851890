//! Headless Battle Runner
//!
//! Runs a deployment to completion and prints a JSON or text summary.
//! Without input files it fights a generated skirmish between two lines of
//! squads across a field with some woods and craters.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use fireteam::battle::{Battle, DeploymentRecord, Phase, WeaponCatalog};
use fireteam::battle::deployment::load_records;
use fireteam::core::types::{Side, Vec2};
use fireteam::core::{Result, SimulationConfig};
use fireteam::spatial::{GridTerrain, TerrainKind, TileCoord};

/// Headless Battle Runner - deterministic squad battles
#[derive(Parser, Debug)]
#[command(name = "battle_runner")]
#[command(about = "Run a squad battle to completion and print a summary")]
struct Args {
    /// Deployment records (JSON array); a generated skirmish when absent
    #[arg(long)]
    deployment: Option<PathBuf>,

    /// Weapon catalog (.json or .toml); the standard catalog when absent
    #[arg(long)]
    weapons: Option<PathBuf>,

    /// Simulation config (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Map as rows of terrain characters
    #[arg(long)]
    map: Option<PathBuf>,

    /// Generated map width in tiles
    #[arg(long, default_value_t = 200)]
    map_width: u32,

    /// Generated map height in tiles
    #[arg(long, default_value_t = 60)]
    map_height: u32,

    /// Tile edge length in metres
    #[arg(long, default_value_t = 1.0)]
    tile_size: f32,

    /// Squads per side in the generated skirmish
    #[arg(long, default_value_t = 3)]
    squads: u32,

    /// Maximum ticks to run
    #[arg(long, default_value_t = 36_000)]
    max_ticks: u64,

    /// Battle seed
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Output format: json or text
    #[arg(long, default_value = "json")]
    format: String,

    /// Write the message log here as JSON
    #[arg(long)]
    log_out: Option<PathBuf>,

    /// Rebuild the final state from the log and compare hashes
    #[arg(long)]
    verify_replay: bool,
}

#[derive(Serialize)]
struct BattleResult {
    outcome: String,
    ticks: u64,
    seed: u64,
    attackers_remaining: usize,
    defenders_remaining: usize,
    shots: usize,
    hits: usize,
    casualties: usize,
    messages: usize,
    state_hash: String,
    replay_verified: Option<bool>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(result) => {
            print_result(&result, &args.format);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "battle failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<BattleResult> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    config.max_ticks = config.max_ticks.min(args.max_ticks);

    let weapons = match &args.weapons {
        Some(path) => WeaponCatalog::load(path)?,
        None => WeaponCatalog::standard(),
    };

    let terrain = match &args.map {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            let rows: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            GridTerrain::from_rows(&rows, args.tile_size)?
        }
        None => skirmish_terrain(args.map_width, args.map_height, args.tile_size),
    };

    let records = match &args.deployment {
        Some(path) => load_records(path)?,
        None => skirmish_records(&terrain, args.squads),
    };

    let mut battle = Battle::new(&records, weapons, terrain, config, args.seed)?;
    battle.start()?;

    let mut shots = 0;
    let mut hits = 0;
    let mut casualties = 0;
    for report in battle.run_until_finished(args.max_ticks) {
        shots += report.shots;
        hits += report.hits;
        casualties += report.casualties.len();
    }

    let messages = battle.message_log().map_or(0, |log| log.len());
    if let (Some(path), Some(log)) = (&args.log_out, battle.message_log()) {
        std::fs::write(path, log.to_json()?)?;
        tracing::info!(path = %path.display(), messages, "message log written");
    }

    let replay_verified = args
        .verify_replay
        .then(|| battle.replay().state_hash() == battle.state_hash());

    let outcome = match battle.phase() {
        Phase::Ended(Some(Side::Attacker)) => "attacker_victory",
        Phase::Ended(Some(Side::Defender)) => "defender_victory",
        Phase::Ended(None) => "draw",
        Phase::Battle | Phase::Deployment => "undecided",
    };

    Ok(BattleResult {
        outcome: outcome.to_string(),
        ticks: battle.tick(),
        seed: battle.seed(),
        attackers_remaining: battle.world().active_count(Side::Attacker),
        defenders_remaining: battle.world().active_count(Side::Defender),
        shots,
        hits,
        casualties,
        messages,
        state_hash: format!("{:016x}", battle.state_hash()),
        replay_verified,
    })
}

fn print_result(result: &BattleResult, format: &str) {
    if format == "text" {
        println!("Outcome:    {}", result.outcome);
        println!("Ticks:      {}", result.ticks);
        println!(
            "Remaining:  {} attackers, {} defenders",
            result.attackers_remaining, result.defenders_remaining
        );
        println!(
            "Fire:       {} shots, {} hits, {} casualties",
            result.shots, result.hits, result.casualties
        );
        println!("State hash: {}", result.state_hash);
        if let Some(verified) = result.replay_verified {
            println!("Replay:     {}", if verified { "match" } else { "MISMATCH" });
        }
        return;
    }
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{}", json),
        Err(err) => tracing::error!(%err, "could not serialize result"),
    }
}

/// Open field with a wood line and a scatter of craters in no man's land
fn skirmish_terrain(width: u32, height: u32, tile_size: f32) -> GridTerrain {
    let mut terrain = GridTerrain::new(width, height, tile_size);
    let (w, h) = (width as i32, height as i32);
    let mid = w / 2;

    terrain.fill(
        TileCoord::new(mid - 3, h / 4),
        TileCoord::new(mid + 3, h / 4 + 6),
        TerrainKind::Woods,
    );
    terrain.fill(
        TileCoord::new(mid - 2, 3 * h / 4 - 6),
        TileCoord::new(mid + 2, 3 * h / 4),
        TerrainKind::Woods,
    );
    for i in 0..8 {
        let x = mid - 20 + i * 5;
        let y = h / 2 + if i % 2 == 0 { -4 } else { 4 };
        terrain.set(TileCoord::new(x, y), TerrainKind::Crater);
    }
    terrain.fill(TileCoord::new(0, h / 2), TileCoord::new(w - 1, h / 2), TerrainKind::Road);
    terrain
}

/// Lines of five-man squads facing each other across the map
fn skirmish_records(terrain: &GridTerrain, squads: u32) -> Vec<DeploymentRecord> {
    let extent = terrain.extent();
    let spacing = extent.y / (squads as f32 + 1.0);
    let mut records = Vec::new();

    for (side, x, heading, tag) in [
        (Side::Attacker, 8.0, 0.0, "a"),
        (Side::Defender, extent.x - 8.0, std::f32::consts::PI, "d"),
    ] {
        for squad in 0..squads {
            let number = squad + if side == Side::Attacker { 0 } else { squads };
            let anchor_y = spacing * (squad as f32 + 1.0);
            for member in 0..5u32 {
                let weapon = match member {
                    0 => "smg",
                    4 => "lmg",
                    _ => "rifle",
                };
                let mut record = DeploymentRecord::new(
                    format!("{}{}-{}", tag, squad, member),
                    side,
                    Vec2::new(x, anchor_y + member as f32 * 2.0 - 4.0),
                )
                .with_weapon(weapon, 3)
                .in_squad(number);
                record.heading = heading;
                records.push(record);
            }
        }
    }
    records
}
