use std::path::{Path, PathBuf};

use ballistics::{BallisticsEngine, EngineSettings, FireRequest, ShotOutcome, ShotResult};
use character_collision::MovementProfile;
use clap::{Parser, Subcommand};
use physics_rapier::{ColliderRef, PhysicsWorld};
use player_camera::PlayerCamera;
use player_controller::{DirectInputAdapter, PlayerController, RawInput, SimpleMotor};
use rapier3d::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weapon_data::{WeaponCatalog, WeaponDataError};

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_IO: i32 = 10;
const EXIT_INVALID: i32 = 11;
const EXIT_UNKNOWN_WEAPON: i32 = 12;
const EXIT_SMOKE: i32 = 13;

#[derive(Parser)]
#[command(name = "tools", version, about = "FPS core tools CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a weapon catalog and movement profile.
    Validate(DataArgs),
    /// Fire one shot down a test lane and report where it lands.
    Range(RangeArgs),
    /// Run a scripted player through a small arena.
    Smoke(SmokeArgs),
}

#[derive(Parser)]
struct DataArgs {
    /// Weapon catalog TOML; the built-in catalog when omitted.
    #[arg(long, value_name = "PATH")]
    weapons: Option<PathBuf>,

    /// Movement profile TOML; defaults when omitted.
    #[arg(long, value_name = "PATH")]
    profile: Option<PathBuf>,
}

#[derive(Parser)]
struct RangeArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long)]
    weapon: String,

    /// Distance to a backstop wall; open lane when omitted.
    #[arg(long)]
    wall: Option<f32>,

    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[derive(Parser)]
struct SmokeArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, default_value_t = 240)]
    ticks: u32,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Validate(args) => run_validate(&args),
        Commands::Range(args) => run_range(&args),
        Commands::Smoke(args) => run_smoke(&args),
    };
    std::process::exit(exit_code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_validate(args: &DataArgs) -> i32 {
    let catalog = match load_catalog(args.weapons.as_deref()) {
        Ok(catalog) => catalog,
        Err(code) => return code,
    };
    let validation = catalog.validate();
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    let profile = match load_profile(args.profile.as_deref()) {
        Ok(profile) => profile,
        Err(code) => return code,
    };
    println!(
        "ok: {} weapons ({}), stand height {:.2} m",
        catalog.weapons.len(),
        catalog.ids().collect::<Vec<_>>().join(", "),
        profile.stand_height
    );
    EXIT_SUCCESS
}

fn run_range(args: &RangeArgs) -> i32 {
    if args.tick_rate == 0 {
        eprintln!("--tick-rate must be > 0");
        return EXIT_USAGE;
    }
    let catalog = match load_catalog(args.data.weapons.as_deref()) {
        Ok(catalog) => catalog,
        Err(code) => return code,
    };
    let Some(weapon) = catalog.get(&args.weapon) else {
        eprintln!(
            "unknown weapon '{}' (known: {})",
            args.weapon,
            catalog.ids().collect::<Vec<_>>().join(", ")
        );
        return EXIT_UNKNOWN_WEAPON;
    };

    let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
    if let Some(distance) = args.wall {
        if !distance.is_finite() || distance <= 0.0 {
            eprintln!("--wall must be > 0");
            return EXIT_USAGE;
        }
        build_backstop(&mut world, distance);
    }
    world.refresh_queries();

    let dt = 1.0 / args.tick_rate as f32;
    let mut engine = BallisticsEngine::with_seed(EngineSettings::default(), args.seed);
    let request = FireRequest {
        origin: point![0.0, 1.6, 0.0],
        direction: vector![0.0, 0.0, -1.0],
        config: weapon.ballistics,
        spread_angle: 0.0,
        exclude: None,
    };
    match engine.fire(&world, &request) {
        ShotOutcome::Hit(hit) | ShotOutcome::Detonated(hit) => {
            println!("instant hit at {:.2} m ({:?})", hit.distance, hit.point);
            return EXIT_SUCCESS;
        }
        ShotOutcome::Miss => {
            println!("miss: range ends inside the instant segment");
            return EXIT_SUCCESS;
        }
        ShotOutcome::Rejected => {
            eprintln!("shot rejected");
            return EXIT_INVALID;
        }
        ShotOutcome::InFlight(shot) => info!(shot = shot.0, "projectile in flight"),
    }

    let mut events = Vec::new();
    let mut ticks = 0u32;
    while engine.live_count() > 0 {
        let before = engine.projectiles().first().map(|projectile| {
            (projectile.distance_traveled, projectile.velocity.norm())
        });
        engine.update(&world, dt, &mut events);
        ticks += 1;
        if let Some((distance, speed)) = before {
            info!(tick = ticks, distance, speed, "projectile");
        }
    }
    match events.first().map(|event| event.result) {
        Some(ShotResult::Hit(hit)) | Some(ShotResult::Detonated(hit)) => {
            println!(
                "projectile hit at {:.2} m after {} ticks ({:.3} s)",
                hit.distance,
                ticks,
                ticks as f32 * dt
            );
        }
        None => println!("projectile expired after {} ticks without a hit", ticks),
    }
    EXIT_SUCCESS
}

fn run_smoke(args: &SmokeArgs) -> i32 {
    let catalog = match load_catalog(args.data.weapons.as_deref()) {
        Ok(catalog) => catalog,
        Err(code) => return code,
    };
    let profile = match load_profile(args.data.profile.as_deref()) {
        Ok(profile) => profile,
        Err(code) => return code,
    };

    let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
    let floor = ColliderBuilder::cuboid(30.0, 0.1, 30.0)
        .translation(vector![0.0, -0.1, 0.0])
        .build();
    world.insert_static_collider(floor);
    let ledge = ColliderBuilder::cuboid(2.0, 0.1, 1.0)
        .translation(vector![0.0, 0.1, -3.0])
        .build();
    world.insert_static_collider(ledge);
    let backstop = build_backstop(&mut world, 20.0);
    // Lobbed across the firing lane so bursts can intercept it mid-air.
    let grenade = world.insert_thrown_detonable(
        vector![-3.0, 2.5, -8.0],
        0.15,
        vector![3.0, 3.0, 0.0],
    );
    let body = world.insert_hit_volume(
        vector![0.0, 0.0, 0.0],
        profile.capsule_radius,
        profile.stand_height,
    );
    world.refresh_queries();

    let mut player = PlayerController::new(
        DirectInputAdapter,
        SimpleMotor::default(),
        profile,
        PlayerCamera::new(profile.stand_height - 0.12),
        vector![0.0, 0.5, 0.0],
    )
    .with_loadout(catalog.weapons.clone())
    .with_ballistics(BallisticsEngine::with_seed(EngineSettings::default(), args.seed));
    player.set_hit_volume(Some(body));
    if let Some(ammo) = player.ammo_mut() {
        for weapon in &catalog.weapons {
            ammo.add_reserve(&weapon.ammo.ammo_type, weapon.ammo.magazine_size * 2);
        }
    }

    let dt = 1.0 / 60.0;
    let mut shots = 0usize;
    let mut backstop_hits = 0usize;
    let mut detonations = 0usize;
    let mut frame = None;
    for tick in 0..args.ticks {
        let raw = scripted_input(tick, catalog.weapons.len());
        let result = player.tick(&world, raw, dt);
        let center = result.kinematics.position + vector![0.0, profile.stand_height * 0.5, 0.0];
        world.set_collider_translation(body, center);
        world.step(dt);
        world.refresh_queries();
        shots += result.shots.len();
        backstop_hits += result
            .shots
            .iter()
            .filter(|shot| matches!(shot, ShotOutcome::Hit(hit) if hit.collider == backstop))
            .count();
        backstop_hits += result
            .events
            .iter()
            .filter(|event| matches!(event.result, ShotResult::Hit(hit) if hit.collider == backstop))
            .count();
        detonations += result
            .shots
            .iter()
            .filter(|shot| matches!(shot, ShotOutcome::Detonated(hit) if hit.collider == grenade))
            .count();
        detonations += result
            .events
            .iter()
            .filter(|event| matches!(event.result, ShotResult::Detonated(hit) if hit.collider == grenade))
            .count();
        frame = Some(result);
    }

    let Some(frame) = frame else {
        println!("smoke ok (ticks=0)");
        return EXIT_SUCCESS;
    };
    let position = frame.kinematics.position;
    println!(
        "smoke: ticks={} position=({:.2}, {:.2}, {:.2}) grounded={} stance={:?} shots={} backstop_hits={} detonations={}",
        args.ticks,
        position.x,
        position.y,
        position.z,
        frame.movement.grounded,
        frame.stance,
        shots,
        backstop_hits,
        detonations
    );
    if let Some(ammo) = &frame.ammo {
        println!(
            "ammo: {} {}/{} reserve={} reload={:?} pump={:?}",
            ammo.weapon, ammo.current, ammo.max, ammo.reserve, ammo.reload_phase, ammo.pump_stage
        );
    }
    if !position.iter().all(|value| value.is_finite()) {
        eprintln!("smoke failed: non-finite position");
        return EXIT_SMOKE;
    }
    if args.ticks >= 120 && !frame.movement.grounded {
        eprintln!("smoke failed: player is not grounded");
        return EXIT_SMOKE;
    }
    EXIT_SUCCESS
}

/// Walk forward over the ledge, fire in bursts, then reload and cycle weapons.
fn scripted_input(tick: u32, weapon_count: usize) -> RawInput {
    let phase = tick % 120;
    RawInput {
        move_y: if phase < 60 { 1.0 } else { 0.0 },
        fire: (60..90).contains(&phase),
        reload: phase == 95,
        crouch: (100..110).contains(&phase),
        lean: if phase >= 110 { 1.0 } else { 0.0 },
        switch_to: (phase == 119 && weapon_count > 0)
            .then(|| (tick / 120 + 1) as usize % weapon_count),
        ..Default::default()
    }
}

fn build_backstop(world: &mut PhysicsWorld, distance: f32) -> ColliderRef {
    let wall = ColliderBuilder::cuboid(10.0, 10.0, 0.25)
        .translation(vector![0.0, 5.0, -distance - 0.25])
        .build();
    world.insert_static_collider(wall)
}

fn load_catalog(path: Option<&Path>) -> Result<WeaponCatalog, i32> {
    let result = match path {
        Some(path) => WeaponCatalog::load(path),
        None => WeaponCatalog::builtin(),
    };
    result.map_err(|err| {
        eprintln!("{}", err);
        match err {
            WeaponDataError::Io { .. } => EXIT_IO,
            WeaponDataError::Parse(_) | WeaponDataError::Invalid(_) => EXIT_INVALID,
        }
    })
}

fn load_profile(path: Option<&Path>) -> Result<MovementProfile, i32> {
    let Some(path) = path else {
        return Ok(MovementProfile::default());
    };
    let text = std::fs::read_to_string(path).map_err(|err| {
        eprintln!("failed to read {}: {}", path.display(), err);
        EXIT_IO
    })?;
    let profile: MovementProfile = toml::from_str(&text).map_err(|err| {
        eprintln!("failed to parse movement profile: {}", err);
        EXIT_INVALID
    })?;
    let errors = profile.validate();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("error: {}", error);
        }
        return Err(EXIT_INVALID);
    }
    if profile.gravity == 0.0 {
        warn!("movement profile disables gravity");
    }
    Ok(profile)
}
