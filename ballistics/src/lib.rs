//! Shot resolution: an instant hitscan segment, then simulated flight with drag,
//! gravity and range destabilization for whatever the segment did not resolve.
#![forbid(unsafe_code)]

use physics_rapier::{ColliderRef, CollisionWorld, RayQuery, SurfaceHit, SurfaceKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::Real;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const DIRECTION_EPS: Real = 1.0e-6;
const RANGE_EPS: Real = 1.0e-4;

/// Per-weapon flight data. Distances in meters, speeds in m/s.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BallisticsConfig {
    pub muzzle_velocity: Real,
    /// Length of the instant hitscan segment.
    pub segment_length: Real,
    /// Speed lost over one `segment_length` of travel.
    pub drag_per_segment: Real,
    /// Downward acceleration applied to simulated projectiles (m/s^2).
    pub gravity: Real,
    pub max_range: Real,
    #[serde(default)]
    pub destabilize_distance: Real,
    /// Magnitude of the per-tick lateral random walk past `destabilize_distance`.
    #[serde(default)]
    pub destabilize_amount: Real,
}

impl BallisticsConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let fields = [
            ("muzzle_velocity", self.muzzle_velocity),
            ("segment_length", self.segment_length),
            ("drag_per_segment", self.drag_per_segment),
            ("gravity", self.gravity),
            ("max_range", self.max_range),
            ("destabilize_distance", self.destabilize_distance),
            ("destabilize_amount", self.destabilize_amount),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                errors.push(format!("{} must be finite", name));
            } else if value < 0.0 {
                errors.push(format!("{} must be >= 0", name));
            }
        }
        if self.muzzle_velocity <= 0.0 {
            errors.push("muzzle_velocity must be > 0".to_string());
        }
        if self.segment_length <= 0.0 {
            errors.push("segment_length must be > 0".to_string());
        }
        if self.max_range < self.segment_length {
            errors.push("max_range must be >= segment_length".to_string());
        }
        errors
    }

    fn drag_per_meter(&self) -> Real {
        if self.segment_length > 0.0 {
            self.drag_per_segment / self.segment_length
        } else {
            0.0
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Projectiles below this height are discarded.
    pub floor_y: Real,
    /// Projectiles slower than this are discarded.
    pub min_speed: Real,
    /// Lower bound on the speed a projectile leaves the instant segment with.
    pub min_spawn_speed: Real,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            floor_y: -500.0,
            min_speed: 0.5,
            min_spawn_speed: 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShotId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShotHit {
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    /// Total path length from the muzzle, including the instant segment.
    pub distance: Real,
    pub collider: ColliderRef,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShotOutcome {
    Hit(ShotHit),
    /// The shot intercepted a detonable throwable.
    Detonated(ShotHit),
    /// Unresolved by the instant segment; results arrive as [`ShotEvent`]s.
    InFlight(ShotId),
    Miss,
    /// Degenerate aim or origin; nothing was cast.
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShotResult {
    Hit(ShotHit),
    Detonated(ShotHit),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShotEvent {
    pub shot: ShotId,
    pub result: ShotResult,
}

#[derive(Clone, Copy, Debug)]
pub struct FireRequest {
    pub origin: Point<Real>,
    pub direction: Vector<Real>,
    pub config: BallisticsConfig,
    /// Half-angle of the spread cone in radians.
    pub spread_angle: Real,
    /// Shooter's own hit volume.
    pub exclude: Option<ColliderRef>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlightParams {
    pub drag_per_meter: Real,
    pub gravity: Real,
    pub max_range: Real,
    pub destabilize_distance: Real,
    pub destabilize_amount: Real,
}

#[derive(Clone, Debug)]
pub struct Projectile {
    pub shot: ShotId,
    pub position: Point<Real>,
    pub velocity: Vector<Real>,
    pub distance_traveled: Real,
    pub params: FlightParams,
    exclude: Option<ColliderRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expiry {
    Range,
    OutOfBounds,
    Stalled,
}

enum Flight {
    Continue,
    Resolved(ShotResult),
    Expired(Expiry),
}

pub struct BallisticsEngine {
    settings: EngineSettings,
    projectiles: Vec<Projectile>,
    rng: StdRng,
    next_shot: u64,
}

impl BallisticsEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Reproducible spread and destabilization, for replays and tests.
    pub fn with_seed(settings: EngineSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: EngineSettings, rng: StdRng) -> Self {
        Self {
            settings,
            projectiles: Vec::new(),
            rng,
            next_shot: 0,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn live_count(&self) -> usize {
        self.projectiles.len()
    }

    pub fn clear(&mut self) {
        self.projectiles.clear();
    }

    pub fn fire<W: CollisionWorld + ?Sized>(
        &mut self,
        world: &W,
        request: &FireRequest,
    ) -> ShotOutcome {
        let Some(direction) = normalized(request.direction) else {
            return ShotOutcome::Rejected;
        };
        if !request.origin.coords.iter().all(|value| value.is_finite()) {
            return ShotOutcome::Rejected;
        }
        let config = &request.config;
        let direction = self.apply_spread(direction, request.spread_angle);
        let query = RayQuery::ballistics().excluding(request.exclude);
        let segment = config.segment_length.min(config.max_range);
        if let Some(hit) = world.cast_ray(request.origin, direction, segment, &query) {
            return match classify(hit, 0.0) {
                ShotResult::Hit(hit) => ShotOutcome::Hit(hit),
                ShotResult::Detonated(hit) => ShotOutcome::Detonated(hit),
            };
        }
        if config.max_range <= config.segment_length {
            return ShotOutcome::Miss;
        }

        let shot = ShotId(self.next_shot);
        self.next_shot += 1;
        let speed = (config.muzzle_velocity - config.drag_per_segment)
            .max(self.settings.min_spawn_speed);
        self.projectiles.push(Projectile {
            shot,
            position: request.origin + direction * config.segment_length,
            velocity: direction * speed,
            distance_traveled: config.segment_length,
            params: FlightParams {
                drag_per_meter: config.drag_per_meter(),
                gravity: config.gravity,
                max_range: config.max_range,
                destabilize_distance: config.destabilize_distance,
                destabilize_amount: config.destabilize_amount,
            },
            exclude: request.exclude,
        });
        debug!(shot = shot.0, speed, "projectile spawned");
        ShotOutcome::InFlight(shot)
    }

    /// Advances every live projectile by `dt`, pushing resolved shots onto `events`.
    pub fn update<W: CollisionWorld + ?Sized>(
        &mut self,
        world: &W,
        dt: Real,
        events: &mut Vec<ShotEvent>,
    ) {
        if !(dt > 0.0) || self.projectiles.is_empty() {
            return;
        }
        let settings = self.settings;
        let rng = &mut self.rng;
        self.projectiles.retain_mut(|projectile| {
            match advance(projectile, world, dt, &settings, rng) {
                Flight::Continue => true,
                Flight::Resolved(result) => {
                    events.push(ShotEvent {
                        shot: projectile.shot,
                        result,
                    });
                    false
                }
                Flight::Expired(reason) => {
                    trace!(
                        shot = projectile.shot.0,
                        distance = projectile.distance_traveled,
                        ?reason,
                        "projectile expired"
                    );
                    false
                }
            }
        });
    }

    fn apply_spread(&mut self, direction: Vector<Real>, spread_angle: Real) -> Vector<Real> {
        if !(spread_angle > 0.0) {
            return direction;
        }
        let (right, up) = orthonormal_basis(direction);
        let offset_right = (spread_angle * self.rng.gen_range(-1.0..=1.0)).tan();
        let offset_up = (spread_angle * self.rng.gen_range(-1.0..=1.0)).tan();
        normalized(direction + right * offset_right + up * offset_up).unwrap_or(direction)
    }
}

fn advance<W: CollisionWorld + ?Sized, R: Rng>(
    projectile: &mut Projectile,
    world: &W,
    dt: Real,
    settings: &EngineSettings,
    rng: &mut R,
) -> Flight {
    let params = projectile.params;
    projectile.velocity.y -= params.gravity * dt;
    if params.destabilize_amount > 0.0
        && projectile.distance_traveled > params.destabilize_distance
    {
        if let Some(heading) = normalized(projectile.velocity) {
            let (right, up) = orthonormal_basis(heading);
            let amount = params.destabilize_amount;
            projectile.velocity += right * (amount * rng.gen_range(-1.0..=1.0))
                + up * (amount * rng.gen_range(-1.0..=1.0));
        }
    }

    let displacement = projectile.velocity * dt;
    let Some(direction) = normalized(displacement) else {
        return Flight::Expired(Expiry::Stalled);
    };
    let remaining_range = (params.max_range - projectile.distance_traveled).max(0.0);
    let travel = displacement.norm().min(remaining_range);
    let query = RayQuery::ballistics().excluding(projectile.exclude);
    if let Some(hit) = world.cast_ray(projectile.position, direction, travel, &query) {
        return Flight::Resolved(classify(hit, projectile.distance_traveled));
    }

    projectile.position += direction * travel;
    projectile.distance_traveled += travel;
    let speed = projectile.velocity.norm();
    let slowed = (speed - params.drag_per_meter * travel).max(0.0);
    projectile.velocity = if speed > 0.0 {
        projectile.velocity * (slowed / speed)
    } else {
        Vector::zeros()
    };

    if projectile.distance_traveled >= params.max_range - RANGE_EPS {
        Flight::Expired(Expiry::Range)
    } else if projectile.position.y < settings.floor_y {
        Flight::Expired(Expiry::OutOfBounds)
    } else if slowed <= settings.min_speed {
        Flight::Expired(Expiry::Stalled)
    } else {
        Flight::Continue
    }
}

fn classify(hit: SurfaceHit, distance_offset: Real) -> ShotResult {
    let shot_hit = ShotHit {
        point: hit.point,
        normal: hit.normal,
        distance: distance_offset + hit.distance,
        collider: hit.collider,
    };
    match hit.kind {
        SurfaceKind::Detonable => ShotResult::Detonated(shot_hit),
        _ => ShotResult::Hit(shot_hit),
    }
}

fn normalized(vector: Vector<Real>) -> Option<Vector<Real>> {
    if !vector.iter().all(|value| value.is_finite()) {
        return None;
    }
    vector.try_normalize(DIRECTION_EPS)
}

/// Two unit vectors orthogonal to `direction` and to each other.
fn orthonormal_basis(direction: Vector<Real>) -> (Vector<Real>, Vector<Real>) {
    let helper = if direction.y.abs() < 0.99 {
        Vector::y()
    } else {
        Vector::x()
    };
    let right = direction.cross(&helper).normalize();
    let up = right.cross(&direction);
    (right, up)
}
