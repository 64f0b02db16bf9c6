//! Capsule movement resolver: ground snap, collide-and-slide, auto-step and stance probes.
//!
//! The capsule is approximated by horizontal ray probes at a few fixed heights rather
//! than swept as a true shape. Every query goes through [`CollisionWorld`], so the
//! resolver never holds geometry between calls.
#![forbid(unsafe_code)]

use physics_rapier::{ColliderRef, CollisionWorld, RayQuery, SurfaceHit};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::Real;
use serde::{Deserialize, Serialize};
use tracing::trace;

const DIRECTION_EPS: Real = 1.0e-6;
/// Hits closer than this started inside geometry and carry no usable surface.
const INSIDE_HIT_EPS: Real = 1.0e-4;
/// Horizontal rays cast around the capsule when pushing it out of walls.
const RING_PROBES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementProfile {
    /// Capsule radius in meters.
    pub capsule_radius: Real,
    /// Full capsule height per stance, feet to crown.
    pub stand_height: Real,
    pub crouch_height: Real,
    pub prone_height: Real,
    /// Gap kept between a resolved capsule and any surface.
    pub skin_width: Real,
    /// Maximum ledge height climbed without a jump.
    pub step_height: Real,
    /// Horizontal depth of landable surface required beyond a ledge.
    pub step_min_depth: Real,
    /// Height above the feet the ground probe starts from.
    pub ground_probe_height: Real,
    /// Falling actors closer than this to the ground are clamped onto it.
    pub snap_threshold: Real,
    /// Downward acceleration while airborne (m/s^2).
    pub gravity: Real,
    pub max_slide_iterations: u32,
    /// Surfaces whose normal has at least this upward component are floors.
    pub floor_min_normal_y: Real,
    /// Height of the lowest and (from the crown) highest horizontal probe.
    pub foot_probe_offset: Real,
    /// Distance pushed off a wall after a blocking hit.
    pub wall_nudge: Real,
    /// Reach of the lean support probe beyond the capsule radius.
    pub wall_support_distance: Real,
    /// Height of the lean support probe as a fraction of capsule height.
    pub wall_support_height_ratio: Real,
    /// Travel or speed below this ends the slide loop.
    pub min_move_epsilon: Real,
}

impl Default for MovementProfile {
    fn default() -> Self {
        Self {
            capsule_radius: 0.4,
            stand_height: 1.8,
            crouch_height: 1.2,
            prone_height: 0.6,
            skin_width: 0.02,
            step_height: 0.45,
            step_min_depth: 0.1,
            ground_probe_height: 0.5,
            snap_threshold: 0.2,
            gravity: 9.81,
            max_slide_iterations: 4,
            floor_min_normal_y: 45.0_f32.to_radians().cos(),
            foot_probe_offset: 0.1,
            wall_nudge: 1.0e-3,
            wall_support_distance: 0.3,
            wall_support_height_ratio: 0.85,
            min_move_epsilon: 1.0e-4,
        }
    }
}

impl MovementProfile {
    pub fn height_for(&self, stance: Stance) -> Real {
        match stance {
            Stance::Standing => self.stand_height,
            Stance::Crouching => self.crouch_height,
            Stance::Prone => self.prone_height,
        }
    }

    pub fn capsule_for(&self, stance: Stance) -> Capsule {
        Capsule::new(self.capsule_radius, self.height_for(stance))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let lengths = [
            ("capsule_radius", self.capsule_radius),
            ("stand_height", self.stand_height),
            ("crouch_height", self.crouch_height),
            ("prone_height", self.prone_height),
        ];
        for (name, value) in lengths {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("{} must be > 0", name));
            }
        }
        let non_negative = [
            ("skin_width", self.skin_width),
            ("step_height", self.step_height),
            ("step_min_depth", self.step_min_depth),
            ("ground_probe_height", self.ground_probe_height),
            ("snap_threshold", self.snap_threshold),
            ("gravity", self.gravity),
            ("foot_probe_offset", self.foot_probe_offset),
            ("wall_nudge", self.wall_nudge),
            ("wall_support_distance", self.wall_support_distance),
            ("min_move_epsilon", self.min_move_epsilon),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("{} must be >= 0", name));
            }
        }
        if self.max_slide_iterations == 0 {
            errors.push("max_slide_iterations must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.floor_min_normal_y) {
            errors.push("floor_min_normal_y must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.wall_support_height_ratio) {
            errors.push("wall_support_height_ratio must be in [0, 1]".to_string());
        }
        if !(self.prone_height <= self.crouch_height && self.crouch_height <= self.stand_height) {
            errors.push("stance heights must satisfy prone <= crouch <= stand".to_string());
        }
        if self.step_height >= self.stand_height {
            errors.push("step_height must be below stand_height".to_string());
        }
        errors
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    #[default]
    Standing,
    Crouching,
    Prone,
}

impl Stance {
    pub fn is_lower_than(self, other: Stance) -> bool {
        self.rank() > other.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Stance::Standing => 0,
            Stance::Crouching => 1,
            Stance::Prone => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capsule {
    pub radius: Real,
    pub height: Real,
}

impl Capsule {
    /// Radius is clamped so the caps never exceed the height.
    pub fn new(radius: Real, height: Real) -> Self {
        let height = height.max(0.0);
        Self {
            radius: radius.max(0.0).min(height * 0.5),
            height,
        }
    }
}

/// Feet-anchored position and world velocity of one actor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KinematicState {
    pub position: Vector<Real>,
    pub velocity: Vector<Real>,
}

impl KinematicState {
    pub fn new(position: Vector<Real>) -> Self {
        Self {
            position,
            velocity: Vector::zeros(),
        }
    }

    fn is_finite(&self) -> bool {
        self.position.iter().all(|value| value.is_finite())
            && self.velocity.iter().all(|value| value.is_finite())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MoveContext {
    /// Compute head clearance toward standing height.
    pub crouching: bool,
    /// Camera forward used by the wall support probe.
    pub facing: Vector<Real>,
    /// The actor's own hit volume.
    pub exclude: Option<ColliderRef>,
}

impl Default for MoveContext {
    fn default() -> Self {
        Self {
            crouching: false,
            facing: Vector::zeros(),
            exclude: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MovementOutcome {
    pub grounded: bool,
    /// Pressed against a wall in the facing direction.
    pub supported: bool,
    /// Zero when standing up fits, otherwise the (negative) missing height.
    pub head_clearance_delta: Real,
    pub ground_normal: Option<Vector<Real>>,
    pub hit_wall: bool,
    pub wall_normal: Option<Vector<Real>>,
    pub hit_ceiling: bool,
    pub stepped: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MovementResolver {
    profile: MovementProfile,
}

impl MovementResolver {
    pub fn new(profile: MovementProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &MovementProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: MovementProfile) {
        self.profile = profile;
    }

    /// Advances `state` by one tick and reports contact flags.
    pub fn resolve<W: CollisionWorld + ?Sized>(
        &self,
        state: &mut KinematicState,
        capsule: &Capsule,
        dt: Real,
        world: &W,
        ctx: MoveContext,
    ) -> MovementOutcome {
        let mut outcome = MovementOutcome::default();
        if !(dt > 0.0) || !state.is_finite() {
            return outcome;
        }
        if !world.has_colliders() {
            state.velocity.y -= self.profile.gravity * dt;
            state.position += state.velocity * dt;
            return outcome;
        }
        let query = RayQuery::movement().excluding(ctx.exclude);
        self.vertical_pass(state, dt, world, &query, &mut outcome);
        self.horizontal_pass(state, capsule, dt, world, &query, &mut outcome);
        self.push_out_of_walls(state, capsule, world, &query, &mut outcome);
        self.ceiling_check(state, capsule, world, &query, &mut outcome);
        if ctx.crouching {
            outcome.head_clearance_delta = self.clearance(state.position, capsule, world, &query);
        }
        outcome.supported = self.wall_support(state.position, capsule, ctx.facing, world, &query);
        outcome
    }

    /// Room above `capsule` toward full standing height; negative when blocked.
    pub fn head_clearance<W: CollisionWorld + ?Sized>(
        &self,
        position: Vector<Real>,
        capsule: &Capsule,
        world: &W,
        exclude: Option<ColliderRef>,
    ) -> Real {
        let query = RayQuery::movement().excluding(exclude);
        self.clearance(position, capsule, world, &query)
    }

    fn vertical_pass<W: CollisionWorld + ?Sized>(
        &self,
        state: &mut KinematicState,
        dt: Real,
        world: &W,
        query: &RayQuery,
        outcome: &mut MovementOutcome,
    ) {
        let profile = &self.profile;
        let next_vy = state.velocity.y - profile.gravity * dt;
        let dy = next_vy * dt;
        if next_vy <= 0.0 {
            let origin = Point::from(state.position + Vector::y() * profile.ground_probe_height);
            let reach = profile.ground_probe_height + profile.snap_threshold + (-dy).max(0.0);
            if let Some(hit) = world.cast_ray(origin, -Vector::y(), reach, query) {
                let gap = hit.distance - profile.ground_probe_height;
                if hit.distance > INSIDE_HIT_EPS
                    && hit.normal.y >= profile.floor_min_normal_y
                    && gap + dy <= profile.snap_threshold
                {
                    state.position.y = hit.point.y;
                    state.velocity.y = 0.0;
                    outcome.grounded = true;
                    outcome.ground_normal = Some(hit.normal);
                    return;
                }
            }
        }
        state.velocity.y = next_vy;
        state.position.y += dy;
    }

    fn horizontal_pass<W: CollisionWorld + ?Sized>(
        &self,
        state: &mut KinematicState,
        capsule: &Capsule,
        dt: Real,
        world: &W,
        query: &RayQuery,
        outcome: &mut MovementOutcome,
    ) {
        let profile = &self.profile;
        let horizontal = Vector::new(state.velocity.x, 0.0, state.velocity.z);
        let mut remaining = horizontal.norm() * dt;
        if remaining <= profile.min_move_epsilon {
            return;
        }
        let mut direction = horizontal.normalize();

        for _ in 0..profile.max_slide_iterations {
            let reach = remaining + capsule.radius + profile.skin_width;
            let Some(hit) =
                self.nearest_probe_hit(state.position, direction, reach, capsule, world, query)
            else {
                state.position += direction * remaining;
                return;
            };
            let floor_like = hit.normal.y >= profile.floor_min_normal_y;
            let clearance = capsule.radius + profile.skin_width;
            // The probe measures along `direction`; walls need the gap along their normal.
            let along_ray = if floor_like {
                clearance
            } else {
                let flat = Vector::new(hit.normal.x, 0.0, hit.normal.z);
                let approach = -direction.dot(&flat) / flat.norm().max(DIRECTION_EPS);
                clearance / approach.max(1.0e-3)
            };
            let advance = (hit.distance - along_ray).max(0.0);
            if advance >= remaining {
                state.position += direction * remaining;
                return;
            }
            state.position += direction * advance;
            remaining -= advance;

            if !floor_like && outcome.grounded {
                if let Some(rise) = self.try_step(state.position, direction, capsule, world, query) {
                    state.position.y += rise;
                    outcome.stepped = true;
                    continue;
                }
            }

            if floor_like {
                let projected = direction - hit.normal * direction.dot(&hit.normal);
                if projected.norm_squared() <= DIRECTION_EPS {
                    return;
                }
                direction = projected.normalize();
                continue;
            }

            let wall_normal = Vector::new(hit.normal.x, 0.0, hit.normal.z);
            if wall_normal.norm_squared() <= DIRECTION_EPS {
                return;
            }
            let wall_normal = wall_normal.normalize();
            outcome.hit_wall = true;
            outcome.wall_normal = Some(wall_normal);
            state.position += wall_normal * profile.wall_nudge;
            let into = state.velocity.dot(&wall_normal);
            if into < 0.0 {
                state.velocity -= wall_normal * into;
            }
            let mut travel = direction * remaining;
            let into = travel.dot(&wall_normal);
            if into < 0.0 {
                travel -= wall_normal * into;
            }
            remaining = travel.norm();
            if remaining <= profile.min_move_epsilon
                || state.velocity.norm() <= profile.min_move_epsilon
            {
                return;
            }
            direction = travel / remaining;
        }
        trace!(remaining, "slide iteration cap reached");
    }

    /// Moves the capsule back out of any wall closer than `radius + skin_width`.
    /// Catches walls the travel probes miss on oblique approaches.
    fn push_out_of_walls<W: CollisionWorld + ?Sized>(
        &self,
        state: &mut KinematicState,
        capsule: &Capsule,
        world: &W,
        query: &RayQuery,
        outcome: &mut MovementOutcome,
    ) {
        let profile = &self.profile;
        let clearance = capsule.radius + profile.skin_width;
        let half_step: Real = std::f32::consts::PI / RING_PROBES as Real;
        let reach = clearance / half_step.cos() + profile.min_move_epsilon;

        for _ in 0..profile.max_slide_iterations {
            let mut deepest: Option<(Real, Vector<Real>)> = None;
            for offset in self.probe_offsets(capsule) {
                let origin = Point::from(state.position + Vector::y() * offset);
                for index in 0..RING_PROBES {
                    let angle = index as Real * 2.0 * half_step;
                    let ray = Vector::new(angle.cos(), 0.0, angle.sin());
                    let Some(hit) = world.cast_ray(origin, ray, reach, query) else {
                        continue;
                    };
                    if hit.distance <= INSIDE_HIT_EPS || hit.normal.y >= profile.floor_min_normal_y
                    {
                        continue;
                    }
                    let normal = Vector::new(hit.normal.x, 0.0, hit.normal.z);
                    if normal.norm_squared() <= DIRECTION_EPS {
                        continue;
                    }
                    let normal = normal.normalize();
                    let facing = -ray.dot(&normal);
                    if facing <= 0.0 {
                        continue;
                    }
                    let depth = clearance - hit.distance * facing;
                    if depth > profile.min_move_epsilon
                        && deepest.map_or(true, |(current, _)| depth > current)
                    {
                        deepest = Some((depth, normal));
                    }
                }
            }
            let Some((depth, normal)) = deepest else {
                return;
            };
            state.position += normal * depth;
            let into = state.velocity.dot(&normal);
            if into < 0.0 {
                state.velocity -= normal * into;
            }
            outcome.hit_wall = true;
            outcome.wall_normal = Some(normal);
        }
    }

    fn nearest_probe_hit<W: CollisionWorld + ?Sized>(
        &self,
        position: Vector<Real>,
        direction: Vector<Real>,
        reach: Real,
        capsule: &Capsule,
        world: &W,
        query: &RayQuery,
    ) -> Option<SurfaceHit> {
        self.probe_offsets(capsule)
            .into_iter()
            .filter_map(|offset| {
                let origin = Point::from(position + Vector::y() * offset);
                world.cast_ray(origin, direction, reach, query)
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn probe_offsets(&self, capsule: &Capsule) -> [Real; 3] {
        let mid = capsule.height * 0.5;
        let low = self.profile.foot_probe_offset.min(mid);
        let high = (capsule.height - self.profile.foot_probe_offset).max(mid);
        [low, mid, high]
    }

    fn try_step<W: CollisionWorld + ?Sized>(
        &self,
        position: Vector<Real>,
        direction: Vector<Real>,
        capsule: &Capsule,
        world: &W,
        query: &RayQuery,
    ) -> Option<Real> {
        let profile = &self.profile;
        if profile.step_height <= 0.0 {
            return None;
        }
        let flat = Vector::new(direction.x, 0.0, direction.z);
        if flat.norm_squared() <= DIRECTION_EPS {
            return None;
        }
        let flat = flat.normalize();

        let crown = Point::from(position + Vector::y() * (capsule.height - profile.skin_width));
        let headroom = profile.step_height + profile.skin_width * 2.0;
        if world.cast_ray(crown, Vector::y(), headroom, query).is_some() {
            return None;
        }

        let lookahead = capsule.radius + profile.skin_width + profile.step_min_depth;
        let drop_start = profile.step_height + profile.skin_width;
        let ahead = Point::from(position + flat * lookahead + Vector::y() * drop_start);
        let landing = world.cast_ray(ahead, -Vector::y(), drop_start, query)?;
        if landing.distance <= INSIDE_HIT_EPS || landing.normal.y < profile.floor_min_normal_y {
            return None;
        }
        let rise = landing.point.y - position.y;
        if rise <= profile.min_move_epsilon || rise > profile.step_height {
            return None;
        }

        let raised = Point::from(position + Vector::y() * (rise + profile.foot_probe_offset));
        if world
            .cast_ray(raised, flat, capsule.radius + profile.skin_width, query)
            .is_some()
        {
            return None;
        }
        Some(rise)
    }

    fn ceiling_check<W: CollisionWorld + ?Sized>(
        &self,
        state: &mut KinematicState,
        capsule: &Capsule,
        world: &W,
        query: &RayQuery,
        outcome: &mut MovementOutcome,
    ) {
        if state.velocity.y <= 0.0 {
            return;
        }
        let half = capsule.height * 0.5;
        let origin = Point::from(state.position + Vector::y() * half);
        let reach = half + self.profile.skin_width;
        if let Some(hit) = world.cast_ray(origin, Vector::y(), reach, query) {
            state.velocity.y = 0.0;
            outcome.hit_ceiling = true;
            let overlap = reach - hit.distance;
            if overlap > 0.0 {
                state.position.y -= overlap;
            }
        }
    }

    fn clearance<W: CollisionWorld + ?Sized>(
        &self,
        position: Vector<Real>,
        capsule: &Capsule,
        world: &W,
        query: &RayQuery,
    ) -> Real {
        let profile = &self.profile;
        let start = capsule.height * 0.5;
        let reach = (profile.stand_height - start).max(0.0) + profile.skin_width;
        let origin = Point::from(position + Vector::y() * start);
        match world.cast_ray(origin, Vector::y(), reach, query) {
            Some(hit) => (start + hit.distance - profile.skin_width - profile.stand_height).min(0.0),
            None => 0.0,
        }
    }

    fn wall_support<W: CollisionWorld + ?Sized>(
        &self,
        position: Vector<Real>,
        capsule: &Capsule,
        facing: Vector<Real>,
        world: &W,
        query: &RayQuery,
    ) -> bool {
        let flat = Vector::new(facing.x, 0.0, facing.z);
        if flat.norm_squared() <= DIRECTION_EPS {
            return false;
        }
        let height = capsule.height * self.profile.wall_support_height_ratio;
        let origin = Point::from(position + Vector::y() * height);
        let reach = capsule.radius + self.profile.wall_support_distance;
        world
            .cast_ray(origin, flat.normalize(), reach, query)
            .is_some_and(|hit| hit.normal.y < self.profile.floor_min_normal_y)
    }
}
