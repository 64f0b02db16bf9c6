//! Rapier-backed collision world and the ray query contract used by the simulation core.
#![forbid(unsafe_code)]

use rapier3d::prelude::*;

/// Lower bits of a collider's `user_data` carry its [`SurfaceKind`].
const SURFACE_KIND_MASK: u128 = 0xff;
const DEGENERATE_NORMAL_EPS: Real = 1.0e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Static or destructible level geometry.
    #[default]
    Solid,
    /// Simplified proxy for another character.
    HitVolume,
    /// Thrown object that detonates when intercepted by a shot.
    Detonable,
    /// Non-physical geometry (UI, markers, trigger volumes). Never returned by queries.
    Marker,
}

impl SurfaceKind {
    fn tag(self) -> u128 {
        match self {
            SurfaceKind::Solid => 0,
            SurfaceKind::HitVolume => 1,
            SurfaceKind::Detonable => 2,
            SurfaceKind::Marker => 3,
        }
    }

    fn from_user_data(data: u128) -> Self {
        match data & SURFACE_KIND_MASK {
            1 => SurfaceKind::HitVolume,
            2 => SurfaceKind::Detonable,
            3 => SurfaceKind::Marker,
            _ => SurfaceKind::Solid,
        }
    }

    fn bit(self) -> u8 {
        1 << self.tag()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceMask(u8);

impl SurfaceMask {
    pub const NONE: Self = Self(0);
    pub const SOLID: Self = Self(1 << 0);
    pub const HIT_VOLUME: Self = Self(1 << 1);
    pub const DETONABLE: Self = Self(1 << 2);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, kind: SurfaceKind) -> bool {
        // Markers are never solid, whatever the mask says.
        kind != SurfaceKind::Marker && self.0 & kind.bit() != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColliderRef(pub ColliderHandle);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceHit {
    pub point: Point<Real>,
    /// World-space unit normal facing the ray origin.
    pub normal: Vector<Real>,
    pub distance: Real,
    pub collider: ColliderRef,
    pub kind: SurfaceKind,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayQuery {
    pub mask: SurfaceMask,
    pub exclude: Option<ColliderRef>,
}

impl RayQuery {
    /// Level geometry plus other characters' proxies.
    pub fn movement() -> Self {
        Self {
            mask: SurfaceMask::SOLID.union(SurfaceMask::HIT_VOLUME),
            exclude: None,
        }
    }

    /// Everything a shot can stop on, including detonable throwables.
    pub fn ballistics() -> Self {
        Self {
            mask: SurfaceMask::SOLID
                .union(SurfaceMask::HIT_VOLUME)
                .union(SurfaceMask::DETONABLE),
            exclude: None,
        }
    }

    pub fn excluding(mut self, collider: Option<ColliderRef>) -> Self {
        self.exclude = collider;
        self
    }
}

/// Read-only geometry provider. Implementations are re-queried on every call,
/// so geometry added or removed between frames is picked up without invalidation.
pub trait CollisionWorld {
    fn cast_ray(
        &self,
        origin: Point<Real>,
        direction: Vector<Real>,
        max_distance: Real,
        query: &RayQuery,
    ) -> Option<SurfaceHit>;

    fn has_colliders(&self) -> bool;
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    pub fn new(gravity: Vector<Real>) -> Self {
        Self {
            gravity,
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    /// Integrates dynamic bodies (thrown detonables, ragdolls) and refreshes queries.
    pub fn step(&mut self, dt: Real) {
        if !(dt > 0.0) {
            return;
        }
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    /// Rebuilds the query acceleration structure after colliders were added, moved or removed.
    pub fn refresh_queries(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    pub fn insert_static_collider(&mut self, collider: Collider) -> ColliderRef {
        self.insert_surface(collider, SurfaceKind::Solid)
    }

    pub fn insert_surface(&mut self, mut collider: Collider, kind: SurfaceKind) -> ColliderRef {
        collider.user_data = (collider.user_data & !SURFACE_KIND_MASK) | kind.tag();
        if kind == SurfaceKind::Marker {
            collider.set_sensor(true);
        }
        ColliderRef(self.colliders.insert(collider))
    }

    /// Capsule proxy for a remote character, feet-anchored at `feet`.
    pub fn insert_hit_volume(
        &mut self,
        feet: Vector<Real>,
        radius: Real,
        height: Real,
    ) -> ColliderRef {
        let half_segment = ((height - 2.0 * radius) * 0.5).max(0.0);
        let collider = ColliderBuilder::capsule_y(half_segment, radius)
            .translation(feet + Vector::y() * (height * 0.5))
            .build();
        self.insert_surface(collider, SurfaceKind::HitVolume)
    }

    pub fn insert_detonable(&mut self, center: Vector<Real>, radius: Real) -> ColliderRef {
        let collider = ColliderBuilder::ball(radius).translation(center).build();
        self.insert_surface(collider, SurfaceKind::Detonable)
    }

    /// Detonable ball on a dynamic body; it falls under `gravity` as the world steps.
    pub fn insert_thrown_detonable(
        &mut self,
        center: Vector<Real>,
        radius: Real,
        velocity: Vector<Real>,
    ) -> ColliderRef {
        let body = RigidBodyBuilder::dynamic()
            .translation(center)
            .linvel(velocity)
            .build();
        let body = self.bodies.insert(body);
        let mut collider = ColliderBuilder::ball(radius).build();
        collider.user_data = SurfaceKind::Detonable.tag();
        ColliderRef(
            self.colliders
                .insert_with_parent(collider, body, &mut self.bodies),
        )
    }

    pub fn insert_marker(&mut self, collider: Collider) -> ColliderRef {
        self.insert_surface(collider, SurfaceKind::Marker)
    }

    pub fn set_collider_translation(
        &mut self,
        collider: ColliderRef,
        translation: Vector<Real>,
    ) -> bool {
        match self.colliders.get_mut(collider.0) {
            Some(entry) => {
                entry.set_translation(translation);
                true
            }
            None => false,
        }
    }

    pub fn remove_collider(&mut self, collider: ColliderRef) -> bool {
        self.colliders
            .remove(collider.0, &mut self.island_manager, &mut self.bodies, true)
            .is_some()
    }

    pub fn collider_translation(&self, collider: ColliderRef) -> Option<Vector<Real>> {
        self.colliders
            .get(collider.0)
            .map(|entry| *entry.translation())
    }

    pub fn surface_kind(&self, collider: ColliderRef) -> Option<SurfaceKind> {
        self.colliders
            .get(collider.0)
            .map(|entry| SurfaceKind::from_user_data(entry.user_data))
    }
}

impl CollisionWorld for PhysicsWorld {
    fn cast_ray(
        &self,
        origin: Point<Real>,
        direction: Vector<Real>,
        max_distance: Real,
        query: &RayQuery,
    ) -> Option<SurfaceHit> {
        if self.colliders.is_empty() || !(max_distance > 0.0) {
            return None;
        }
        let length = direction.norm();
        if !length.is_finite() || length <= DEGENERATE_NORMAL_EPS {
            return None;
        }
        let direction = direction / length;
        let mask = query.mask;
        let predicate = |_handle: ColliderHandle, collider: &Collider| -> bool {
            mask.contains(SurfaceKind::from_user_data(collider.user_data))
        };
        let mut filter = QueryFilter::default().exclude_sensors().predicate(&predicate);
        if let Some(exclude) = query.exclude {
            filter = filter.exclude_collider(exclude.0);
        }
        let ray = Ray::new(origin, direction);
        let (handle, intersection) = self.query_pipeline.cast_ray_and_get_normal(
            &self.bodies,
            &self.colliders,
            &ray,
            max_distance,
            true,
            filter,
        )?;
        let kind = self
            .colliders
            .get(handle)
            .map(|collider| SurfaceKind::from_user_data(collider.user_data))
            .unwrap_or_default();
        // Rays starting inside a solid report a zero normal; treat it as facing the ray.
        let normal = if intersection.normal.norm_squared() > DEGENERATE_NORMAL_EPS {
            intersection.normal.normalize()
        } else {
            -direction
        };
        Some(SurfaceHit {
            point: ray.point_at(intersection.time_of_impact),
            normal,
            distance: intersection.time_of_impact,
            collider: ColliderRef(handle),
            kind,
        })
    }

    fn has_colliders(&self) -> bool {
        !self.colliders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_floor(world: &mut PhysicsWorld) -> ColliderRef {
        let floor = ColliderBuilder::cuboid(5.0, 0.1, 5.0)
            .translation(vector![0.0, -0.1, 0.0])
            .build();
        world.insert_static_collider(floor)
    }

    #[test]
    fn ray_reports_floor_distance_and_normal() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        let floor = build_floor(&mut world);
        world.refresh_queries();

        let hit = world
            .cast_ray(point![0.0, 2.0, 0.0], -Vector::y(), 10.0, &RayQuery::movement())
            .expect("floor hit");
        assert!((hit.distance - 2.0).abs() < 1.0e-3);
        assert!(hit.normal.y > 0.99);
        assert_eq!(hit.collider, floor);
        assert_eq!(hit.kind, SurfaceKind::Solid);
    }

    #[test]
    fn markers_are_never_hit() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        build_floor(&mut world);
        let marker = ColliderBuilder::cuboid(1.0, 0.1, 1.0)
            .translation(vector![0.0, 1.0, 0.0])
            .build();
        world.insert_marker(marker);
        world.refresh_queries();

        let hit = world
            .cast_ray(point![0.0, 2.0, 0.0], -Vector::y(), 10.0, &RayQuery::ballistics())
            .expect("floor hit");
        assert!((hit.distance - 2.0).abs() < 1.0e-3);
    }

    #[test]
    fn mask_and_exclusion_filter_hit_volumes() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        let volume = world.insert_hit_volume(vector![0.0, 0.0, -3.0], 0.4, 1.8);
        let grenade = world.insert_detonable(vector![0.0, 1.0, -1.5], 0.1);
        world.refresh_queries();

        let origin = point![0.0, 1.0, 0.0];
        let forward = vector![0.0, 0.0, -1.0];
        let hit = world
            .cast_ray(origin, forward, 10.0, &RayQuery::ballistics())
            .expect("grenade hit");
        assert_eq!(hit.collider, grenade);
        assert_eq!(hit.kind, SurfaceKind::Detonable);

        let hit = world
            .cast_ray(origin, forward, 10.0, &RayQuery::movement())
            .expect("volume hit");
        assert_eq!(hit.collider, volume);

        let miss = world.cast_ray(
            origin,
            forward,
            10.0,
            &RayQuery::movement().excluding(Some(volume)),
        );
        assert!(miss.is_none());
    }

    #[test]
    fn removed_geometry_is_not_hit_after_refresh() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        let floor = build_floor(&mut world);
        world.refresh_queries();
        assert!(world.remove_collider(floor));
        world.refresh_queries();

        assert!(!world.has_colliders());
        let hit = world.cast_ray(point![0.0, 2.0, 0.0], -Vector::y(), 10.0, &RayQuery::movement());
        assert!(hit.is_none());
    }

    #[test]
    fn thrown_detonable_falls_as_the_world_steps() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        build_floor(&mut world);
        let grenade =
            world.insert_thrown_detonable(vector![0.0, 3.0, -4.0], 0.15, Vector::zeros());
        world.refresh_queries();

        let forward = vector![0.0, 0.0, -1.0];
        let hit = world
            .cast_ray(point![0.0, 3.0, 0.0], forward, 10.0, &RayQuery::ballistics())
            .expect("grenade at release height");
        assert_eq!(hit.collider, grenade);

        for _ in 0..30 {
            world.step(1.0 / 60.0);
        }
        let center = world.collider_translation(grenade).expect("grenade");
        assert!(center.y < 2.0 && center.y > 0.5, "center {:?}", center);
        assert!(world
            .cast_ray(point![0.0, 3.0, 0.0], forward, 10.0, &RayQuery::ballistics())
            .is_none());

        let hit = world
            .cast_ray(point![0.0, center.y, 0.0], forward, 10.0, &RayQuery::ballistics())
            .expect("grenade after falling");
        assert_eq!(hit.collider, grenade);
        assert_eq!(hit.kind, SurfaceKind::Detonable);
        assert_eq!(world.surface_kind(grenade), Some(SurfaceKind::Detonable));
    }

    #[test]
    fn degenerate_direction_is_a_miss() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        build_floor(&mut world);
        world.refresh_queries();
        let hit = world.cast_ray(point![0.0, 2.0, 0.0], Vector::zeros(), 10.0, &RayQuery::movement());
        assert!(hit.is_none());
    }
}
