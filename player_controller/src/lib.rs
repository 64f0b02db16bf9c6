//! Player controller composition (input + motor + movement + camera + weapons).
#![forbid(unsafe_code)]

use ballistics::{BallisticsEngine, EngineSettings, FireRequest, ShotEvent, ShotOutcome};
use character_collision::{
    KinematicState, MoveContext, MovementOutcome, MovementProfile, MovementResolver, Stance,
};
use physics_rapier::{ColliderRef, CollisionWorld};
use player_camera::{CameraPose, PlayerCamera};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::Real;
use tracing::debug;
use weapon_ammo::{AmmoStateMachine, AmmoStatus, PumpStage};
use weapon_data::WeaponDef;

const STANCE_FIT_EPS: Real = 1.0e-3;

#[derive(Clone, Copy, Debug, Default)]
pub struct RawInput {
    pub move_x: Real,
    pub move_y: Real,
    pub jump: bool,
    pub look_delta: [Real; 2],
    pub fire: bool,
    pub reload: bool,
    pub pump: bool,
    pub crouch: bool,
    pub prone: bool,
    /// -1 leans left, 1 leans right.
    pub lean: Real,
    /// Loadout slot to switch to.
    pub switch_to: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InputIntent {
    pub move_axis: [Real; 2],
    pub jump: bool,
    pub look_delta: [Real; 2],
    pub fire: bool,
    pub reload: bool,
    pub pump: bool,
    pub stance: Stance,
    pub lean: Real,
    pub switch_to: Option<usize>,
}

pub trait InputAdapter {
    fn intent(&mut self, raw: RawInput) -> InputIntent;
}

/// Hold-to-crouch and hold-to-prone; prone wins when both are held.
#[derive(Default)]
pub struct DirectInputAdapter;

impl DirectInputAdapter {
    fn normalize_axis(axis: [Real; 2]) -> [Real; 2] {
        let len = (axis[0] * axis[0] + axis[1] * axis[1]).sqrt();
        if len > 1.0 {
            [axis[0] / len, axis[1] / len]
        } else {
            axis
        }
    }
}

impl InputAdapter for DirectInputAdapter {
    fn intent(&mut self, raw: RawInput) -> InputIntent {
        let stance = if raw.prone {
            Stance::Prone
        } else if raw.crouch {
            Stance::Crouching
        } else {
            Stance::Standing
        };
        let lean = if raw.lean.is_finite() {
            raw.lean.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        InputIntent {
            move_axis: Self::normalize_axis([raw.move_x, raw.move_y]),
            jump: raw.jump,
            look_delta: raw.look_delta,
            fire: raw.fire,
            reload: raw.reload,
            pump: raw.pump,
            stance,
            lean,
            switch_to: raw.switch_to,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MotorContext {
    pub dt: Real,
    pub yaw: Real,
    pub stance: Stance,
    pub grounded: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct MotorOutput {
    pub next_velocity: Vector<Real>,
    pub jumped: bool,
}

pub trait Motor {
    fn step(
        &mut self,
        input: &InputIntent,
        state: &KinematicState,
        ctx: MotorContext,
    ) -> MotorOutput;
}

#[derive(Clone, Copy, Debug)]
pub struct SimpleMotor {
    pub move_speed: Real,
    pub crouch_speed_scale: Real,
    pub prone_speed_scale: Real,
    pub jump_speed: Real,
}

impl Default for SimpleMotor {
    fn default() -> Self {
        Self {
            move_speed: 4.0,
            crouch_speed_scale: 0.5,
            prone_speed_scale: 0.25,
            jump_speed: 4.5,
        }
    }
}

impl Motor for SimpleMotor {
    fn step(
        &mut self,
        input: &InputIntent,
        state: &KinematicState,
        ctx: MotorContext,
    ) -> MotorOutput {
        let yaw = ctx.yaw;
        let forward = Vector::new(yaw.sin(), 0.0, -yaw.cos());
        let right = Vector::new(yaw.cos(), 0.0, yaw.sin());
        let wish = right * input.move_axis[0] + forward * input.move_axis[1];
        let wish = if wish.norm_squared() > 0.0 {
            wish.normalize()
        } else {
            wish
        };
        let scale = match ctx.stance {
            Stance::Standing => 1.0,
            Stance::Crouching => self.crouch_speed_scale,
            Stance::Prone => self.prone_speed_scale,
        };
        let mut next_velocity = wish * (self.move_speed * scale);
        let jumped = input.jump && ctx.grounded && ctx.stance == Stance::Standing;
        next_velocity.y = if jumped {
            self.jump_speed
        } else {
            state.velocity.y
        };
        MotorOutput {
            next_velocity,
            jumped,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerSettings {
    /// Cycle a pump action automatically once the trigger is released.
    pub auto_pump: bool,
    pub lean_distance: Real,
    /// Lean fraction available when not braced against a wall.
    pub unsupported_lean_scale: Real,
    /// Eye distance below the top of the capsule.
    pub eye_offset: Real,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            auto_pump: true,
            lean_distance: 0.35,
            unsupported_lean_scale: 0.5,
            eye_offset: 0.12,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlayerFrame {
    pub kinematics: KinematicState,
    pub stance: Stance,
    pub movement: MovementOutcome,
    pub camera: CameraPose,
    /// Outcome of every pellet fired this frame.
    pub shots: Vec<ShotOutcome>,
    /// Projectiles from earlier frames resolved this frame.
    pub events: Vec<ShotEvent>,
    pub ammo: Option<AmmoStatus>,
}

struct Armory {
    weapons: Vec<WeaponDef>,
    active: usize,
    ammo: AmmoStateMachine,
    cooldown: Real,
}

pub struct PlayerController<A: InputAdapter, M: Motor> {
    input: A,
    motor: M,
    resolver: MovementResolver,
    camera: PlayerCamera,
    state: KinematicState,
    stance: Stance,
    grounded: bool,
    settings: ControllerSettings,
    armory: Option<Armory>,
    ballistics: BallisticsEngine,
    hit_volume: Option<ColliderRef>,
}

impl<A: InputAdapter, M: Motor> PlayerController<A, M> {
    pub fn new(
        input: A,
        motor: M,
        profile: MovementProfile,
        camera: PlayerCamera,
        position: Vector<Real>,
    ) -> Self {
        Self {
            input,
            motor,
            resolver: MovementResolver::new(profile),
            camera,
            state: KinematicState::new(position),
            stance: Stance::Standing,
            grounded: false,
            settings: ControllerSettings::default(),
            armory: None,
            ballistics: BallisticsEngine::new(EngineSettings::default()),
            hit_volume: None,
        }
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the engine, e.g. with a seeded one.
    pub fn with_ballistics(mut self, engine: BallisticsEngine) -> Self {
        self.ballistics = engine;
        self
    }

    /// Arms the player; the first weapon is equipped. An empty loadout disarms.
    pub fn with_loadout(mut self, weapons: Vec<WeaponDef>) -> Self {
        self.armory = weapons
            .first()
            .map(|first| AmmoStateMachine::new(first.ammo.clone()))
            .map(|ammo| Armory {
                weapons,
                active: 0,
                ammo,
                cooldown: 0.0,
            });
        self
    }

    pub fn set_hit_volume(&mut self, hit_volume: Option<ColliderRef>) {
        self.hit_volume = hit_volume;
    }

    pub fn state(&self) -> &KinematicState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut KinematicState {
        &mut self.state
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn resolver(&self) -> &MovementResolver {
        &self.resolver
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn motor_mut(&mut self) -> &mut M {
        &mut self.motor
    }

    pub fn camera(&self) -> &PlayerCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut PlayerCamera {
        &mut self.camera
    }

    pub fn ballistics(&self) -> &BallisticsEngine {
        &self.ballistics
    }

    pub fn ammo(&self) -> Option<&AmmoStateMachine> {
        self.armory.as_ref().map(|armory| &armory.ammo)
    }

    /// Mutable access for pickups (`add_reserve`).
    pub fn ammo_mut(&mut self) -> Option<&mut AmmoStateMachine> {
        self.armory.as_mut().map(|armory| &mut armory.ammo)
    }

    pub fn active_weapon(&self) -> Option<&WeaponDef> {
        self.armory
            .as_ref()
            .and_then(|armory| armory.weapons.get(armory.active))
    }

    pub fn tick<W: CollisionWorld + ?Sized>(
        &mut self,
        world: &W,
        raw: RawInput,
        dt: Real,
    ) -> PlayerFrame {
        let intent = self.input.intent(raw);
        self.camera.apply_look_delta(intent.look_delta);
        if let Some(slot) = intent.switch_to {
            self.switch_weapon(slot);
        }
        self.update_stance(world, intent.stance);

        let motor_output = self.motor.step(
            &intent,
            &self.state,
            MotorContext {
                dt,
                yaw: self.camera.yaw(),
                stance: self.stance,
                grounded: self.grounded,
            },
        );
        self.state.velocity = motor_output.next_velocity;
        let yaw = self.camera.yaw();
        let capsule = self.resolver.profile().capsule_for(self.stance);
        let movement = self.resolver.resolve(
            &mut self.state,
            &capsule,
            dt,
            world,
            MoveContext {
                crouching: self.stance != Stance::Standing,
                facing: Vector::new(yaw.sin(), 0.0, -yaw.cos()),
                exclude: self.hit_volume,
            },
        );
        self.grounded = movement.grounded;

        let lean_scale = if movement.supported {
            1.0
        } else {
            self.settings.unsupported_lean_scale
        };
        let lean = intent.lean * self.settings.lean_distance * lean_scale;
        self.camera
            .set_target_eye_height((capsule.height - self.settings.eye_offset).max(0.0));
        let camera = self.camera.update(self.state.position, lean, dt);

        let shots = self.handle_fire(world, &intent, &camera, dt);
        let mut events = Vec::new();
        self.ballistics.update(world, dt, &mut events);
        if let Some(armory) = self.armory.as_mut() {
            armory.ammo.update(dt);
        }

        PlayerFrame {
            kinematics: self.state,
            stance: self.stance,
            movement,
            camera,
            shots,
            events,
            ammo: self.ammo().map(AmmoStateMachine::status),
        }
    }

    fn switch_weapon(&mut self, slot: usize) {
        let Some(armory) = self.armory.as_mut() else {
            return;
        };
        if slot == armory.active {
            return;
        }
        let Some(weapon) = armory.weapons.get(slot) else {
            return;
        };
        armory.ammo.equip(weapon.ammo.clone());
        armory.active = slot;
        debug!(weapon = %weapon.id, "weapon switched");
    }

    /// Lowering is always allowed; raising needs head clearance, and a
    /// blocked prone-to-stand settles for crouching when that fits.
    fn update_stance<W: CollisionWorld + ?Sized>(&mut self, world: &W, requested: Stance) {
        if requested == self.stance {
            return;
        }
        let next = if requested.is_lower_than(self.stance) {
            requested
        } else {
            let profile = self.resolver.profile();
            let clearance = self.resolver.head_clearance(
                self.state.position,
                &profile.capsule_for(self.stance),
                world,
                self.hit_volume,
            );
            let headroom = profile.stand_height + clearance;
            let fits = |stance: Stance| headroom + STANCE_FIT_EPS >= profile.height_for(stance);
            if fits(requested) {
                requested
            } else if requested == Stance::Standing
                && self.stance == Stance::Prone
                && fits(Stance::Crouching)
            {
                Stance::Crouching
            } else {
                self.stance
            }
        };
        if next != self.stance {
            debug!(from = ?self.stance, to = ?next, "stance changed");
            self.stance = next;
        }
    }

    fn handle_fire<W: CollisionWorld + ?Sized>(
        &mut self,
        world: &W,
        intent: &InputIntent,
        camera: &CameraPose,
        dt: Real,
    ) -> Vec<ShotOutcome> {
        let mut shots = Vec::new();
        let Some(armory) = self.armory.as_mut() else {
            return shots;
        };
        armory.cooldown = (armory.cooldown - dt.max(0.0)).max(0.0);
        if intent.reload {
            armory.ammo.start_reload();
        }
        if intent.pump {
            armory.ammo.trigger_pump();
        }
        if self.settings.auto_pump
            && !intent.fire
            && armory.ammo.pump_stage() == PumpStage::NeedsPump
        {
            armory.ammo.trigger_pump();
        }
        if !intent.fire || armory.cooldown > 0.0 || !armory.ammo.can_fire() {
            return shots;
        }
        let Some(weapon) = armory.weapons.get(armory.active) else {
            return shots;
        };
        if !armory.ammo.consume(1) {
            return shots;
        }
        armory.cooldown = weapon.fire_interval;
        let request = FireRequest {
            origin: Point::from(camera.eye),
            direction: camera.forward(),
            config: weapon.ballistics,
            spread_angle: weapon.spread_angle(),
            exclude: self.hit_volume,
        };
        for _ in 0..weapon.pellets.max(1) {
            shots.push(self.ballistics.fire(world, &request));
        }
        debug!(weapon = %weapon.id, pellets = shots.len(), "weapon fired");
        shots
    }
}
