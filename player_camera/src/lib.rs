//! Camera derivation from player pose, stance eye height and lean.
#![forbid(unsafe_code)]

use rapier3d::math::Vector;
use rapier3d::prelude::Real;

const PITCH_LIMIT: Real = 1.54;
/// Camera roll per meter of lateral lean.
const LEAN_ROLL_PER_METER: Real = 0.35;

#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    pub eye: Vector<Real>,
    pub yaw: Real,
    pub pitch: Real,
    pub roll: Real,
}

impl CameraPose {
    /// Unit view direction. Pitch is positive looking up.
    pub fn forward(&self) -> Vector<Real> {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vector::new(sin_yaw * cos_pitch, sin_pitch, -cos_yaw * cos_pitch)
    }

    pub fn right(&self) -> Vector<Real> {
        flat_right(self.yaw)
    }
}

fn flat_right(yaw: Real) -> Vector<Real> {
    Vector::new(yaw.cos(), 0.0, yaw.sin())
}

fn approach(current: Real, target: Real, max_step: Real) -> Real {
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PlayerCamera {
    eye_height: Real,
    target_eye_height: Real,
    lean: Real,
    /// Meters per second for eye height and lean transitions.
    pub blend_speed: Real,
    yaw: Real,
    pitch: Real,
    eye: Vector<Real>,
}

impl PlayerCamera {
    pub fn new(eye_height: Real) -> Self {
        Self {
            eye_height,
            target_eye_height: eye_height,
            lean: 0.0,
            blend_speed: 4.0,
            yaw: 0.0,
            pitch: 0.0,
            eye: Vector::zeros(),
        }
    }

    pub fn yaw(&self) -> Real {
        self.yaw
    }

    pub fn pitch(&self) -> Real {
        self.pitch
    }

    pub fn eye_height(&self) -> Real {
        self.eye_height
    }

    pub fn lean(&self) -> Real {
        self.lean
    }

    pub fn set_look(&mut self, yaw: Real, pitch: Real) {
        self.yaw = yaw;
        self.pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn apply_look_delta(&mut self, delta: [Real; 2]) {
        self.yaw += delta[0];
        self.pitch = (self.pitch + delta[1]).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Eye height the camera blends toward, e.g. after a stance change.
    pub fn set_target_eye_height(&mut self, eye_height: Real) {
        self.target_eye_height = eye_height;
    }

    /// Moves the eye to `origin` (feet) plus the blended eye height and
    /// lateral lean. A non-positive `dt` snaps both to their targets.
    pub fn update(&mut self, origin: Vector<Real>, lean_target: Real, dt: Real) -> CameraPose {
        if dt > 0.0 {
            let step = self.blend_speed * dt;
            self.eye_height = approach(self.eye_height, self.target_eye_height, step);
            self.lean = approach(self.lean, lean_target, step);
        } else {
            self.eye_height = self.target_eye_height;
            self.lean = lean_target;
        }
        self.eye =
            origin + Vector::new(0.0, self.eye_height, 0.0) + flat_right(self.yaw) * self.lean;
        self.pose()
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose {
            eye: self.eye,
            yaw: self.yaw,
            pitch: self.pitch,
            roll: -self.lean * LEAN_ROLL_PER_METER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_follows_yaw_and_pitch() {
        let mut camera = PlayerCamera::new(1.6);
        let pose = camera.update(Vector::zeros(), 0.0, 0.0);
        assert!((pose.forward() - Vector::new(0.0, 0.0, -1.0)).norm() < 1.0e-6);

        camera.set_look(std::f32::consts::FRAC_PI_2, 0.0);
        let pose = camera.pose();
        assert!((pose.forward() - Vector::new(1.0, 0.0, 0.0)).norm() < 1.0e-6);

        camera.set_look(0.0, 3.0);
        assert!((camera.pitch() - PITCH_LIMIT).abs() < 1.0e-6);
        assert!(camera.pose().forward().y > 0.99);
    }

    #[test]
    fn eye_height_blends_toward_target() {
        let mut camera = PlayerCamera::new(1.6);
        camera.set_target_eye_height(1.0);
        let pose = camera.update(Vector::new(0.0, 2.0, 0.0), 0.0, 0.1);
        assert!((camera.eye_height() - 1.2).abs() < 1.0e-5);
        assert!((pose.eye.y - 3.2).abs() < 1.0e-5);
        for _ in 0..10 {
            camera.update(Vector::zeros(), 0.0, 0.1);
        }
        assert!((camera.eye_height() - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn lean_offsets_eye_to_the_right_and_rolls() {
        let mut camera = PlayerCamera::new(1.6);
        let pose = camera.update(Vector::zeros(), 0.4, 0.0);
        assert!((pose.eye.x - 0.4).abs() < 1.0e-6);
        assert!(pose.roll < 0.0);
        let pose = camera.update(Vector::zeros(), -0.4, 0.0);
        assert!((pose.eye.x + 0.4).abs() < 1.0e-6);
        assert!(pose.roll > 0.0);
    }
}
