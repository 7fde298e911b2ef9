//! Orbit camera around the black hole.

use glam::Vec3;

/// Highest pitch magnitude, just short of the poles.
const MAX_PITCH: f32 = 89.0_f32.to_radians();

/// Camera on a sphere around `target`, always looking at it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Radians around the up axis.
    pub yaw: f32,
    /// Radians above the equatorial plane.
    pub pitch: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 20.0,
            yaw: 0.0,
            pitch: 5.0_f32.to_radians(),
        }
    }
}

impl OrbitCamera {
    /// Rotates by the given angles; pitch is clamped short of the poles.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target
            + self.distance * Vec3::new(cos_pitch * sin_yaw, sin_pitch, -cos_pitch * cos_yaw)
    }

    /// Orthonormal `(forward, right, up)` looking at the target.
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = (self.target - self.position()).normalize();
        let right = forward.cross(Vec3::Y).normalize();
        let up = right.cross(forward);
        (forward, right, up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_default_position() {
        let camera = OrbitCamera {
            pitch: 0.0,
            ..Default::default()
        };
        assert!((camera.position() - Vec3::new(0.0, 0.0, -20.0)).length() < EPS);
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let mut camera = OrbitCamera::default();
        camera.orbit(0.7, 0.3);
        let (forward, right, up) = camera.basis();
        assert!((forward.length() - 1.0).abs() < EPS);
        assert!((right.length() - 1.0).abs() < EPS);
        assert!((up.length() - 1.0).abs() < EPS);
        assert!(forward.dot(right).abs() < EPS);
        assert!(forward.dot(up).abs() < EPS);
        assert!(up.y > 0.0);
    }

    #[test]
    fn test_forward_points_at_target() {
        let mut camera = OrbitCamera::default();
        camera.orbit(2.0, -0.4);
        let (forward, _, _) = camera.basis();
        let expected = (camera.target - camera.position()).normalize();
        assert!((forward - expected).length() < EPS);
    }

    #[test]
    fn test_pitch_clamped() {
        let mut camera = OrbitCamera::default();
        camera.orbit(0.0, 10.0);
        assert!((camera.pitch - MAX_PITCH).abs() < EPS);
        camera.orbit(0.0, -20.0);
        assert!((camera.pitch + MAX_PITCH).abs() < EPS);
    }

    #[test]
    fn test_distance_preserved() {
        let mut camera = OrbitCamera::default();
        camera.orbit(1.3, 0.2);
        assert!((camera.position().length() - camera.distance).abs() < 1e-3);
    }
}
