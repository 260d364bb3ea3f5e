use crate::model::{PlacedModel, PlacedModelId, EULER_ORDER};
use glam::{Mat4, Quat, Vec3};

pub(crate) const SCALE_MIN: f32 = 0.01;
pub(crate) const SCALE_MAX: f32 = 100.0;

/// World-space transform reported by the manipulator on one drag frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSample {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl TransformSample {
    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self { translation, rotation, scale }
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self { translation, rotation, scale }
    }

    pub fn of_model(model: &PlacedModel) -> Self {
        Self { translation: model.position, rotation: model.rotation_quat(), scale: model.scale }
    }

    /// Rotation as Euler angles in radians, in the stored axis order.
    pub fn euler(&self) -> Vec3 {
        let (x, y, z) = self.rotation.normalize().to_euler(EULER_ORDER);
        Vec3::new(x, y, z)
    }

    pub fn is_finite(&self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }

    /// Clamps each scale axis away from zero and runaway values.
    pub fn clamped_scale(&self) -> Vec3 {
        let clamp = |value: f32| {
            let magnitude = value.abs().clamp(SCALE_MIN, SCALE_MAX);
            if value < 0.0 {
                -magnitude
            } else {
                magnitude
            }
        };
        Vec3::new(clamp(self.scale.x), clamp(self.scale.y), clamp(self.scale.z))
    }
}

/// Manipulator drag stream. `End` is the terminal event of a drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GizmoEvent {
    Begin { model: PlacedModelId },
    Drag(TransformSample),
    End,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn euler_round_trips_through_quaternion() {
        let rotation = Quat::from_euler(EULER_ORDER, 0.3, -0.7, FRAC_PI_4);
        let sample = TransformSample::new(Vec3::ZERO, rotation, Vec3::ONE);
        let euler = sample.euler();
        assert!((euler - Vec3::new(0.3, -0.7, FRAC_PI_4)).length() < 1e-4, "euler {euler:?}");
    }

    #[test]
    fn matrix_decomposes_into_sample() {
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_y(0.5),
            Vec3::new(1.0, 0.0, -3.0),
        );
        let sample = TransformSample::from_matrix(matrix);
        assert!((sample.translation - Vec3::new(1.0, 0.0, -3.0)).length() < 1e-5);
        assert!((sample.scale - Vec3::splat(2.0)).length() < 1e-5);
        assert!((sample.euler().y - 0.5).abs() < 1e-4);
    }

    #[test]
    fn scale_is_kept_away_from_zero() {
        let sample = TransformSample::new(Vec3::ZERO, Quat::IDENTITY, Vec3::new(0.0, -0.001, 500.0));
        assert_eq!(sample.clamped_scale(), Vec3::new(SCALE_MIN, -SCALE_MIN, SCALE_MAX));
    }
}
