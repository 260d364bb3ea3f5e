use crate::config::CameraConfig;
use glam::{Mat4, Vec2, Vec3, Vec4};

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Pixel rectangle of the 3D viewport in the pointer's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }

    pub fn sized(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    /// Maps a pointer position to normalized device coordinates (x right, y up, both in [-1, 1]).
    pub fn to_ndc(&self, pointer: Vec2) -> Option<Vec2> {
        if self.is_empty() {
            return None;
        }
        let x = ((pointer.x - self.left) / self.width) * 2.0 - 1.0;
        let y = -((pointer.y - self.top) / self.height) * 2.0 + 1.0;
        Some(Vec2::new(x, y))
    }

    pub fn contains(&self, pointer: Vec2) -> bool {
        pointer.x >= self.left
            && pointer.y >= self.top
            && pointer.x <= self.left + self.width
            && pointer.y <= self.top + self.height
    }
}

/// World-space ray with a normalized direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction: direction.normalize_or_zero() }
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            Vec3::from_array(config.position),
            Vec3::from_array(config.target),
            config.fov_y_degrees.to_radians(),
            config.near,
            config.far,
        )
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: &ViewportRect) -> Mat4 {
        self.projection_matrix(viewport.aspect()) * self.view_matrix()
    }

    /// Ray from the camera through a point given in normalized device coordinates.
    pub fn ndc_ray(&self, ndc: Vec2, aspect: f32) -> Option<Ray> {
        let clip = Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
        let inv_view_proj = (self.projection_matrix(aspect) * self.view_matrix()).inverse();
        let world = inv_view_proj * clip;
        if world.w.abs() < f32::EPSILON {
            return None;
        }
        let dir = (world.truncate() / world.w) - self.position;
        if dir.length_squared() <= f32::EPSILON {
            return None;
        }
        Some(Ray::new(self.position, dir))
    }

    /// Generates a world-space ray originating from the camera through a pointer position.
    pub fn screen_ray(&self, pointer: Vec2, viewport: &ViewportRect) -> Option<Ray> {
        let ndc = viewport.to_ndc(pointer)?;
        self.ndc_ray(ndc, viewport.aspect())
    }

    pub fn project_point(&self, point: Vec3, viewport: &ViewportRect) -> Option<Vec2> {
        if viewport.is_empty() {
            return None;
        }
        let clip = self.view_projection(viewport) * point.extend(1.0);
        if clip.w.abs() < f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let x = viewport.left + (ndc.x + 1.0) * 0.5 * viewport.width;
        let y = viewport.top + (1.0 - ndc.y) * 0.5 * viewport.height;
        Some(Vec2::new(x, y))
    }
}

impl Default for Camera3D {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndc_maps_corners_and_center() {
        let viewport = ViewportRect::new(100.0, 50.0, 800.0, 600.0);
        let center = viewport.to_ndc(Vec2::new(500.0, 350.0)).expect("center maps");
        assert!(center.length() < 1e-6);
        let top_left = viewport.to_ndc(Vec2::new(100.0, 50.0)).expect("corner maps");
        assert!((top_left - Vec2::new(-1.0, 1.0)).length() < 1e-6);
        assert!(ViewportRect::sized(0.0, 10.0).to_ndc(Vec2::ZERO).is_none());
    }

    #[test]
    fn view_projection_is_finite() {
        let camera = Camera3D::default();
        let vp = camera.view_projection(&ViewportRect::sized(1280.0, 720.0));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
    }

    #[test]
    fn center_ray_points_at_target() {
        let camera = Camera3D::default();
        let viewport = ViewportRect::sized(1280.0, 720.0);
        let ray = camera.screen_ray(Vec2::new(640.0, 360.0), &viewport).expect("ray");
        let expected = (camera.target - camera.position).normalize();
        assert!(ray.direction.dot(expected) > 0.9999);
    }
}
