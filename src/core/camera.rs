//! Camera state consumed each tick, and the frustum derived from it.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Camera pose and projection supplied by the host every frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub position: Vec3,
    pub rotation: Quat,
    /// Right-handed projection with a `[0, 1]` depth range.
    pub projection: Mat4,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::perspective(Vec3::ZERO, Quat::IDENTITY, 60f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl CameraState {
    pub fn perspective(
        position: Vec3,
        rotation: Quat,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            position,
            rotation,
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
        }
    }

    /// Camera at `position` looking at `target` with +Y up.
    pub fn looking_at(position: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        Self::perspective(position, rotation, fov_y, aspect, near, far)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}

/// Supplies the camera for the current frame.
pub trait CameraProvider: Send {
    fn camera_state(&self) -> CameraState;
}

impl CameraProvider for CameraState {
    fn camera_state(&self) -> CameraState {
        *self
    }
}

/// Camera shared with the host, which moves it between frames.
#[derive(Debug, Clone, Default)]
pub struct SharedCamera(Arc<Mutex<CameraState>>);

impl SharedCamera {
    pub fn new(state: CameraState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn set(&self, state: CameraState) {
        *self.0.lock() = state;
    }

    pub fn set_position(&self, position: Vec3) {
        self.0.lock().position = position;
    }
}

impl CameraProvider for SharedCamera {
    fn camera_state(&self) -> CameraState {
        *self.0.lock()
    }
}

/// Plane stored as `(normal, distance)`; a point is inside when
/// `dot(normal, point) + distance >= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    fn from_row(row: Vec4) -> Self {
        let normal = row.truncate();
        let len = normal.length();
        if len > 0.0 {
            Self::new(normal / len, row.w / len)
        } else {
            Self::new(normal, row.w)
        }
    }

    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Six view planes: left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts planes from a view-projection matrix with `[0, 1]` clip depth.
    pub fn from_view_projection(m: &Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);

        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    /// A sphere is rejected as soon as it lies fully outside any plane.
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(center) >= -radius)
    }

    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects_sphere(point, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_camera() -> CameraState {
        // Identity rotation looks down -Z.
        CameraState::perspective(Vec3::ZERO, Quat::IDENTITY, 90f32.to_radians(), 1.0, 0.1, 500.0)
    }

    #[test]
    fn point_ahead_is_inside() {
        let frustum = forward_camera().frustum();
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
    }

    #[test]
    fn point_behind_is_outside() {
        let frustum = forward_camera().frustum();
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn sphere_straddling_side_plane_intersects() {
        let frustum = forward_camera().frustum();
        // 90° fov: side planes pass through x = ±z.
        assert!(!frustum.contains_point(Vec3::new(12.0, 0.0, -10.0)));
        assert!(frustum.intersects_sphere(Vec3::new(12.0, 0.0, -10.0), 3.0));
    }

    #[test]
    fn planes_are_normalized() {
        let frustum = forward_camera().frustum();
        for plane in frustum.planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn looking_at_faces_target() {
        let camera = CameraState::looking_at(
            Vec3::new(0.0, 10.0, 20.0),
            Vec3::ZERO,
            60f32.to_radians(),
            1.0,
            0.1,
            500.0,
        );
        assert!(camera.frustum().contains_point(Vec3::ZERO));
        assert!(!camera.frustum().contains_point(Vec3::new(0.0, 10.0, 40.0)));
    }
}
