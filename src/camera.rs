use bitflags::bitflags;
use glam::{Mat4, Vec3, Vec4};

const DEFAULT_UP: Vec3 = Vec3::Y;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u8 {
        const COLOR = 0b01;
        const DEPTH = 0b10;
    }
}

/// Perspective camera rendered by the forward pipeline.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
    pub viewport: (u32, u32),
    pub clear_flags: ClearFlags,
    pub background: Vec4,
}

/// Culling inputs extracted from a camera. `shadow_distance` is filled in by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct CullingParameters {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub shadow_distance: f32,
}

impl CullingParameters {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target,
            up: DEFAULT_UP,
            fov_y_radians,
            near,
            far,
            viewport: (1280, 720),
            clear_flags: ClearFlags::COLOR | ClearFlags::DEPTH,
            background: Vec4::new(0.19, 0.3, 0.47, 1.0),
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    pub fn aspect(&self) -> f32 {
        let (width, height) = self.viewport;
        if height > 0 {
            width as f32 / height as f32
        } else {
            1.0
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.view_up())
    }

    /// `up`, or a fallback axis when the camera looks along it.
    fn view_up(&self) -> Vec3 {
        let forward = (self.target - self.position).normalize_or_zero();
        if forward.cross(self.up).length_squared() >= 1e-6 {
            return self.up;
        }
        if forward.z.abs() > 0.95 {
            Vec3::X
        } else {
            Vec3::Z
        }
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, self.aspect().max(0.0001), self.near, self.far)
    }

    /// Returns `None` when the camera cannot be culled this frame.
    pub fn culling_parameters(&self) -> Option<CullingParameters> {
        let (width, height) = self.viewport;
        if width == 0 || height == 0 {
            return None;
        }
        if !(self.near > 0.0 && self.far > self.near) || !self.far.is_finite() {
            return None;
        }
        if !self.position.is_finite() || !self.target.is_finite() {
            return None;
        }
        let forward = self.target - self.position;
        if forward.length_squared() < f32::EPSILON {
            return None;
        }
        if !(self.fov_y_radians > 0.0 && self.fov_y_radians < std::f32::consts::PI) {
            return None;
        }
        Some(CullingParameters {
            view: self.view_matrix(),
            projection: self.projection_matrix(),
            position: self.position,
            near: self.near,
            far: self.far,
            fov_y_radians: self.fov_y_radians,
            aspect: self.aspect(),
            shadow_distance: self.far,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_viewport_has_no_culling_parameters() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 1.0, 0.1, 100.0).with_viewport(0, 480);
        assert!(camera.culling_parameters().is_none());
    }

    #[test]
    fn inverted_clip_planes_have_no_culling_parameters() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 1.0, 10.0, 1.0);
        assert!(camera.culling_parameters().is_none());
    }

    #[test]
    fn culling_parameters_follow_camera() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 1.0, 0.1, 100.0).with_viewport(640, 480);
        let params = camera.culling_parameters().expect("camera is cullable");
        assert!((params.aspect - 640.0 / 480.0).abs() < 1e-6);
        assert_eq!(params.shadow_distance, 100.0);
        assert_eq!(params.view, camera.view_matrix());
    }

    #[test]
    fn top_down_camera_falls_back_to_another_up_axis() {
        let camera = Camera::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, 1.0, 0.1, 100.0);
        let params = camera.culling_parameters().expect("top-down camera is cullable");
        assert!(params.view.is_finite());
        let origin = params.view.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-4);

        let along_z = Camera { up: Vec3::Z, ..Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0, 0.1, 100.0) };
        assert!(along_z.view_matrix().is_finite());
    }
}
