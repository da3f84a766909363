use glam::{Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowMode {
    #[default]
    None,
    Hard,
    Soft,
}

impl ShadowMode {
    pub fn casts_shadows(self) -> bool {
        self != ShadowMode::None
    }
}

/// A light that survived culling for the current camera.
///
/// `local_to_world` follows the usual convention: column 2 is the light's forward axis and
/// column 3 its world position. `spot_angle` is the full cone angle in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleLight {
    pub kind: LightKind,
    pub local_to_world: Mat4,
    pub final_color: Vec4,
    pub range: f32,
    pub spot_angle: f32,
    pub shadows: ShadowMode,
    pub shadow_strength: f32,
    pub shadow_bias: f32,
    pub shadow_near_plane: f32,
}

impl VisibleLight {
    pub const DEFAULT_SHADOW_BIAS: f32 = 0.05;
    pub const DEFAULT_SHADOW_NEAR_PLANE: f32 = 0.2;

    fn base(kind: LightKind, local_to_world: Mat4, color: Vec3) -> Self {
        Self {
            kind,
            local_to_world,
            final_color: color.extend(1.0),
            range: 10.0,
            spot_angle: 30.0,
            shadows: ShadowMode::None,
            shadow_strength: 1.0,
            shadow_bias: Self::DEFAULT_SHADOW_BIAS,
            shadow_near_plane: Self::DEFAULT_SHADOW_NEAR_PLANE,
        }
    }

    /// Directional light shining along `direction`.
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self::base(LightKind::Directional, orientation_towards(Vec3::ZERO, direction), color)
    }

    pub fn point(position: Vec3, range: f32, color: Vec3) -> Self {
        let mut light = Self::base(LightKind::Point, Mat4::from_translation(position), color);
        light.range = range;
        light
    }

    pub fn spot(position: Vec3, direction: Vec3, spot_angle: f32, range: f32, color: Vec3) -> Self {
        let mut light = Self::base(LightKind::Spot, orientation_towards(position, direction), color);
        light.range = range;
        light.spot_angle = spot_angle;
        light
    }

    pub fn with_shadows(mut self, mode: ShadowMode, strength: f32) -> Self {
        self.shadows = mode;
        self.shadow_strength = strength;
        self
    }

    pub fn with_shadow_bias(mut self, bias: f32) -> Self {
        self.shadow_bias = bias;
        self
    }

    pub fn with_shadow_near_plane(mut self, near_plane: f32) -> Self {
        self.shadow_near_plane = near_plane;
        self
    }

    pub fn forward(&self) -> Vec3 {
        self.local_to_world.z_axis.truncate()
    }

    pub fn position(&self) -> Vec3 {
        self.local_to_world.w_axis.truncate()
    }
}

/// Builds a rigid transform at `position` whose +Z column points along `direction`.
pub fn orientation_towards(position: Vec3, direction: Vec3) -> Mat4 {
    let forward = direction.normalize_or_zero();
    let rotation = if forward == Vec3::ZERO {
        Quat::IDENTITY
    } else {
        Quat::from_rotation_arc(Vec3::Z, forward)
    };
    Mat4::from_rotation_translation(rotation, position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_axis_matches_requested_direction() {
        let light = VisibleLight::spot(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, -1.0, 0.0), 45.0, 8.0, Vec3::ONE);
        assert!((light.forward() - Vec3::NEG_Y).length() < 1e-5);
        assert!((light.position() - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn degenerate_direction_falls_back_to_identity() {
        let light = VisibleLight::directional(Vec3::ZERO, Vec3::ONE);
        assert_eq!(light.forward(), Vec3::Z);
    }
}
