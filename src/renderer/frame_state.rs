use glam::{Mat4, Vec4};

use super::{CASCADE_MATRIX_SLOTS, MAX_SHADOW_CASCADES, MAX_VISIBLE_LIGHTS};

/// Per-light shading arrays. Index `i` of every array describes the same light; slots at or
/// beyond `live_count` hold stale or zero data.
#[derive(Debug, Clone)]
pub struct LightUniformSet {
    pub colors: [Vec4; MAX_VISIBLE_LIGHTS],
    pub directions_or_positions: [Vec4; MAX_VISIBLE_LIGHTS],
    pub attenuations: [Vec4; MAX_VISIBLE_LIGHTS],
    pub spot_directions: [Vec4; MAX_VISIBLE_LIGHTS],
    pub live_count: usize,
}

impl Default for LightUniformSet {
    fn default() -> Self {
        Self {
            colors: [Vec4::ZERO; MAX_VISIBLE_LIGHTS],
            directions_or_positions: [Vec4::ZERO; MAX_VISIBLE_LIGHTS],
            attenuations: [Vec4::ZERO; MAX_VISIBLE_LIGHTS],
            spot_directions: [Vec4::ZERO; MAX_VISIBLE_LIGHTS],
            live_count: 0,
        }
    }
}

/// Shadow arrays shared with the shaders.
///
/// `shadow_data[i]`: x strength (0 means unshadowed), y soft flag, z/w atlas tile offset (z is 1
/// for directional lights until the atlas pass assigns a tile).
#[derive(Debug, Clone)]
pub struct ShadowUniformSet {
    pub shadow_data: [Vec4; MAX_VISIBLE_LIGHTS],
    pub world_to_shadow: [Mat4; MAX_VISIBLE_LIGHTS],
    pub cascade_world_to_shadow: [Mat4; CASCADE_MATRIX_SLOTS],
    pub cascade_culling_spheres: [Vec4; MAX_SHADOW_CASCADES],
}

impl ShadowUniformSet {
    fn new(reversed_z: bool) -> Self {
        let mut cascade_world_to_shadow = [Mat4::ZERO; CASCADE_MATRIX_SLOTS];
        if reversed_z {
            // Past the last cascade: depth 1 is "nearest", so everything compares as lit.
            cascade_world_to_shadow[CASCADE_MATRIX_SLOTS - 1].w_axis.w = 1.0;
        }
        Self {
            shadow_data: [Vec4::ZERO; MAX_VISIBLE_LIGHTS],
            world_to_shadow: [Mat4::ZERO; MAX_VISIBLE_LIGHTS],
            cascade_world_to_shadow,
            cascade_culling_spheres: [Vec4::ZERO; MAX_SHADOW_CASCADES],
        }
    }
}

/// Light and shadow state for one camera. Reset before each camera is prepared.
#[derive(Debug, Clone)]
pub struct LightingFrame {
    pub lights: LightUniformSet,
    pub shadows: ShadowUniformSet,
    pub shadow_tile_count: usize,
    pub main_light_exists: bool,
    pub truncated_lights: usize,
}

impl LightingFrame {
    pub fn new(reversed_z: bool) -> Self {
        Self {
            lights: LightUniformSet::default(),
            shadows: ShadowUniformSet::new(reversed_z),
            shadow_tile_count: 0,
            main_light_exists: false,
            truncated_lights: 0,
        }
    }

    pub fn reset(&mut self, reversed_z: bool) {
        *self = Self::new(reversed_z);
    }
}

impl Default for LightingFrame {
    fn default() -> Self {
        Self::new(false)
    }
}
