use glam::Vec4;

use super::frame_state::LightingFrame;
use super::MAX_VISIBLE_LIGHTS;
use crate::culling::CullingResults;
use crate::light::{LightKind, ShadowMode, VisibleLight};

/// Inner cone tangent as a fraction of the outer half-angle tangent. Shader falloff is tuned
/// against this exact value.
pub const SPOT_INNER_TAN_RATIO: f32 = 46.0 / 64.0;

const MIN_RANGE_SQUARED: f32 = 0.00001;
const MIN_SPOT_ANGLE_RANGE: f32 = 0.001;

/// Shadow eligibility of one light for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShadowCasterInfo {
    pub casts_shadows: bool,
    pub strength: f32,
    pub soft: bool,
    pub bounds_valid: bool,
}

impl ShadowCasterInfo {
    /// Packed shadow-data vector; z marks directional lights until the atlas assigns a tile.
    pub fn shadow_data(&self, directional: bool) -> Vec4 {
        let mut data = Vec4::ZERO;
        if self.casts_shadows {
            data.x = self.strength;
            data.y = if self.soft { 1.0 } else { 0.0 };
        }
        if directional {
            data.z = 1.0;
        }
        data
    }
}

/// Outcome of collecting the visible lights for one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightSetupSummary {
    pub visible_lights: usize,
    pub shaded_lights: usize,
    pub truncated_lights: usize,
    pub main_light_exists: bool,
    pub shadow_tiles: usize,
}

/// A light is eligible when it has a shadow mode and its casters have real bounds.
/// Eligible lights claim one shadow tile.
pub fn classify_shadows<R: CullingResults + ?Sized>(
    light_index: usize,
    light: &VisibleLight,
    culling: &R,
    shadow_tile_count: &mut usize,
) -> ShadowCasterInfo {
    if !light.shadows.casts_shadows() {
        return ShadowCasterInfo::default();
    }
    let bounds_valid = culling.shadow_caster_bounds(light_index).is_some_and(|bounds| !bounds.is_degenerate());
    if !bounds_valid {
        return ShadowCasterInfo::default();
    }
    *shadow_tile_count += 1;
    ShadowCasterInfo {
        casts_shadows: true,
        strength: light.shadow_strength,
        soft: light.shadows == ShadowMode::Soft,
        bounds_valid,
    }
}

/// Cone scale and bias (attenuation z/w) for a spot light with the given full angle in degrees.
pub fn spot_cone_attenuation(spot_angle_degrees: f32) -> (f32, f32) {
    let outer_rad = (0.5 * spot_angle_degrees).to_radians();
    let outer_cos = outer_rad.cos();
    let outer_tan = outer_rad.tan();
    let inner_cos = (SPOT_INNER_TAN_RATIO * outer_tan).atan().cos();
    let angle_range = (inner_cos - outer_cos).max(MIN_SPOT_ANGLE_RANGE);
    let scale = 1.0 / angle_range;
    (scale, -outer_cos * scale)
}

fn negated_forward(light: &VisibleLight) -> Vec4 {
    let axis = light.local_to_world.z_axis;
    Vec4::new(-axis.x, -axis.y, -axis.z, axis.w)
}

/// Fills the light and shadow arrays for up to [`MAX_VISIBLE_LIGHTS`] lights, picks the main
/// light and remaps light indices so per-object shading skips slots it must not read.
pub fn configure_lights<R: CullingResults>(
    frame: &mut LightingFrame,
    culling: &mut R,
    cascade_count: usize,
) -> LightSetupSummary {
    frame.main_light_exists = false;
    frame.shadow_tile_count = 0;

    let visible = culling.visible_lights().len();
    let shaded = visible.min(MAX_VISIBLE_LIGHTS);
    for index in 0..shaded {
        let light = &culling.visible_lights()[index];
        frame.lights.colors[index] = light.final_color;
        let mut attenuation = Vec4::new(0.0, 0.0, 0.0, 1.0);
        let mut shadow = Vec4::ZERO;

        match light.kind {
            LightKind::Directional => {
                frame.lights.directions_or_positions[index] = negated_forward(light);
                let info = classify_shadows(index, light, &*culling, &mut frame.shadow_tile_count);
                shadow = info.shadow_data(true);
                if index == 0 && info.casts_shadows && info.strength > 0.0 && cascade_count > 0 {
                    frame.main_light_exists = true;
                    frame.shadow_tile_count -= 1;
                }
            }
            LightKind::Point | LightKind::Spot => {
                frame.lights.directions_or_positions[index] = light.local_to_world.w_axis;
                attenuation.x = 1.0 / (light.range * light.range).max(MIN_RANGE_SQUARED);
                if light.kind == LightKind::Spot {
                    frame.lights.spot_directions[index] = negated_forward(light);
                    let (scale, bias) = spot_cone_attenuation(light.spot_angle);
                    attenuation.z = scale;
                    attenuation.w = bias;
                    let info = classify_shadows(index, light, &*culling, &mut frame.shadow_tile_count);
                    shadow = info.shadow_data(false);
                }
            }
        }

        frame.lights.attenuations[index] = attenuation;
        frame.shadows.shadow_data[index] = shadow;
    }
    frame.lights.live_count = shaded;
    frame.truncated_lights = visible - shaded;

    if frame.main_light_exists || visible > MAX_VISIBLE_LIGHTS {
        let mut map = culling.light_index_map();
        if frame.main_light_exists {
            if let Some(slot) = map.first_mut() {
                *slot = None;
            }
        }
        for slot in map.iter_mut().skip(MAX_VISIBLE_LIGHTS) {
            *slot = None;
        }
        culling.set_light_index_map(map);
    }

    LightSetupSummary {
        visible_lights: visible,
        shaded_lights: shaded,
        truncated_lights: frame.truncated_lights,
        main_light_exists: frame.main_light_exists,
        shadow_tiles: frame.shadow_tile_count,
    }
}
