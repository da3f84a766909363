use glam::{Mat4, Vec4};

use super::commands::{CommandList, ShaderGlobal, ShadowKeyword};
use super::context::{FrameTargets, RenderContext, ShadowDraw};
use super::frame_state::LightingFrame;
use super::shadow_math::{cascade_tile_matrix, shadow_tile, world_to_shadow_matrix};
use super::{CASCADE_GRID_SPLIT, MAX_SHADOW_CASCADES, SHADOW_SAMPLE};
use crate::config::ShadowConfig;
use crate::culling::{CascadeRequest, CullingResults};
use crate::light::ShadowMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeStats {
    pub cascades_requested: usize,
    pub cascades_rendered: usize,
    pub soft: bool,
}

pub struct CascadePassParams<'a, R: CullingResults> {
    pub culling: &'a R,
    pub frame: &'a mut LightingFrame,
    pub config: &'a ShadowConfig,
}

/// Renders the main directional light into a dedicated 2×2 cascaded shadow map.
pub struct CascadePass {
    commands: CommandList,
}

impl Default for CascadePass {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadePass {
    pub fn new() -> Self {
        Self { commands: CommandList::new(SHADOW_SAMPLE) }
    }

    pub fn render<C: RenderContext, R: CullingResults>(
        &mut self,
        targets: &mut FrameTargets<'_, C>,
        params: CascadePassParams<'_, R>,
    ) -> CascadeStats {
        let Some(light) = params.culling.visible_lights().first() else {
            return CascadeStats::default();
        };
        let map_size = params.config.map_size.max(CASCADE_GRID_SPLIT as u32);
        let tile_size = (map_size / CASCADE_GRID_SPLIT as u32) as f32;
        let cascade_count = params.config.cascade_count().min(MAX_SHADOW_CASCADES);
        let split_ratios = params.config.cascade_split_ratios();
        let reversed_z = targets.reversed_z();
        let shadows = &mut params.frame.shadows;

        let target = targets.acquire_cascaded_shadow_map(map_size);
        self.commands.set_shadow_render_target(target);
        self.commands.begin_sample(SHADOW_SAMPLE);
        let distance = params.config.distance;
        self.commands.set_vector(ShaderGlobal::GlobalShadowData, Vec4::new(0.0, distance * distance, 0.0, 0.0));
        targets.execute(&mut self.commands);
        self.commands.set_float(ShaderGlobal::ShadowBias, light.shadow_bias);

        let mut stats = CascadeStats { cascades_requested: cascade_count, ..Default::default() };
        for cascade in 0..cascade_count {
            let request = CascadeRequest {
                light_index: 0,
                split_index: cascade,
                split_count: cascade_count,
                split_ratios,
                resolution: tile_size as u32,
                near_plane_offset: light.shadow_near_plane,
            };
            let Some(matrices) = params.culling.directional_shadow_matrices(&request) else {
                log::debug!("cascade {cascade}/{cascade_count} of the main light has no shadow volume");
                shadows.cascade_culling_spheres[cascade] = Vec4::ZERO;
                shadows.cascade_world_to_shadow[cascade] = Mat4::ZERO;
                continue;
            };

            let tile = shadow_tile(cascade, CASCADE_GRID_SPLIT, tile_size);
            self.commands.set_viewport(tile.viewport);
            self.commands.enable_scissor(tile.scissor);
            self.commands.set_view_projection(matrices.view, matrices.projection);
            targets.execute(&mut self.commands);

            let sphere = matrices.split.culling_sphere;
            // Shaders test cascade membership against the squared radius.
            shadows.cascade_culling_spheres[cascade] = sphere.truncate().extend(sphere.w * sphere.w);
            targets.draw_shadows(&ShadowDraw { light_index: 0, culling_sphere: sphere });

            shadows.cascade_world_to_shadow[cascade] = cascade_tile_matrix(tile.offset)
                * world_to_shadow_matrix(matrices.view, matrices.projection, reversed_z);
            stats.cascades_rendered += 1;
        }

        self.commands.disable_scissor();
        self.commands.set_texture(ShaderGlobal::CascadedShadowMap, target);
        self.commands.set_vector_array(ShaderGlobal::CascadeCullingSpheres, &shadows.cascade_culling_spheres);
        self.commands.set_matrix_array(ShaderGlobal::WorldToShadowCascadeMatrices, &shadows.cascade_world_to_shadow);
        let inv_size = 1.0 / map_size as f32;
        self.commands.set_vector(
            ShaderGlobal::CascadedShadowMapSize,
            Vec4::new(inv_size, inv_size, map_size as f32, map_size as f32),
        );
        self.commands.set_float(ShaderGlobal::CascadedShadowStrength, light.shadow_strength);
        let hard = light.shadows == ShadowMode::Hard;
        self.commands.set_keyword(ShadowKeyword::CascadedHard, hard);
        self.commands.set_keyword(ShadowKeyword::CascadedSoft, !hard);
        self.commands.end_sample(SHADOW_SAMPLE);
        targets.execute(&mut self.commands);

        stats.soft = !hard;
        stats
    }
}
