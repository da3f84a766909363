use glam::{Vec3, Vec4};
use smallvec::SmallVec;

use super::commands::{CommandList, ShaderGlobal, ShadowKeyword};
use super::context::{FrameTargets, RenderContext, ShadowDraw};
use super::frame_state::LightingFrame;
use super::shadow_math::{atlas_split_for_tiles, shadow_tile, world_to_shadow_matrix};
use super::{MAX_VISIBLE_LIGHTS, SHADOW_SAMPLE};
use crate::config::ShadowConfig;
use crate::culling::{CascadeRequest, CullingResults};
use crate::light::LightKind;

/// Atlas tile handed to one light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasTile {
    pub light_index: usize,
    pub tile_index: usize,
    pub shadow_data: Vec4,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtlasStats {
    pub split: usize,
    pub tiles: SmallVec<[AtlasTile; MAX_VISIBLE_LIGHTS]>,
    pub dropped_lights: SmallVec<[usize; 4]>,
    pub hard: bool,
    pub soft: bool,
}

pub struct AtlasPassParams<'a, R: CullingResults> {
    pub culling: &'a R,
    pub frame: &'a mut LightingFrame,
    pub config: &'a ShadowConfig,
}

/// Renders every non-main shadow caster into one tile of the shared shadow atlas.
pub struct AtlasPass {
    commands: CommandList,
}

impl Default for AtlasPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AtlasPass {
    pub fn new() -> Self {
        Self { commands: CommandList::new(SHADOW_SAMPLE) }
    }

    pub fn render<C: RenderContext, R: CullingResults>(
        &mut self,
        targets: &mut FrameTargets<'_, C>,
        params: AtlasPassParams<'_, R>,
    ) -> AtlasStats {
        let frame = params.frame;
        let split = atlas_split_for_tiles(frame.shadow_tile_count);
        let map_size = params.config.map_size.max(split as u32);
        let tile_size = (map_size / split as u32) as f32;
        let tile_scale = 1.0 / split as f32;
        let reversed_z = targets.reversed_z();

        let target = targets.acquire_shadow_map(map_size);
        self.commands.set_shadow_render_target(target);
        self.commands.begin_sample(SHADOW_SAMPLE);
        let distance = params.config.distance;
        self.commands.set_vector(
            ShaderGlobal::GlobalShadowData,
            Vec4::new(tile_scale, distance * distance, 0.0, 0.0),
        );
        targets.execute(&mut self.commands);

        let mut stats = AtlasStats { split, ..Default::default() };
        let lights = params.culling.visible_lights();
        let first = if frame.main_light_exists { 1 } else { 0 };
        let mut tile_index = 0;
        for (index, light) in lights.iter().enumerate().take(MAX_VISIBLE_LIGHTS).skip(first) {
            let shadow = frame.shadows.shadow_data[index];
            if shadow.x <= 0.0 {
                continue;
            }

            let matrices = match light.kind {
                LightKind::Directional => params.culling.directional_shadow_matrices(&CascadeRequest {
                    light_index: index,
                    split_index: 0,
                    split_count: 1,
                    split_ratios: Vec3::X,
                    resolution: tile_size as u32,
                    near_plane_offset: light.shadow_near_plane,
                }),
                LightKind::Spot => params.culling.spot_shadow_matrices(index),
                LightKind::Point => None,
            };
            let Some(matrices) = matrices else {
                log::debug!("light {index} lost its shadow this frame: degenerate shadow volume");
                frame.shadows.shadow_data[index].x = 0.0;
                stats.dropped_lights.push(index);
                continue;
            };

            debug_assert!(tile_index < split * split, "more shadowed lights than atlas tiles");
            let tile = shadow_tile(tile_index, split, tile_size);
            let shadow_data = &mut frame.shadows.shadow_data[index];
            shadow_data.z = tile.offset.x * tile_scale;
            shadow_data.w = tile.offset.y * tile_scale;
            let shadow_data = *shadow_data;
            self.commands.set_viewport(tile.viewport);
            self.commands.enable_scissor(tile.scissor);
            self.commands.set_view_projection(matrices.view, matrices.projection);
            self.commands.set_float(ShaderGlobal::ShadowBias, light.shadow_bias);
            targets.execute(&mut self.commands);

            targets.draw_shadows(&ShadowDraw { light_index: index, culling_sphere: matrices.split.culling_sphere });
            frame.shadows.world_to_shadow[index] =
                world_to_shadow_matrix(matrices.view, matrices.projection, reversed_z);

            stats.tiles.push(AtlasTile { light_index: index, tile_index, shadow_data });
            tile_index += 1;
            if shadow.y <= 0.0 {
                stats.hard = true;
            } else {
                stats.soft = true;
            }
        }

        self.commands.disable_scissor();
        self.commands.set_texture(ShaderGlobal::ShadowMap, target);
        self.commands.set_matrix_array(ShaderGlobal::WorldToShadowMatrices, &frame.shadows.world_to_shadow);
        self.commands.set_vector_array(ShaderGlobal::ShadowData, &frame.shadows.shadow_data);
        let inv_size = 1.0 / map_size as f32;
        self.commands.set_vector(
            ShaderGlobal::ShadowMapSize,
            Vec4::new(inv_size, inv_size, map_size as f32, map_size as f32),
        );
        self.commands.set_keyword(ShadowKeyword::AtlasHard, stats.hard);
        self.commands.set_keyword(ShadowKeyword::AtlasSoft, stats.soft);
        self.commands.end_sample(SHADOW_SAMPLE);
        targets.execute(&mut self.commands);

        stats
    }
}
