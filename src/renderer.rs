pub mod atlas_pass;
pub mod cascade_pass;
pub mod commands;
pub mod context;
pub mod frame_state;
pub mod globals;
pub mod gpu;
pub mod light_setup;
pub mod recording;
pub mod shadow_math;

use glam::Vec4;

use crate::camera::Camera;
use crate::config::PipelineConfig;
use crate::culling::{Culler, CullingResults};

pub use atlas_pass::{AtlasPass, AtlasPassParams, AtlasStats, AtlasTile};
pub use cascade_pass::{CascadePass, CascadePassParams, CascadeStats};
pub use commands::{CommandList, Rect, RenderCommand, ShaderGlobal, ShadowKeyword};
pub use context::{DrawSettings, FrameTargets, GeometryPass, RenderContext, ShadowDraw, ShadowMapHandle};
pub use frame_state::{LightUniformSet, LightingFrame, ShadowUniformSet};
pub use globals::ShaderGlobals;
pub use light_setup::{configure_lights, LightSetupSummary, ShadowCasterInfo};
pub use recording::RecordingContext;
pub use gpu::{WgpuContext, WgpuFrameStats};

pub const MAX_VISIBLE_LIGHTS: usize = 16;
pub const MAX_SHADOW_CASCADES: usize = 4;
/// Cascade matrices uploaded to shaders; the last slot is a placeholder past the final cascade.
pub const CASCADE_MATRIX_SLOTS: usize = MAX_SHADOW_CASCADES + 1;
pub const CASCADE_GRID_SPLIT: usize = 2;
/// Scissor inset between neighbouring shadow tiles, in pixels.
pub const SHADOW_TILE_BORDER: f32 = 4.0;

pub(crate) const SHADOW_SAMPLE: &str = "Render Shadows";
const CAMERA_SAMPLE: &str = "Render Camera";

/// What happened to one camera during [`ForwardPipeline::render`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraMetrics {
    pub camera_index: usize,
    pub skipped: bool,
    pub lights: LightSetupSummary,
    pub cascades: Option<CascadeStats>,
    pub atlas: Option<AtlasStats>,
}

/// Forward pipeline front end: per camera, collects lights, renders the cascaded shadow map and
/// the shadow atlas, then hands the populated globals to the geometry passes.
pub struct ForwardPipeline {
    config: PipelineConfig,
    frame: LightingFrame,
    camera_commands: CommandList,
    cascade_pass: CascadePass,
    atlas_pass: AtlasPass,
    metrics: Vec<CameraMetrics>,
    last_truncated: usize,
}

impl ForwardPipeline {
    pub fn new(mut config: PipelineConfig) -> Self {
        config.shadows.map_size = config.shadows.clamped_map_size();
        Self {
            config,
            frame: LightingFrame::default(),
            camera_commands: CommandList::new(CAMERA_SAMPLE),
            cascade_pass: CascadePass::new(),
            atlas_pass: AtlasPass::new(),
            metrics: Vec::new(),
            last_truncated: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Light and shadow state of the most recently prepared camera.
    pub fn frame(&self) -> &LightingFrame {
        &self.frame
    }

    pub fn metrics(&self) -> &[CameraMetrics] {
        &self.metrics
    }

    /// Renders `cameras` in order.
    pub fn render<X: RenderContext, C: Culler>(&mut self, context: &mut X, culler: &mut C, cameras: &[Camera]) {
        self.metrics.clear();
        for (camera_index, camera) in cameras.iter().enumerate() {
            let metrics = self.render_camera(context, culler, camera);
            self.metrics.push(CameraMetrics { camera_index, ..metrics });
        }
    }

    pub fn render_camera<X: RenderContext, C: Culler>(
        &mut self,
        context: &mut X,
        culler: &mut C,
        camera: &Camera,
    ) -> CameraMetrics {
        let Some(mut params) = camera.culling_parameters() else {
            log::debug!("skipping camera without culling parameters");
            return CameraMetrics { skipped: true, ..Default::default() };
        };
        params.shadow_distance = self.config.shadows.distance.min(camera.far);
        let mut culling = culler.cull(camera, &params);

        self.frame.reset(context.reversed_z());
        let mut metrics = CameraMetrics::default();
        let mut targets = FrameTargets::new(context);

        if culling.visible_lights().is_empty() {
            self.camera_commands.set_vector(ShaderGlobal::LightIndicesOffsetAndCount, Vec4::ZERO);
            for keyword in ShadowKeyword::ALL {
                self.camera_commands.disable_keyword(keyword);
            }
        } else {
            let cascade_count = self.config.shadows.cascade_count();
            metrics.lights = configure_lights(&mut self.frame, &mut culling, cascade_count);
            if metrics.lights.truncated_lights > self.last_truncated {
                log::warn!(
                    "{} visible light(s) exceed the per-camera budget (max {}). Extra lights will not be shaded.",
                    metrics.lights.truncated_lights,
                    MAX_VISIBLE_LIGHTS
                );
            }
            self.last_truncated = metrics.lights.truncated_lights;

            if self.frame.main_light_exists {
                metrics.cascades = Some(self.cascade_pass.render(
                    &mut targets,
                    CascadePassParams { culling: &culling, frame: &mut self.frame, config: &self.config.shadows },
                ));
            } else {
                self.camera_commands.disable_keyword(ShadowKeyword::CascadedHard);
                self.camera_commands.disable_keyword(ShadowKeyword::CascadedSoft);
            }

            if self.frame.shadow_tile_count > 0 {
                metrics.atlas = Some(self.atlas_pass.render(
                    &mut targets,
                    AtlasPassParams { culling: &culling, frame: &mut self.frame, config: &self.config.shadows },
                ));
            } else {
                self.camera_commands.disable_keyword(ShadowKeyword::AtlasHard);
                self.camera_commands.disable_keyword(ShadowKeyword::AtlasSoft);
            }
        }

        targets.setup_camera(camera);
        self.camera_commands.clear_render_target(camera.clear_flags, camera.background);
        self.camera_commands.begin_sample(CAMERA_SAMPLE);
        let lights = &self.frame.lights;
        self.camera_commands.set_vector_array(ShaderGlobal::VisibleLightColors, &lights.colors);
        self.camera_commands
            .set_vector_array(ShaderGlobal::VisibleLightDirectionsOrPositions, &lights.directions_or_positions);
        self.camera_commands.set_vector_array(ShaderGlobal::VisibleLightAttenuations, &lights.attenuations);
        self.camera_commands.set_vector_array(ShaderGlobal::VisibleLightSpotDirections, &lights.spot_directions);
        targets.execute(&mut self.camera_commands);

        let settings =
            DrawSettings { dynamic_batching: self.config.dynamic_batching, instancing: self.config.instancing };
        for pass in [GeometryPass::Opaque, GeometryPass::Skybox, GeometryPass::Transparent] {
            targets.draw_geometry(camera, &culling, pass, settings);
        }
        #[cfg(debug_assertions)]
        targets.draw_geometry(camera, &culling, GeometryPass::ErrorFallback, settings);

        self.camera_commands.end_sample(CAMERA_SAMPLE);
        targets.execute(&mut self.camera_commands);
        targets.submit();

        metrics
    }
}
