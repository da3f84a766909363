use glam::{Mat4, Vec4};

use super::context::ShadowMapHandle;
use crate::camera::ClearFlags;

/// Shader-visible globals written by the pipeline. The names are shared with shader code and
/// must stay stable across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderGlobal {
    VisibleLightColors,
    VisibleLightDirectionsOrPositions,
    VisibleLightAttenuations,
    VisibleLightSpotDirections,
    LightIndicesOffsetAndCount,
    ShadowMap,
    CascadedShadowMap,
    WorldToShadowMatrices,
    WorldToShadowCascadeMatrices,
    ShadowBias,
    ShadowData,
    ShadowMapSize,
    CascadedShadowMapSize,
    CascadedShadowStrength,
    GlobalShadowData,
    CascadeCullingSpheres,
}

impl ShaderGlobal {
    pub fn name(self) -> &'static str {
        match self {
            ShaderGlobal::VisibleLightColors => "visible_light_colors",
            ShaderGlobal::VisibleLightDirectionsOrPositions => "visible_light_directions_or_positions",
            ShaderGlobal::VisibleLightAttenuations => "visible_light_attenuations",
            ShaderGlobal::VisibleLightSpotDirections => "visible_light_spot_directions",
            ShaderGlobal::LightIndicesOffsetAndCount => "light_indices_offset_and_count",
            ShaderGlobal::ShadowMap => "shadow_map",
            ShaderGlobal::CascadedShadowMap => "cascaded_shadow_map",
            ShaderGlobal::WorldToShadowMatrices => "world_to_shadow_matrices",
            ShaderGlobal::WorldToShadowCascadeMatrices => "world_to_shadow_cascade_matrices",
            ShaderGlobal::ShadowBias => "shadow_bias",
            ShaderGlobal::ShadowData => "shadow_data",
            ShaderGlobal::ShadowMapSize => "shadow_map_size",
            ShaderGlobal::CascadedShadowMapSize => "cascaded_shadow_map_size",
            ShaderGlobal::CascadedShadowStrength => "cascaded_shadow_strength",
            ShaderGlobal::GlobalShadowData => "global_shadow_data",
            ShaderGlobal::CascadeCullingSpheres => "cascade_culling_spheres",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadowKeyword {
    CascadedHard,
    CascadedSoft,
    AtlasHard,
    AtlasSoft,
}

impl ShadowKeyword {
    pub const ALL: [ShadowKeyword; 4] =
        [ShadowKeyword::CascadedHard, ShadowKeyword::CascadedSoft, ShadowKeyword::AtlasHard, ShadowKeyword::AtlasSoft];

    pub fn name(self) -> &'static str {
        match self {
            ShadowKeyword::CascadedHard => "CASCADED_SHADOWS_HARD",
            ShadowKeyword::CascadedSoft => "CASCADED_SHADOWS_SOFT",
            ShadowKeyword::AtlasHard => "SHADOWS_HARD",
            ShadowKeyword::AtlasSoft => "SHADOWS_SOFT",
        }
    }
}

/// Pixel rectangle inside a render target.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.max_x() && other.x < self.max_x() && self.y < other.max_y() && other.y < self.max_y()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x && other.y >= self.y && other.max_x() <= self.max_x() && other.max_y() <= self.max_y()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    SetShadowRenderTarget { target: ShadowMapHandle, clear_depth: bool },
    ClearRenderTarget { flags: ClearFlags, color: Vec4 },
    SetViewport(Rect),
    EnableScissor(Rect),
    DisableScissor,
    SetViewProjection { view: Mat4, projection: Mat4 },
    SetFloat(ShaderGlobal, f32),
    SetVector(ShaderGlobal, Vec4),
    SetVectorArray(ShaderGlobal, Vec<Vec4>),
    SetMatrixArray(ShaderGlobal, Vec<Mat4>),
    SetTexture(ShaderGlobal, ShadowMapHandle),
    SetKeyword(ShadowKeyword, bool),
    BeginSample(&'static str),
    EndSample(&'static str),
}

/// Recorded GPU state changes, drained by [`super::context::RenderContext::execute`].
#[derive(Debug, Default)]
pub struct CommandList {
    name: &'static str,
    commands: Vec<RenderCommand>,
}

impl CommandList {
    pub fn new(name: &'static str) -> Self {
        Self { name, commands: Vec::new() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, RenderCommand> {
        self.commands.drain(..)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    pub fn set_shadow_render_target(&mut self, target: ShadowMapHandle) {
        self.push(RenderCommand::SetShadowRenderTarget { target, clear_depth: true });
    }

    pub fn clear_render_target(&mut self, flags: ClearFlags, color: Vec4) {
        self.push(RenderCommand::ClearRenderTarget { flags, color });
    }

    pub fn set_viewport(&mut self, rect: Rect) {
        self.push(RenderCommand::SetViewport(rect));
    }

    pub fn enable_scissor(&mut self, rect: Rect) {
        self.push(RenderCommand::EnableScissor(rect));
    }

    pub fn disable_scissor(&mut self) {
        self.push(RenderCommand::DisableScissor);
    }

    pub fn set_view_projection(&mut self, view: Mat4, projection: Mat4) {
        self.push(RenderCommand::SetViewProjection { view, projection });
    }

    pub fn set_float(&mut self, global: ShaderGlobal, value: f32) {
        self.push(RenderCommand::SetFloat(global, value));
    }

    pub fn set_vector(&mut self, global: ShaderGlobal, value: Vec4) {
        self.push(RenderCommand::SetVector(global, value));
    }

    pub fn set_vector_array(&mut self, global: ShaderGlobal, values: &[Vec4]) {
        self.push(RenderCommand::SetVectorArray(global, values.to_vec()));
    }

    pub fn set_matrix_array(&mut self, global: ShaderGlobal, values: &[Mat4]) {
        self.push(RenderCommand::SetMatrixArray(global, values.to_vec()));
    }

    pub fn set_texture(&mut self, global: ShaderGlobal, texture: ShadowMapHandle) {
        self.push(RenderCommand::SetTexture(global, texture));
    }

    pub fn set_keyword(&mut self, keyword: ShadowKeyword, enabled: bool) {
        self.push(RenderCommand::SetKeyword(keyword, enabled));
    }

    pub fn disable_keyword(&mut self, keyword: ShadowKeyword) {
        self.set_keyword(keyword, false);
    }

    pub fn begin_sample(&mut self, label: &'static str) {
        self.push(RenderCommand::BeginSample(label));
    }

    pub fn end_sample(&mut self, label: &'static str) {
        self.push(RenderCommand::EndSample(label));
    }
}
