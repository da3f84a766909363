use glam::{Mat4, Vec4};
use std::collections::BTreeMap;

use super::commands::{CommandList, Rect, RenderCommand};
use super::context::{DrawSettings, GeometryPass, RenderContext, ShadowDraw, ShadowMapHandle};
use super::globals::ShaderGlobals;
use crate::camera::{Camera, ClearFlags};
use crate::culling::{CullingResults, LightIndexMap};

/// Shadow-caster draw together with the raster state it was issued under.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedShadowDraw {
    pub target: Option<ShadowMapHandle>,
    pub light_index: usize,
    pub culling_sphere: Vec4,
    pub viewport: Option<Rect>,
    pub scissor: Option<Rect>,
    pub view: Mat4,
    pub projection: Mat4,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedGeometryPass {
    pub pass: GeometryPass,
    pub settings: DrawSettings,
    pub light_index_map: LightIndexMap,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    pub executed_lists: Vec<&'static str>,
    pub commands_executed: usize,
    pub shadow_draws: Vec<RecordedShadowDraw>,
    pub geometry_passes: Vec<RecordedGeometryPass>,
    pub clears: Vec<ClearFlags>,
    pub cameras: usize,
    pub submits: usize,
    pub acquired: usize,
    pub released: usize,
    pub unbalanced_samples: usize,
}

/// CPU render context that executes commands into [`ShaderGlobals`] and logs every draw.
/// Backs the headless report tool and the pipeline tests.
#[derive(Debug, Default)]
pub struct RecordingContext {
    reversed_z: bool,
    globals: ShaderGlobals,
    log: RecordingLog,
    next_handle: u32,
    live: BTreeMap<ShadowMapHandle, u32>,
    target: Option<ShadowMapHandle>,
    viewport: Option<Rect>,
    scissor: Option<Rect>,
    view: Mat4,
    projection: Mat4,
    open_samples: Vec<&'static str>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reversed_z(mut self, reversed_z: bool) -> Self {
        self.reversed_z = reversed_z;
        self
    }

    pub fn globals(&self) -> &ShaderGlobals {
        &self.globals
    }

    pub fn log(&self) -> &RecordingLog {
        &self.log
    }

    pub fn live_shadow_maps(&self) -> usize {
        self.live.len()
    }

    /// Forgets the draw log while keeping global state, as a new frame would.
    pub fn begin_frame(&mut self) {
        self.log = RecordingLog::default();
    }

    fn run(&mut self, command: RenderCommand) {
        if self.globals.apply(&command) {
            return;
        }
        match command {
            RenderCommand::SetShadowRenderTarget { target, .. } => {
                self.target = Some(target);
                self.viewport = None;
                self.scissor = None;
            }
            RenderCommand::ClearRenderTarget { flags, .. } => self.log.clears.push(flags),
            RenderCommand::SetViewport(rect) => self.viewport = Some(rect),
            RenderCommand::EnableScissor(rect) => self.scissor = Some(rect),
            RenderCommand::DisableScissor => self.scissor = None,
            RenderCommand::SetViewProjection { view, projection } => {
                self.view = view;
                self.projection = projection;
            }
            RenderCommand::BeginSample(label) => self.open_samples.push(label),
            RenderCommand::EndSample(label) => {
                if self.open_samples.pop() != Some(label) {
                    self.log.unbalanced_samples += 1;
                }
            }
            _ => {}
        }
    }
}

impl RenderContext for RecordingContext {
    fn reversed_z(&self) -> bool {
        self.reversed_z
    }

    fn execute(&mut self, commands: &mut CommandList) {
        self.log.executed_lists.push(commands.name());
        let recorded: Vec<RenderCommand> = commands.drain().collect();
        self.log.commands_executed += recorded.len();
        for command in recorded {
            self.run(command);
        }
    }

    fn draw_shadows(&mut self, draw: &ShadowDraw) {
        self.log.shadow_draws.push(RecordedShadowDraw {
            target: self.target,
            light_index: draw.light_index,
            culling_sphere: draw.culling_sphere,
            viewport: self.viewport,
            scissor: self.scissor,
            view: self.view,
            projection: self.projection,
        });
    }

    fn acquire_shadow_map(&mut self, size: u32) -> ShadowMapHandle {
        self.next_handle += 1;
        let handle = ShadowMapHandle::new(self.next_handle);
        self.live.insert(handle, size);
        self.log.acquired += 1;
        handle
    }

    fn release_shadow_map(&mut self, handle: ShadowMapHandle) {
        if self.live.remove(&handle).is_some() {
            self.log.released += 1;
        }
        if self.target == Some(handle) {
            self.target = None;
        }
    }

    fn setup_camera(&mut self, _camera: &Camera) {
        self.log.cameras += 1;
        self.target = None;
        self.viewport = None;
        self.scissor = None;
    }

    fn draw_geometry(
        &mut self,
        _camera: &Camera,
        culling: &dyn CullingResults,
        pass: GeometryPass,
        settings: DrawSettings,
    ) {
        self.log.geometry_passes.push(RecordedGeometryPass {
            pass,
            settings,
            light_index_map: culling.light_index_map(),
        });
    }

    fn submit(&mut self) {
        self.log.submits += 1;
        self.log.unbalanced_samples += self.open_samples.len();
        self.open_samples.clear();
    }
}
