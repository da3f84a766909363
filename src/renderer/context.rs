use glam::Vec4;
use std::ops::{Deref, DerefMut};

use super::commands::CommandList;
use crate::camera::Camera;
use crate::culling::CullingResults;

/// Opaque id of a temporary shadow-map texture owned by the render context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowMapHandle(u32);

impl ShadowMapHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

/// Shadow-caster draw for one light (or one cascade of the main light).
/// `culling_sphere.w` is the sphere radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowDraw {
    pub light_index: usize,
    pub culling_sphere: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryPass {
    Opaque,
    Skybox,
    Transparent,
    /// Objects whose shaders have no pass this pipeline understands, drawn with an error material.
    ErrorFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawSettings {
    pub dynamic_batching: bool,
    pub instancing: bool,
}

/// Everything the pipeline needs from the graphics backend and the geometry submitter.
pub trait RenderContext {
    /// True when the depth buffer is reversed (near = 1, far = 0).
    fn reversed_z(&self) -> bool;

    /// Executes and drains the recorded commands.
    fn execute(&mut self, commands: &mut CommandList);

    fn draw_shadows(&mut self, draw: &ShadowDraw);

    fn acquire_shadow_map(&mut self, size: u32) -> ShadowMapHandle;

    fn release_shadow_map(&mut self, handle: ShadowMapHandle);

    fn setup_camera(&mut self, camera: &Camera);

    fn draw_geometry(
        &mut self,
        camera: &Camera,
        culling: &dyn CullingResults,
        pass: GeometryPass,
        settings: DrawSettings,
    );

    fn submit(&mut self);
}

/// Shadow maps acquired for one camera. Both maps go back to the context when this drops,
/// whichever way the frame exits.
pub struct FrameTargets<'a, C: RenderContext> {
    context: &'a mut C,
    shadow_map: Option<ShadowMapHandle>,
    cascaded_shadow_map: Option<ShadowMapHandle>,
}

impl<'a, C: RenderContext> FrameTargets<'a, C> {
    pub fn new(context: &'a mut C) -> Self {
        Self { context, shadow_map: None, cascaded_shadow_map: None }
    }

    pub fn acquire_shadow_map(&mut self, size: u32) -> ShadowMapHandle {
        if let Some(previous) = self.shadow_map.take() {
            self.context.release_shadow_map(previous);
        }
        let handle = self.context.acquire_shadow_map(size);
        self.shadow_map = Some(handle);
        handle
    }

    pub fn acquire_cascaded_shadow_map(&mut self, size: u32) -> ShadowMapHandle {
        if let Some(previous) = self.cascaded_shadow_map.take() {
            self.context.release_shadow_map(previous);
        }
        let handle = self.context.acquire_shadow_map(size);
        self.cascaded_shadow_map = Some(handle);
        handle
    }
}

impl<C: RenderContext> Deref for FrameTargets<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.context
    }
}

impl<C: RenderContext> DerefMut for FrameTargets<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.context
    }
}

impl<C: RenderContext> Drop for FrameTargets<'_, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.shadow_map.take() {
            self.context.release_shadow_map(handle);
        }
        if let Some(handle) = self.cascaded_shadow_map.take() {
            self.context.release_shadow_map(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::recording::RecordingContext;

    #[test]
    fn dropping_targets_releases_every_acquired_map() {
        let mut context = RecordingContext::new();
        {
            let mut targets = FrameTargets::new(&mut context);
            targets.acquire_cascaded_shadow_map(1024);
            targets.acquire_shadow_map(1024);
            assert_eq!(targets.live_shadow_maps(), 2);
        }
        assert_eq!(context.live_shadow_maps(), 0);
        assert_eq!(context.log().acquired, 2);
        assert_eq!(context.log().released, 2);
    }

    #[test]
    fn reacquiring_releases_the_previous_map() {
        let mut context = RecordingContext::new();
        {
            let mut targets = FrameTargets::new(&mut context);
            let first = targets.acquire_shadow_map(512);
            let second = targets.acquire_shadow_map(512);
            assert_ne!(first, second);
            assert_eq!(targets.live_shadow_maps(), 1);
        }
        assert_eq!(context.live_shadow_maps(), 0);
    }

    #[test]
    fn nothing_acquired_releases_nothing() {
        let mut context = RecordingContext::new();
        drop(FrameTargets::new(&mut context));
        assert_eq!(context.log().released, 0);
    }
}
