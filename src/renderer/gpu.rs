//! wgpu side of the forward lighting setup: pooled shadow-map depth textures, the uniform
//! blocks that carry [`ShaderGlobals`] to the shaders, and [`WgpuContext`], the
//! [`RenderContext`] that ties them to a device.

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::collections::BTreeMap;

use super::commands::{CommandList, Rect, RenderCommand, ShaderGlobal, ShadowKeyword};
use super::context::{DrawSettings, GeometryPass, RenderContext, ShadowDraw, ShadowMapHandle};
use super::globals::ShaderGlobals;
use crate::camera::Camera;
use crate::culling::CullingResults;
use super::{CASCADE_MATRIX_SLOTS, MAX_SHADOW_CASCADES, MAX_VISIBLE_LIGHTS};

pub const SHADOW_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Frames a released map may sit unused before the pool drops it.
pub const DEFAULT_MAX_IDLE_FRAMES: u32 = 3;

struct PooledMap<T> {
    size: u32,
    resource: T,
    idle_frames: u32,
}

/// Transient shadow maps keyed by size. Released maps go to a free list and are reused by the
/// next acquire of the same size; maps idle for longer than `max_idle_frames` are dropped.
pub struct ShadowMapPool<T> {
    live: BTreeMap<ShadowMapHandle, (u32, T)>,
    free: Vec<PooledMap<T>>,
    next_id: u32,
    max_idle_frames: u32,
}

impl<T> Default for ShadowMapPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_FRAMES)
    }
}

impl<T> ShadowMapPool<T> {
    pub fn new(max_idle_frames: u32) -> Self {
        Self { live: BTreeMap::new(), free: Vec::new(), next_id: 0, max_idle_frames }
    }

    pub fn acquire_with(&mut self, size: u32, create: impl FnOnce(u32) -> T) -> ShadowMapHandle {
        let resource = match self.free.iter().position(|entry| entry.size == size) {
            Some(index) => self.free.swap_remove(index).resource,
            None => create(size),
        };
        self.next_id = self.next_id.wrapping_add(1);
        let handle = ShadowMapHandle::new(self.next_id);
        self.live.insert(handle, (size, resource));
        handle
    }

    /// Returns false when `handle` is not live.
    pub fn release(&mut self, handle: ShadowMapHandle) -> bool {
        match self.live.remove(&handle) {
            Some((size, resource)) => {
                self.free.push(PooledMap { size, resource, idle_frames: 0 });
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: ShadowMapHandle) -> Option<&T> {
        self.live.get(&handle).map(|(_, resource)| resource)
    }

    pub fn size_of(&self, handle: ShadowMapHandle) -> Option<u32> {
        self.live.get(&handle).map(|(size, _)| *size)
    }

    pub fn end_frame(&mut self) {
        let max_idle = self.max_idle_frames;
        self.free.retain_mut(|entry| {
            entry.idle_frames += 1;
            entry.idle_frames <= max_idle
        });
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

pub struct ShadowMapTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl ShadowMapTexture {
    pub fn new(device: &wgpu::Device, size: u32) -> Self {
        let size = size.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Map"),
            size: wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADOW_MAP_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Shadow Map View"),
            format: Some(SHADOW_MAP_FORMAT),
            dimension: Some(wgpu::TextureViewDimension::D2),
            ..Default::default()
        });
        Self { texture, view }
    }
}

impl ShadowMapPool<ShadowMapTexture> {
    pub fn acquire_texture(&mut self, device: &wgpu::Device, size: u32) -> ShadowMapHandle {
        self.acquire_with(size, |size| ShadowMapTexture::new(device, size))
    }

    pub fn view(&self, handle: ShadowMapHandle) -> Result<&wgpu::TextureView> {
        self.get(handle).map(|map| &map.view).ok_or_else(|| anyhow!("Shadow map {} is not live", handle.id()))
    }
}

/// Comparison sampler for shadow lookups. Reversed-Z backends store nearer depth as larger.
pub fn create_shadow_sampler(device: &wgpu::Device, reversed_z: bool) -> wgpu::Sampler {
    let compare = if reversed_z { wgpu::CompareFunction::GreaterEqual } else { wgpu::CompareFunction::LessEqual };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Shadow Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        lod_min_clamp: 0.0,
        lod_max_clamp: 0.0,
        compare: Some(compare),
        anisotropy_clamp: 1,
        border_color: None,
    })
}

fn copy_vectors<const N: usize>(globals: &ShaderGlobals, global: ShaderGlobal) -> [[f32; 4]; N] {
    let mut out = [[0.0; 4]; N];
    if let Some(values) = globals.vector_array(global) {
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value.to_array();
        }
    }
    out
}

fn copy_matrices<const N: usize>(globals: &ShaderGlobals, global: ShaderGlobal) -> [[[f32; 4]; 4]; N] {
    let mut out = [[[0.0; 4]; 4]; N];
    if let Some(values) = globals.matrix_array(global) {
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value.to_cols_array_2d();
        }
    }
    out
}

fn vector(globals: &ShaderGlobals, global: ShaderGlobal) -> [f32; 4] {
    globals.vector(global).unwrap_or(Vec4::ZERO).to_array()
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightsUniform {
    pub colors: [[f32; 4]; MAX_VISIBLE_LIGHTS],
    pub directions_or_positions: [[f32; 4]; MAX_VISIBLE_LIGHTS],
    pub attenuations: [[f32; 4]; MAX_VISIBLE_LIGHTS],
    pub spot_directions: [[f32; 4]; MAX_VISIBLE_LIGHTS],
    pub light_indices_offset_and_count: [f32; 4],
}

impl LightsUniform {
    pub fn from_globals(globals: &ShaderGlobals) -> Self {
        Self {
            colors: copy_vectors(globals, ShaderGlobal::VisibleLightColors),
            directions_or_positions: copy_vectors(globals, ShaderGlobal::VisibleLightDirectionsOrPositions),
            attenuations: copy_vectors(globals, ShaderGlobal::VisibleLightAttenuations),
            spot_directions: copy_vectors(globals, ShaderGlobal::VisibleLightSpotDirections),
            light_indices_offset_and_count: vector(globals, ShaderGlobal::LightIndicesOffsetAndCount),
        }
    }
}

/// `params`: x shadow bias, y cascaded shadow strength. `keywords[i]` is 1 when
/// `ShadowKeyword::ALL[i]` is enabled.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowsUniform {
    pub world_to_shadow: [[[f32; 4]; 4]; MAX_VISIBLE_LIGHTS],
    pub cascade_world_to_shadow: [[[f32; 4]; 4]; CASCADE_MATRIX_SLOTS],
    pub shadow_data: [[f32; 4]; MAX_VISIBLE_LIGHTS],
    pub cascade_culling_spheres: [[f32; 4]; MAX_SHADOW_CASCADES],
    pub shadow_map_size: [f32; 4],
    pub cascaded_shadow_map_size: [f32; 4],
    pub global_shadow_data: [f32; 4],
    pub params: [f32; 4],
    pub keywords: [u32; 4],
}

impl ShadowsUniform {
    pub fn from_globals(globals: &ShaderGlobals) -> Self {
        let mut keywords = [0u32; 4];
        for (flag, keyword) in keywords.iter_mut().zip(ShadowKeyword::ALL) {
            *flag = globals.keyword_enabled(keyword) as u32;
        }
        Self {
            world_to_shadow: copy_matrices(globals, ShaderGlobal::WorldToShadowMatrices),
            cascade_world_to_shadow: copy_matrices(globals, ShaderGlobal::WorldToShadowCascadeMatrices),
            shadow_data: copy_vectors(globals, ShaderGlobal::ShadowData),
            cascade_culling_spheres: copy_vectors(globals, ShaderGlobal::CascadeCullingSpheres),
            shadow_map_size: vector(globals, ShaderGlobal::ShadowMapSize),
            cascaded_shadow_map_size: vector(globals, ShaderGlobal::CascadedShadowMapSize),
            global_shadow_data: vector(globals, ShaderGlobal::GlobalShadowData),
            params: [
                globals.float(ShaderGlobal::ShadowBias).unwrap_or(0.0),
                globals.float(ShaderGlobal::CascadedShadowStrength).unwrap_or(0.0),
                0.0,
                0.0,
            ],
            keywords,
        }
    }

    pub fn cascade_matrix(&self, slot: usize) -> Option<Mat4> {
        self.cascade_world_to_shadow.get(slot).map(Mat4::from_cols_array_2d)
    }
}

/// GPU copies of the light and shadow uniform blocks, refreshed once per camera.
pub struct ForwardLightingBuffers {
    lights: wgpu::Buffer,
    shadows: wgpu::Buffer,
}

impl ForwardLightingBuffers {
    pub fn new(device: &wgpu::Device) -> Self {
        let lights = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Forward Lights Uniform"),
            size: std::mem::size_of::<LightsUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let shadows = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Forward Shadows Uniform"),
            size: std::mem::size_of::<ShadowsUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { lights, shadows }
    }

    pub fn upload(&self, queue: &wgpu::Queue, globals: &ShaderGlobals) {
        queue.write_buffer(&self.lights, 0, bytemuck::bytes_of(&LightsUniform::from_globals(globals)));
        queue.write_buffer(&self.shadows, 0, bytemuck::bytes_of(&ShadowsUniform::from_globals(globals)));
    }

    pub fn lights(&self) -> &wgpu::Buffer {
        &self.lights
    }

    pub fn shadows(&self) -> &wgpu::Buffer {
        &self.shadows
    }
}

/// Requests a device without a surface, for tools and tests.
pub async fn headless_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .context("Failed to request headless adapter")?;
    let device_desc = wgpu::DeviceDescriptor {
        label: Some("Headless Device"),
        required_features: wgpu::Features::empty(),
        required_limits: adapter.limits(),
        experimental_features: wgpu::ExperimentalFeatures::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: wgpu::Trace::default(),
    };
    adapter.request_device(&device_desc).await.context("Failed to request headless device")
}

/// Counters for work a [`WgpuContext`] has issued since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WgpuFrameStats {
    pub shadow_passes: usize,
    pub uniform_uploads: usize,
    pub geometry_passes: usize,
    pub submits: usize,
    pub missing_targets: usize,
}

/// [`RenderContext`] backed by a wgpu device. Shadow maps come from a [`ShadowMapPool`], executed
/// globals are mirrored into [`ForwardLightingBuffers`], and every shadow draw opens a depth-only
/// pass restricted to the current tile.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    reversed_z: bool,
    pool: ShadowMapPool<ShadowMapTexture>,
    buffers: ForwardLightingBuffers,
    sampler: wgpu::Sampler,
    globals: ShaderGlobals,
    encoder: Option<wgpu::CommandEncoder>,
    target: Option<ShadowMapHandle>,
    clear_target: bool,
    viewport: Option<Rect>,
    scissor: Option<Rect>,
    stats: WgpuFrameStats,
}

impl WgpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, reversed_z: bool) -> Self {
        let buffers = ForwardLightingBuffers::new(&device);
        let sampler = create_shadow_sampler(&device, reversed_z);
        Self {
            device,
            queue,
            reversed_z,
            pool: ShadowMapPool::default(),
            buffers,
            sampler,
            globals: ShaderGlobals::new(),
            encoder: None,
            target: None,
            clear_target: false,
            viewport: None,
            scissor: None,
            stats: WgpuFrameStats::default(),
        }
    }

    pub async fn headless(reversed_z: bool) -> Result<Self> {
        let (device, queue) = headless_device().await?;
        Ok(Self::new(device, queue, reversed_z))
    }

    pub fn globals(&self) -> &ShaderGlobals {
        &self.globals
    }

    pub fn buffers(&self) -> &ForwardLightingBuffers {
        &self.buffers
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn pool(&self) -> &ShadowMapPool<ShadowMapTexture> {
        &self.pool
    }

    pub fn stats(&self) -> WgpuFrameStats {
        self.stats
    }

    pub fn live_shadow_maps(&self) -> usize {
        self.pool.live_count()
    }

    /// Trims shadow maps that have sat unused for too long. Call once per frame after the last
    /// camera.
    pub fn end_frame(&mut self) {
        self.pool.end_frame();
    }

    fn run(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::SetShadowRenderTarget { target, clear_depth } => {
                self.target = Some(target);
                self.clear_target = clear_depth;
                self.viewport = None;
                self.scissor = None;
            }
            RenderCommand::SetViewport(rect) => self.viewport = Some(rect),
            RenderCommand::EnableScissor(rect) => self.scissor = Some(rect),
            RenderCommand::DisableScissor => self.scissor = None,
            // Camera clears, caster transforms and profiling labels belong to the geometry layer.
            _ => {}
        }
    }
}

fn clamp_rect(rect: Rect, size: u32) -> (u32, u32, u32, u32) {
    let size = size as f32;
    let x = rect.x.clamp(0.0, size);
    let y = rect.y.clamp(0.0, size);
    let width = rect.width.clamp(0.0, size - x);
    let height = rect.height.clamp(0.0, size - y);
    (x as u32, y as u32, width as u32, height as u32)
}

impl RenderContext for WgpuContext {
    fn reversed_z(&self) -> bool {
        self.reversed_z
    }

    fn execute(&mut self, commands: &mut CommandList) {
        let mut globals_changed = false;
        for command in commands.drain() {
            if self.globals.apply(&command) {
                globals_changed = true;
            } else {
                self.run(command);
            }
        }
        if globals_changed {
            self.buffers.upload(&self.queue, &self.globals);
            self.stats.uniform_uploads += 1;
        }
    }

    fn draw_shadows(&mut self, draw: &ShadowDraw) {
        let Some(handle) = self.target else {
            log::warn!("shadow draw for light {} issued without a shadow render target", draw.light_index);
            self.stats.missing_targets += 1;
            return;
        };
        let (Ok(view), Some(size)) = (self.pool.view(handle), self.pool.size_of(handle)) else {
            log::warn!("shadow map {} released before light {} was drawn", handle.id(), draw.light_index);
            self.stats.missing_targets += 1;
            return;
        };
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Shadow Encoder") })
        });
        let load = if self.clear_target {
            wgpu::LoadOp::Clear(if self.reversed_z { 0.0 } else { 1.0 })
        } else {
            wgpu::LoadOp::Load
        };
        self.clear_target = false;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Shadow Tile Pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations { load, store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        let full = Rect::new(0.0, 0.0, size as f32, size as f32);
        let (x, y, width, height) = clamp_rect(self.viewport.unwrap_or(full), size);
        pass.set_viewport(x as f32, y as f32, width.max(1) as f32, height.max(1) as f32, 0.0, 1.0);
        let (x, y, width, height) = clamp_rect(self.scissor.unwrap_or(full), size);
        pass.set_scissor_rect(x, y, width, height);
        drop(pass);
        self.stats.shadow_passes += 1;
    }

    fn acquire_shadow_map(&mut self, size: u32) -> ShadowMapHandle {
        self.pool.acquire_texture(&self.device, size)
    }

    fn release_shadow_map(&mut self, handle: ShadowMapHandle) {
        self.pool.release(handle);
        if self.target == Some(handle) {
            self.target = None;
        }
    }

    fn setup_camera(&mut self, _camera: &Camera) {
        self.target = None;
        self.viewport = None;
        self.scissor = None;
    }

    fn draw_geometry(
        &mut self,
        _camera: &Camera,
        _culling: &dyn CullingResults,
        _pass: GeometryPass,
        _settings: DrawSettings,
    ) {
        self.stats.geometry_passes += 1;
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.stats.submits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<LightsUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<ShadowsUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<LightsUniform>(), (4 * MAX_VISIBLE_LIGHTS + 1) * 16);
    }

    #[test]
    fn pool_reuses_released_maps_of_the_same_size() {
        let mut created = 0;
        let mut pool: ShadowMapPool<u32> = ShadowMapPool::new(2);
        let first = pool.acquire_with(1024, |size| {
            created += 1;
            size
        });
        assert!(pool.release(first));
        assert!(!pool.release(first));
        let second = pool.acquire_with(1024, |size| {
            created += 1;
            size
        });
        assert_ne!(first, second);
        assert_eq!(created, 1);
        let _other = pool.acquire_with(512, |size| {
            created += 1;
            size
        });
        assert_eq!(created, 2);
        assert_eq!(pool.size_of(second), Some(1024));
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn idle_maps_are_trimmed() {
        let mut pool: ShadowMapPool<()> = ShadowMapPool::new(1);
        let handle = pool.acquire_with(256, |_| ());
        pool.release(handle);
        pool.end_frame();
        assert_eq!(pool.free_count(), 1);
        pool.end_frame();
        assert_eq!(pool.free_count(), 0);
        assert!(pool.get(handle).is_none());
    }

    #[test]
    fn shadows_uniform_packs_globals() {
        let mut globals = ShaderGlobals::new();
        let mut matrices = vec![Mat4::ZERO; CASCADE_MATRIX_SLOTS];
        matrices[4].w_axis.w = 1.0;
        globals.apply(&RenderCommand::SetMatrixArray(ShaderGlobal::WorldToShadowCascadeMatrices, matrices));
        globals.apply(&RenderCommand::SetFloat(ShaderGlobal::ShadowBias, 0.05));
        globals.apply(&RenderCommand::SetKeyword(ShadowKeyword::AtlasSoft, true));
        globals.apply(&RenderCommand::SetVector(ShaderGlobal::GlobalShadowData, Vec4::new(0.5, 100.0, 0.0, 0.0)));

        let block = ShadowsUniform::from_globals(&globals);
        assert_eq!(block.cascade_matrix(4).map(|m| m.w_axis.w), Some(1.0));
        assert_eq!(block.params[0], 0.05);
        assert_eq!(block.global_shadow_data, [0.5, 100.0, 0.0, 0.0]);
        let soft = ShadowKeyword::ALL.iter().position(|k| *k == ShadowKeyword::AtlasSoft).expect("keyword");
        assert_eq!(block.keywords[soft], 1);
        assert_eq!(block.keywords.iter().sum::<u32>(), 1);
    }

    #[test]
    fn headless_pool_creates_depth_textures() {
        let Ok((device, queue)) = pollster::block_on(headless_device()) else {
            eprintln!("skipping: no wgpu adapter available");
            return;
        };
        let mut pool = ShadowMapPool::default();
        let handle = pool.acquire_texture(&device, 512);
        let texture = &pool.get(handle).expect("live map").texture;
        assert_eq!(texture.width(), 512);
        assert_eq!(texture.format(), SHADOW_MAP_FORMAT);
        assert!(pool.view(handle).is_ok());
        let _sampler = create_shadow_sampler(&device, false);

        let buffers = ForwardLightingBuffers::new(&device);
        buffers.upload(&queue, &ShaderGlobals::new());
        assert_eq!(buffers.shadows().size(), std::mem::size_of::<ShadowsUniform>() as u64);
        pool.release(handle);
        assert!(pool.view(handle).is_err());
    }
}
