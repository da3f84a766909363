//! Interface to the visibility collaborator.
//!
//! The forward pipeline never computes light visibility or shadow frusta itself. It asks a
//! [`Culler`] for per-camera [`CullingResults`] and reads everything shadow related from there.

use glam::{Mat4, Vec3, Vec4};

use crate::camera::{Camera, CullingParameters};
use crate::light::VisibleLight;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: min.max(max) }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    /// True when the box holds non-finite values or is inverted on some axis. Flat boxes such
    /// as ground planes and single points are valid.
    pub fn is_degenerate(&self) -> bool {
        !self.min.is_finite() || !self.max.is_finite() || self.max.cmplt(self.min).any()
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }
}

/// Per-split culling data. `culling_sphere.w` is the sphere radius.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShadowSplitData {
    pub culling_sphere: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub split: ShadowSplitData,
}

/// One directional shadow split request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeRequest {
    pub light_index: usize,
    pub split_index: usize,
    pub split_count: usize,
    pub split_ratios: Vec3,
    pub resolution: u32,
    pub near_plane_offset: f32,
}

/// Per-light entry of the light index map. `None` removes the light from per-object shading.
pub type LightIndexMap = Vec<Option<usize>>;

pub trait CullingResults {
    fn visible_lights(&self) -> &[VisibleLight];

    /// Bounds of everything casting a shadow from this light, or `None` when nothing does.
    fn shadow_caster_bounds(&self, light_index: usize) -> Option<Aabb>;

    /// `None` when the split is degenerate and no shadow can be rendered for it.
    fn directional_shadow_matrices(&self, request: &CascadeRequest) -> Option<ShadowMatrices>;

    fn spot_shadow_matrices(&self, light_index: usize) -> Option<ShadowMatrices>;

    fn light_index_map(&self) -> LightIndexMap;

    fn set_light_index_map(&mut self, map: LightIndexMap);
}

pub trait Culler {
    type Results: CullingResults;

    fn cull(&mut self, camera: &Camera, params: &CullingParameters) -> Self::Results;
}
