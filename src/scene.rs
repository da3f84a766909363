//! Serializable test scene and a CPU reference [`Culler`] over it.

use anyhow::{Context, Result};
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::camera::{Camera, ClearFlags, CullingParameters};
use crate::culling::{Aabb, CascadeRequest, Culler, CullingResults, LightIndexMap, ShadowMatrices, ShadowSplitData};
use crate::light::{LightKind, ShadowMode, VisibleLight};

const MIN_SHADOW_NEAR: f32 = 0.01;

fn default_direction() -> [f32; 3] {
    [0.0, -1.0, 0.0]
}

fn default_color() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

const fn default_intensity() -> f32 {
    1.0
}

const fn default_range() -> f32 {
    10.0
}

const fn default_spot_angle() -> f32 {
    30.0
}

const fn default_shadow_strength() -> f32 {
    1.0
}

const fn default_shadow_bias() -> f32 {
    VisibleLight::DEFAULT_SHADOW_BIAS
}

const fn default_shadow_near_plane() -> f32 {
    VisibleLight::DEFAULT_SHADOW_NEAR_PLANE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLight {
    pub kind: LightKind,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default = "default_direction")]
    pub direction: [f32; 3],
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default = "default_range")]
    pub range: f32,
    #[serde(default = "default_spot_angle")]
    pub spot_angle: f32,
    #[serde(default)]
    pub shadows: ShadowMode,
    #[serde(default = "default_shadow_strength")]
    pub shadow_strength: f32,
    #[serde(default = "default_shadow_bias")]
    pub shadow_bias: f32,
    #[serde(default = "default_shadow_near_plane")]
    pub shadow_near_plane: f32,
}

impl SceneLight {
    pub fn to_visible_light(&self) -> VisibleLight {
        let color = Vec3::from(self.color) * self.intensity;
        let position = Vec3::from(self.position);
        let direction = Vec3::from(self.direction);
        let light = match self.kind {
            LightKind::Directional => VisibleLight::directional(direction, color),
            LightKind::Point => VisibleLight::point(position, self.range, color),
            LightKind::Spot => VisibleLight::spot(position, direction, self.spot_angle, self.range, color),
        };
        light
            .with_shadows(self.shadows, self.shadow_strength)
            .with_shadow_bias(self.shadow_bias)
            .with_shadow_near_plane(self.shadow_near_plane)
    }
}

/// Axis-aligned shadow caster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneCaster {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl SceneCaster {
    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::from(self.min), Vec3::from(self.max))
    }
}

fn default_fov_degrees() -> f32 {
    60.0
}

fn default_near() -> f32 {
    0.3
}

fn default_far() -> f32 {
    1000.0
}

fn default_viewport() -> [u32; 2] {
    [1280, 720]
}

fn default_clear_color() -> bool {
    true
}

fn default_background() -> [f32; 4] {
    [0.19, 0.3, 0.47, 1.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCamera {
    pub position: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
    #[serde(default = "default_fov_degrees")]
    pub fov_y_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    #[serde(default = "default_viewport")]
    pub viewport: [u32; 2],
    #[serde(default = "default_clear_color")]
    pub clear_color: bool,
    #[serde(default = "default_background")]
    pub background: [f32; 4],
}

impl SceneCamera {
    pub fn to_camera(&self) -> Camera {
        let mut camera = Camera::new(
            Vec3::from(self.position),
            Vec3::from(self.target),
            self.fov_y_degrees.to_radians(),
            self.near,
            self.far,
        )
        .with_viewport(self.viewport[0], self.viewport[1]);
        if !self.clear_color {
            camera.clear_flags = ClearFlags::DEPTH;
        }
        camera.background = Vec4::from(self.background);
        camera
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowScene {
    #[serde(default)]
    pub lights: Vec<SceneLight>,
    #[serde(default)]
    pub casters: Vec<SceneCaster>,
    #[serde(default)]
    pub cameras: Vec<SceneCamera>,
}

impl ShadowScene {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Reading scene file {}", path.display()))?;
        serde_json::from_slice::<ShadowScene>(&bytes)
            .with_context(|| format!("Parsing scene file {}", path.display()))
    }

    pub fn cameras(&self) -> Vec<Camera> {
        self.cameras.iter().map(SceneCamera::to_camera).collect()
    }

    pub fn culler(&self) -> SceneCuller {
        SceneCuller::new(
            self.lights.iter().map(SceneLight::to_visible_light).collect(),
            self.casters.iter().map(SceneCaster::bounds).collect(),
        )
    }
}

/// Six clip planes (xyz normal, w distance) pointing inwards.
struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    fn from_view_projection(m: Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(|plane| {
            let length = plane.truncate().length();
            if length > 0.0 {
                plane / length
            } else {
                plane
            }
        });
        Self { planes }
    }

    fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes.iter().all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

/// World-space corners of the camera frustum slice between `near` and `far`.
fn frustum_corners(params: &CullingParameters, near: f32, far: f32) -> [Vec3; 8] {
    let proj = Mat4::perspective_rh_gl(params.fov_y_radians, params.aspect.max(0.0001), near, far);
    let inv = (proj * params.view).inverse();
    let mut corners = [Vec3::ZERO; 8];
    let mut idx = 0;
    for &x in &[-1.0, 1.0] {
        for &y in &[-1.0, 1.0] {
            for &z in &[-1.0, 1.0] {
                let world = inv * Vec4::new(x, y, z, 1.0);
                corners[idx] = world.truncate() / world.w;
                idx += 1;
            }
        }
    }
    corners
}

fn aabb_corners(bounds: &Aabb) -> [Vec3; 8] {
    let (min, max) = (bounds.min, bounds.max);
    [
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(min.x, max.y, max.z),
        Vec3::new(max.x, max.y, max.z),
    ]
}

fn light_up(direction: Vec3) -> Vec3 {
    if Vec3::Y.dot(direction).abs() > 0.95 {
        Vec3::X
    } else {
        Vec3::Y
    }
}

/// Distance along the camera view covered by split boundary `index` of `count`.
fn split_boundary(request: &CascadeRequest, index: usize) -> f32 {
    if index == 0 {
        0.0
    } else if index >= request.split_count {
        1.0
    } else {
        request.split_ratios[index - 1]
    }
}

/// Reference culler: frustum-tests light volumes and answers shadow queries from caster boxes.
#[derive(Debug, Clone, Default)]
pub struct SceneCuller {
    lights: Vec<VisibleLight>,
    casters: Vec<Aabb>,
}

impl SceneCuller {
    pub fn new(lights: Vec<VisibleLight>, casters: Vec<Aabb>) -> Self {
        Self { lights, casters }
    }
}

impl Culler for SceneCuller {
    type Results = SceneCulling;

    /// Directional lights come first, in scene order, then local lights nearest first.
    fn cull(&mut self, _camera: &Camera, params: &CullingParameters) -> SceneCulling {
        let frustum = Frustum::from_view_projection(params.view_projection());
        let mut visible: Vec<VisibleLight> = self
            .lights
            .iter()
            .filter(|light| match light.kind {
                LightKind::Directional => true,
                LightKind::Point | LightKind::Spot => frustum.intersects_sphere(light.position(), light.range),
            })
            .cloned()
            .collect();
        visible.sort_by(|a, b| {
            let key = |light: &VisibleLight| match light.kind {
                LightKind::Directional => (0, 0.0),
                _ => (1, light.position().distance_squared(params.position)),
            };
            let (ka, kb) = (key(a), key(b));
            ka.0.cmp(&kb.0).then(ka.1.total_cmp(&kb.1))
        });
        let light_index_map = (0..visible.len()).map(Some).collect();
        SceneCulling { params: *params, lights: visible, casters: self.casters.clone(), light_index_map }
    }
}

#[derive(Debug, Clone)]
pub struct SceneCulling {
    params: CullingParameters,
    lights: Vec<VisibleLight>,
    casters: Vec<Aabb>,
    light_index_map: LightIndexMap,
}

impl SceneCulling {
    fn caster_bounds_in_sphere(&self, center: Vec3, radius: f32) -> Option<Aabb> {
        self.casters
            .iter()
            .filter(|caster| caster.intersects_sphere(center, radius))
            .fold(None, |acc: Option<Aabb>, caster| Some(acc.map_or(*caster, |bounds| bounds.union(caster))))
    }
}

impl CullingResults for SceneCulling {
    fn visible_lights(&self) -> &[VisibleLight] {
        &self.lights
    }

    fn shadow_caster_bounds(&self, light_index: usize) -> Option<Aabb> {
        let light = self.lights.get(light_index)?;
        match light.kind {
            LightKind::Directional => self.caster_bounds_in_sphere(self.params.position, self.params.shadow_distance),
            LightKind::Point | LightKind::Spot => self.caster_bounds_in_sphere(light.position(), light.range),
        }
    }

    fn directional_shadow_matrices(&self, request: &CascadeRequest) -> Option<ShadowMatrices> {
        let light = self.lights.get(request.light_index)?;
        if light.kind != LightKind::Directional || request.split_index >= request.split_count || request.resolution == 0
        {
            return None;
        }
        let direction = light.forward().normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }

        let params = &self.params;
        let distance = params.shadow_distance.min(params.far);
        let near = (split_boundary(request, request.split_index) * distance).max(params.near);
        let far = (split_boundary(request, request.split_index + 1) * distance).min(distance);
        if !(far > near) {
            return None;
        }

        let corners = frustum_corners(params, near, far);
        let mut center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
        let radius = corners.iter().map(|corner| corner.distance(center)).fold(0.0f32, f32::max);
        if !(radius > 0.0 && radius.is_finite()) {
            return None;
        }

        // Snap the sphere center to whole shadow texels so the map does not shimmer as the
        // camera moves.
        let up = light_up(direction);
        let rotation = Mat4::look_at_rh(Vec3::ZERO, direction, up);
        let texel = 2.0 * radius / request.resolution as f32;
        let mut light_space = rotation.transform_point3(center);
        light_space.x = (light_space.x / texel).floor() * texel;
        light_space.y = (light_space.y / texel).floor() * texel;
        center = rotation.inverse().transform_point3(light_space);

        let behind = self
            .caster_bounds_in_sphere(center, f32::INFINITY)
            .map(|bounds| {
                aabb_corners(&bounds)
                    .iter()
                    .map(|corner| -(*corner - center).dot(direction) - radius)
                    .fold(0.0f32, f32::max)
            })
            .unwrap_or(0.0);
        let pull_back = radius + behind + request.near_plane_offset.max(0.0);
        let eye = center - direction * pull_back;
        let view = Mat4::look_at_rh(eye, center, up);
        let projection = Mat4::orthographic_rh_gl(-radius, radius, -radius, radius, 0.0, pull_back + radius);

        Some(ShadowMatrices { view, projection, split: ShadowSplitData { culling_sphere: center.extend(radius) } })
    }

    fn spot_shadow_matrices(&self, light_index: usize) -> Option<ShadowMatrices> {
        let light = self.lights.get(light_index)?;
        if light.kind != LightKind::Spot {
            return None;
        }
        let fov = light.spot_angle.to_radians();
        let near = light.shadow_near_plane.max(MIN_SHADOW_NEAR);
        if !(fov > 0.0 && fov < std::f32::consts::PI) || !(light.range > near) {
            return None;
        }
        let direction = light.forward().normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }
        let position = light.position();
        let view = Mat4::look_at_rh(position, position + direction, light_up(direction));
        let projection = Mat4::perspective_rh_gl(fov, 1.0, near, light.range);
        Some(ShadowMatrices { view, projection, split: ShadowSplitData { culling_sphere: position.extend(light.range) } })
    }

    fn light_index_map(&self) -> LightIndexMap {
        self.light_index_map.clone()
    }

    fn set_light_index_map(&mut self, map: LightIndexMap) {
        self.light_index_map = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, 60f32.to_radians(), 0.3, 200.0).with_viewport(800, 600)
    }

    fn culled(lights: Vec<VisibleLight>, casters: Vec<Aabb>, shadow_distance: f32) -> SceneCulling {
        let camera = camera();
        let mut params = camera.culling_parameters().expect("valid camera");
        params.shadow_distance = shadow_distance;
        SceneCuller::new(lights, casters).cull(&camera, &params)
    }

    fn ground() -> Aabb {
        Aabb::new(Vec3::new(-20.0, -1.0, -20.0), Vec3::new(20.0, 0.0, 20.0))
    }

    #[test]
    fn directional_lights_sort_first() {
        let culling = culled(
            vec![
                VisibleLight::point(Vec3::new(0.0, 1.0, 0.0), 5.0, Vec3::ONE),
                VisibleLight::directional(Vec3::NEG_Y, Vec3::ONE),
            ],
            vec![],
            50.0,
        );
        assert_eq!(culling.visible_lights()[0].kind, LightKind::Directional);
        assert_eq!(culling.light_index_map(), vec![Some(0), Some(1)]);
    }

    #[test]
    fn lights_behind_the_camera_are_culled() {
        let culling = culled(vec![VisibleLight::point(Vec3::new(0.0, 5.0, 40.0), 2.0, Vec3::ONE)], vec![], 50.0);
        assert!(culling.visible_lights().is_empty());
    }

    #[test]
    fn caster_bounds_follow_light_reach() {
        let far_box = Aabb::new(Vec3::new(90.0, 0.0, 0.0), Vec3::new(91.0, 1.0, 1.0));
        let culling = culled(
            vec![VisibleLight::spot(Vec3::new(0.0, 4.0, 0.0), Vec3::NEG_Y, 60.0, 8.0, Vec3::ONE)],
            vec![ground(), far_box],
            50.0,
        );
        assert_eq!(culling.shadow_caster_bounds(0), Some(ground()));
        assert_eq!(culling.shadow_caster_bounds(3), None);
    }

    #[test]
    fn cascade_spheres_grow_with_split_distance() {
        let sun = VisibleLight::directional(Vec3::new(0.3, -1.0, 0.2), Vec3::ONE);
        let culling = culled(vec![sun], vec![ground()], 100.0);
        let ratios = Vec3::new(0.067, 0.2, 0.467);
        let radii: Vec<f32> = (0..4)
            .map(|split_index| {
                let request = CascadeRequest {
                    light_index: 0,
                    split_index,
                    split_count: 4,
                    split_ratios: ratios,
                    resolution: 512,
                    near_plane_offset: 0.2,
                };
                culling.directional_shadow_matrices(&request).expect("cascade").split.culling_sphere.w
            })
            .collect();
        assert!(radii.windows(2).all(|pair| pair[0] < pair[1]), "radii {radii:?}");
    }

    #[test]
    fn cascade_projection_covers_its_sphere() {
        let sun = VisibleLight::directional(Vec3::new(0.0, -1.0, -0.5), Vec3::ONE);
        let culling = culled(vec![sun], vec![ground()], 60.0);
        let request = CascadeRequest {
            light_index: 0,
            split_index: 0,
            split_count: 1,
            split_ratios: Vec3::X,
            resolution: 1024,
            near_plane_offset: 0.2,
        };
        let matrices = culling.directional_shadow_matrices(&request).expect("split");
        let sphere = matrices.split.culling_sphere;
        let clip = matrices.projection * matrices.view * sphere.truncate().extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3, "center maps to {ndc:?}");
        assert!(ndc.z > -1.0 && ndc.z < 1.0);
    }

    #[test]
    fn invalid_requests_have_no_matrices() {
        let culling = culled(
            vec![
                VisibleLight::directional(Vec3::NEG_Y, Vec3::ONE),
                VisibleLight::point(Vec3::ZERO, 5.0, Vec3::ONE),
                VisibleLight::spot(Vec3::Y, Vec3::NEG_Y, 0.0, 5.0, Vec3::ONE),
            ],
            vec![ground()],
            50.0,
        );
        let request = CascadeRequest {
            light_index: 0,
            split_index: 2,
            split_count: 2,
            split_ratios: Vec3::new(0.25, 0.0, 0.0),
            resolution: 512,
            near_plane_offset: 0.0,
        };
        assert!(culling.directional_shadow_matrices(&request).is_none());
        assert!(culling.spot_shadow_matrices(1).is_none());
        assert!(culling.spot_shadow_matrices(2).is_none());
    }

    #[test]
    fn loads_scene_with_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("scene.json");
        fs::write(
            &path,
            r#"{
                "lights": [{ "kind": "spot", "position": [0, 3, 0], "shadows": "hard" }],
                "casters": [{ "min": [-1, 0, -1], "max": [1, 1, 1] }],
                "cameras": [{ "position": [0, 2, 8] }]
            }"#,
        )
        .expect("write scene");
        let scene = ShadowScene::load_from_path(&path).expect("scene loads");
        let light = scene.lights[0].to_visible_light();
        assert_eq!(light.shadows, ShadowMode::Hard);
        assert_eq!(light.spot_angle, 30.0);
        assert!((light.forward() - Vec3::NEG_Y).length() < 1e-5);
        let camera = &scene.cameras()[0];
        assert_eq!(camera.viewport, (1280, 720));
        assert!(camera.culling_parameters().is_some());
    }

    #[test]
    fn malformed_scene_reports_path() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write scene");
        let err = ShadowScene::load_from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
