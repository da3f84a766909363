use glam::{Mat4, Vec2, Vec4};

use super::commands::Rect;
use super::SHADOW_TILE_BORDER;

/// Clip space [-1, 1] to shadow-map texture space [0, 1] on x, y and z.
const TEXTURE_SPACE_BIAS: Mat4 = Mat4::from_cols(
    Vec4::new(0.5, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 0.5, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 0.0),
    Vec4::new(0.5, 0.5, 0.5, 1.0),
);

/// Viewport, inset scissor and grid offset of one shadow tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowTile {
    pub viewport: Rect,
    pub scissor: Rect,
    pub offset: Vec2,
}

/// World space to shadow-map texture space for the given light view and projection.
///
/// On reversed-Z backends row 2 of the projection is negated first so depth comparisons in the
/// shader read the same way on every backend.
pub fn world_to_shadow_matrix(view: Mat4, projection: Mat4, reversed_z: bool) -> Mat4 {
    let mut projection = projection;
    if reversed_z {
        projection.x_axis.z = -projection.x_axis.z;
        projection.y_axis.z = -projection.y_axis.z;
        projection.z_axis.z = -projection.z_axis.z;
        projection.w_axis.z = -projection.w_axis.z;
    }
    TEXTURE_SPACE_BIAS * (projection * view)
}

/// Tile `index` of a `split`×`split` grid of `tile_size` pixel tiles.
pub fn shadow_tile(index: usize, split: usize, tile_size: f32) -> ShadowTile {
    let split = split.max(1);
    let offset = Vec2::new((index % split) as f32, (index / split) as f32);
    let viewport = Rect::new(offset.x * tile_size, offset.y * tile_size, tile_size, tile_size);
    let scissor = Rect::new(
        viewport.x + SHADOW_TILE_BORDER,
        viewport.y + SHADOW_TILE_BORDER,
        (tile_size - 2.0 * SHADOW_TILE_BORDER).max(0.0),
        (tile_size - 2.0 * SHADOW_TILE_BORDER).max(0.0),
    );
    ShadowTile { viewport, scissor, offset }
}

/// Grid dimension of the shadow atlas for `tile_count` tiles: 1, 2, 3 or 4.
pub fn atlas_split_for_tiles(tile_count: usize) -> usize {
    match tile_count {
        0 | 1 => 1,
        2..=4 => 2,
        5..=9 => 3,
        _ => 4,
    }
}

/// Squeezes a full texture-space matrix into one quadrant of the 2×2 cascade map.
pub fn cascade_tile_matrix(offset: Vec2) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(offset.x * 0.5, offset.y * 0.5, 0.0, 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rand::{Rng, SeedableRng};

    fn light_view() -> Mat4 {
        Mat4::look_at_rh(Vec3::new(4.0, 10.0, 3.0), Vec3::ZERO, Vec3::Y)
    }

    fn frustum_corners(projection: Mat4, view: Mat4) -> Vec<glam::Vec3> {
        let inverse = (projection * view).inverse();
        let mut corners = Vec::with_capacity(8);
        for &x in &[-1.0, 1.0] {
            for &y in &[-1.0, 1.0] {
                for &z in &[-1.0, 1.0] {
                    corners.push(inverse.project_point3(Vec3::new(x, y, z)));
                }
            }
        }
        corners
    }

    fn assert_in_unit_cube(matrix: Mat4, corners: &[Vec3]) {
        for corner in corners {
            let texture = matrix.project_point3(*corner);
            for value in texture.to_array() {
                assert!((-1e-3..=1.0 + 1e-3).contains(&value), "{texture:?} escaped texture space");
            }
        }
    }

    #[test]
    fn frustum_corners_land_in_texture_space() {
        let view = light_view();
        let projection = Mat4::orthographic_rh_gl(-8.0, 8.0, -8.0, 8.0, 0.5, 40.0);
        let corners = frustum_corners(projection, view);
        assert_in_unit_cube(world_to_shadow_matrix(view, projection, false), &corners);
        assert_in_unit_cube(world_to_shadow_matrix(view, projection, true), &corners);

        let spot = Mat4::perspective_rh_gl(1.2, 1.0, 0.2, 25.0);
        let corners = frustum_corners(spot, view);
        assert_in_unit_cube(world_to_shadow_matrix(view, spot, false), &corners);
    }

    #[test]
    fn reversed_z_flips_depth_only() {
        let view = light_view();
        let projection = Mat4::orthographic_rh_gl(-8.0, 8.0, -8.0, 8.0, 0.5, 40.0);
        let standard = world_to_shadow_matrix(view, projection, false);
        let reversed = world_to_shadow_matrix(view, projection, true);
        let point = Vec3::new(1.0, 0.5, -2.0);
        let a = standard.project_point3(point);
        let b = reversed.project_point3(point);
        assert!((a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5);
        assert!((a.z + b.z - 1.0).abs() < 1e-5, "reversed depth should mirror around 0.5");
    }

    #[test]
    fn builder_is_idempotent() {
        let view = light_view();
        let projection = Mat4::perspective_rh_gl(0.9, 1.0, 0.1, 30.0);
        for reversed in [false, true] {
            let first = world_to_shadow_matrix(view, projection, reversed);
            let second = world_to_shadow_matrix(view, projection, reversed);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn tiles_stay_in_grid_and_never_overlap() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..64 {
            let split = rng.gen_range(1..=4usize);
            let tile_size = rng.gen_range(16..=2048u32) as f32;
            let tiles: Vec<ShadowTile> = (0..split * split).map(|i| shadow_tile(i, split, tile_size)).collect();
            for (i, tile) in tiles.iter().enumerate() {
                assert!(tile.offset.x >= 0.0 && tile.offset.x < split as f32);
                assert!(tile.offset.y >= 0.0 && tile.offset.y < split as f32);
                assert!(tile.viewport.contains(&tile.scissor));
                for other in &tiles[i + 1..] {
                    assert!(!tile.viewport.overlaps(&other.viewport));
                    assert!(!tile.scissor.overlaps(&other.scissor));
                }
            }
        }
    }

    #[test]
    fn scissor_is_inset_by_border() {
        let tile = shadow_tile(5, 3, 256.0);
        assert_eq!(tile.offset, Vec2::new(2.0, 1.0));
        assert_eq!(tile.viewport, Rect::new(512.0, 256.0, 256.0, 256.0));
        assert_eq!(tile.scissor, Rect::new(516.0, 260.0, 248.0, 248.0));
    }

    #[test]
    fn split_factor_is_monotone() {
        assert_eq!(atlas_split_for_tiles(1), 1);
        for count in 2..=4 {
            assert_eq!(atlas_split_for_tiles(count), 2);
        }
        for count in 5..=9 {
            assert_eq!(atlas_split_for_tiles(count), 3);
        }
        for count in 10..=16 {
            assert_eq!(atlas_split_for_tiles(count), 4);
        }
        let mut previous = 0;
        for count in 1..=32 {
            let split = atlas_split_for_tiles(count);
            assert!(split >= previous);
            assert!(split * split >= count.min(16));
            previous = split;
        }
    }

    #[test]
    fn cascade_tile_matrix_maps_into_quadrant() {
        let tile = cascade_tile_matrix(Vec2::new(1.0, 1.0));
        let corner = tile.project_point3(Vec3::new(0.0, 0.0, 0.25));
        assert_eq!(corner, Vec3::new(0.5, 0.5, 0.25));
        let far = tile.project_point3(Vec3::new(1.0, 1.0, 0.75));
        assert_eq!(far, Vec3::new(1.0, 1.0, 0.75));
    }
}
