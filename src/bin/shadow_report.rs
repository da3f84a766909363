use anyhow::{anyhow, Context, Result};
use kestrel_forward::camera::Camera;
use kestrel_forward::cli::CliOverrides;
use kestrel_forward::config::PipelineConfig;
use kestrel_forward::renderer::{
    CameraMetrics, ForwardPipeline, RecordingContext, RenderContext, ShaderGlobals, ShadowKeyword, WgpuContext,
};
use kestrel_forward::scene::{SceneCuller, ShadowScene};
use serde::Serialize;
use simple_logger::SimpleLogger;
use std::process;

#[derive(Debug, Serialize)]
struct TileReport {
    light_index: usize,
    tile_index: usize,
    offset: [f32; 2],
}

#[derive(Debug, Serialize)]
struct CameraReport {
    camera: usize,
    skipped: bool,
    visible_lights: usize,
    shaded_lights: usize,
    truncated_lights: usize,
    main_light: bool,
    cascades_rendered: usize,
    atlas_split: usize,
    atlas_tiles: Vec<TileReport>,
    dropped_shadows: Vec<usize>,
    keywords: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct Report {
    backend: &'static str,
    shadow_map_size: u32,
    shadow_distance: f32,
    cascades: usize,
    shadow_draws: usize,
    shadow_maps_leaked: usize,
    cameras: Vec<CameraReport>,
}

/// What the report reads back from a render context after each camera.
trait ReportBackend: RenderContext {
    const NAME: &'static str;

    fn shader_globals(&self) -> &ShaderGlobals;
    fn shadow_draw_count(&self) -> usize;
    fn live_maps(&self) -> usize;
    fn finish_frame(&mut self) {}
}

impl ReportBackend for RecordingContext {
    const NAME: &'static str = "recording";

    fn shader_globals(&self) -> &ShaderGlobals {
        self.globals()
    }

    fn shadow_draw_count(&self) -> usize {
        self.log().shadow_draws.len()
    }

    fn live_maps(&self) -> usize {
        self.live_shadow_maps()
    }
}

impl ReportBackend for WgpuContext {
    const NAME: &'static str = "wgpu";

    fn shader_globals(&self) -> &ShaderGlobals {
        self.globals()
    }

    fn shadow_draw_count(&self) -> usize {
        self.stats().shadow_passes
    }

    fn live_maps(&self) -> usize {
        self.live_shadow_maps()
    }

    fn finish_frame(&mut self) {
        self.end_frame();
    }
}

fn main() {
    if SimpleLogger::new().with_level(log::LevelFilter::Warn).env().init().is_err() {
        eprintln!("Failed to init logger");
    }
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = CliOverrides::parse_from_env()?;
    let scene_path = cli
        .scene_path()
        .cloned()
        .ok_or_else(|| anyhow!("missing scene: shadow_report --scene <scene.json> [--config <config.json>] [--gpu on]"))?;
    let mut config = match cli.config_path() {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let use_gpu = cli.use_gpu();
    let overrides = cli.into_config_overrides();
    if !overrides.is_empty() {
        log::info!("command line overrides: {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);

    let scene = ShadowScene::load_from_path(&scene_path)?;
    let cameras = scene.cameras();
    let mut culler = scene.culler();
    let mut pipeline = ForwardPipeline::new(config);
    let report = if use_gpu {
        let mut context =
            pollster::block_on(WgpuContext::headless(false)).context("Creating headless wgpu context")?;
        build_report(&mut context, &mut pipeline, &mut culler, &cameras)
    } else {
        build_report(&mut RecordingContext::new(), &mut pipeline, &mut culler, &cameras)
    };
    let json = serde_json::to_string_pretty(&report).context("Serializing shadow report")?;
    println!("{json}");
    Ok(())
}

fn build_report<B: ReportBackend>(
    context: &mut B,
    pipeline: &mut ForwardPipeline,
    culler: &mut SceneCuller,
    cameras: &[Camera],
) -> Report {
    let mut reports = Vec::with_capacity(cameras.len());
    for (camera_index, camera) in cameras.iter().enumerate() {
        let metrics = CameraMetrics { camera_index, ..pipeline.render_camera(context, culler, camera) };
        // Skipped cameras leave the previous camera's keywords in place.
        let keywords = if metrics.skipped {
            Vec::new()
        } else {
            context.shader_globals().enabled_keywords().map(ShadowKeyword::name).collect()
        };
        reports.push(camera_report(&metrics, keywords));
    }
    context.finish_frame();

    let shadows = &pipeline.config().shadows;
    Report {
        backend: B::NAME,
        shadow_map_size: shadows.map_size,
        shadow_distance: shadows.distance,
        cascades: shadows.cascade_count(),
        shadow_draws: context.shadow_draw_count(),
        shadow_maps_leaked: context.live_maps(),
        cameras: reports,
    }
}

fn camera_report(metrics: &CameraMetrics, keywords: Vec<&'static str>) -> CameraReport {
    let atlas = metrics.atlas.as_ref();
    CameraReport {
        camera: metrics.camera_index,
        skipped: metrics.skipped,
        visible_lights: metrics.lights.visible_lights,
        shaded_lights: metrics.lights.shaded_lights,
        truncated_lights: metrics.lights.truncated_lights,
        main_light: metrics.lights.main_light_exists,
        cascades_rendered: metrics.cascades.map_or(0, |c| c.cascades_rendered),
        atlas_split: atlas.map_or(0, |a| a.split),
        atlas_tiles: atlas
            .map(|a| {
                a.tiles
                    .iter()
                    .map(|tile| TileReport {
                        light_index: tile.light_index,
                        tile_index: tile.tile_index,
                        offset: [tile.shadow_data.z, tile.shadow_data.w],
                    })
                    .collect()
            })
            .unwrap_or_default(),
        dropped_shadows: atlas.map(|a| a.dropped_lights.to_vec()).unwrap_or_default(),
        keywords,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use kestrel_forward::culling::Aabb;
    use kestrel_forward::light::{ShadowMode, VisibleLight};

    #[test]
    fn keywords_are_read_back_per_camera() {
        let mut culler = SceneCuller::new(
            vec![
                VisibleLight::directional(Vec3::new(0.3, -1.0, 0.2), Vec3::ONE).with_shadows(ShadowMode::Soft, 1.0),
                VisibleLight::spot(Vec3::new(0.0, 4.0, 0.0), Vec3::NEG_Y, 60.0, 10.0, Vec3::ONE)
                    .with_shadows(ShadowMode::Hard, 1.0),
            ],
            vec![Aabb::new(Vec3::new(-200.0, -1.0, -200.0), Vec3::new(200.0, 0.0, 200.0))],
        );
        let near_spot = Camera::new(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, 1.0, 0.3, 200.0);
        let away = Camera::new(Vec3::new(100.0, 5.0, 100.0), Vec3::new(200.0, 5.0, 200.0), 1.0, 0.3, 200.0);
        let broken = near_spot.clone().with_viewport(0, 0);
        let mut pipeline = ForwardPipeline::new(PipelineConfig::default());
        let mut context = RecordingContext::new();

        let report = build_report(&mut context, &mut pipeline, &mut culler, &[near_spot, away, broken]);
        assert_eq!(report.backend, "recording");
        assert_eq!(report.cameras[0].keywords, vec!["CASCADED_SHADOWS_SOFT", "SHADOWS_HARD"]);
        assert_eq!(report.cameras[1].visible_lights, 1);
        assert_eq!(report.cameras[1].keywords, vec!["CASCADED_SHADOWS_SOFT"]);
        assert!(report.cameras[2].skipped);
        assert!(report.cameras[2].keywords.is_empty());
        assert_eq!(report.shadow_maps_leaked, 0);
    }
}
