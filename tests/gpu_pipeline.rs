use glam::Vec3;
use kestrel_forward::camera::Camera;
use kestrel_forward::config::PipelineConfig;
use kestrel_forward::culling::Aabb;
use kestrel_forward::light::{ShadowMode, VisibleLight};
use kestrel_forward::renderer::{ForwardPipeline, RenderContext, ShadowKeyword, WgpuContext};
use kestrel_forward::scene::SceneCuller;

fn camera() -> Camera {
    Camera::new(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, 60f32.to_radians(), 0.3, 200.0).with_viewport(1280, 720)
}

fn culler() -> SceneCuller {
    let spot = |x: f32| {
        VisibleLight::spot(Vec3::new(x, 4.0, 0.0), Vec3::NEG_Y, 60.0, 10.0, Vec3::ONE).with_shadows(ShadowMode::Hard, 1.0)
    };
    SceneCuller::new(
        vec![
            VisibleLight::directional(Vec3::new(0.3, -1.0, 0.2), Vec3::ONE).with_shadows(ShadowMode::Soft, 1.0),
            spot(3.0),
            spot(-3.0),
            spot(0.0),
        ],
        vec![Aabb::new(Vec3::new(-20.0, -1.0, -20.0), Vec3::new(20.0, 0.0, 20.0))],
    )
}

fn headless_context(reversed_z: bool) -> Option<WgpuContext> {
    match pollster::block_on(WgpuContext::headless(reversed_z)) {
        Ok(context) => Some(context),
        Err(err) => {
            eprintln!("skipping: no wgpu adapter available ({err})");
            None
        }
    }
}

#[test]
fn wgpu_context_renders_shadow_tiles_and_pools_maps() {
    let Some(mut context) = headless_context(false) else {
        return;
    };
    let mut pipeline = ForwardPipeline::new(PipelineConfig::default());
    pipeline.render(&mut context, &mut culler(), &[camera(), camera()]);

    let stats = context.stats();
    assert_eq!(stats.shadow_passes, 14, "four cascades and three atlas tiles per camera");
    assert_eq!(stats.missing_targets, 0);
    assert_eq!(stats.submits, 2);
    assert!(stats.uniform_uploads >= 2);
    assert_eq!(context.live_shadow_maps(), 0);
    assert_eq!(context.pool().free_count(), 2, "second camera reuses the first camera's maps");

    let enabled: Vec<_> = context.globals().enabled_keywords().collect();
    assert_eq!(enabled, vec![ShadowKeyword::CascadedSoft, ShadowKeyword::AtlasHard]);

    for _ in 0..4 {
        context.end_frame();
    }
    assert_eq!(context.pool().free_count(), 0);
}

#[test]
fn reversed_z_context_reports_its_depth_convention() {
    let Some(mut context) = headless_context(true) else {
        return;
    };
    let mut pipeline = ForwardPipeline::new(PipelineConfig::default());
    pipeline.render(&mut context, &mut culler(), &[camera()]);
    assert!(context.reversed_z());
    assert_eq!(context.stats().shadow_passes, 7);
    assert_eq!(context.live_shadow_maps(), 0);
}
