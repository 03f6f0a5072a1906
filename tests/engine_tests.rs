use std::sync::Arc;
use std::time::Duration;

use canopy_instancing::*;

const FAST: Duration = Duration::from_millis(10);
const SLOW: Duration = Duration::from_millis(40);

fn camera() -> CameraState {
    CameraState::perspective(Vec3::new(0.0, 1.5, 0.0), Quat::IDENTITY, 1.2, 16.0 / 9.0, 0.1, 500.0)
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.culling.frustum_culling = false;
    config.batching.grouping = GroupingCriteria {
        lod: false,
        ..GroupingCriteria::default()
    };
    config
}

fn engine(config: EngineConfig, backend: Arc<NoopBackend>) -> CanopyEngine {
    let mut engine = CanopyEngine::new(config, EngineServices::headless(camera()).with_backend(backend))
        .expect("valid config");
    engine.register_mesh(
        MeshId(0),
        MeshInfo {
            index_count: 96,
            ..MeshInfo::default()
        },
    );
    engine
}

/// `count` plants in rows ahead of the camera, all within render distance.
fn plant_rows(engine: &mut CanopyEngine, count: u32) -> Vec<InstanceId> {
    (0..count)
        .map(|i| {
            let position = Vec3::new((i % 30) as f32 - 15.0, 0.0, -10.0 - (i / 30) as f32);
            engine
                .register(InstanceDescriptor::new(MeshId(0), MaterialId(1), GrowthCategory::Vegetative).at(position))
                .unwrap()
        })
        .collect()
}

#[test]
fn headless_frame_batches_and_submits() {
    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config(), Arc::clone(&backend));
    plant_rows(&mut engine, 1500);

    let report = engine.frame(FAST);

    assert!(report.batches_refreshed);
    let sizes: Vec<usize> = engine.current_batches().iter().map(Batch::visible_count).collect();
    assert_eq!(sizes, vec![1023, 477]);
    assert_eq!(report.submit.draw_calls, 2);
    assert_eq!(backend.stats().instances_drawn, 1500);

    let metrics = engine.metrics();
    assert_eq!(metrics.frame, 1);
    assert_eq!(metrics.instance_count, 1500);
    assert_eq!(metrics.active_instances, 1500);
    assert_eq!(metrics.batch_count, 2);
    assert_eq!(metrics.culled_count, 0);
    assert_eq!(metrics.quality_tier, QualityTier::High);
    assert!(metrics.loaded_zones > 0);
}

#[test]
fn hidden_and_removed_instances_leave_the_batches() {
    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config(), backend);
    let ids = plant_rows(&mut engine, 10);

    engine.set_visible(ids[0], false).unwrap();
    assert!(engine.unregister(ids[1]));
    assert!(!engine.unregister(ids[1]));
    engine.frame(FAST);

    let batch = &engine.current_batches()[0];
    assert_eq!(batch.visible_count(), 8);
    assert!(!batch.ids.contains(&ids[0]));
    assert!(!batch.ids.contains(&ids[1]));
    assert_eq!(engine.current_frame().culled_disabled, 1);
}

#[test]
fn one_frame_latency_publishes_on_the_next_frame() {
    let mut config = config();
    config.culling.latency = CullLatency::OneFrame;
    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config, Arc::clone(&backend));
    plant_rows(&mut engine, 100);

    let first = engine.frame(FAST);
    assert!(!first.batches_refreshed);
    assert!(engine.current_batches().is_empty());
    assert_eq!(first.submit.draw_calls, 0);

    assert!(engine.wait_for_culling(Duration::from_secs(5)));
    let second = engine.frame(FAST);
    assert!(second.batches_refreshed);
    assert_eq!(engine.current_frame().frame, 1);
    assert_eq!(engine.current_frame().visible, 100);
    assert_eq!(backend.stats().instances_drawn, 100);
}

/// Culls sequentially after a fixed delay, like a dispatcher that cannot keep up.
struct SlowDispatch(Duration);

impl CullDispatch for SlowDispatch {
    fn name(&self) -> &str {
        "slow"
    }

    fn dispatch(&self, culler: &VisibilityCuller, inputs: &[CullInput], camera: &CullCamera, out: &mut [CullOutcome]) {
        std::thread::sleep(self.0);
        culler.classify_into(inputs, camera, out);
    }
}

#[test]
fn sustained_slow_culling_still_refreshes_batches() {
    let mut config = config();
    config.culling.latency = CullLatency::OneFrame;
    let backend = Arc::new(NoopBackend::new());
    let services = EngineServices::headless(camera())
        .with_backend(backend)
        .with_dispatch(Arc::new(SlowDispatch(Duration::from_millis(25))));
    let mut engine = CanopyEngine::new(config, services).unwrap();
    engine.register_mesh(MeshId(0), MeshInfo::default());
    plant_rows(&mut engine, 100);

    let mut refreshed = 0;
    for _ in 0..40 {
        if engine.frame(Duration::from_millis(16)).batches_refreshed {
            refreshed += 1;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    assert!(refreshed >= 3, "only {refreshed} refreshes");
    assert!(engine.metrics().superseded_cull_jobs < 40);
    assert_eq!(engine.current_frame().visible, 100);
    assert_eq!(engine.quality_tier(), QualityTier::High);
    assert_eq!(engine.metrics().draw_calls, 1);
}

#[test]
fn slow_frames_shrink_batches() {
    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config(), backend);
    plant_rows(&mut engine, 600);
    let events = engine.subscribe();

    engine.frame(FAST);
    assert_eq!(engine.current_batches().len(), 1);

    let report = engine.frame(SLOW);
    assert_eq!(
        report.quality_change.map(|c| c.to),
        Some(QualityTier::Medium)
    );
    assert_eq!(engine.current_batches().len(), 2);

    // Low refreshes every fourth frame; the batches follow on its first refresh.
    engine.frame(SLOW);
    assert_eq!(engine.quality_tier(), QualityTier::Low);
    for _ in 0..4 {
        engine.frame(SLOW);
    }
    assert!(engine
        .current_batches()
        .iter()
        .all(|b| b.visible_count() <= 256));
    assert_eq!(engine.current_batches().len(), 3);

    let changes: Vec<EngineEvent> = events
        .try_iter()
        .filter(|e| matches!(e, EngineEvent::QualityChanged { .. }))
        .collect();
    assert_eq!(
        changes,
        vec![
            EngineEvent::QualityChanged {
                from: QualityTier::High,
                to: QualityTier::Medium
            },
            EngineEvent::QualityChanged {
                from: QualityTier::Medium,
                to: QualityTier::Low
            },
        ]
    );
}

#[test]
fn forced_tier_applies_immediately() {
    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config(), backend);
    plant_rows(&mut engine, 600);

    engine.force_quality_tier(QualityTier::Low);
    engine.frame(FAST);

    assert_eq!(engine.quality_tier(), QualityTier::Low);
    let sizes: Vec<usize> = engine.current_batches().iter().map(Batch::visible_count).collect();
    assert_eq!(sizes, vec![256, 256, 88]);
}

#[test]
fn registration_events_reach_subscribers() {
    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config(), backend);
    let events = engine.subscribe();

    plant_rows(&mut engine, 3);

    let counts: Vec<usize> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::InstanceCountChanged { count } => Some(count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![1, 2, 3]);
}

#[test]
fn engine_reads_toml_config() {
    let config = EngineConfig::from_toml_str(
        r#"
        [culling]
        max_render_distance = 80.0
        frustum_culling = false

        [batching]
        hardware_instance_limit = 100

        [batching.grouping]
        lod = false
        "#,
    )
    .unwrap();
    assert_eq!(config.quality.target_frame_ms, EngineConfig::default().quality.target_frame_ms);

    let backend = Arc::new(NoopBackend::new());
    let mut engine = engine(config, backend);
    plant_rows(&mut engine, 900);
    engine.frame(FAST);

    // Rows end at z = -39, well inside the render distance.
    let frame = engine.current_frame();
    assert_eq!(frame.visible, 900);
    assert!(engine.current_batches().iter().all(|b| b.visible_count() <= 100));
    assert_eq!(engine.current_batches().len(), 9);
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = EngineConfig::default();
    config.batching.hardware_instance_limit = 0;
    let result = CanopyEngine::new(config, EngineServices::headless(camera()));
    assert!(matches!(result, Err(CanopyError::InvalidConfig(_))));
}

#[test]
fn shared_camera_drives_distance_culling() {
    let camera = SharedCamera::new(camera());
    let mut config = config();
    config.culling.max_render_distance = 50.0;
    let mut engine = CanopyEngine::new(config, EngineServices::headless(camera.clone())).unwrap();
    engine
        .register(InstanceDescriptor::new(MeshId(0), MaterialId(0), GrowthCategory::Flowering).at(Vec3::new(0.0, 0.0, -20.0)))
        .unwrap();

    engine.frame(FAST);
    assert_eq!(engine.metrics().active_instances, 1);

    camera.set_position(Vec3::new(0.0, 1.5, 60.0));
    engine.frame(FAST);
    assert_eq!(engine.metrics().active_instances, 0);
    assert_eq!(engine.current_frame().culled_distance, 1);
}
