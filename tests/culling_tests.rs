use std::sync::Arc;

use approx::assert_relative_eq;
use canopy_instancing::culling::{CullSettings, LodSettings};
use canopy_instancing::*;

fn forward_camera() -> CameraState {
    CameraState::perspective(Vec3::ZERO, Quat::IDENTITY, 90f32.to_radians(), 1.0, 0.1, 1000.0)
}

fn field(count: u32) -> Arc<[CullInput]> {
    let mut registry = InstanceRegistry::with_capacity(count as usize);
    for i in 0..count {
        let angle = i as f32 * 0.37;
        let radius = 5.0 + (i % 97) as f32 * 1.6;
        let category = GrowthCategory::ALL[(i % 5) as usize];
        registry
            .register(
                InstanceDescriptor::new(MeshId(i % 3), MaterialId(i % 2), category)
                    .at(Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)),
            )
            .unwrap();
    }
    registry.snapshot()
}

#[test]
fn far_instance_is_distance_culled_regardless_of_frustum() {
    let mut registry = InstanceRegistry::with_capacity(4);
    // Straight ahead, well inside the frustum.
    registry
        .register(
            InstanceDescriptor::new(MeshId(0), MaterialId(0), GrowthCategory::Flowering)
                .at(Vec3::new(0.0, 0.0, -150.0)),
        )
        .unwrap();
    let snapshot = registry.snapshot();
    let camera = CullCamera::from_state(&forward_camera());

    for frustum_culling in [true, false] {
        let mut settings = CullSettings::new(100.0);
        settings.frustum_culling = frustum_culling;
        let culler = VisibilityCuller::new(settings);

        assert_eq!(
            culler.classify(&snapshot[0], &camera),
            CullOutcome::Hidden(HiddenReason::Distance)
        );
        assert!(culler.cull(&snapshot, &camera).is_empty());
    }
}

#[test]
fn culling_is_deterministic_for_a_snapshot() {
    let snapshot = field(2000);
    let culler = VisibilityCuller::new(CullSettings::new(120.0));

    for yaw in [0.0f32, 1.1, 2.5, -0.7] {
        let mut state = forward_camera();
        state.rotation = Quat::from_rotation_y(yaw);
        let camera = CullCamera::from_state(&state);

        let first = culler.cull(&snapshot, &camera);
        let second = culler.cull(&snapshot, &camera);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}

#[test]
fn dispatchers_agree_and_keep_input_indexing() {
    let snapshot = field(5000);
    let culler = VisibilityCuller::default();
    let camera = CullCamera::from_state(&forward_camera());

    let mut sequential = vec![CullOutcome::default(); snapshot.len()];
    SequentialDispatch.dispatch(&culler, &snapshot, &camera, &mut sequential);

    for (input, outcome) in snapshot.iter().zip(&sequential) {
        assert_eq!(*outcome, culler.classify(input, &camera));
    }

    #[cfg(feature = "parallel")]
    {
        let mut parallel = vec![CullOutcome::default(); snapshot.len()];
        ParallelDispatch::new(128).dispatch(&culler, &snapshot, &camera, &mut parallel);
        assert_eq!(sequential, parallel);
    }
}

#[test]
fn visible_outcome_reports_squared_distance() {
    let mut registry = InstanceRegistry::with_capacity(1);
    registry
        .register(
            InstanceDescriptor::new(MeshId(0), MaterialId(0), GrowthCategory::Flowering)
                .at(Vec3::new(3.0, 0.0, -4.0)),
        )
        .unwrap();
    let snapshot = registry.snapshot();

    let culler = VisibilityCuller::default();
    match culler.classify(&snapshot[0], &CullCamera::from_state(&forward_camera())) {
        CullOutcome::Visible { lod, distance_sq } => {
            assert_eq!(lod, 0);
            assert_relative_eq!(distance_sq, 25.0, epsilon = 1e-4);
        }
        hidden => panic!("expected visible, got {hidden:?}"),
    }
}

#[test]
fn category_scales_lod_distances() {
    let lod = LodSettings::new([10.0, 20.0, 40.0, 80.0], 1.0);
    let d2 = 9.0 * 9.0;
    // Seedlings switch at half the distance, ripening plants later.
    assert_eq!(lod.select(d2, GrowthCategory::Seedling), 1);
    assert_eq!(lod.select(d2, GrowthCategory::Ripening), 0);
}

#[test]
fn one_frame_latency_hands_back_the_previous_snapshot() {
    let mut scheduler = CullScheduler::new(CullLatency::OneFrame, Arc::new(SequentialDispatch));
    let culler = VisibilityCuller::default();
    let camera = CullCamera::from_state(&forward_camera());

    let first = field(100);
    assert!(scheduler.schedule(1, &culler, Arc::clone(&first), camera).is_none());
    assert!(scheduler.wait_for_in_flight(std::time::Duration::from_secs(5)));

    let result = scheduler.schedule(2, &culler, field(10), camera).unwrap();
    assert_eq!(result.frame, 1);
    assert!(Arc::ptr_eq(&result.inputs, &first));
    assert_eq!(result.outcomes.len(), 100);
}
