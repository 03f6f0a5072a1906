use canopy_instancing::batching::VisibleInstance;
use canopy_instancing::config::{BatchConfig, SubmitConfig};
use canopy_instancing::*;

fn batches(count: u32, limit: usize) -> Vec<Batch> {
    let visible: Vec<VisibleInstance> = (0..count)
        .map(|i| {
            let transform = Transform::from_position(Vec3::new(i as f32, 0.0, 0.0));
            VisibleInstance {
                input: CullInput {
                    id: InstanceId::new(i, 0),
                    transform,
                    sphere: Aabb::default().bounding_sphere(&transform),
                    mesh: MeshId(1),
                    material: MaterialId(2),
                    category: GrowthCategory::Flowering,
                    variant: 0,
                    visible: true,
                },
                lod: 0,
                distance_sq: 1.0,
            }
        })
        .collect();
    BatchAssembler::new(&BatchConfig {
        hardware_instance_limit: limit,
        ..BatchConfig::default()
    })
    .assemble_visible(&visible)
}

fn submitter(mode: SubmitMode, events: EventBus) -> RenderSubmitter {
    let mut submitter = RenderSubmitter::new(
        &SubmitConfig {
            mode,
            resource_retry_frames: 3,
            release_after_frames: 100,
        },
        events,
    );
    submitter.register_mesh(
        MeshId(1),
        MeshInfo {
            index_count: 120,
            first_index: 0,
            vertex_offset: 0,
        },
    );
    submitter
}

#[test]
fn direct_mode_uploads_every_frame() {
    let backend = NoopBackend::new();
    let mut submitter = submitter(SubmitMode::Direct, EventBus::new());
    let frame = batches(100, 64);

    let stats = submitter.submit_frame(1, &frame, &backend);
    submitter.submit_frame(2, &frame, &backend);

    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.instances_submitted, 100);
    assert_eq!(backend.stats().direct_draws, 4);
    assert_eq!(backend.stats().allocations, 0);
    assert_eq!(
        backend.stats().bytes_written,
        2 * 100 * std::mem::size_of::<InstanceData>() as u64
    );
}

#[test]
fn direct_draws_respect_backend_instance_limit() {
    let backend = NoopBackend::with_capabilities(GpuCapabilities {
        max_instances_per_draw: 10,
        ..GpuCapabilities::default()
    });
    let mut submitter = submitter(SubmitMode::Direct, EventBus::new());

    let stats = submitter.submit_frame(1, &batches(25, 1023), &backend);

    assert_eq!(stats.submitted_batches, 1);
    assert_eq!(stats.draw_calls, 3);
}

#[test]
fn indirect_falls_back_to_direct_without_support() {
    let backend = NoopBackend::with_capabilities(GpuCapabilities {
        indirect_draw: false,
        ..GpuCapabilities::default()
    });
    let mut submitter = submitter(SubmitMode::Indirect, EventBus::new());

    assert_eq!(submitter.effective_mode(&backend), SubmitMode::Direct);
    let stats = submitter.submit_frame(1, &batches(10, 1023), &backend);

    assert_eq!(stats.draw_calls, 1);
    assert_eq!(backend.stats().indirect_draws, 0);
    assert_eq!(backend.stats().direct_draws, 1);
}

#[test]
fn missing_buffers_skip_count_and_retry() {
    let backend = NoopBackend::new();
    let events = EventBus::new();
    let received = events.subscribe();
    let mut submitter = submitter(SubmitMode::Indirect, events);
    let frame = batches(10, 1023);

    backend.set_fail_allocations(true);
    for f in 1..=6 {
        let stats = submitter.submit_frame(f, &frame, &backend);
        assert_eq!(stats.skipped_batches, 1);
        assert_eq!(stats.draw_calls, 0);
    }
    assert_eq!(submitter.skipped_batches(), 6);

    // One notification for the whole failure episode.
    let notices = received
        .try_iter()
        .filter(|e| matches!(e, EngineEvent::ResourceUnavailable(_)))
        .count();
    assert_eq!(notices, 1);

    backend.set_fail_allocations(false);
    let mut recovered_at = None;
    for f in 7..=12 {
        if submitter.submit_frame(f, &frame, &backend).draw_calls == 1 {
            recovered_at = Some(f);
            break;
        }
    }
    // Last failure was frame 4 (frames 5 and 6 waited), so the retry lands on frame 7.
    assert_eq!(recovered_at, Some(7));
    assert_eq!(backend.stats().indirect_draws, 1);
}

#[test]
fn indirect_args_reflect_batch_and_mesh() {
    let backend = NoopBackend::new();
    let mut submitter = submitter(SubmitMode::Indirect, EventBus::new());

    submitter.submit_frame(1, &batches(10, 1023), &backend);

    let instance_bytes = 10 * std::mem::size_of::<InstanceData>() as u64;
    let args_bytes = std::mem::size_of::<gpu::DrawIndexedIndirectArgs>() as u64;
    assert_eq!(backend.stats().bytes_written, instance_bytes + args_bytes);
    assert_eq!(
        gpu::DrawIndexedIndirectArgs::new(
            &MeshInfo {
                index_count: 120,
                first_index: 0,
                vertex_offset: 0
            },
            10
        )
        .instance_count,
        10
    );
}

#[test]
fn empty_frame_submits_nothing() {
    let backend = NoopBackend::new();
    let mut submitter = submitter(SubmitMode::Indirect, EventBus::new());
    assert_eq!(submitter.submit_frame(1, &[], &backend), SubmitStats::default());
}
