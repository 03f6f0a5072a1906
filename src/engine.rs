//! Per-frame orchestration of streaming, culling, batching, quality and submission.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use log::{debug, info};

use crate::batching::{AssembledFrame, Batch, BatchAssembler};
use crate::config::EngineConfig;
use crate::core::{
    camera::CameraProvider,
    category::GrowthCategory,
    instance::{Instance, InstanceDescriptor},
    types::{MaterialId, MeshId, Transform},
};
use crate::culling::{default_dispatch, CullCamera, CullDispatch, CullScheduler, CullSettings, VisibilityCuller};
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::gpu::{MeshInfo, NoopBackend, RenderBackend};
use crate::metrics::MetricsSnapshot;
use crate::quality::{QualityChange, QualityController, QualityTier};
use crate::registry::InstanceRegistry;
use crate::spatial::{AssetGroupLoader, NullAssetLoader, StreamReport};
use crate::submit::{RenderSubmitter, SubmitStats};
use crate::utils::{
    allocator::InstanceId,
    logging::{warn_if_frame_budget_exceeded, ScopedTimer},
    profiling::{self, FrameProfiler},
    scheduler::IntervalScheduler,
};

/// External collaborators, supplied by the host.
pub struct EngineServices {
    pub camera: Box<dyn CameraProvider>,
    pub backend: Arc<dyn RenderBackend>,
    pub loader: Box<dyn AssetGroupLoader>,
    pub dispatch: Arc<dyn CullDispatch>,
}

impl EngineServices {
    /// Noop backend, null asset loader and the default culling dispatcher.
    pub fn headless(camera: impl CameraProvider + 'static) -> Self {
        Self {
            camera: Box::new(camera),
            backend: Arc::new(NoopBackend::new()),
            loader: Box::new(NullAssetLoader),
            dispatch: default_dispatch(crate::config::CullConfig::default().parallel_min_chunk),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn RenderBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_loader(mut self, loader: impl AssetGroupLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_dispatch(mut self, dispatch: Arc<dyn CullDispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }
}

/// What happened during one call to [`CanopyEngine::frame`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub quality_change: Option<QualityChange>,
    pub stream: Option<StreamReport>,
    /// Whether this frame's batches came from a fresh culling result.
    pub batches_refreshed: bool,
    pub submit: SubmitStats,
}

pub struct CanopyEngine {
    config: EngineConfig,
    registry: InstanceRegistry,
    culler: VisibilityCuller,
    scheduler: CullScheduler,
    assembler: BatchAssembler,
    quality: QualityController,
    submitter: RenderSubmitter,
    events: EventBus,
    counts: Receiver<EngineEvent>,
    camera: Box<dyn CameraProvider>,
    backend: Arc<dyn RenderBackend>,
    loader: Box<dyn AssetGroupLoader>,
    stream_schedule: IntervalScheduler,
    quality_schedule: IntervalScheduler,
    update_schedule: IntervalScheduler,
    frame: u64,
    current: AssembledFrame,
    profiler: FrameProfiler,
    metrics: MetricsSnapshot,
    budget_overruns: u64,
}

impl CanopyEngine {
    pub fn new(config: EngineConfig, services: EngineServices) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let counts = events.subscribe();
        let registry = InstanceRegistry::new(&config.registry, &config.zones, events.clone());
        let quality = QualityController::new(config.quality.clone(), events.clone());
        let submitter = RenderSubmitter::new(&config.submit, events.clone());
        let scheduler = CullScheduler::new(config.culling.latency, services.dispatch);

        let mut engine = Self {
            culler: VisibilityCuller::new(CullSettings::from_config(&config.culling)),
            assembler: BatchAssembler::new(&config.batching),
            stream_schedule: IntervalScheduler::new(config.zones.stream_interval_frames),
            quality_schedule: IntervalScheduler::new(config.quality.sample_interval_frames),
            update_schedule: IntervalScheduler::new(1),
            config,
            registry,
            scheduler,
            quality,
            submitter,
            events,
            counts,
            camera: services.camera,
            backend: services.backend,
            loader: services.loader,
            frame: 0,
            current: AssembledFrame::default(),
            profiler: FrameProfiler::default(),
            metrics: MetricsSnapshot::default(),
            budget_overruns: 0,
        };
        engine.apply_tier();

        info!(
            "canopy engine ready: backend {}, culling {} ({:?}), tier {:?}",
            engine.backend.name(),
            engine.scheduler.dispatcher_name(),
            engine.scheduler.latency(),
            engine.quality.tier()
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register(&mut self, descriptor: InstanceDescriptor) -> Result<InstanceId> {
        self.registry.register(descriptor)
    }

    pub fn unregister(&mut self, id: InstanceId) -> bool {
        self.registry.unregister(id)
    }

    pub fn update(&mut self, id: InstanceId, transform: Transform, category: GrowthCategory) -> Result<()> {
        self.registry.update(id, transform, category)
    }

    pub fn set_material(&mut self, id: InstanceId, material: MaterialId) -> Result<()> {
        self.registry.set_material(id, material)
    }

    pub fn set_visible(&mut self, id: InstanceId, visible: bool) -> Result<()> {
        self.registry.set_visible(id, visible)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn register_mesh(&mut self, mesh: MeshId, info: MeshInfo) {
        self.submitter.register_mesh(mesh, info);
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn quality_tier(&self) -> QualityTier {
        self.quality.tier()
    }

    pub fn force_quality_tier(&mut self, tier: QualityTier) {
        if self.quality.force_tier(tier).is_some() {
            self.apply_tier();
        }
    }

    pub fn current_batches(&self) -> &[Batch] {
        &self.current.batches
    }

    pub fn current_frame(&self) -> &AssembledFrame {
        &self.current
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
    }

    pub fn profiler(&self) -> &FrameProfiler {
        &self.profiler
    }

    pub fn budget_overruns(&self) -> u64 {
        self.budget_overruns
    }

    /// Waits for an in-flight one-frame-latency culling job, up to `timeout`.
    pub fn wait_for_culling(&mut self, timeout: Duration) -> bool {
        self.scheduler.wait_for_in_flight(timeout)
    }

    /// Runs one frame. `frame_time` is the host's measured duration of the last frame.
    pub fn frame(&mut self, frame_time: Duration) -> FrameReport {
        self.frame += 1;
        let frame = self.frame;
        let started = Instant::now();
        let _trace = ScopedTimer::new("canopy::frame");
        self.profiler.reset();

        let mut report = FrameReport {
            frame,
            ..FrameReport::default()
        };

        for event in self.counts.try_iter() {
            if let EngineEvent::InstanceCountChanged { count } = event {
                self.quality.observe_instance_count(count);
            }
        }

        let frame_ms = frame_time.as_secs_f32() * 1000.0;
        if warn_if_frame_budget_exceeded(frame_time, self.config.quality.target_frame_ms * 2.0) {
            self.budget_overruns += 1;
        }
        if self.quality_schedule.ready(frame) {
            report.quality_change = self.quality.sample(frame_ms);
            if report.quality_change.is_some() {
                self.apply_tier();
            }
        }

        let camera = self.camera.camera_state();

        if self.stream_schedule.ready(frame) {
            let _timer = profiling::ScopedTimer::new(&mut self.profiler.stream_time);
            report.stream = Some(self.registry.stream_tick(camera.position, self.loader.as_mut()));
        }

        if self.update_schedule.ready(frame) {
            let snapshot = {
                let _timer = profiling::ScopedTimer::new(&mut self.profiler.cull_time);
                let snapshot = self.registry.snapshot();
                self.scheduler
                    .schedule(frame, &self.culler, snapshot, CullCamera::from_state(&camera))
            };
            if let Some(result) = snapshot {
                let _timer = profiling::ScopedTimer::new(&mut self.profiler.assemble_time);
                self.current = self.assembler.assemble(&result);
                self.scheduler.recycle(result);
                report.batches_refreshed = true;
            }
        }

        {
            let _timer = profiling::ScopedTimer::new(&mut self.profiler.submit_time);
            report.submit = self
                .submitter
                .submit_frame(frame, &self.current.batches, self.backend.as_ref());
        }

        self.profiler.total_frame_time = started.elapsed();
        self.profiler.instance_count = self.registry.len();
        self.profiler.visible_count = self.current.visible;
        self.profiler.batch_count = self.current.batch_count();
        self.profiler.report();

        self.metrics = MetricsSnapshot {
            frame,
            instance_count: self.registry.len(),
            active_instances: self.current.visible,
            batch_count: self.current.batch_count(),
            culled_count: self.current.culled(),
            draw_calls: report.submit.draw_calls,
            skipped_batches: self.submitter.skipped_batches(),
            quality_tier: self.quality.tier(),
            loaded_zones: self.registry.partition().loaded_zones().len(),
            superseded_cull_jobs: self.scheduler.superseded(),
            frame_ms,
        };

        report
    }

    /// Pushes the current tier's settings into assembly, LOD selection and scheduling.
    fn apply_tier(&mut self) {
        let settings = *self.quality.settings();
        self.assembler.apply_tier(&settings);
        self.culler.settings_mut().lod.bias = settings.lod_bias;
        self.update_schedule
            .set_interval(settings.update_interval_frames, self.frame);
        debug!(
            "tier {:?}: batch {} / cap {} / every {} frame(s)",
            self.quality.tier(),
            settings.max_batch_size,
            settings.max_active_instances,
            settings.update_interval_frames
        );
    }
}

impl Drop for CanopyEngine {
    fn drop(&mut self) {
        self.submitter.release_all(self.backend.as_ref());
    }
}
