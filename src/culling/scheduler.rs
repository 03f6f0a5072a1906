//! Culling job scheduling with configurable result latency.
//!
//! `Immediate` culls on the calling thread and hands the result straight back.
//! `OneFrame` runs the job on the worker pool and hands it back on the next schedule
//! call. A job still running when the next one is scheduled is cancelled; its output
//! buffer is recycled without ever being read. At most [`MAX_CONSECUTIVE_SUPERSEDED`]
//! jobs are cancelled in a row; after that the running job is left to finish and no new
//! job starts until it has been handed back, so a slow cull still feeds assembly.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::culling::{
    culler::{CullCamera, CullInput, CullOutcome, HiddenReason, VisibilityCuller},
    dispatch::CullDispatch,
};

/// Jobs cancelled in a row before the scheduler waits for the running one instead.
pub const MAX_CONSECUTIVE_SUPERSEDED: u32 = 1;

/// Frames between computing visibility and consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CullLatency {
    #[default]
    Immediate,
    OneFrame,
}

impl CullLatency {
    pub fn frames(self) -> u32 {
        match self {
            CullLatency::Immediate => 0,
            CullLatency::OneFrame => 1,
        }
    }
}

/// Visibility of one snapshot. Carries the snapshot itself so consumers never pair
/// outcomes with rows from another frame.
#[derive(Debug, Clone)]
pub struct CullResult {
    /// Frame the snapshot was taken on.
    pub frame: u64,
    pub inputs: Arc<[CullInput]>,
    pub outcomes: Vec<CullOutcome>,
}

impl CullResult {
    /// Visible rows with their LOD and squared camera distance, in snapshot order.
    pub fn visible(&self) -> impl Iterator<Item = (&CullInput, u8, f32)> + '_ {
        self.inputs
            .iter()
            .zip(self.outcomes.iter())
            .filter_map(|(input, outcome)| match *outcome {
                CullOutcome::Visible { lod, distance_sq } => Some((input, lod, distance_sq)),
                CullOutcome::Hidden(_) => None,
            })
    }

    pub fn visible_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_visible()).count()
    }

    pub fn hidden_count(&self, reason: HiddenReason) -> usize {
        self.outcomes
            .iter()
            .filter(|o| **o == CullOutcome::Hidden(reason))
            .count()
    }
}

struct Completed {
    frame: u64,
    inputs: Arc<[CullInput]>,
    outcomes: Vec<CullOutcome>,
    cancelled: bool,
}

struct InFlight {
    frame: u64,
    cancel: Arc<AtomicBool>,
}

pub struct CullScheduler {
    latency: CullLatency,
    dispatch: Arc<dyn CullDispatch>,
    tx: Sender<Completed>,
    rx: Receiver<Completed>,
    in_flight: Option<InFlight>,
    ready: Option<CullResult>,
    spare: Vec<Vec<CullOutcome>>,
    superseded: u64,
    superseded_in_row: u32,
}

impl CullScheduler {
    pub fn new(latency: CullLatency, dispatch: Arc<dyn CullDispatch>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            latency,
            dispatch,
            tx,
            rx,
            in_flight: None,
            ready: None,
            spare: Vec::new(),
            superseded: 0,
            superseded_in_row: 0,
        }
    }

    pub fn latency(&self) -> CullLatency {
        self.latency
    }

    pub fn dispatcher_name(&self) -> &str {
        self.dispatch.name()
    }

    /// Jobs cancelled because the next frame's job replaced them.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Schedules culling of `inputs` and returns the result due this frame, if any.
    ///
    /// With `Immediate` latency that is this frame's result. With `OneFrame` it is the
    /// previous frame's job, or `None` when that job had not finished. An unfinished job
    /// is either superseded by this one or, once the supersede limit is reached, kept
    /// running while `inputs` is dropped.
    pub fn schedule(
        &mut self,
        frame: u64,
        culler: &VisibilityCuller,
        inputs: Arc<[CullInput]>,
        camera: CullCamera,
    ) -> Option<CullResult> {
        match self.latency {
            CullLatency::Immediate => {
                let mut outcomes = self.take_buffer(inputs.len());
                self.dispatch.dispatch(culler, &inputs, &camera, &mut outcomes);
                Some(CullResult {
                    frame,
                    inputs,
                    outcomes,
                })
            }
            CullLatency::OneFrame => {
                self.poll();
                let due = self.ready.take();

                if let Some(job) = &self.in_flight {
                    if self.superseded_in_row >= MAX_CONSECUTIVE_SUPERSEDED {
                        trace!("culling job for frame {} still running at frame {frame}", job.frame);
                        return due;
                    }
                    job.cancel.store(true, Ordering::Release);
                    self.superseded += 1;
                    self.superseded_in_row += 1;
                    trace!("culling job for frame {} superseded by frame {frame}", job.frame);
                    self.in_flight = None;
                }

                self.spawn(frame, culler.clone(), inputs, camera);
                due
            }
        }
    }

    /// Blocks until the in-flight job finishes or `timeout` elapses.
    ///
    /// Returns whether a result is now waiting for the next schedule call.
    pub fn wait_for_in_flight(&mut self, timeout: Duration) -> bool {
        self.poll();
        while self.in_flight.is_some() {
            match self.rx.recv_timeout(timeout) {
                Ok(completed) => self.accept(completed),
                Err(_) => break,
            }
        }
        self.ready.is_some()
    }

    /// Returns an output buffer for reuse by later jobs.
    pub fn recycle(&mut self, result: CullResult) {
        self.spare.push(result.outcomes);
    }

    fn take_buffer(&mut self, len: usize) -> Vec<CullOutcome> {
        let mut buffer = self.spare.pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, CullOutcome::default());
        buffer
    }

    fn poll(&mut self) {
        while let Ok(completed) = self.rx.try_recv() {
            self.accept(completed);
        }
    }

    fn accept(&mut self, completed: Completed) {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|job| job.frame == completed.frame);

        if completed.cancelled || !current {
            self.spare.push(completed.outcomes);
            return;
        }

        self.in_flight = None;
        self.superseded_in_row = 0;
        if let Some(stale) = self.ready.take() {
            self.spare.push(stale.outcomes);
        }
        self.ready = Some(CullResult {
            frame: completed.frame,
            inputs: completed.inputs,
            outcomes: completed.outcomes,
        });
    }

    fn spawn(&mut self, frame: u64, culler: VisibilityCuller, inputs: Arc<[CullInput]>, camera: CullCamera) {
        let cancel = Arc::new(AtomicBool::new(false));
        let outcomes = self.take_buffer(inputs.len());
        let job = CullJob {
            frame,
            culler,
            inputs,
            camera,
            outcomes,
            dispatch: Arc::clone(&self.dispatch),
            cancel: Arc::clone(&cancel),
            tx: self.tx.clone(),
        };

        self.in_flight = Some(InFlight { frame, cancel });

        #[cfg(feature = "parallel")]
        rayon::spawn(move || job.run());
        #[cfg(not(feature = "parallel"))]
        job.run();
    }
}

struct CullJob {
    frame: u64,
    culler: VisibilityCuller,
    inputs: Arc<[CullInput]>,
    camera: CullCamera,
    outcomes: Vec<CullOutcome>,
    dispatch: Arc<dyn CullDispatch>,
    cancel: Arc<AtomicBool>,
    tx: Sender<Completed>,
}

impl CullJob {
    fn run(mut self) {
        if !self.cancel.load(Ordering::Acquire) {
            self.dispatch
                .dispatch(&self.culler, &self.inputs, &self.camera, &mut self.outcomes);
        }
        // The scheduler may have been dropped; nothing to hand back then.
        let _ = self.tx.send(Completed {
            frame: self.frame,
            inputs: self.inputs,
            outcomes: self.outcomes,
            cancelled: self.cancel.load(Ordering::Acquire),
        });
    }
}
