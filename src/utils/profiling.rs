use std::time::{Duration, Instant};

/// Per-frame stage timings for the cull/assemble/submit pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameProfiler {
    pub stream_time: Duration,
    pub cull_time: Duration,
    pub assemble_time: Duration,
    pub submit_time: Duration,
    pub total_frame_time: Duration,

    pub instance_count: usize,
    pub visible_count: usize,
    pub batch_count: usize,
}

impl FrameProfiler {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) {
        let total_us = self.total_frame_time.as_micros() as f32;
        if total_us < 1.0 || !log::log_enabled!(log::Level::Debug) {
            return;
        }

        let share = |stage: Duration| (stage.as_micros() as f32 / total_us) * 100.0;

        log::debug!(
            "frame {:.3} ms | instances {} visible {} batches {} | stream {:.1}% cull {:.1}% assemble {:.1}% submit {:.1}%",
            self.total_frame_time.as_secs_f32() * 1000.0,
            self.instance_count,
            self.visible_count,
            self.batch_count,
            share(self.stream_time),
            share(self.cull_time),
            share(self.assemble_time),
            share(self.submit_time),
        );
    }
}

/// Adds the elapsed time of its scope into a [`Duration`] slot on drop.
pub struct ScopedTimer<'a> {
    start: Instant,
    output: &'a mut Duration,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(output: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            output,
        }
    }
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        *self.output += self.start.elapsed();
    }
}
