//! Frame-driven periodic work.
//!
//! Periodic jobs (zone streaming, quality sampling, culling refresh) do not suspend;
//! they record the next frame at which they become eligible and the host's frame loop
//! asks whether that frame has arrived.

/// Fires every `interval` frames, starting with the first frame it is asked about.
#[derive(Debug, Clone, Copy)]
pub struct IntervalScheduler {
    interval: u32,
    next_eligible: Option<u64>,
}

impl IntervalScheduler {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            next_eligible: None,
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Changes the interval. The next eligible frame is pulled in if it now lies
    /// further away than one new interval.
    pub fn set_interval(&mut self, interval: u32, frame: u64) {
        self.interval = interval.max(1);
        if let Some(next) = self.next_eligible {
            self.next_eligible = Some(next.min(frame + u64::from(self.interval)));
        }
    }

    /// Returns true and schedules the following run when `frame` is eligible.
    pub fn ready(&mut self, frame: u64) -> bool {
        match self.next_eligible {
            Some(next) if frame < next => false,
            _ => {
                self.next_eligible = Some(frame + u64::from(self.interval));
                true
            }
        }
    }

    /// Makes the next `ready` call succeed regardless of the interval.
    pub fn trigger(&mut self) {
        self.next_eligible = None;
    }

    pub fn next_eligible(&self) -> Option<u64> {
        self.next_eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_interval_boundaries() {
        let mut scheduler = IntervalScheduler::new(3);
        let fired: Vec<u64> = (1..=10).filter(|frame| scheduler.ready(*frame)).collect();
        assert_eq!(fired, vec![1, 4, 7, 10]);
    }

    #[test]
    fn shrinking_interval_pulls_next_run_in() {
        let mut scheduler = IntervalScheduler::new(10);
        assert!(scheduler.ready(1));
        scheduler.set_interval(2, 2);
        assert_eq!(scheduler.next_eligible(), Some(4));
        assert!(!scheduler.ready(3));
        assert!(scheduler.ready(4));
    }

    #[test]
    fn zero_interval_is_treated_as_every_frame() {
        let mut scheduler = IntervalScheduler::new(0);
        assert!(scheduler.ready(1));
        assert!(scheduler.ready(2));
    }
}
