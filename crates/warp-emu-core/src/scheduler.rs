use crate::hardware::Tick;

/// Converts wall-clock progress into bounded tick targets.
///
/// Elapsed time is clamped to `max_update_seconds` per call, so a stall (tab
/// backgrounded, debugger attached) costs a bounded amount of catch-up work
/// instead of a multi-second freeze. The fractional-tick remainder of each
/// step is carried into the next call, keeping the emulated clock drift-free
/// against the host clock.
pub struct Scheduler {
    ticks_per_second: u64,
    max_update_seconds: f64,
    last_seconds: Option<f64>,
    leftover_ticks: i64,
}

impl Scheduler {
    pub fn new(ticks_per_second: u64, max_update_seconds: f64) -> Self {
        Self {
            ticks_per_second,
            max_update_seconds,
            last_seconds: None,
            leftover_ticks: 0,
        }
    }

    /// Compute the tick target for one advance call at wall-clock time
    /// `now_seconds`, given the core's current tick. The first call after
    /// construction or [`Scheduler::reset`] yields a zero-length step and
    /// anchors the clock.
    pub fn target_tick(&mut self, now_seconds: f64, current: Tick) -> Tick {
        let last = self.last_seconds.unwrap_or(now_seconds);
        self.last_seconds = Some(now_seconds);
        let delta_seconds = (now_seconds - last).clamp(0.0, self.max_update_seconds);
        let delta_ticks = (delta_seconds * self.ticks_per_second as f64) as i64;
        let target = current as i64 + delta_ticks - self.leftover_ticks;
        target.max(0) as Tick
    }

    /// Record how far past `target` the core overshot (cores stop on
    /// instruction boundaries, not exact ticks) so the next call subtracts it.
    pub fn commit(&mut self, reached: Tick, target: Tick) {
        self.leftover_ticks = reached.saturating_sub(target) as i64;
    }

    /// Forget the wall-clock anchor and the leftover carry. Required after a
    /// discontinuous time jump (a rewind), when both are meaningless.
    pub fn reset(&mut self) {
        self.last_seconds = None;
        self.leftover_ticks = 0;
    }

    pub fn leftover_ticks(&self) -> i64 {
        self.leftover_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_anchors_without_advancing() {
        let mut scheduler = Scheduler::new(1000, 0.25);
        assert_eq!(scheduler.target_tick(12.5, 400), 400);
        // Subsequent calls advance relative to the anchor.
        assert_eq!(scheduler.target_tick(12.625, 400), 525);
    }

    #[test]
    fn elapsed_time_is_clamped() {
        let mut scheduler = Scheduler::new(1000, 0.1);
        scheduler.target_tick(0.0, 0);
        // A 60-second stall is clamped to the 0.1 s budget.
        assert_eq!(scheduler.target_tick(60.0, 0), 100);
    }

    #[test]
    fn backwards_clock_yields_zero_delta() {
        let mut scheduler = Scheduler::new(1000, 0.1);
        scheduler.target_tick(10.0, 700);
        assert_eq!(scheduler.target_tick(9.0, 700), 700);
    }

    #[test]
    fn leftover_carry_prevents_drift() {
        let mut scheduler = Scheduler::new(1000, 1.0);
        scheduler.target_tick(0.0, 0);

        let target = scheduler.target_tick(0.1, 0);
        assert_eq!(target, 100);
        // The core overshot to an instruction boundary at tick 130.
        scheduler.commit(130, target);
        assert_eq!(scheduler.leftover_ticks(), 30);

        // The 30-tick overshoot is deducted from the next slice.
        assert_eq!(scheduler.target_tick(0.2, 130), 200);
    }

    #[test]
    fn reset_clears_anchor_and_carry() {
        let mut scheduler = Scheduler::new(1000, 1.0);
        scheduler.target_tick(0.0, 0);
        let target = scheduler.target_tick(0.5, 0);
        scheduler.commit(target + 40, target);
        scheduler.reset();
        assert_eq!(scheduler.leftover_ticks(), 0);
        // Post-reset, the next call re-anchors instead of seeing 99.5 s elapse.
        assert_eq!(scheduler.target_tick(100.0, 400), 400);
    }
}
