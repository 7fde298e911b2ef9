//! High-resolution timer for frame timing.

use std::time::{Duration, Instant};

/// Measures elapsed time since start and delta time between frames.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
        }
    }

    /// Total elapsed time since the timer was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Marks the end of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        delta
    }

    /// [`tick`](Self::tick) in seconds.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Number of ticks since creation or reset.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.frames = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = Timer::new();
        assert_eq!(timer.frame_count(), 0);
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.elapsed();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed() > first);
        assert!(timer.delta_secs() > 0.0);
    }
}
