// FPS counter: ticks once per second with the frame rate over that second

use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_secs(1);

pub struct FpsTimer {
    last_tick: Instant,
    frames: u32,
}

impl FpsTimer {
    pub fn start(now: Instant) -> Self {
        Self {
            last_tick: now,
            frames: 0,
        }
    }

    /// Count a presented frame; returns the frame rate once a second has passed
    pub fn frame(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < TICK {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.last_tick = now;
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_within_a_second() {
        let start = Instant::now();
        let mut timer = FpsTimer::start(start);
        assert_eq!(timer.frame(start + Duration::from_millis(16)), None);
        assert_eq!(timer.frame(start + Duration::from_millis(999)), None);
    }

    #[test]
    fn reports_rate_and_restarts() {
        let start = Instant::now();
        let mut timer = FpsTimer::start(start);

        for i in 1..60 {
            assert_eq!(timer.frame(start + Duration::from_millis(i * 16)), None);
        }
        let fps = timer.frame(start + Duration::from_secs(1)).unwrap();
        assert!((fps - 60.0).abs() < f32::EPSILON * 100.0);

        assert_eq!(timer.frame(start + Duration::from_millis(1500)), None);
        let fps = timer.frame(start + Duration::from_secs(2)).unwrap();
        assert!((fps - 2.0).abs() < 0.001);
    }
}
