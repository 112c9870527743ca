use std::time::Duration;

/// Longest stretch of wall time one `accumulate` call may add, so a stalled
/// process does not replay hundreds of frames at once.
const MAX_CATCH_UP: Duration = Duration::from_millis(250);

/// Paces the commit/flush cycle at a fixed frame rate.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    frame_rate: u32,
    frame: Duration,
    accumulator: Duration,
    frames: u64,
}

impl FixedTimestep {
    pub fn new(frame_rate: u32) -> Self {
        let frame_rate = frame_rate.max(1);
        Self {
            frame_rate,
            frame: Duration::from_secs_f64(1.0 / frame_rate as f64),
            accumulator: Duration::ZERO,
            frames: 0,
        }
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame
    }

    /// Frames consumed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_CATCH_UP);
    }

    pub fn consume_frame(&mut self) -> bool {
        if self.accumulator >= self.frame {
            self.accumulator -= self.frame;
            self.frames += 1;
            true
        } else {
            false
        }
    }

    /// Time left until the next frame is due.
    pub fn until_next(&self) -> Duration {
        self.frame.saturating_sub(self.accumulator)
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_whole_frames() {
        let mut ts = FixedTimestep::new(30);

        ts.accumulate(Duration::from_millis(70));
        assert!(ts.consume_frame());
        assert!(ts.consume_frame());
        assert!(!ts.consume_frame());
        assert_eq!(ts.frames(), 2);
        assert!(ts.until_next() > Duration::ZERO);
    }

    #[test]
    fn caps_catch_up() {
        let mut ts = FixedTimestep::new(100);
        ts.accumulate(Duration::from_secs(10));

        let mut frames = 0;
        while ts.consume_frame() {
            frames += 1;
        }
        assert_eq!(frames, 25);
    }
}
