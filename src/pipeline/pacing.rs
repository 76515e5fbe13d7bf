use std::time::Duration;

/// Sleeps away whatever is left of a fixed per-tick budget.
#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    budget: Duration,
}

impl FramePacer {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time to wait after a tick that took `elapsed`. Never negative.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.budget.saturating_sub(elapsed)
    }
}

/// Which path a tick took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Segmented and composited.
    Composite,
    /// Raw frame copied to the output.
    Passthrough,
    /// No usable source; only paced.
    Idle,
}

impl Branch {
    pub fn tag(self) -> &'static str {
        match self {
            Branch::Composite => "composite",
            Branch::Passthrough => "passthrough",
            Branch::Idle => "idle",
        }
    }
}

/// Rolling per-stage timings, logged every `LOG_EVERY` frames.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: u64,
    composited: u64,
    total_segment: Duration,
    total_work: Duration,
}

impl FrameStats {
    const LOG_EVERY: u64 = 30;

    pub fn record(&mut self, branch: Branch, segment: Duration, work: Duration) {
        self.frames += 1;
        if branch == Branch::Composite {
            self.composited += 1;
            self.total_segment += segment;
        }
        self.total_work += work;

        if self.frames % Self::LOG_EVERY == 0 {
            self.log();
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn avg_work_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.total_work.as_secs_f64() * 1000.0 / self.frames as f64
    }

    pub fn avg_segment_ms(&self) -> f64 {
        if self.composited == 0 {
            return 0.0;
        }
        self.total_segment.as_secs_f64() * 1000.0 / self.composited as f64
    }

    fn log(&self) {
        let work_ms = self.avg_work_ms();
        if self.composited > 0 {
            tracing::info!(
                "Frame {}: segment={:.1}ms, work={:.1}ms, composited={}",
                self.frames,
                self.avg_segment_ms(),
                work_ms,
                self.composited
            );
        } else {
            tracing::info!("Frame {}: work={:.1}ms", self.frames, work_ms);
        }
    }
}

/// Effective frame rate for a tick that took `elapsed` including its wait,
/// rounded to one decimal.
pub fn fps(elapsed: Duration) -> f64 {
    let ms = elapsed.as_secs_f64() * 1000.0;
    if ms <= 0.0 {
        return 0.0;
    }
    (10_000.0 / ms).round() / 10.0
}
