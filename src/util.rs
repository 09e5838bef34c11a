use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Render a human-friendly transfer speed string.
#[must_use]
pub fn format_speed(bytes_per_sec: f32) -> String {
    const KIB: f32 = 1024.0;
    const MIB: f32 = KIB * 1024.0;

    if bytes_per_sec < KIB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    }
}

/// Compute progress as a percentage.
#[must_use]
pub fn progress_percent(completed: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (completed as f32 / total as f32) * 100.0
}

/// Transfer rate sampled over windows of at least one second, so the
/// displayed figure does not flicker with every chunk.
pub struct RateMeter {
    last_time: Instant,
    last_completed: u64,
    rate: f32,
}

impl RateMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            last_time: now,
            last_completed: 0,
            rate: 0.0,
        }
    }

    pub fn update(&mut self, completed: u64, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed >= RATE_WINDOW {
            let bytes = completed.saturating_sub(self.last_completed);
            self.rate = bytes as f32 / elapsed.as_secs_f32();
            self.last_completed = completed;
            self.last_time = now;
        }
        self.rate
    }
}
