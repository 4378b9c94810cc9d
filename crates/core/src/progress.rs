//! Progress bookkeeping for a section while it is generating.

/// Progress value reported to observers plus whether it should be written
/// to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub persist: bool,
}

/// Clamps provider progress into a non-decreasing 0..=100 sequence and
/// samples every Nth update for persistence.
///
/// Every observation yields an update to publish; only the sampled ones are
/// marked `persist`, which bounds store writes without hiding progress from
/// live observers.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    every: u32,
    seen: u32,
    last: u8,
}

impl ProgressTracker {
    /// `every` of zero is treated as one (persist everything).
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
            last: 0,
        }
    }

    pub fn observe(&mut self, raw: f64) -> ProgressUpdate {
        let clamped = if raw.is_finite() {
            raw.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        self.last = self.last.max(clamped);
        self.seen += 1;

        ProgressUpdate {
            progress: self.last,
            persist: self.seen % self.every == 0,
        }
    }

    /// Highest progress observed so far.
    pub fn last(&self) -> u8 {
        self.last
    }
}
