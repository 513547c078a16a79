use std::time::{Duration, Instant};

/// Timer that tracks elapsed time when timing is enabled.
pub struct Timer(Instant);

impl Timer {
    #[inline]
    pub fn start() -> Self {
        Self(Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Summed phase durations over all merge steps of one scale.
///
/// Steps run in parallel, so the totals are CPU time across workers rather
/// than wall time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleTimings {
    pub load: Duration,
    pub reconcile: Duration,
    pub store: Duration,
    pub steps: u64,
}

impl ScaleTimings {
    #[inline]
    pub fn add_load(&mut self, d: Duration) {
        self.load += d;
    }

    #[inline]
    pub fn add_reconcile(&mut self, d: Duration) {
        self.reconcile += d;
        self.steps += 1;
    }

    #[inline]
    pub fn add_store(&mut self, d: Duration) {
        self.store += d;
    }

    pub fn merge(&mut self, other: &ScaleTimings) {
        self.load += other.load;
        self.reconcile += other.reconcile;
        self.store += other.store;
        self.steps += other.steps;
    }

    pub fn total(&self) -> Duration {
        self.load + self.reconcile + self.store
    }

    pub fn report(&self, scale: u32) {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        tracing::info!(
            scale,
            steps = self.steps,
            load_ms = ms(self.load),
            reconcile_ms = ms(self.reconcile),
            store_ms = ms(self.store),
            "scale timings"
        );
    }
}
