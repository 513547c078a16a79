use std::time::Duration;

/// Dummy timer when `timing` is disabled (zero-sized).
pub struct Timer;

impl Timer {
    #[inline(always)]
    pub fn start() -> Self {
        Self
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Duration::ZERO
    }
}

/// Dummy phase totals when `timing` is disabled (zero-sized).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleTimings;

impl ScaleTimings {
    #[inline(always)]
    pub fn add_load(&mut self, _d: Duration) {}
    #[inline(always)]
    pub fn add_reconcile(&mut self, _d: Duration) {}
    #[inline(always)]
    pub fn add_store(&mut self, _d: Duration) {}
    #[inline(always)]
    pub fn merge(&mut self, _other: &ScaleTimings) {}
    #[inline(always)]
    pub fn total(&self) -> Duration {
        Duration::ZERO
    }
    #[inline(always)]
    pub fn report(&self, _scale: u32) {}
}
