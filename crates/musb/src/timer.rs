use core::sync::atomic::{AtomicU32, Ordering};

/// Millisecond counter advanced by the platform's 1 ms timer interrupt.
///
/// Platforms without a free-running clock can share one of these between the
/// timer handler and their [`UsbCore::millis`](crate::regs::UsbCore::millis)
/// implementation.
#[derive(Debug, Default)]
pub struct TickCounter {
    millis: AtomicU32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            millis: AtomicU32::new(0),
        }
    }

    pub fn tick(&self) {
        self.millis.fetch_add(1, Ordering::Relaxed);
    }

    pub fn millis(&self) -> u32 {
        self.millis.load(Ordering::Relaxed)
    }
}

/// Milliseconds elapsed from `start` to `now` on a wrapping counter.
pub fn elapsed(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}
