use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

/// A one-slot mailbox between the interrupt context and the polling task.
///
/// The producer posts, the consumer takes; `take` reads and clears in one
/// step so an event is observed at most once. Posting over an untaken event
/// replaces it.
pub struct EventCell<T: Copy> {
    pending: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

// Safety: access to `value` is serialized by the single-producer /
// single-consumer contract on `post` and `take`.
unsafe impl<T: Copy + Send> Sync for EventCell<T> {}

impl<T: Copy> EventCell<T> {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    // Safety: must be the only producer for this cell, and the consumer must
    // not be inside `take` (it masks the producer's interrupt while taking).
    pub unsafe fn post(&self, event: T) {
        // Correctness: the slot is only read by `take` after it observes
        // `pending`, which is published below with Release ordering.
        unsafe {
            (*self.value.get()).write(event);
        }
        self.pending.store(true, Ordering::Release);
    }

    // Safety: must be the only consumer for this cell, and the producer must
    // be masked for the duration of the call.
    pub unsafe fn take(&self) -> Option<T> {
        if !self.pending.swap(false, Ordering::Acquire) {
            return None;
        }
        // Correctness: `pending` was set, so the slot holds an initialized
        // value written before the Release store in `post`.
        Some(unsafe { (*self.value.get()).assume_init() })
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

impl<T: Copy> Default for EventCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for EventCell<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventCell")
            .field("pending", &self.is_pending())
            .finish()
    }
}
