use std::sync::atomic::{AtomicBool, Ordering};

/// Single-slot lock serialising submissions.
///
/// Acquisition is a compare-exchange, so two callers racing on the same tick
/// cannot both win. The permit releases the slot on drop, which covers normal
/// return, early `?`, panics and a cancelled future alike.
#[derive(Debug, Default)]
pub struct SubmissionGuard {
    held: AtomicBool,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<GuardPermit<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardPermit { guard: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[must_use = "the guard is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct GuardPermit<'a> {
    guard: &'a SubmissionGuard,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.held.store(false, Ordering::Release);
    }
}
