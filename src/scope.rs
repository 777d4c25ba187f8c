//! Scoped, self-reverting overrides.
//!
//! A frame captures the state of its target on entry and puts it back when
//! dropped, including during unwinding. One process-wide re-entrant lock is
//! held for the lifetime of every frame: a second thread entering an override
//! waits, while nested frames on the same thread stack freely.
//!
//! Frames must be released in reverse order of entry, which holds naturally
//! for lexically scoped guards.

use std::cell::Cell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{trace, warn};

static OVERRIDE_LOCK: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// State that can be captured and later restored exactly.
pub trait Overridable {
    type State;

    fn capture_state(&self) -> Self::State;

    fn restore_state(&self, state: Self::State);
}

/// Guard for one override frame. Dropping it restores the captured state.
#[must_use = "the override is reverted as soon as the frame is dropped"]
pub struct OverrideFrame<'a, T: Overridable + ?Sized> {
    target: &'a T,
    saved: Option<T::State>,
    depth: usize,
    _lock: ReentrantMutexGuard<'static, ()>,
}

impl<'a, T: Overridable + ?Sized> OverrideFrame<'a, T> {
    pub fn enter(target: &'a T) -> Self {
        let lock = OVERRIDE_LOCK.lock();
        let depth = DEPTH.with(|d| {
            let depth = d.get() + 1;
            d.set(depth);
            depth
        });
        trace!(depth, "entering override frame");

        Self {
            target,
            saved: Some(target.capture_state()),
            depth,
            _lock: lock,
        }
    }

    pub fn target(&self) -> &'a T {
        self.target
    }

    /// Nesting level of this frame on the current thread, starting at 1.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<T: Overridable + ?Sized> Drop for OverrideFrame<'_, T> {
    fn drop(&mut self) {
        if let Some(state) = self.saved.take() {
            self.target.restore_state(state);
        }

        DEPTH.with(|d| {
            if d.get() != self.depth {
                warn!(
                    expected = self.depth,
                    actual = d.get(),
                    "override frames released out of order"
                );
            }
            d.set(d.get().saturating_sub(1));
        });
        trace!(depth = self.depth, "left override frame");
    }
}
