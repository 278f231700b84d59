//! InitState: one-shot lifecycle guard shared between threads.
//!
//! `should_init` elects exactly one thread to run initialization; every
//! other caller blocks until that thread reports back through
//! `set_initialized`. Teardown mirrors it with `should_quit` / `set_quit`.
//! The elected thread must not run caller code before reporting back, or a
//! nested call on the same thread would block on itself.

use parking_lot::{Condvar, Mutex};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Status {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Quitting,
}

#[derive(Debug, Default)]
pub struct InitState {
    status: Mutex<Status>,
    settled: Condvar,
}

impl InitState {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(&self, from: Status, to: Status) {
        let mut status = self.status.lock();
        debug_assert_eq!(*status, from);
        *status = to;
        drop(status);
        self.settled.notify_all();
    }

    /// Returns `true` to the single caller that must now initialize and then
    /// call `set_initialized`. Returns `false` once initialization is done.
    pub fn should_init(&self) -> bool {
        let mut status = self.status.lock();
        loop {
            match *status {
                Status::Ready => return false,
                Status::Uninitialized => {
                    *status = Status::Initializing;
                    return true;
                }
                Status::Initializing | Status::Quitting => self.settled.wait(&mut status),
            }
        }
    }

    /// Finish the transition started by `should_init`. On failure the state
    /// falls back to uninitialized so a later caller can retry.
    pub fn set_initialized(&self, ok: bool) {
        let next = if ok { Status::Ready } else { Status::Uninitialized };
        self.finish(Status::Initializing, next);
    }

    /// Returns `true` to the single caller that must now tear down and then
    /// call `set_quit`. Returns `false` if there is nothing to tear down.
    pub fn should_quit(&self) -> bool {
        let mut status = self.status.lock();
        loop {
            match *status {
                Status::Uninitialized => return false,
                Status::Ready => {
                    *status = Status::Quitting;
                    return true;
                }
                Status::Initializing | Status::Quitting => self.settled.wait(&mut status),
            }
        }
    }

    pub fn set_quit(&self) {
        self.finish(Status::Quitting, Status::Uninitialized);
    }

    pub fn is_ready(&self) -> bool {
        *self.status.lock() == Status::Ready
    }
}
