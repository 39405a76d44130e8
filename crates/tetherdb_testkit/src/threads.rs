//! Helpers for moving test work onto other threads.
//!
//! Contexts are pinned to the thread that created them, so cross-thread
//! tests run a closure on a fresh thread and wait for it. A panic on that
//! thread is re-raised on the caller's.

use std::panic;
use std::sync::{Arc, Barrier};
use std::thread;

/// Runs `f` on a new thread and returns its result.
pub fn on_new_thread<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match thread::spawn(f).join() {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// A thread parked until the test lets it continue.
///
/// `setup` runs first and its result is kept on the worker thread; the
/// worker then waits on the barrier before running `finish`. Used to hold
/// a context open on another thread while the test thread works.
pub struct Parked<R> {
    barrier: Arc<Barrier>,
    handle: thread::JoinHandle<R>,
}

impl<R: Send + 'static> Parked<R> {
    /// Spawns the worker and waits until `setup` has run.
    pub fn spawn<S, T, F>(setup: S, finish: F) -> Self
    where
        S: FnOnce() -> T + Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let ready = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let (worker_ready, worker_release) = (Arc::clone(&ready), Arc::clone(&release));

        let handle = thread::spawn(move || {
            let state = setup();
            worker_ready.wait();
            worker_release.wait();
            finish(state)
        });
        ready.wait();

        Self {
            barrier: release,
            handle,
        }
    }

    /// Lets the worker finish and returns its result.
    pub fn finish(self) -> R {
        self.barrier.wait();
        match self.handle.join() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_on_another_thread() {
        let here = thread::current().id();
        let there = on_new_thread(|| thread::current().id());
        assert_ne!(here, there);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn panics_propagate() {
        on_new_thread(|| panic!("boom"));
    }

    #[test]
    fn parked_keeps_state_until_finished() {
        let parked = Parked::spawn(|| vec![1, 2, 3], |state| state.len());
        assert_eq!(parked.finish(), 3);
    }
}
