//! Counting join barrier for fan-out workers.
//!
//! Uses `Mutex + Condvar` from std, no external dependencies.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::PipelineError;

/// Waits for a fixed, known number of workers to report completion.
pub struct JoinBarrier {
    expected: usize,
    arrived: Mutex<usize>,
    cond: Condvar,
}

/// RAII token held by one worker; counts as an arrival when dropped.
///
/// Dropping on unwind means a panicking worker still releases the barrier,
/// so the join never hangs on a dead worker.
pub struct Arrival<'a>(&'a JoinBarrier);

impl JoinBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            arrived: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Hand out the completion token for one worker.
    pub fn arrival(&self) -> Arrival<'_> {
        Arrival(self)
    }

    /// Number of arrivals so far.
    pub fn arrived(&self) -> usize {
        *self.lock()
    }

    /// Block until `expected` workers have arrived.
    ///
    /// More arrivals than expected is a bookkeeping bug and is reported as
    /// [`PipelineError::Barrier`].
    pub fn wait(&self) -> Result<(), PipelineError> {
        let mut arrived = self.lock();
        while *arrived < self.expected {
            arrived = self
                .cond
                .wait(arrived)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if *arrived != self.expected {
            return Err(PipelineError::Barrier {
                expected: self.expected,
                observed: *arrived,
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.arrived.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        let mut arrived = self.0.lock();
        *arrived += 1;
        self.0.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_expected_does_not_block() {
        let barrier = JoinBarrier::new(0);
        barrier.wait().unwrap();
    }

    #[test]
    fn waits_for_all_arrivals() {
        let barrier = JoinBarrier::new(3);
        std::thread::scope(|s| {
            for i in 0..3u64 {
                let token = barrier.arrival();
                s.spawn(move || {
                    std::thread::sleep(Duration::from_millis(10 * (3 - i)));
                    drop(token);
                });
            }
            barrier.wait().unwrap();
            assert_eq!(barrier.arrived(), 3);
        });
    }

    #[test]
    fn over_arrival_is_violation() {
        let barrier = JoinBarrier::new(1);
        drop(barrier.arrival());
        drop(barrier.arrival());
        match barrier.wait().unwrap_err() {
            PipelineError::Barrier { expected, observed } => {
                assert_eq!(expected, 1);
                assert_eq!(observed, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panicking_worker_still_arrives() {
        let barrier = JoinBarrier::new(2);
        std::thread::scope(|s| {
            let ok = barrier.arrival();
            let bad = barrier.arrival();
            s.spawn(move || drop(ok));
            let handle = s.spawn(move || {
                let _token = bad;
                panic!("worker failed");
            });
            barrier.wait().unwrap();
            assert!(handle.join().is_err());
        });
    }
}
