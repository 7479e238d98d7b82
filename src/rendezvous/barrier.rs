//! Counting barrier with forced abandonment
//!
//! A barrier of size N parks entrants until the Nth one arrives, then wakes
//! the whole cohort at once and starts counting again from zero. Abandoning
//! it wakes every parked entrant with [`BarrierOutcome::Abandoned`] and makes
//! every later entry return immediately with the same outcome.
//!
//! Each parked entrant owns a oneshot receiver; the lock only guards the
//! waiter list and is never held while anybody waits.

use super::{BarrierOutcome, BarrierStatus};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Named rendezvous point for a fixed number of participants
#[derive(Debug)]
pub struct Barrier {
    name: String,
    required: usize,
    state: Mutex<BarrierState>,
}

#[derive(Debug, Default)]
struct BarrierState {
    waiters: Vec<oneshot::Sender<BarrierOutcome>>,
    releases: u64,
    abandoned: bool,
}

enum Arrival {
    Done(BarrierOutcome),
    Wait(oneshot::Receiver<BarrierOutcome>),
}

impl Barrier {
    /// Create a barrier for `required` participants (at least one)
    pub fn new(name: impl Into<String>, required: usize) -> Self {
        Self {
            name: name.into(),
            required: required.max(1),
            state: Mutex::new(BarrierState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Enter the barrier and wait for the rest of the cohort
    pub async fn enter(&self) -> BarrierOutcome {
        match self.arrive() {
            Arrival::Done(outcome) => outcome,
            // A dropped sender can only come from teardown; treat it like abandonment
            Arrival::Wait(rx) => rx.await.unwrap_or(BarrierOutcome::Abandoned),
        }
    }

    /// Blocking variant of [`Barrier::enter`] for plain threads
    #[cfg(test)]
    pub fn enter_blocking(&self) -> BarrierOutcome {
        match self.arrive() {
            Arrival::Done(outcome) => outcome,
            Arrival::Wait(rx) => rx.blocking_recv().unwrap_or(BarrierOutcome::Abandoned),
        }
    }

    /// Wake every parked entrant with `Abandoned` and close the barrier for good
    ///
    /// Returns the number of entrants woken.
    pub fn abandon(&self) -> usize {
        let mut state = self.lock();
        state.abandoned = true;

        let mut woken = 0;
        for waiter in state.waiters.drain(..) {
            if waiter.send(BarrierOutcome::Abandoned).is_ok() {
                woken += 1;
            }
        }
        woken
    }

    /// Number of entrants currently parked
    pub fn waiting(&self) -> usize {
        let mut state = self.lock();
        state.waiters.retain(|w| !w.is_closed());
        state.waiters.len()
    }

    /// Number of cohorts released so far
    pub fn releases(&self) -> u64 {
        self.lock().releases
    }

    pub fn status(&self) -> BarrierStatus {
        let state = self.lock();
        if state.abandoned {
            BarrierStatus::Abandoned
        } else if state.releases > 0 && state.waiters.is_empty() {
            BarrierStatus::Released
        } else {
            BarrierStatus::Open
        }
    }

    fn arrive(&self) -> Arrival {
        let mut state = self.lock();
        if state.abandoned {
            return Arrival::Done(BarrierOutcome::Abandoned);
        }

        // Entrants that gave up (dropped their receiver) no longer count
        state.waiters.retain(|w| !w.is_closed());

        if state.waiters.len() + 1 >= self.required {
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(BarrierOutcome::Released);
            }
            state.releases += 1;
            return Arrival::Done(BarrierOutcome::Released);
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        Arrival::Wait(rx)
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
