//! Single-capacity delivery slot for round-trip-time measurements.
//!
//! Models "at most one outstanding, unconsumed ping measurement". The slot
//! holds the most recent result: a pong arriving while a previous
//! measurement is still unconsumed overwrites it (latest wins), so the read
//! loop can never block on delivery. Closing the pipe wakes every waiter
//! with [`PipeError::Closed`].

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{PipeError, Result};
use crate::sync::lock;

#[derive(Debug, Default)]
struct SlotState {
    value: Option<Duration>,
    closed: bool,
}

/// The slot itself; owned by the pipe, exposed through [`RttHandle`].
#[derive(Debug, Default)]
pub(crate) struct RttSlot {
    state: Mutex<SlotState>,
    available: Condvar,
}

impl RttSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a measurement, overwriting any unconsumed one.
    pub(crate) fn put(&self, rtt: Duration) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        if state.value.replace(rtt).is_some() {
            trace!("overwriting unconsumed rtt measurement");
        }
        self.available.notify_one();
    }

    /// Mark the slot closed and wake all waiters.
    pub(crate) fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        self.available.notify_all();
    }
}

/// Caller-side handle onto a pipe's RTT slot, returned by
/// [`Pipe::ping`](crate::Pipe::ping).
#[derive(Debug, Clone)]
pub struct RttHandle {
    slot: Arc<RttSlot>,
}

impl RttHandle {
    pub(crate) fn new(slot: Arc<RttSlot>) -> Self {
        Self { slot }
    }

    /// Block until a measurement is delivered or the pipe closes.
    ///
    /// A measurement delivered before close is still consumable.
    pub fn recv(&self) -> Result<Duration> {
        let mut state = lock(&self.slot.state);
        loop {
            if let Some(rtt) = state.value.take() {
                return Ok(rtt);
            }
            if state.closed {
                return Err(PipeError::Closed);
            }
            state = self
                .slot
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`recv`](Self::recv), but gives up with
    /// [`PipeError::Timeout`] after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Duration> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.slot.state);
        loop {
            if let Some(rtt) = state.value.take() {
                return Ok(rtt);
            }
            if state.closed {
                return Err(PipeError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PipeError::Timeout(timeout));
            }
            let (guard, _) = self
                .slot
                .available
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn put_then_recv() {
        let slot = RttSlot::new();
        slot.put(Duration::from_millis(7));

        let handle = RttHandle::new(Arc::clone(&slot));
        assert_eq!(handle.recv().unwrap(), Duration::from_millis(7));
    }

    #[test]
    fn recv_consumes_the_value() {
        let slot = RttSlot::new();
        slot.put(Duration::from_millis(7));

        let handle = RttHandle::new(Arc::clone(&slot));
        handle.recv().unwrap();
        let err = handle.recv_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, PipeError::Timeout(_)));
    }

    #[test]
    fn overwrites_unconsumed_value() {
        let slot = RttSlot::new();
        slot.put(Duration::from_millis(7));
        slot.put(Duration::from_millis(13));

        let handle = RttHandle::new(Arc::clone(&slot));
        assert_eq!(handle.recv().unwrap(), Duration::from_millis(13));
        let err = handle.recv_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, PipeError::Timeout(_)));
    }

    #[test]
    fn recv_blocks_until_put() {
        let slot = RttSlot::new();
        let handle = RttHandle::new(Arc::clone(&slot));

        let waiter = thread::spawn(move || handle.recv());
        thread::sleep(Duration::from_millis(30));
        slot.put(Duration::from_millis(3));

        assert_eq!(
            waiter.join().expect("waiter thread").unwrap(),
            Duration::from_millis(3)
        );
    }

    #[test]
    fn close_unblocks_waiters() {
        let slot = RttSlot::new();
        let handle = RttHandle::new(Arc::clone(&slot));

        let waiter = thread::spawn(move || handle.recv());
        thread::sleep(Duration::from_millis(30));
        slot.close();

        let err = waiter.join().expect("waiter thread").unwrap_err();
        assert!(matches!(err, PipeError::Closed));
    }

    #[test]
    fn value_delivered_before_close_is_consumable() {
        let slot = RttSlot::new();
        slot.put(Duration::from_millis(5));
        slot.close();

        let handle = RttHandle::new(Arc::clone(&slot));
        assert_eq!(handle.recv().unwrap(), Duration::from_millis(5));
        assert!(matches!(handle.recv().unwrap_err(), PipeError::Closed));
    }

    #[test]
    fn put_after_close_is_dropped() {
        let slot = RttSlot::new();
        slot.close();
        slot.put(Duration::from_millis(5));

        let handle = RttHandle::new(Arc::clone(&slot));
        assert!(matches!(handle.recv().unwrap_err(), PipeError::Closed));
    }
}
