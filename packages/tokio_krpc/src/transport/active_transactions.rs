use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::Instant;

use krpc_encoding::Envelope;

use crate::transport::messages::TransactionId;

struct PendingEntry {
    method: &'static str,
    waker: Option<Waker>,
    deadline: Instant,
}

enum TxState {
    Pending(PendingEntry),
    Ready(Envelope),
    TimedOut,
}

/// Outstanding request map shared between `SendTransport` (which registers
/// transactions before sending) and the inbound reader (which fulfils them
/// as responses arrive). A transaction registered here is, by construction,
/// never also forwarded to a lookup-engine worker: the two are mutually
/// exclusive consumers of a TID's response.
#[derive(Clone)]
pub struct ActiveTransactions {
    inner: Arc<Mutex<HashMap<TransactionId, TxState>>>,
}

impl ActiveTransactions {
    pub fn new() -> ActiveTransactions {
        ActiveTransactions {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(&self, tid: TransactionId, method: &'static str, deadline: Instant) {
        let mut map = self.inner.lock().expect("active transactions lock poisoned");
        map.insert(
            tid,
            TxState::Pending(PendingEntry {
                method,
                waker: None,
                deadline,
            }),
        );
    }

    pub fn contains(&self, tid: &TransactionId) -> bool {
        let map = self.inner.lock().expect("active transactions lock poisoned");
        map.contains_key(tid)
    }

    /// Matches an inbound response against its registered transaction.
    /// Returns `false` for a TID this map never registered (late, duplicate,
    /// or not ours at all — the caller should then try the finder dispatch).
    pub fn fulfil(&self, tid: TransactionId, envelope: Envelope) -> bool {
        let mut map = self.inner.lock().expect("active transactions lock poisoned");
        match map.get_mut(&tid) {
            Some(TxState::Pending(entry)) => {
                let waker = entry.waker.take();
                map.insert(tid, TxState::Ready(envelope));
                if let Some(waker) = waker {
                    waker.wake();
                }
                true
            }
            Some(_) | None => false,
        }
    }

    /// Returns the method remembered for `tid`, used to reject a response
    /// whose declared shape doesn't match what was asked.
    pub fn expected_method(&self, tid: &TransactionId) -> Option<&'static str> {
        let map = self.inner.lock().expect("active transactions lock poisoned");
        match map.get(tid) {
            Some(TxState::Pending(entry)) => Some(entry.method),
            _ => None,
        }
    }

    /// Polls the map for `tid`, registering `waker` if still pending.
    /// Returns `Some(Ready(envelope))`, `Some(TimedOut)`, or `None` (still
    /// pending). Removes the entry once it resolves either way.
    pub fn poll(&self, tid: TransactionId, waker: &Waker) -> Option<PollOutcome> {
        let mut map = self.inner.lock().expect("active transactions lock poisoned");
        match map.get_mut(&tid) {
            Some(TxState::Pending(entry)) => {
                entry.waker = Some(waker.clone());
                None
            }
            Some(TxState::Ready(_)) => match map.remove(&tid) {
                Some(TxState::Ready(envelope)) => Some(PollOutcome::Ready(envelope)),
                _ => unreachable!(),
            },
            Some(TxState::TimedOut) => {
                map.remove(&tid);
                Some(PollOutcome::TimedOut)
            }
            None => Some(PollOutcome::TimedOut),
        }
    }

    /// Marks every entry whose deadline has passed as timed out and wakes
    /// its waiter. Called from the main loop's periodic tick.
    pub fn sweep_timeouts(&self, now: Instant) {
        let mut map = self.inner.lock().expect("active transactions lock poisoned");
        for state in map.values_mut() {
            if let TxState::Pending(entry) = state {
                if entry.deadline <= now {
                    let waker = entry.waker.take();
                    *state = TxState::TimedOut;
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                }
            }
        }
    }

    /// Removes a transaction outright, used when a send future is dropped
    /// (e.g. cancelled) before a response arrives.
    pub fn drop_transaction(&self, tid: &TransactionId) {
        let mut map = self.inner.lock().expect("active transactions lock poisoned");
        map.remove(tid);
    }
}

impl Default for ActiveTransactions {
    fn default() -> ActiveTransactions {
        ActiveTransactions::new()
    }
}

pub enum PollOutcome {
    Ready(Envelope),
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn noop_waker() -> Waker {
        use std::task::{RawWaker, RawWakerVTable};
        fn clone(_: *const ()) -> RawWaker {
            raw()
        }
        fn noop(_: *const ()) {}
        fn raw() -> RawWaker {
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        unsafe { Waker::from_raw(raw()) }
    }

    #[test]
    fn unregistered_tid_is_not_fulfilled() {
        let active = ActiveTransactions::new();
        let tid = TransactionId::new(0, 1);
        let env = krpc_encoding::Envelope::query(
            b"aa".to_vec(),
            krpc_encoding::Query::Ping {
                id: krpc_encoding::NodeID::generate(),
            },
        );
        assert!(!active.fulfil(tid, env));
    }

    #[test]
    fn sweep_marks_expired_entries_timed_out() {
        let active = ActiveTransactions::new();
        let tid = TransactionId::new(0, 2);
        let past = Instant::now() - Duration::from_secs(1);
        active.register(tid, "ping", past);
        active.sweep_timeouts(Instant::now());

        let waker = noop_waker();
        let outcome = active.poll(tid, &waker);
        assert!(matches!(outcome, Some(PollOutcome::TimedOut)));
    }
}
