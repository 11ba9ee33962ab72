//! Bookkeeping for requests that are waiting for their response.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
};

use super::Counters;

/// Opaque caller data handed back to a [`ResponseListener`] with the outcome.
pub type Handback = Box<dyn Any + Send>;

/// Receives the outcome of an asynchronous request.
///
/// Exactly one of the two methods is called, exactly once, per request.
pub trait ResponseListener<M>: Send + Sync {
    /// The matching response has arrived.
    fn response_received(&self, response: M, handback: Handback);

    /// No response arrived before the request expired.
    fn expired(&self, handback: Handback);
}

/// The resolution states of an [`AsyncWaiter`].
const PENDING: u8 = 0;
const RESPONDED: u8 = 1;
const EXPIRED: u8 = 2;

/// A request waiting for its response.
pub(crate) enum PendingRequest<M> {
    /// A caller awaiting [`super::Multiplexer::request`]; the response is handed over
    /// through the mailbox under the correlation key. The ticket tells apart
    /// successive callers using the same key.
    Waiting(u64),

    /// A listener registered through [`super::Multiplexer::request_with_listener`].
    Async(Arc<AsyncWaiter<M>>),
}

/// The pending requests of a multiplexer together with its counters, so that both
/// are always updated under the same lock.
pub(crate) struct Book<M> {
    pub pending: fxhash::FxHashMap<String, PendingRequest<M>>,
    pub counters: Counters,
}

impl<M> Default for Book<M> {
    fn default() -> Self {
        Self {
            pending: fxhash::FxHashMap::default(),
            counters: Counters::default(),
        }
    }
}

impl<M> Book<M> {
    /// Check if the synchronous caller holding `ticket` is still registered under the
    /// given pending key.
    pub fn is_waiting(&self, pending_key: &str, ticket: u64) -> bool {
        matches!(self.pending.get(pending_key), Some(PendingRequest::Waiting(current)) if *current == ticket)
    }

    /// Remove the entry under `pending_key` if it belongs to the caller holding `ticket`.
    pub fn remove_ticket(&mut self, pending_key: &str, ticket: u64) -> bool {
        if self.is_waiting(pending_key, ticket) {
            self.pending.remove(pending_key);
            true
        } else {
            false
        }
    }

    /// Remove the entry under `pending_key` if it is exactly this waiter.
    pub fn remove_waiter(&mut self, pending_key: &str, waiter: &Arc<AsyncWaiter<M>>) -> bool {
        match self.pending.get(pending_key) {
            Some(PendingRequest::Async(current)) if Arc::ptr_eq(current, waiter) => {
                self.pending.remove(pending_key);
                true
            }
            _ => false,
        }
    }
}

/// The listener side of an asynchronous request.
///
/// The response and the expiry race to resolve the waiter; whichever wins the
/// compare-and-swap on [`Self::state`] delivers, the other does nothing.
pub(crate) struct AsyncWaiter<M> {
    listener: Arc<dyn ResponseListener<M>>,
    handback: Mutex<Option<Handback>>,
    state: AtomicU8,
    expiry: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<M> AsyncWaiter<M> {
    /// Create a new unresolved waiter.
    pub fn new(listener: Arc<dyn ResponseListener<M>>, handback: Handback) -> Self {
        Self {
            listener,
            handback: Mutex::new(Some(handback)),
            state: AtomicU8::new(PENDING),
            expiry: Mutex::new(None),
        }
    }

    /// Attach the task that will expire this waiter.
    pub fn set_expiry(&self, handle: tokio::task::JoinHandle<()>) {
        let mut expiry = self.expiry.lock().unwrap_or_else(|poison| poison.into_inner());
        if self.is_resolved() {
            handle.abort();
        } else {
            *expiry = Some(handle);
        }
    }

    /// Check if the waiter has been resolved either way.
    pub fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    /// Move from pending into `resolution`; only one caller can ever succeed.
    fn resolve(&self, resolution: u8) -> bool {
        self.state
            .compare_exchange(PENDING, resolution, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn take_handback(&self) -> Handback {
        self.handback
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
            .unwrap_or_else(|| Box::new(()))
    }

    /// Deliver a response, unless the waiter has already expired.
    ///
    /// Returns whether the response was delivered.
    pub fn respond(&self, response: M) -> bool {
        if !self.resolve(RESPONDED) {
            return false;
        }

        if let Some(handle) = self
            .expiry
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
        {
            handle.abort();
        }

        self.listener
            .response_received(response, self.take_handback());
        true
    }

    /// Deliver the expiry, unless the waiter has already been responded to.
    ///
    /// Returns whether the expiry was delivered.
    pub fn expire(&self) -> bool {
        if !self.resolve(EXPIRED) {
            return false;
        }

        self.listener.expired(self.take_handback());
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::_tests::RecordingListener;

    #[test]
    fn respond_then_expire() {
        let listener = RecordingListener::<&str>::new_arc();
        let waiter = AsyncWaiter::new(listener.clone(), Box::new(7_u32));

        assert!(!waiter.is_resolved());
        assert!(waiter.respond("response"));
        assert!(waiter.is_resolved());
        assert!(!waiter.expire());
        assert!(!waiter.respond("again"));

        assert_eq!(listener.responses(), vec![("response", Some(7))]);
        assert_eq!(listener.expiries(), Vec::<Option<u32>>::new());
    }

    #[test]
    fn expire_then_respond() {
        let listener = RecordingListener::<&str>::new_arc();
        let waiter = AsyncWaiter::new(listener.clone(), Box::new(8_u32));

        assert!(waiter.expire());
        assert!(!waiter.respond("late"));
        assert!(!waiter.expire());

        assert!(listener.responses().is_empty());
        assert_eq!(listener.expiries(), vec![Some(8)]);
    }

    #[test]
    fn racing_resolutions_deliver_once() {
        for _ in 0..64 {
            let listener = RecordingListener::<&str>::new_arc();
            let waiter = Arc::new(AsyncWaiter::new(listener.clone(), Box::new(1_u32)));

            let threads = (0..4)
                .map(|id| {
                    let waiter = Arc::clone(&waiter);
                    std::thread::spawn(move || {
                        if id % 2 == 0 {
                            waiter.respond("response");
                        } else {
                            waiter.expire();
                        }
                    })
                })
                .collect::<Vec<_>>();

            threads
                .into_iter()
                .for_each(|thread| thread.join().expect("Thread panicked."));

            assert_eq!(listener.responses().len() + listener.expiries().len(), 1);
        }
    }
}
