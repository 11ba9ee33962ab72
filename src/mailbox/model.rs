//! The mailbox that stages parcels under string keys until someone takes them.
//!
//!
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use super::parcel::{Parcel, Receipt, StampedParcel};

/// The queue of parcels under a single key, and the notifier waking its readers.
#[derive(Debug)]
struct Slot<M> {
    parcels: VecDeque<StampedParcel<M>>,
    notify: Arc<Notify>,
}

impl<M> Default for Slot<M> {
    fn default() -> Self {
        Self {
            parcels: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl<M> Slot<M> {
    /// Drop any expired parcels from the front of the queue.
    fn discard_expired(&mut self) {
        self.parcels.retain(|parcel| !parcel.is_expired());
    }

    /// Pop the oldest parcel that has not expired.
    fn pop(&mut self) -> Option<Parcel<M>> {
        self.discard_expired();
        self.parcels.pop_front().map(StampedParcel::take)
    }

    /// Whether nothing is stored and nobody is waiting on this slot.
    fn is_idle(&self) -> bool {
        self.parcels.is_empty() && Arc::strong_count(&self.notify) == 1
    }
}

/// A shared, keyed store with blocking take.
///
/// Each key holds a FIFO queue of [`Parcel`]s. A [`Self::put`] wakes at most one
/// reader blocked in [`Self::take`] on the same key. Parcels stored with a
/// time-to-live silently disappear once it has elapsed.
///
/// The mailbox is meant to be shared through an [`Arc`]; several multiplexers may use
/// the same one, or each their own.
#[derive(Debug)]
pub struct Mailbox<M> {
    slots: Mutex<FxHashMap<String, Slot<M>>>,
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Mailbox<M> {
    /// Create a new mailbox.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Create a new mailbox, and return the atomic reference to it.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Remove the slot for a key if nothing is stored and nobody waits on it.
    fn tidy(slots: &mut FxHashMap<String, Slot<M>>, key: &str) {
        if slots.get(key).map(Slot::is_idle).unwrap_or(false) {
            slots.remove(key);
        }
    }

    /// Store a parcel under a key, with an optional time-to-live.
    pub async fn put_with_ttl(
        &self,
        key: &str,
        parcel: Parcel<M>,
        ttl: Option<tokio::time::Duration>,
    ) {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_owned()).or_default();

        slot.parcels.push_back(StampedParcel::new(parcel, ttl));

        // `notify_one` stores a permit if nobody is waiting yet, so a reader that is
        // about to wait will still see this parcel.
        slot.notify.notify_one();
    }

    /// Store a message under a key, and return a [`Receipt`] telling whether a reader
    /// has taken it since.
    pub async fn put_with_receipt(
        &self,
        key: &str,
        message: M,
        ttl: Option<tokio::time::Duration>,
    ) -> Receipt {
        let receipt = Receipt::default();
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_owned()).or_default();

        slot.parcels.push_back(
            StampedParcel::new(Parcel::Message(message), ttl).with_receipt(receipt.clone()),
        );
        slot.notify.notify_one();
        receipt
    }

    /// Return a parcel to the front of the queue under a key, as if it had never been
    /// taken.
    pub async fn put_back(&self, key: &str, parcel: Parcel<M>) {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_owned()).or_default();

        slot.parcels.push_front(StampedParcel::new(parcel, None));
        slot.notify.notify_one();
    }

    /// Store a parcel under a key without expiry.
    pub async fn put(&self, key: &str, parcel: Parcel<M>) {
        self.put_with_ttl(key, parcel, None).await
    }

    /// Store a message under a key, with an optional time-to-live.
    pub async fn put_message(&self, key: &str, message: M, ttl: Option<tokio::time::Duration>) {
        self.put_with_ttl(key, Parcel::Message(message), ttl).await
    }

    /// Replace whatever is under a key with a single indicator.
    pub async fn set_indicator(&self, key: &str, tag: impl Into<String>) {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_owned()).or_default();

        slot.parcels.clear();
        slot.parcels
            .push_back(StampedParcel::new(Parcel::Indicator(tag.into()), None));
        slot.notify.notify_one();
    }

    /// Remove and return the oldest parcel under a key, without waiting.
    pub async fn poll(&self, key: &str) -> Option<Parcel<M>> {
        let mut slots = self.slots.lock().await;
        let parcel = slots.get_mut(key).and_then(Slot::pop);
        Self::tidy(&mut slots, key);
        parcel
    }

    /// Remove and return the oldest parcel under a key, waiting until `deadline` for
    /// one to arrive. Waits forever if no deadline is given.
    pub async fn take_until(
        &self,
        key: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Option<Parcel<M>> {
        loop {
            let notify = {
                let mut slots = self.slots.lock().await;
                let slot = slots.entry(key.to_owned()).or_default();

                if let Some(parcel) = slot.pop() {
                    Self::tidy(&mut slots, key);
                    return Some(parcel);
                }

                Arc::clone(&slot.notify)
            };

            let expired = match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notify.notified() => false,
                        _ = tokio::time::sleep_until(deadline) => true,
                    }
                }
                None => {
                    notify.notified().await;
                    false
                }
            };

            if expired {
                // Let go of the notifier before tidying up, or the slot is never idle.
                drop(notify);
                return self.poll(key).await;
            }
        }
    }

    /// Remove and return the oldest parcel under a key, waiting up to `timeout`.
    pub async fn take(&self, key: &str, timeout: tokio::time::Duration) -> Option<Parcel<M>> {
        self.take_until(key, Some(tokio::time::Instant::now() + timeout))
            .await
    }

    /// Remove and return the oldest parcel under a key, waiting as long as it takes.
    pub async fn take_next(&self, key: &str) -> Option<Parcel<M>> {
        self.take_until(key, None).await
    }

    /// Remove every parcel under a key.
    pub async fn clear(&self, key: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.parcels.clear();
        }
        Self::tidy(&mut slots, key);
    }

    /// Check if anything is stored under a key.
    pub async fn contains(&self, key: &str) -> bool {
        let mut slots = self.slots.lock().await;
        slots
            .get_mut(key)
            .map(|slot| {
                slot.discard_expired();
                !slot.parcels.is_empty()
            })
            .unwrap_or(false)
    }

    /// Get the number of parcels stored under a key.
    pub async fn count(&self, key: &str) -> usize {
        let mut slots = self.slots.lock().await;
        slots
            .get_mut(key)
            .map(|slot| {
                slot.discard_expired();
                slot.parcels.len()
            })
            .unwrap_or(0)
    }

    /// Get the number of parcels in the mailbox, across all keys.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .map(|slot| {
                slot.parcels
                    .iter()
                    .filter(|parcel| !parcel.is_expired())
                    .count()
            })
            .sum()
    }

    /// Check if the mailbox is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove all parcels that have expired, or that are older than the given duration.
    pub async fn clean_old_parcels(&self, duration: tokio::time::Duration) {
        let mut slots = self.slots.lock().await;
        slots.values_mut().for_each(|slot| {
            slot.parcels
                .retain(|parcel| !parcel.is_expired() && parcel.age() < duration)
        });
        slots.retain(|_, slot| !slot.is_idle());
    }
}

impl<M: Clone> Mailbox<M> {
    /// Return a copy of the oldest parcel under a key, without removing it.
    pub async fn peek(&self, key: &str) -> Option<Parcel<M>> {
        let mut slots = self.slots.lock().await;
        slots.get_mut(key).and_then(|slot| {
            slot.discard_expired();
            slot.parcels.front().map(|stamped| stamped.parcel.clone())
        })
    }

    /// Get the tag of the indicator under a key, if there is one.
    pub async fn indicator(&self, key: &str) -> Option<String> {
        self.peek(key)
            .await
            .and_then(|parcel| parcel.tag().map(str::to_owned))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn put_then_take() {
        let mailbox = Mailbox::<u32>::new();

        mailbox.put("out", Parcel::Message(1)).await;
        mailbox.put("out", Parcel::Message(2)).await;

        assert_eq!(mailbox.count("out").await, 2);
        assert_eq!(mailbox.peek("out").await, Some(Parcel::Message(1)));
        assert_eq!(
            mailbox.take("out", Duration::from_millis(10)).await,
            Some(Parcel::Message(1))
        );
        assert_eq!(mailbox.poll("out").await, Some(Parcel::Message(2)));
        assert_eq!(mailbox.poll("out").await, None);
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn take_times_out() {
        let mailbox = Mailbox::<u32>::new();

        let started = tokio::time::Instant::now();
        assert_eq!(mailbox.take("nothing", Duration::from_millis(250)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(250));

        // The waiter has gone, so the slot should have been tidied up.
        assert!(mailbox.slots.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn take_waits_for_put() {
        let mailbox = Mailbox::<&'static str>::new_arc();

        let writer = {
            let mailbox = Arc::clone(&mailbox);
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                mailbox.put("key", Parcel::Message("response")).await;
            }
        };
        let reader = async {
            let started = tokio::time::Instant::now();
            let parcel = mailbox.take("key", Duration::from_secs(2)).await;
            (parcel, started.elapsed())
        };

        let (_, (parcel, elapsed)) = tokio::join!(writer, reader);

        assert_eq!(parcel, Some(Parcel::Message("response")));
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn put_wakes_one_reader() {
        let mailbox = Mailbox::<u32>::new_arc();

        let readers = (0..2)
            .map(|_| {
                let mailbox = Arc::clone(&mailbox);
                tokio::spawn(async move { mailbox.take("key", Duration::from_secs(1)).await })
            })
            .collect::<Vec<_>>();

        tokio::time::sleep(Duration::from_millis(10)).await;
        mailbox.put("key", Parcel::Message(7)).await;

        let results = futures::future::join_all(readers).await;
        let delivered = results
            .into_iter()
            .filter_map(|result| result.expect("Reader panicked."))
            .collect::<Vec<_>>();

        assert_eq!(delivered, vec![Parcel::Message(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry() {
        let mailbox = Mailbox::<u32>::new();

        mailbox
            .put_with_ttl("out", Parcel::Message(1), Some(Duration::from_millis(100)))
            .await;
        assert!(mailbox.contains("out").await);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!mailbox.contains("out").await);
        assert_eq!(mailbox.poll("out").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn receipts() {
        let mailbox = Mailbox::<u32>::new();

        let taken = mailbox.put_with_receipt("out", 1, None).await;
        let expired = mailbox
            .put_with_receipt("out", 2, Some(Duration::from_millis(100)))
            .await;
        assert!(!taken.is_taken());

        assert_eq!(mailbox.poll("out").await, Some(Parcel::Message(1)));
        assert!(taken.is_taken());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(mailbox.poll("out").await, None);
        assert!(!expired.is_taken());

        let cleared = mailbox.put_with_receipt("out", 3, None).await;
        mailbox.clear("out").await;
        assert!(!cleared.is_taken());
    }

    #[tokio::test]
    async fn put_back_goes_first() {
        let mailbox = Mailbox::<u32>::new();

        mailbox.put("in", Parcel::Message(2)).await;
        mailbox.put_back("in", Parcel::Message(1)).await;

        assert_eq!(mailbox.poll("in").await, Some(Parcel::Message(1)));
        assert_eq!(mailbox.poll("in").await, Some(Parcel::Message(2)));
    }

    #[tokio::test]
    async fn indicators_and_clear() {
        let mailbox = Mailbox::<u32>::new();

        mailbox.set_indicator("channel.ready", "session-1").await;
        mailbox.set_indicator("channel.ready", "session-2").await;
        assert_eq!(mailbox.count("channel.ready").await, 1);
        assert_eq!(
            mailbox.indicator("channel.ready").await.as_deref(),
            Some("session-2")
        );

        mailbox.put("queue", Parcel::Message(1)).await;
        mailbox.put("queue", Parcel::Message(2)).await;
        mailbox.clear("queue").await;
        assert!(!mailbox.contains("queue").await);

        // A message is not an indicator.
        mailbox.put("queue", Parcel::Message(3)).await;
        assert_eq!(mailbox.indicator("queue").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_old_parcels() {
        let mailbox = Mailbox::<u32>::new();

        mailbox.put("old", Parcel::Message(1)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        mailbox.put("new", Parcel::Message(2)).await;

        mailbox.clean_old_parcels(Duration::from_secs(1)).await;

        assert!(!mailbox.contains("old").await);
        assert!(mailbox.contains("new").await);
        assert_eq!(mailbox.len().await, 1);
    }
}
