//! The main multiplexer model.
//!

use fxhash::FxHashSet;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock, Weak,
    },
};
use tokio::sync::Notify;

use super::{
    dispatch::RequestListener,
    pending::{AsyncWaiter, Book, PendingRequest, ResponseListener},
    Counters,
};
use crate::{
    config::MuxConfig,
    key::{pending_key, KeyBuilder},
    mailbox::{Mailbox, Parcel, Receipt},
    message::{Direction, Message, RESPONSE_CODE_FIELD},
    MuxError,
};

/// Extra time a request keeps waiting if its response was matched just as the
/// request timed out.
pub const RACE_GRACE: tokio::time::Duration = tokio::time::Duration::from_secs(10);

/// How long unmatched messages are kept in the unhandled queue.
pub const UNHANDLED_TTL: tokio::time::Duration = tokio::time::Duration::from_secs(120);

/// The running inbound listener task, and the flag that stops it.
struct InboundListener {
    handle: tokio::task::JoinHandle<()>,
    termination: Arc<Notify>,
}

/// Lock the book of a multiplexer, carrying on if a previous holder panicked.
pub(super) fn lock_book<'b, M>(book: &'b Mutex<Book<M>>, name: &str) -> MutexGuard<'b, Book<M>> {
    book.lock().unwrap_or_else(ignore_poison!(name))
}

/// A request multiplexer over a shared [`Mailbox`].
///
/// Requests are put in the mailbox under the outbound name for a transport to
/// send. The transport puts whatever it receives under the inbound name, where the
/// multiplexer's listener task picks it up; responses are matched to their requests by
/// a correlation key built from their content (see [`KeyBuilder`]).
///
/// Two ways to wait for a response are offered:
///
/// - [`Self::request`] awaits the response, or [`None`] if it does not arrive in time;
/// - [`Self::request_with_listener`] returns immediately, and the outcome is delivered
///   to a [`ResponseListener`] exactly once.
///
/// Incoming messages that match no request are offered to the registered
/// [`RequestListener`]s, and if none claims them, parked in the unhandled queue.
///
/// At most one request can be pending per correlation key; a second one is rejected
/// with [`MuxError::DuplicateCorrelationKey`].
pub struct Multiplexer<M: Message> {
    config: MuxConfig,
    keys: KeyBuilder,
    ignore_rc: FxHashSet<String>,
    mailbox: Arc<Mailbox<M>>,

    /// Pending requests and counters, under one lock.
    pub(super) book: Arc<Mutex<Book<M>>>,

    /// Listeners for incoming messages that match no request, in registration order.
    pub(super) listeners: RwLock<Vec<Arc<dyn RequestListener<M>>>>,

    running: AtomicBool,

    /// Tickets telling apart successive synchronous requests with the same key.
    tickets: AtomicU64,

    /// The handle for the inbound listener.
    _listener: Mutex<Option<InboundListener>>,
}

impl<M: Message> Multiplexer<M> {
    /// Create a new multiplexer.
    ///
    /// The multiplexer does not consume its inbound name until [`Self::start`] is
    /// called.
    pub fn new(config: MuxConfig, mailbox: Arc<Mailbox<M>>) -> Result<Self, MuxError> {
        config.validate()?;
        let keys = config.key_builder()?;

        Ok(Self {
            ignore_rc: config.ignore_rc.iter().cloned().collect(),
            keys,
            config,
            mailbox,
            book: Arc::new(Mutex::new(Book::default())),
            listeners: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            tickets: AtomicU64::new(0),
            _listener: Mutex::new(None),
        })
    }

    /// Create a new multiplexer and start it.
    pub fn new_and_start(config: MuxConfig, mailbox: Arc<Mailbox<M>>) -> Result<Arc<Self>, MuxError> {
        Ok(Arc::new(Self::new(config, mailbox)?).start())
    }

    /// Start consuming the inbound name in the background.
    ///
    /// This chain method returns the same [`Arc<Multiplexer>`] for further chaining;
    /// calling it on a running multiplexer does nothing.
    pub fn start(self: Arc<Self>) -> Arc<Self> {
        if self.running.swap(true, Ordering::AcqRel) {
            return self;
        }

        let termination = Arc::new(Notify::new());
        let handle = tokio::spawn({
            let weak_self = Arc::downgrade(&self);
            let mailbox = Arc::clone(&self.mailbox);
            let inbound = self.config.inbound.clone();
            let termination = Arc::clone(&termination);

            async move {
                logger::debug!("Listening on {inbound}...");
                loop {
                    let parcel = tokio::select! {
                        _ = termination.notified() => break,
                        parcel = mailbox.take_next(&inbound) => parcel,
                    };

                    if !deliver(&weak_self, &mailbox, &inbound, parcel).await {
                        break;
                    }
                }
                logger::debug!("Stopped listening on {inbound}.");
            }
        });

        if let Some(previous) = self
            ._listener
            .lock()
            .unwrap_or_else(ignore_poison!(self.name()))
            .replace(InboundListener {
                handle,
                termination,
            })
        {
            previous.termination.notify_one();
        }

        logger::info!("Started {name}.", name = self.name());
        self
    }

    /// Take the listener task out, and tell it to stop.
    pub(super) fn stop_listener(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.running.store(false, Ordering::Release);

        self._listener
            .lock()
            .unwrap_or_else(ignore_poison!(self.name()))
            .take()
            .map(|listener| {
                listener.termination.notify_one();
                listener.handle
            })
    }

    /// Stop consuming the inbound name.
    ///
    /// Requests still waiting are left to expire on their own; see
    /// [`Self::reject_pending`] to expire them right away.
    pub fn stop(&self) {
        if self.stop_listener().is_some() {
            logger::info!("Stopped {name}.", name = self.name());
        }
    }

    /// Stop consuming the inbound name, and wait for the listener task to finish.
    pub async fn shutdown(&self) -> Result<(), MuxError> {
        if let Some(handle) = self.stop_listener() {
            handle.await?;
            logger::info!("Shut down {name}.", name = self.name());
        }
        Ok(())
    }

    /// Check if the multiplexer has been started and not stopped since.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if the multiplexer can send.
    ///
    /// A running multiplexer without readiness indicators is always connected;
    /// otherwise at least one of its indicators has to be present in the mailbox.
    pub async fn is_connected(&self) -> bool {
        if !self.is_running() {
            return false;
        }

        if self.config.ready.is_empty() {
            return true;
        }

        for indicator in &self.config.ready {
            if self.mailbox.contains(indicator).await {
                return true;
            }
        }

        false
    }

    async fn ensure_connected(&self) -> Result<(), MuxError> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(MuxError::NotConnected(self.name().to_owned()))
        }
    }

    /// Lock the pending requests and counters.
    pub(super) fn book(&self) -> MutexGuard<'_, Book<M>> {
        lock_book(&self.book, self.name())
    }

    /// Register a pending request, unless one already exists under the same key.
    fn register(&self, pending_key: &str, entry: PendingRequest<M>) -> Result<(), MuxError> {
        let mut book = self.book();

        if book.pending.contains_key(pending_key) {
            return Err(MuxError::DuplicateCorrelationKey(pending_key.to_owned()));
        }

        book.pending.insert(pending_key.to_owned(), entry);
        book.counters.request_sent();
        Ok(())
    }

    /// Check if a response code is one that a waiting request skips over.
    pub(super) fn is_ignored(&self, message: &M) -> bool {
        !self.ignore_rc.is_empty()
            && message
                .field(RESPONSE_CODE_FIELD)
                .map(|rc| self.ignore_rc.contains(rc))
                .unwrap_or(false)
    }

    /// Send a message without waiting for any response.
    pub async fn send(&self, message: M) -> Result<(), MuxError> {
        self.ensure_connected().await?;
        self.mailbox
            .put_message(self.out_name(), message, None)
            .await;
        self.book().counters.message_sent();
        Ok(())
    }

    /// Send a message without waiting for any response; the transport drops it if it
    /// cannot send it within `timeout`.
    pub async fn send_with_ttl(
        &self,
        message: M,
        timeout: tokio::time::Duration,
    ) -> Result<(), MuxError> {
        self.ensure_connected().await?;
        self.mailbox
            .put_message(self.out_name(), message, Some(timeout))
            .await;
        self.book().counters.message_sent();
        Ok(())
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// Returns [`None`] if no response arrived in time. Responses carrying one of the
    /// ignored response codes are skipped, and waiting carries on until the same
    /// deadline. A zero timeout sends the message without waiting at all.
    pub async fn request(
        &self,
        message: M,
        timeout: tokio::time::Duration,
    ) -> Result<Option<M>, MuxError> {
        if timeout.is_zero() {
            self.send(message).await?;
            return Ok(None);
        }

        let key = self.keys.build(&message)?;
        let pending_key = pending_key(&key);
        self.ensure_connected().await?;

        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        self.register(&pending_key, PendingRequest::Waiting(ticket))?;

        let marked = message.direction() == Direction::Outgoing;
        let deadline = tokio::time::Instant::now() + timeout;

        logger::trace!("Sending request {key} with a timeout of {timeout:?}.");
        let receipt = self
            .mailbox
            .put_with_receipt(self.out_name(), message, Some(timeout))
            .await;

        let response = self
            .await_response(&key, &pending_key, ticket, deadline)
            .await;

        {
            let mut book = self.book();
            book.remove_ticket(&pending_key, ticket);
            match response {
                Some(_) => book.counters.response_matched(),
                None => book.counters.request_expired(marked || receipt.is_taken()),
            }
        }

        if response.is_none() {
            // Anything arriving from now on is no longer awaited.
            self.mailbox.clear(&key).await;
            logger::debug!("Request {key} expired after {timeout:?}.");
        }

        Ok(response)
    }

    /// Take responses under `key` until one is not ignored, or `deadline` passes.
    async fn await_response(
        &self,
        key: &str,
        pending_key: &str,
        ticket: u64,
        deadline: tokio::time::Instant,
    ) -> Option<M> {
        loop {
            match self.mailbox.take_until(key, Some(deadline)).await {
                Some(Parcel::Message(response)) if self.is_ignored(&response) => {
                    logger::debug!(
                        "Ignoring response to {key} with response code {rc:?}.",
                        rc = response.field(RESPONSE_CODE_FIELD)
                    );
                }
                Some(Parcel::Message(response)) => return Some(response),
                Some(Parcel::Indicator(_)) => {}
                None => break,
            }
        }

        let matched = !self.book().is_waiting(pending_key, ticket);
        if !matched {
            return None;
        }

        // The response was matched just as the request timed out, so it is on its way.
        logger::debug!("Response to {key} matched at expiry, waiting {RACE_GRACE:?} for it.");
        self.mailbox
            .take(key, RACE_GRACE)
            .await
            .and_then(Parcel::into_message)
            .filter(|response| !self.is_ignored(response))
    }

    /// Send a request, and deliver its response or expiry to `listener`.
    ///
    /// Returns as soon as the request is handed to the mailbox. The listener is
    /// called exactly once: with the response if it arrives within `timeout`, or with
    /// an expiry otherwise. A zero timeout never expires.
    pub async fn request_with_listener(
        &self,
        message: M,
        timeout: tokio::time::Duration,
        listener: Arc<dyn ResponseListener<M>>,
        handback: impl Any + Send,
    ) -> Result<(), MuxError> {
        let key = self.keys.build(&message)?;
        let pending_key = pending_key(&key);
        self.ensure_connected().await?;

        let waiter = Arc::new(AsyncWaiter::new(listener, Box::new(handback)));
        self.register(&pending_key, PendingRequest::Async(Arc::clone(&waiter)))?;

        let marked = message.direction() == Direction::Outgoing;
        let ttl = (!timeout.is_zero()).then_some(timeout);

        logger::trace!("Sending asynchronous request {key} with a timeout of {timeout:?}.");
        let receipt = self
            .mailbox
            .put_with_receipt(self.out_name(), message, ttl)
            .await;

        if ttl.is_some() {
            let handle = tokio::spawn(expire_after(
                Arc::clone(&self.book),
                self.name().to_owned(),
                pending_key,
                Arc::clone(&waiter),
                timeout,
                Delivery { marked, receipt },
            ));
            waiter.set_expiry(handle);
        }

        Ok(())
    }

    /// Expire every asynchronous request still waiting, right away.
    ///
    /// Returns the number of listeners that received an expiry.
    pub fn reject_pending(&self) -> usize {
        let waiters = {
            let mut book = self.book();
            let (waiters, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut book.pending)
                .into_iter()
                .partition(|(_, entry)| matches!(entry, PendingRequest::Async(_)));
            book.pending.extend(kept);
            waiters
        };

        let rejected = waiters
            .into_iter()
            .filter(|(_, entry)| match entry {
                PendingRequest::Async(waiter) => waiter.expire(),
                PendingRequest::Waiting(_) => false,
            })
            .count();

        let mut book = self.book();
        (0..rejected).for_each(|_| book.counters.request_expired(true));

        if rejected > 0 {
            logger::info!("Rejected {rejected} pending requests on {name}.", name = self.name());
        }
        rejected
    }

    /// Get the name of this multiplexer.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the name outgoing messages are put under.
    pub fn out_name(&self) -> &str {
        &self.config.out
    }

    /// Get the name incoming messages are taken from.
    pub fn in_name(&self) -> &str {
        &self.config.inbound
    }

    /// Get the name unmatched messages are parked under, if any.
    pub fn unhandled_name(&self) -> Option<&str> {
        self.config.unhandled.as_deref()
    }

    /// Get the names of the readiness indicators.
    pub fn ready_indicator_names(&self) -> &[String] {
        &self.config.ready
    }

    /// Get the configuration.
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Get the key builder.
    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Get the mailbox.
    pub fn mailbox(&self) -> &Arc<Mailbox<M>> {
        &self.mailbox
    }

    /// Get the pending keys of all requests in flight.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys = self.book().pending.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Get a snapshot of the counters.
    pub fn counters(&self) -> Counters {
        self.book().counters
    }

    /// Reset all counters, except the count of requests in flight.
    pub fn reset_counters(&self) {
        self.book().counters.reset();
    }

    pub fn tx_counter(&self) -> u64 {
        self.counters().tx
    }

    pub fn rx_counter(&self) -> u64 {
        self.counters().rx
    }

    pub fn tx_expired(&self) -> u64 {
        self.counters().tx_expired
    }

    pub fn rx_expired(&self) -> u64 {
        self.counters().rx_expired
    }

    pub fn rx_pending(&self) -> u64 {
        self.counters().rx_pending
    }

    pub fn rx_unhandled(&self) -> u64 {
        self.counters().rx_unhandled
    }

    pub fn rx_forwarded(&self) -> u64 {
        self.counters().rx_forwarded
    }

    /// Get when the last response was matched.
    pub fn last_transaction(&self) -> Option<tokio::time::Instant> {
        self.counters().last_transaction
    }

    /// Get the time since the last response was matched.
    pub fn idle_time(&self) -> Option<tokio::time::Duration> {
        self.counters().idle_time()
    }

    /// Describe the counters and connection state in one line.
    pub async fn counters_as_string(&self) -> String {
        format!(
            "{counters}, connected={connected}",
            counters = self.counters(),
            connected = self.is_connected().await
        )
    }

    /// Write a diagnostic dump of this multiplexer.
    pub async fn dump(&self, out: &mut impl std::io::Write, indent: &str) -> std::io::Result<()> {
        let connected = self.is_connected().await;
        let counters = self.counters();

        writeln!(
            out,
            "{indent}<mux name=\"{name}\" out=\"{out_name}\" in=\"{in_name}\" connected=\"{connected}\">",
            name = self.name(),
            out_name = self.out_name(),
            in_name = self.in_name(),
        )?;
        writeln!(out, "{indent}  {counters}")?;
        for key in self.pending_keys() {
            writeln!(out, "{indent}  <pending>{key}</pending>")?;
        }
        writeln!(out, "{indent}</mux>")
    }
}

/// Dispatch a parcel taken from the inbound name.
///
/// If the multiplexer has been dropped meanwhile, the parcel goes back to the front
/// of the inbound name for whoever listens next, and `false` is returned.
async fn deliver<M: Message>(
    weak_mux: &Weak<Multiplexer<M>>,
    mailbox: &Mailbox<M>,
    inbound: &str,
    parcel: Option<Parcel<M>>,
) -> bool {
    let Some(mux) = weak_mux.upgrade() else {
        if let Some(parcel) = parcel {
            mailbox.put_back(inbound, parcel).await;
        }
        return false;
    };

    match parcel {
        Some(Parcel::Message(message)) => mux.dispatch(message).await,
        Some(Parcel::Indicator(_tag)) => {
            logger::warn!("Discarding indicator {_tag} found on {inbound}.");
        }
        None => {}
    }
    true
}

/// How far a request got towards the wire.
struct Delivery {
    /// The request was already marked as written when it was sent.
    marked: bool,
    receipt: Receipt,
}

impl Delivery {
    fn is_sent(&self) -> bool {
        self.marked || self.receipt.is_taken()
    }
}

/// Expire an asynchronous request after `timeout`, unless its response came first.
async fn expire_after<M: Message>(
    book: Arc<Mutex<Book<M>>>,
    name: String,
    pending_key: String,
    waiter: Arc<AsyncWaiter<M>>,
    timeout: tokio::time::Duration,
    delivery: Delivery,
) {
    tokio::time::sleep(timeout).await;

    lock_book(&book, &name).remove_waiter(&pending_key, &waiter);

    if waiter.expire() {
        lock_book(&book, &name)
            .counters
            .request_expired(delivery.is_sent());
        logger::debug!("Request {pending_key} on {name} expired after {timeout:?}.");
    }
}
