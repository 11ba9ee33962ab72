//! Matching of incoming messages to pending requests, and the fallback chain for
//! those that match nothing.
//!

use std::sync::Arc;

use super::{
    model::{Multiplexer, UNHANDLED_TTL},
    pending::PendingRequest,
};
use crate::{key::pending_key, mailbox::Parcel, message::Message};

/// Receives incoming messages that match no pending request.
pub trait RequestListener<M: Message>: Send + Sync {
    /// Process a message received by `source`.
    ///
    /// Returns whether the message was consumed; if not, it is offered to the next
    /// listener.
    fn process(&self, source: &Multiplexer<M>, message: &M) -> bool;
}

impl<M: Message> Multiplexer<M> {
    /// Add a listener for unmatched messages. Listeners are offered messages in the
    /// order they were added.
    pub fn add_request_listener(&self, listener: Arc<dyn RequestListener<M>>) {
        self.listeners
            .write()
            .unwrap_or_else(ignore_poison!(self.name()))
            .push(listener);
    }

    /// Remove all listeners for unmatched messages.
    pub fn remove_request_listeners(&self) {
        self.listeners
            .write()
            .unwrap_or_else(ignore_poison!(self.name()))
            .clear();
    }

    /// Get the number of listeners for unmatched messages.
    pub fn request_listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(ignore_poison!(self.name()))
            .len()
    }

    /// Pop one message waiting under `inbound_key` and match it.
    ///
    /// This is what the listener task does for every message arriving on the inbound
    /// name; it is exposed so that a message can be processed without starting one.
    pub async fn notify(&self, inbound_key: &str) {
        match self.mailbox().poll(inbound_key).await {
            Some(Parcel::Message(message)) => self.dispatch(message).await,
            Some(Parcel::Indicator(_tag)) => {
                logger::warn!("Discarding indicator {_tag} found on {inbound_key}.");
            }
            None => {}
        }
    }

    /// Match an incoming message to its pending request, or hand it to
    /// [`Self::process_unhandled`].
    pub(super) async fn dispatch(&self, message: M) {
        let eligible = self.config().return_rejects
            || message.is_response().unwrap_or_else(|_err| {
                // Better to try to match something odd than to drop it quietly.
                logger::warn!("Could not classify incoming message: {_err}");
                true
            });

        if eligible {
            match self.key_builder().build(&message) {
                Ok(key) => {
                    let pending_key = pending_key(&key);

                    let entry = {
                        let mut book = self.book();

                        // The caller skips ignored responses and keeps waiting, so
                        // leave the entry for the response that follows.
                        let still_waiting = match book.pending.get(&pending_key) {
                            Some(PendingRequest::Waiting(ticket)) if self.is_ignored(&message) => {
                                Some(*ticket)
                            }
                            _ => None,
                        };

                        match still_waiting {
                            Some(ticket) => Some(PendingRequest::Waiting(ticket)),
                            None => book.pending.remove(&pending_key),
                        }
                    };

                    match entry {
                        Some(PendingRequest::Waiting(_)) => {
                            logger::trace!("Matched response {key} to a waiting request.");
                            self.mailbox().put_message(&key, message, None).await;
                            return;
                        }
                        Some(PendingRequest::Async(waiter)) => {
                            if waiter.respond(message) {
                                self.book().counters.response_matched();
                                logger::trace!("Matched response {key} to a listener.");
                            } else {
                                logger::debug!("Dropping response {key}, its request has expired.");
                            }
                            return;
                        }
                        None => {}
                    }
                }
                Err(_err) => {
                    logger::debug!("Could not build a key for an incoming message: {_err}");
                }
            }
        }

        self.process_unhandled(message).await
    }

    /// Offer a message that matched nothing to the request listeners, in order. If
    /// none consumes it, park it in the unhandled queue, if one is configured.
    pub async fn process_unhandled(&self, message: M) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(ignore_poison!(self.name()))
            .clone();

        if listeners
            .iter()
            .any(|listener| listener.process(self, &message))
        {
            self.book().counters.rx_forwarded += 1;
            return;
        }

        match self.unhandled_name() {
            Some(unhandled) => {
                self.book().counters.rx_unhandled += 1;
                logger::debug!("Parking unhandled message in {unhandled}.");
                self.mailbox()
                    .put_message(unhandled, message, Some(UNHANDLED_TTL))
                    .await;
            }
            None => {
                logger::debug!(
                    "Dropping unhandled message received on {name}: {message:?}",
                    name = self.name()
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        _tests::{mux_config, new_mux, request_message},
        config::MuxConfig,
        mailbox::Mailbox,
        message::{IsoMessage, RESPONSE_CODE_FIELD, TRACE_FIELD},
    };
    use std::sync::Mutex;
    use tokio::time::Duration;

    /// Records the trace numbers it sees, and consumes those it is told to.
    struct Claims {
        consumes: &'static [&'static str],
        seen: Mutex<Vec<String>>,
    }

    impl Claims {
        fn new_arc(consumes: &'static [&'static str]) -> Arc<Self> {
            Arc::new(Self {
                consumes,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl RequestListener<IsoMessage> for Claims {
        fn process(&self, source: &Multiplexer<IsoMessage>, message: &IsoMessage) -> bool {
            assert_eq!(source.name(), "mux.a");

            let trace = message.field(TRACE_FIELD).unwrap_or_default();
            self.seen.lock().unwrap().push(trace.to_owned());
            self.consumes.iter().any(|consumed| *consumed == trace)
        }
    }

    fn unhandled_mux(mailbox: &Arc<Mailbox<IsoMessage>>) -> Multiplexer<IsoMessage> {
        Multiplexer::new(
            MuxConfig {
                unhandled: Some("a.unhandled".to_owned()),
                ..mux_config("a")
            },
            Arc::clone(mailbox),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn listeners_in_order() {
        let mailbox = Mailbox::new_arc();
        let mux = unhandled_mux(&mailbox);

        let first = Claims::new_arc(&["1"]);
        let second = Claims::new_arc(&["2"]);
        mux.add_request_listener(first.clone());
        mux.add_request_listener(second.clone());
        assert_eq!(mux.request_listener_count(), 2);

        for trace in ["1", "2", "3"] {
            mux.process_unhandled(request_message(trace)).await;
        }

        assert_eq!(first.seen(), vec!["1", "2", "3"]);
        // The first listener consumed "1", so the second never saw it.
        assert_eq!(second.seen(), vec!["2", "3"]);

        assert_eq!(mux.rx_forwarded(), 2);
        assert_eq!(mux.rx_unhandled(), 1);
        assert_eq!(
            mailbox
                .poll("a.unhandled")
                .await
                .and_then(Parcel::into_message)
                .and_then(|message| message.field(TRACE_FIELD).map(str::to_owned)),
            Some("3".to_owned())
        );

        mux.remove_request_listeners();
        assert_eq!(mux.request_listener_count(), 0);
        mux.process_unhandled(request_message("1")).await;
        assert_eq!(mux.rx_unhandled(), 2);
    }

    #[tokio::test]
    async fn dropped_messages_are_not_counted() {
        let mailbox = Mailbox::new_arc();
        let mux = Multiplexer::new(mux_config("a"), Arc::clone(&mailbox)).unwrap();

        mailbox
            .put_message("a.receive", request_message("1").to_response().unwrap(), None)
            .await;
        mux.notify("a.receive").await;
        mux.process_unhandled(request_message("2")).await;

        assert_eq!(mux.rx_unhandled(), 0);
        assert_eq!(mux.rx_forwarded(), 0);
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn unhandled_messages_expire() {
        let mailbox = Mailbox::new_arc();
        let mux = unhandled_mux(&mailbox);

        mux.process_unhandled(request_message("1")).await;
        assert!(mailbox.contains("a.unhandled").await);

        tokio::time::sleep(UNHANDLED_TTL + Duration::from_millis(1)).await;
        assert!(!mailbox.contains("a.unhandled").await);
    }

    #[tokio::test]
    async fn requests_are_not_matched() {
        let mailbox = Mailbox::new_arc();
        let mux = unhandled_mux(&mailbox);
        let claims = Claims::new_arc(&[]);
        mux.add_request_listener(claims.clone());

        // Register the key of trace "1", then feed a request with the same key.
        mux.book()
            .pending
            .insert(pending_key(&mux.key_builder().build(&request_message("1")).unwrap()), PendingRequest::Waiting(0));

        mailbox.put_message("a.receive", request_message("1"), None).await;
        mux.notify("a.receive").await;

        assert_eq!(claims.seen(), vec!["1"]);
        assert_eq!(mux.pending_keys().len(), 1);

        // With rejects returned, the same message does match.
        let mux = Multiplexer::new(
            MuxConfig {
                return_rejects: true,
                ..mux_config("a")
            },
            Arc::clone(&mailbox),
        )
        .unwrap();
        let key = mux.key_builder().build(&request_message("1")).unwrap();
        mux.book()
            .pending
            .insert(pending_key(&key), PendingRequest::Waiting(0));

        mailbox.put_message("a.receive", request_message("1"), None).await;
        mux.notify("a.receive").await;

        assert!(mux.pending_keys().is_empty());
        assert!(mailbox.poll(&key).await.is_some());
    }

    #[tokio::test]
    async fn malformed_messages_are_offered() {
        let mailbox = Mailbox::new_arc();
        let mux = unhandled_mux(&mailbox);
        let claims = Claims::new_arc(&["9"]);
        mux.add_request_listener(claims.clone());

        mailbox
            .put_message("a.receive", IsoMessage::new("02X0").with_field(TRACE_FIELD, "9"), None)
            .await;
        mux.notify("a.receive").await;

        // Nothing to do on an empty inbound name.
        mux.notify("a.receive").await;

        assert_eq!(claims.seen(), vec!["9"]);
        assert_eq!(mux.rx_forwarded(), 1);
    }

    #[tokio::test]
    async fn ignored_responses_keep_the_entry() {
        let mailbox = Mailbox::new_arc();
        let mux = Multiplexer::new(
            MuxConfig {
                ignore_rc: vec!["96".to_owned()],
                ..mux_config("a")
            },
            Arc::clone(&mailbox),
        )
        .unwrap();

        let request = request_message("1");
        let key = mux.key_builder().build(&request).unwrap();
        mux.book()
            .pending
            .insert(pending_key(&key), PendingRequest::Waiting(7));

        let response = request.to_response().unwrap();
        mux.dispatch(response.clone().with_field(RESPONSE_CODE_FIELD, "96"))
            .await;
        assert!(mux.book().is_waiting(&pending_key(&key), 7));

        mux.dispatch(response.with_field(RESPONSE_CODE_FIELD, "00"))
            .await;
        assert!(mux.pending_keys().is_empty());
        assert_eq!(mailbox.count(&key).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_task_forwards() {
        let mailbox = Mailbox::new_arc();
        let mux = new_mux("a", &mailbox);
        let claims = Claims::new_arc(&["5"]);
        mux.add_request_listener(claims.clone());

        mailbox
            .put_message("a.receive", request_message("5").to_response().unwrap(), None)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(claims.seen(), vec!["5"]);
        assert_eq!(mux.rx_forwarded(), 1);
    }
}
