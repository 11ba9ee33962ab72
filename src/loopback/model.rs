//! The loopback endpoint model.
//!

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::Notify;

use crate::{
    config::MuxConfig,
    mailbox::{Mailbox, Parcel},
    message::{Direction, IsoMessage, RESPONSE_CODE_FIELD},
};

/// The response code of an approved request.
pub const APPROVED: &str = "00";

/// One response the endpoint sends back for each request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// How long after receiving the request the response is put on the inbound name.
    pub after: tokio::time::Duration,
    pub response_code: String,
}

impl Reply {
    pub fn new(after: tokio::time::Duration, response_code: impl Into<String>) -> Self {
        Self {
            after,
            response_code: response_code.into(),
        }
    }

    /// An immediate approval.
    pub fn approved() -> Self {
        Self::new(tokio::time::Duration::ZERO, APPROVED)
    }
}

/// A remote endpoint answering requests through the mailbox.
pub struct LoopbackEndpoint {
    name: String,
    out: String,
    inbound: String,
    ready: Option<String>,
    mailbox: Arc<Mailbox<IsoMessage>>,

    /// Swallow requests without answering.
    silent: AtomicBool,
    replies: Mutex<Vec<Reply>>,
    received: AtomicU64,
    sessions: AtomicU64,

    termination: Arc<Notify>,
    _handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LoopbackEndpoint {
    /// Create an endpoint reading `out` and answering on `inbound`.
    pub fn new(
        name: impl Into<String>,
        out: impl Into<String>,
        inbound: impl Into<String>,
        mailbox: Arc<Mailbox<IsoMessage>>,
    ) -> Self {
        Self {
            name: name.into(),
            out: out.into(),
            inbound: inbound.into(),
            ready: None,
            mailbox,
            silent: AtomicBool::new(false),
            replies: Mutex::new(vec![Reply::approved()]),
            received: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            termination: Arc::new(Notify::new()),
            _handle: Mutex::new(None),
        }
    }

    /// Create the endpoint at the other end of a multiplexer; its first readiness
    /// indicator, if any, becomes the endpoint's.
    pub fn for_mux(config: &MuxConfig, mailbox: Arc<Mailbox<IsoMessage>>) -> Self {
        Self::new(
            format!("{}.endpoint", config.name),
            config.out.clone(),
            config.inbound.clone(),
            mailbox,
        )
        .with_ready(config.ready.first().cloned())
    }

    /// Chain method to set the readiness indicator.
    pub fn with_ready(mut self, ready: Option<String>) -> Self {
        self.ready = ready;
        self
    }

    /// Chain method to replace the responses sent for each request.
    pub fn with_replies(self, replies: Vec<Reply>) -> Self {
        self.set_replies(replies);
        self
    }

    /// Chain method to start the endpoint silent.
    pub fn with_silent(self, silent: bool) -> Self {
        self.set_silent(silent);
        self
    }

    pub fn set_replies(&self, replies: Vec<Reply>) {
        *self
            .replies
            .lock()
            .unwrap_or_else(ignore_poison!(self.name)) = replies;
    }

    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of requests received so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Start answering in the background, and connect.
    ///
    /// This chain method returns the same [`Arc<LoopbackEndpoint>`] for further
    /// chaining.
    pub async fn start(self: Arc<Self>) -> Arc<Self> {
        let handle = tokio::spawn({
            let weak_self = Arc::downgrade(&self);
            let mailbox = Arc::clone(&self.mailbox);
            let out = self.out.clone();
            let termination = Arc::clone(&self.termination);

            async move {
                loop {
                    let parcel = tokio::select! {
                        _ = termination.notified() => break,
                        parcel = mailbox.take_next(&out) => parcel,
                    };

                    let Some(arc_self) = weak_self.upgrade() else {
                        break;
                    };

                    if let Some(Parcel::Message(request)) = parcel {
                        arc_self.answer(request);
                    }
                }
            }
        });

        if let Some(previous) = self
            ._handle
            .lock()
            .unwrap_or_else(ignore_poison!(self.name))
            .replace(handle)
        {
            previous.abort();
        }

        self.connect().await;
        self
    }

    /// Publish a fresh readiness indicator, and return its tag.
    pub async fn connect(&self) -> Option<String> {
        let ready = self.ready.as_deref()?;
        let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let tag = format!("{name}.session-{session}", name = self.name);

        self.mailbox.set_indicator(ready, tag.clone()).await;
        logger::debug!("{name} connected as {tag}.", name = self.name);
        Some(tag)
    }

    /// Withdraw the readiness indicator.
    pub async fn disconnect(&self) {
        if let Some(ready) = self.ready.as_deref() {
            self.mailbox.clear(ready).await;
            logger::debug!("{name} disconnected.", name = self.name);
        }
    }

    /// Get the tag of the current readiness indicator, if connected.
    pub async fn session(&self) -> Option<String> {
        match self.ready.as_deref() {
            Some(ready) => self.mailbox.indicator(ready).await,
            None => None,
        }
    }

    /// Schedule the responses to a request.
    fn answer(&self, mut request: IsoMessage) {
        self.received.fetch_add(1, Ordering::Relaxed);
        request.set_direction(Direction::Outgoing);

        if self.silent.load(Ordering::Relaxed) {
            logger::trace!("{name} swallowing {request:?}.", name = self.name);
            return;
        }

        let response = match request.to_response() {
            Ok(response) => response,
            Err(_err) => {
                logger::warn!("{name} cannot answer a request: {_err}", name = self.name);
                return;
            }
        };

        let replies = self
            .replies
            .lock()
            .unwrap_or_else(ignore_poison!(self.name))
            .clone();

        for Reply { after, response_code } in replies {
            let mailbox = Arc::clone(&self.mailbox);
            let inbound = self.inbound.clone();
            let response = response.clone().with_field(RESPONSE_CODE_FIELD, response_code);

            tokio::spawn(async move {
                if !after.is_zero() {
                    tokio::time::sleep(after).await;
                }
                mailbox.put_message(&inbound, response, None).await;
            });
        }
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.termination.notify_one();
        if let Some(handle) = self
            ._handle
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{message::Message, message::TRACE_FIELD};
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn answers_requests() {
        let mailbox = Mailbox::new_arc();
        let endpoint = Arc::new(
            LoopbackEndpoint::new("remote", "a.send", "a.receive", Arc::clone(&mailbox)).with_replies(vec![
                Reply::new(Duration::from_millis(10), "96"),
                Reply::new(Duration::from_millis(20), APPROVED),
            ]),
        )
        .start()
        .await;

        mailbox
            .put_message("a.send", IsoMessage::new("0200").with_field(TRACE_FIELD, "1"), None)
            .await;

        let first = mailbox
            .take("a.receive", Duration::from_secs(1))
            .await
            .and_then(Parcel::into_message)
            .unwrap();
        assert_eq!(first.type_code().unwrap(), "0210");
        assert_eq!(first.field(RESPONSE_CODE_FIELD), Some("96"));

        let second = mailbox
            .take("a.receive", Duration::from_secs(1))
            .await
            .and_then(Parcel::into_message)
            .unwrap();
        assert_eq!(second.field(RESPONSE_CODE_FIELD), Some(APPROVED));
        assert_eq!(endpoint.received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_and_readiness() {
        let mailbox = Mailbox::new_arc();
        let endpoint = Arc::new(
            LoopbackEndpoint::new("remote", "a.send", "a.receive", Arc::clone(&mailbox))
                .with_ready(Some("a.ready".to_owned()))
                .with_silent(true),
        )
        .start()
        .await;

        assert_eq!(endpoint.session().await.as_deref(), Some("remote.session-1"));

        mailbox
            .put_message("a.send", IsoMessage::new("0800").with_field(TRACE_FIELD, "1"), None)
            .await;
        assert!(mailbox.take("a.receive", Duration::from_secs(1)).await.is_none());
        assert_eq!(endpoint.received(), 1);

        endpoint.disconnect().await;
        assert!(!mailbox.contains("a.ready").await);

        assert_eq!(endpoint.connect().await.as_deref(), Some("remote.session-2"));
    }
}
