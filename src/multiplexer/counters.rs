//! Running counters of a multiplexer.

/// A snapshot of the counters of a [`super::Multiplexer`].
///
/// All counts only ever go up until [`super::Multiplexer::reset_counters`] is
/// called, except for [`Self::rx_pending`] which tracks the requests in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Messages handed to the transport.
    pub tx: u64,
    /// Responses matched to a request.
    pub rx: u64,
    /// Expired requests that nobody took off the outbound name.
    pub tx_expired: u64,
    /// Requests that expired without a response.
    pub rx_expired: u64,
    /// Requests currently waiting for a response.
    pub rx_pending: u64,
    /// Incoming messages that nothing claimed.
    pub rx_unhandled: u64,
    /// Incoming messages claimed by a request listener.
    pub rx_forwarded: u64,
    /// When the last response was matched.
    pub last_transaction: Option<tokio::time::Instant>,
}

impl Counters {
    /// Get the time since the last matched response, if there was one.
    pub fn idle_time(&self) -> Option<tokio::time::Duration> {
        self.last_transaction.map(|instant| instant.elapsed())
    }

    /// Reset every counter, keeping the requests in flight.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            rx_pending: self.rx_pending,
            ..Self::default()
        };
    }

    pub(crate) fn message_sent(&mut self) {
        self.tx += 1;
    }

    pub(crate) fn request_sent(&mut self) {
        self.tx += 1;
        self.rx_pending += 1;
    }

    pub(crate) fn response_matched(&mut self) {
        self.rx += 1;
        self.rx_pending = self.rx_pending.saturating_sub(1);
        self.last_transaction = Some(tokio::time::Instant::now());
    }

    pub(crate) fn request_expired(&mut self, sent: bool) {
        self.rx_expired += 1;
        if !sent {
            self.tx_expired += 1;
        }
        self.rx_pending = self.rx_pending.saturating_sub(1);
    }
}

impl std::fmt::Display for Counters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tx={}, rx={}, tx_expired={}, rx_expired={}, rx_pending={}, rx_unhandled={}, rx_forwarded={}",
            self.tx,
            self.rx,
            self.tx_expired,
            self.rx_expired,
            self.rx_pending,
            self.rx_unhandled,
            self.rx_forwarded,
        )?;

        match self.idle_time() {
            Some(idle) => write!(f, ", idle={}ms", idle.as_millis()),
            None => write!(f, ", idle=never"),
        }
    }
}
