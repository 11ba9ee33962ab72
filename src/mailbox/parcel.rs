//! Values stored in a [`super::Mailbox`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// The unit stored under a mailbox key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parcel<M> {
    /// A message in transit.
    Message(M),

    /// A presence marker, such as a readiness or enabled indicator.
    ///
    /// The tag identifies the session that set it; two indicators refer to the same
    /// session if their tags are equal.
    Indicator(String),
}

impl<M> Parcel<M> {
    /// Unwrap the message, if this parcel is one.
    pub fn into_message(self) -> Option<M> {
        match self {
            Self::Message(message) => Some(message),
            Self::Indicator(_) => None,
        }
    }

    /// Borrow the message, if this parcel is one.
    pub fn as_message(&self) -> Option<&M> {
        match self {
            Self::Message(message) => Some(message),
            Self::Indicator(_) => None,
        }
    }

    /// Get the indicator tag, if this parcel is one.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Indicator(tag) => Some(tag),
            Self::Message(_) => None,
        }
    }
}

/// Tells whether a parcel has been taken out of the mailbox by a reader.
///
/// Parcels that expire, or are cleared, are never marked as taken.
#[derive(Clone, Debug, Default)]
pub struct Receipt(Arc<AtomicBool>);

impl Receipt {
    /// Check if a reader has taken the parcel.
    pub fn is_taken(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn mark_taken(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A parcel with the time it was stored, and an optional expiry.
#[derive(Debug)]
pub(crate) struct StampedParcel<M> {
    pub parcel: Parcel<M>,
    pub timestamp: tokio::time::Instant,
    pub expires_at: Option<tokio::time::Instant>,
    pub receipt: Option<Receipt>,
}

impl<M> StampedParcel<M> {
    /// Stamp a parcel with the current time and an optional time-to-live.
    pub fn new(parcel: Parcel<M>, ttl: Option<tokio::time::Duration>) -> Self {
        let timestamp = tokio::time::Instant::now();
        Self {
            parcel,
            timestamp,
            expires_at: ttl.map(|ttl| timestamp + ttl),
            receipt: None,
        }
    }

    /// Chain method to attach a receipt.
    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipt = Some(receipt);
        self
    }

    /// Unwrap the parcel as a reader takes it.
    pub fn take(self) -> Parcel<M> {
        if let Some(receipt) = &self.receipt {
            receipt.mark_taken();
        }
        self.parcel
    }

    /// Whether the parcel has outlived its time-to-live.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| expires_at <= tokio::time::Instant::now())
            .unwrap_or(false)
    }

    /// Get the age of the parcel.
    pub fn age(&self) -> tokio::time::Duration {
        self.timestamp.elapsed()
    }
}
