//! Correlation keys.
//!
//! A request and its response are matched by a string key derived from their
//! content: the outbound name, the message type after collapsing request/response
//! pairs through the [`MtiMapping`], optionally the header, and a configurable set of
//! field values. See [`KeyBuilder::build`].
//!

mod mti;
pub use mti::*;

mod builder;
pub use builder::*;

/// Suffix appended to a correlation key to address its pending entry.
pub const PENDING_SUFFIX: &str = ".req";

/// The name under which the pending entry for a correlation key is tracked.
pub fn pending_key(key: &str) -> String {
    format!("{key}{PENDING_SUFFIX}")
}
