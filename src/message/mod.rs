//! The message abstraction the multiplexer correlates.
//!
//! The multiplexer never looks inside a message beyond what the [`Message`] trait
//! exposes: the 4-digit type code, named field lookup, the response predicate, an
//! optional header and the direction flag. Any wire format can take part in
//! correlation by implementing this trait; [`IsoMessage`] is the stock one.

use crate::MuxError;

mod iso;
pub use iso::*;

/// The direction of a message relative to this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from, or not yet handed to, a transport.
    #[default]
    Incoming,

    /// Written to the wire by a transport.
    Outgoing,
}

/// A correlatable unit travelling through the multiplexer.
pub trait Message: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// The 4-digit message type code, e.g. `"0200"`.
    fn type_code(&self) -> Result<&str, MuxError>;

    /// Look up a field by name.
    fn field(&self, name: &str) -> Option<&str>;

    /// Whether this message is a response.
    ///
    /// Fails if the type code is missing or malformed.
    fn is_response(&self) -> Result<bool, MuxError>;

    /// The raw header bytes, if any.
    fn header(&self) -> Option<&[u8]>;

    /// The direction flag.
    fn direction(&self) -> Direction {
        Direction::Incoming
    }
}
