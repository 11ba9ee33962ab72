//! The request multiplexer: correlates outgoing requests with incoming responses
//! over a shared [`crate::Mailbox`].

mod model;
pub use model::*;

mod counters;
pub use counters::*;

mod pending;
pub use pending::{Handback, ResponseListener};

mod dispatch;
pub use dispatch::RequestListener;

mod drop;
