//! A mailbox is the rendezvous point between multiplexers and transports. Assume a
//! multiplexer wants to send a request and expects a response in return. It puts the
//! request under the outbound name, where a transport picks it up; when the transport
//! receives the response it puts it under the inbound name, where the multiplexer is
//! listening. The multiplexer then places the matched response under the correlation
//! key, where the original caller is waiting for it.
//!
//! Transports also use the mailbox to publish readiness indicators: presence markers
//! that exist only while an endpoint is connected.
//!

mod parcel;
pub use parcel::*;

mod model;
pub use model::*;
