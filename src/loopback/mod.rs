//! An in-process transport stand-in.
//!
//! A [`LoopbackEndpoint`] drains the outbound name of a multiplexer and answers every
//! request on its inbound name, as a remote host behind a real transport would. It
//! also owns the readiness indicator, so tests and the demo binary can connect and
//! disconnect it at will.

mod model;
pub use model::*;
