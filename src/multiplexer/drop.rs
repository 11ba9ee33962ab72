//! Destructor for the multiplexer.
//!
//! The listener task only holds a weak reference to the multiplexer, but it would
//! otherwise sit waiting on the inbound name forever.

use super::Multiplexer;
use crate::message::Message;

impl<M: Message> Drop for Multiplexer<M> {
    fn drop(&mut self) {
        // Dropping the handle detaches the task, which ends once it sees the flag.
        let _ = self.stop_listener();
    }
}
