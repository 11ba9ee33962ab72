//! Request/response multiplexing over a shared mailbox.
//!
//! A [`Multiplexer`] puts requests where a transport picks them up, and matches the
//! responses the transport hands back to their requests by a correlation key built
//! from the message content. A [`MultiplexerPool`] spreads calls over several
//! multiplexers with failover between them.
//!

/// Carry on with the data behind a poisoned lock, logging a warning.
macro_rules! ignore_poison {
    ($name:expr) => {
        |poison| {
            logger::warn!(
                "Poisoned lock ignored for {name}, \
                but some bookkeeping may have been lost.",
                name = $name
            );
            poison.into_inner()
        }
    };
}

mod config;
pub use config::{CliArgs, MuxConfig, PoolConfig};

mod errors;
pub use errors::MuxError;

pub mod key;
pub mod loopback;

pub mod mailbox;
pub use mailbox::{Mailbox, Parcel};

pub mod message;
pub use message::{Direction, IsoMessage, Message};

pub mod multiplexer;
pub use multiplexer::{Counters, Handback, Multiplexer, RequestListener, ResponseListener};

pub mod pool;
pub use pool::{MultiplexerPool, Strategy, StrategyHandler};

pub mod registry;
pub use registry::Registry;

pub mod trace;
