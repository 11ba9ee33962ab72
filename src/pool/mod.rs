//! A pool of multiplexers behind one logical endpoint, with failover between them.

mod strategy;
pub use strategy::*;

mod model;
pub use model::*;
