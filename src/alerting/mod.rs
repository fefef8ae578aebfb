//! State tracking, alert derivation and delivery.

mod backoff;
mod dispatcher;
mod tracker;

pub use backoff::*;
pub use dispatcher::*;
pub use tracker::*;
