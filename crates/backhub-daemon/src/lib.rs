//! BackHub node daemon library.
//!
//! One daemon runs per client server. It discovers WordPress sites,
//! executes the staged backup pipeline under the resource governor, and
//! reports everything to the master.

pub mod client;
pub mod enroll;
pub mod governor;
pub mod pipeline;
pub mod scanner;
pub mod schedule_ticker;
pub mod server;
pub mod sweep;
