//! relay-net: TCP plumbing for the ADS-B track relay.
//!
//! - `server`: accepts consumers on a periodic non-blocking poll and
//!   broadcasts encoded track updates to all of them.
//! - `client`: keeps a reconnecting connection to a relay server, rebuilds
//!   the track table from the stream, and expires stale aircraft.
//! - `task`: the periodic task runner both sides schedule their timers on.

pub mod client;
pub mod error;
pub mod server;
pub mod task;

pub use client::{Backoff, ClientHandle, ClientStats, ConnectionState, RelayClient};
pub use error::{NetError, Result};
pub use server::{Broadcaster, RelayServer};
pub use task::PeriodicTask;
