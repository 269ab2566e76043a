//! relay-core: Pure tracking + wire protocol library for the ADS-B track relay.
//!
//! No async and no sockets: the track table, the update codec and the stream
//! reassembler. `relay-net` wraps these in the TCP server and client;
//! `relay-cli` ships the `adsb-relay` binary.

pub mod config;
pub mod field;
pub mod reassembly;
pub mod tracker;
pub mod types;
pub mod wire;

// Re-export commonly used types at crate root
pub use field::{FieldRecord, FieldUpdate};
pub use reassembly::StreamReassembler;
pub use tracker::{TrackRecord, TrackTable};
pub use types::*;
