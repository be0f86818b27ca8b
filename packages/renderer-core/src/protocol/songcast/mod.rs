//! Songcast (OHM/OHU) ingest (§4.8): multicast or unicast UDP audio framed
//! behind an 8-byte `"Songcast"` cookie, reassembled by frame number through
//! the shared [`crate::protocol::Repairer`].

mod session;
mod wire;

pub use session::{OhmMode, SongcastConfig, SongcastSession};
