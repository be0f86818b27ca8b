//! Ingest protocols: each owns one or more UDP/TCP transports, recognises its
//! wire framing, and drives `EncodedStream`/`AudioEncoded`/`MetaText` messages
//! into the encoded reservoir that feeds the codec layer (§4.6, §4.7, §4.8).

mod http;
mod raop;
mod repair;
mod songcast;

pub use http::HttpIngest;
pub use raop::{RaopConfig, RaopSession};
pub use repair::{RepairOutcome, Repairer, ResendLedger, ResendRequest};
pub use songcast::{OhmMode, SongcastConfig, SongcastSession};
