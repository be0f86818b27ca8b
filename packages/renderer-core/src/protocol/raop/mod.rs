//! RAOP (AirPlay) ingest (§4.7): RTP-over-UDP audio and control sockets, AES-CBC
//! decryption, and reorder/resend handled through the shared
//! [`crate::protocol::Repairer`].

mod rtp;
mod session;

pub use session::{RaopConfig, RaopSession};
