//! Core library for a network audio renderer.
//!
//! The renderer ingests audio from several sources (HTTP/ICY radio, AirPlay/RAOP,
//! Songcast OHM/OHU) and drives a local audio output through a staged pipeline:
//!
//! ```text
//! protocol -> encoded reservoir -> rewinder -> codec controller -> pipeline stages -> driver
//! ```
//!
//! Each stage runs as its own spawned task, connected to its neighbours by bounded
//! channels; a blocking push/pull in the original thread-per-stage design is an
//! `.await` on a channel send/recv here. See `pipeline` for the stage state machines
//! and `protocol` for the source-specific ingest paths.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod ids;
pub mod msg;
pub mod pipeline;
pub mod protocol;
pub mod reservoir;
pub mod rewinder;
pub mod runtime;
pub mod stream_handler;
pub mod time;
pub mod upnp;

pub use config::Config;
pub use error::{ErrorCode, RendererError, RendererResult};
pub use msg::{DecodedAudio, DecodedStreamData, EncodedStreamData, Message, MsgFactory, Ramp};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use time::{Jiffies, JIFFIES_PER_SECOND};
