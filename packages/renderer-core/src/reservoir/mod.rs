//! FIFOs between pipeline elements, expressing back-pressure (§4.2).

mod encoded;
mod flushable;
mod simple;

pub use encoded::{encoded_reservoir, EncodedReservoirReceiver, EncodedReservoirSender};
pub use flushable::{flushable_reservoir, FlushableReceiver, FlushableSender};
pub use simple::{reservoir, ReservoirReceiver, ReservoirSender, ReservoirStats};
