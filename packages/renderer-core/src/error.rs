//! Error hierarchy for the renderer.
//!
//! Each concern (protocol ingest, codec, repairer, pipeline) gets its own
//! `thiserror` enum with an [`ErrorCode`] implementation so call sites can match on
//! a stable string code or ask whether an error is recoverable without downcasting.
//! A crate-level [`RendererError`] unifies them for call sites that must return one
//! type.

use thiserror::Error;

/// A stable, loggable code plus a recoverability classification for an error.
pub trait ErrorCode {
    /// Short machine-stable identifier, suitable for logs and metrics.
    fn code(&self) -> &'static str;

    /// Whether the caller should treat this as recoverable (retry, skip, continue)
    /// or terminal (stop the stream / tear down the session).
    fn recoverable(&self) -> bool;
}

/// Errors raised while a protocol is recognising or decoding an incoming stream
/// before the first `AudioEncoded` message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid RAOP packet: {0}")]
    InvalidRaopPacket(String),

    #[error("invalid Songcast OHM header: {0}")]
    InvalidOhmHeader(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {0} ({1})")]
    HttpStatus(u16, String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("no active discovery session")]
    NoSession,

    #[error("stream ended")]
    StreamEnded,
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidRaopPacket(_) => "protocol.raop.invalid_packet",
            ProtocolError::InvalidOhmHeader(_) => "protocol.ohm.invalid_header",
            ProtocolError::Http(_) => "protocol.http.transport",
            ProtocolError::HttpStatus(..) => "protocol.http.status",
            ProtocolError::Network(_) => "protocol.network",
            ProtocolError::NoSession => "protocol.no_session",
            ProtocolError::StreamEnded => "protocol.stream_ended",
        }
    }

    fn recoverable(&self) -> bool {
        match self {
            // malformed packets are dropped, the transport keeps running
            ProtocolError::InvalidRaopPacket(_) | ProtocolError::InvalidOhmHeader(_) => true,
            ProtocolError::Network(_) => true,
            ProtocolError::Http(e) => e.is_timeout() || e.is_connect(),
            ProtocolError::HttpStatus(status, _) => (500..600).contains(status),
            ProtocolError::NoSession | ProtocolError::StreamEnded => false,
        }
    }
}

/// Result alias for protocol ingest operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by codec recognition and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Recognition-time failure; meaningless once decoding has committed.
    #[error("codec did not recognise the stream")]
    NotRecognised,

    /// Decode-time corruption; the stream must be terminated.
    #[error("stream corrupt: {0}")]
    StreamCorrupt(String),

    /// A feature (e.g. an unsupported sample format) the codec cannot decode.
    #[error("unsupported feature: {0}")]
    FeatureUnsupported(String),

    /// The encoded stream ended cleanly mid-decode.
    #[error("stream ended")]
    StreamEnded,

    /// The rewinder's replay buffer filled before any codec recognised the
    /// stream; recognition is aborted (§4.3).
    #[error("rewinder capacity exceeded during recognition")]
    RewinderCapacityExceeded,
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            CodecError::NotRecognised => "codec.not_recognised",
            CodecError::StreamCorrupt(_) => "codec.stream_corrupt",
            CodecError::FeatureUnsupported(_) => "codec.feature_unsupported",
            CodecError::StreamEnded => "codec.stream_ended",
            CodecError::RewinderCapacityExceeded => "codec.rewinder_capacity_exceeded",
        }
    }

    fn recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::NotRecognised | CodecError::RewinderCapacityExceeded
        )
    }
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised by the shared RAOP/Songcast repair (reorder/resend) component.
#[derive(Debug, Error)]
pub enum RepairerError {
    /// The bounded out-of-order backlog is full; the protocol must drain and resync.
    #[error("repairer buffer full")]
    BufferFull,

    /// The stream restarted mid-repair (e.g. a new session/SSRC appeared).
    #[error("repairer stream restarted")]
    StreamRestarted,
}

impl ErrorCode for RepairerError {
    fn code(&self) -> &'static str {
        match self {
            RepairerError::BufferFull => "repairer.buffer_full",
            RepairerError::StreamRestarted => "repairer.stream_restarted",
        }
    }

    fn recoverable(&self) -> bool {
        // both are resolved by draining and resyncing, never fatal to the process
        true
    }
}

/// Result alias for repairer operations.
pub type RepairerResult<T> = Result<T, RepairerError>;

/// Errors raised by the decode/render pipeline stages themselves.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("message pool exhausted for {0}")]
    PoolExhausted(&'static str),

    #[error("invalid split at position {0} (message spans {1} bytes/jiffies)")]
    InvalidSplit(u64, u64),

    #[error("zero-byte audio encoded message rejected")]
    ZeroByteAudio,

    #[error("flush id {0} is invalid")]
    InvalidFlushId(u32),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            PipelineError::PoolExhausted(_) => "pipeline.pool_exhausted",
            PipelineError::InvalidSplit(..) => "pipeline.invalid_split",
            PipelineError::ZeroByteAudio => "pipeline.zero_byte_audio",
            PipelineError::InvalidFlushId(_) => "pipeline.invalid_flush_id",
        }
    }

    fn recoverable(&self) -> bool {
        match self {
            // pool exhaustion is a sizing bug, fatal by design
            PipelineError::PoolExhausted(_) => false,
            PipelineError::InvalidSplit(..)
            | PipelineError::ZeroByteAudio
            | PipelineError::InvalidFlushId(_) => true,
        }
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Crate-level error union for call sites that must return one error type.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Repairer(#[from] RepairerError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ErrorCode for RendererError {
    fn code(&self) -> &'static str {
        match self {
            RendererError::Protocol(e) => e.code(),
            RendererError::Codec(e) => e.code(),
            RendererError::Repairer(e) => e.code(),
            RendererError::Pipeline(e) => e.code(),
            RendererError::Configuration(_) => "renderer.configuration",
        }
    }

    fn recoverable(&self) -> bool {
        match self {
            RendererError::Protocol(e) => e.recoverable(),
            RendererError::Codec(e) => e.recoverable(),
            RendererError::Repairer(e) => e.recoverable(),
            RendererError::Pipeline(e) => e.recoverable(),
            RendererError::Configuration(_) => false,
        }
    }
}

/// Result alias for the crate-level error union.
pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_raop_packet_is_recoverable() {
        let err = ProtocolError::InvalidRaopPacket("bad csrc".into());
        assert!(err.recoverable());
        assert_eq!(err.code(), "protocol.raop.invalid_packet");
    }

    #[test]
    fn pool_exhaustion_is_fatal() {
        let err = PipelineError::PoolExhausted("AudioPcm");
        assert!(!err.recoverable());
    }

    #[test]
    fn renderer_error_from_protocol_preserves_code() {
        let err: RendererError = ProtocolError::NoSession.into();
        assert_eq!(err.code(), "protocol.no_session");
        assert!(!err.recoverable());
    }
}
