//! The boundary this core hands off to a UPnP/AVTransport (or other
//! discovery/control protocol) layer: playlist and transport control,
//! device advertisement (§6). Deliberately trait-only — wiring an actual
//! UPnP stack, mDNS responder, or SOAP server is out of scope here, but the
//! pipeline and protocol layers are written against these traits so a host
//! can supply a real implementation without reaching into renderer-core's
//! internals.

use async_trait::async_trait;

/// What a track source hands the renderer to start a new stream (§6).
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub uri: String,
    pub metadata: Option<String>,
}

/// Supplies the next track to play and accepts metadata updates for the one
/// currently playing, the way an AVTransport `SetAVTransportURI`/`Next`
/// implementation would (§6).
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// The track that should play once the current one ends, if any has been
    /// queued.
    async fn next_track(&self) -> Option<TrackRequest>;

    /// Called when the renderer's `MetaText` for the current track changes
    /// (e.g. a new ICY `StreamTitle`), so the control layer can reflect it in
    /// `GetPositionInfo`/eventing.
    async fn on_metatext_changed(&self, text: &str);
}

/// Transport control surface an AVTransport (or equivalent) service drives
/// against the running pipeline: play/pause/stop/seek at the level of
/// "tell the pipeline to do X", independent of which protocol fed it (§6).
#[async_trait]
pub trait PipelineControl: Send + Sync {
    async fn play(&self);
    async fn pause(&self);
    async fn stop(&self);
    async fn seek_to(&self, offset_ms: u64);

    /// Current transport state, for `GetTransportInfo`-style queries.
    async fn state(&self) -> TransportState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Transitioning,
}

/// Announces this renderer's presence on the network, e.g. via mDNS/SSDP, and
/// exposes the fields a discovery response needs (§6).
#[async_trait]
pub trait DeviceAdvertiser: Send + Sync {
    async fn start(&self) -> std::io::Result<()>;
    async fn stop(&self);

    fn friendly_name(&self) -> &str;
    fn uuid(&self) -> &str;
}
