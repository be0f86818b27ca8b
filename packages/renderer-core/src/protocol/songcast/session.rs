//! Songcast (OHM/OHU) session: joins a multicast group or binds unicast,
//! reassembles audio blobs by frame number through the shared repairer, and
//! sends keep-alives so the sender keeps the receiver in its join table
//! (§4.8, §4.9).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;

use super::wire::{
    self, OhmAudioBlob, OhmMetatext, OhmTrack, MSG_TYPE_AUDIO, MSG_TYPE_JOIN, MSG_TYPE_LEAVE,
    MSG_TYPE_METATEXT, MSG_TYPE_RESEND_RESPONSE, MSG_TYPE_TRACK,
};
use crate::config::RepairConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{FlushIdProvider, StreamIdProvider};
use crate::msg::{EncodedStreamData, MsgFactory};
use crate::protocol::repair::{RepairOutcome, Repairer};
use crate::reservoir::EncodedReservoirSender;
use crate::stream_handler::{OkToPlay, StreamHandler};

/// Whether this session listens on a multicast group (OHM) or a point-to-point
/// unicast endpoint the sender addresses directly (OHU) (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OhmMode {
    Multicast(Ipv4Addr),
    Unicast,
}

#[derive(Clone)]
pub struct SongcastConfig {
    pub mode: OhmMode,
    pub bind_port: u16,
    pub repair: RepairConfig,
    pub keep_alive_interval: Duration,
}

/// Binds the session socket, joining the multicast group in [`OhmMode::Multicast`]
/// mode via `socket2` so `SO_REUSEADDR`/`IP_ADD_MEMBERSHIP` can be set before
/// the async runtime takes ownership of the fd.
fn bind_socket(config: &SongcastConfig) -> ProtocolResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.bind_port);
    socket.bind(&bind_addr.into())?;
    if let OhmMode::Multicast(group) = config.mode {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    }
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into()).map_err(ProtocolError::Network)
}

struct Shared {
    flush_ids: FlushIdProvider,
    current_stream_id: AtomicU32,
    pending_stop: parking_lot::Mutex<Option<(u32, u32)>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            flush_ids: FlushIdProvider::new(),
            current_stream_id: AtomicU32::new(0),
            pending_stop: parking_lot::Mutex::new(None),
        }
    }
}

#[async_trait]
impl StreamHandler for Shared {
    async fn ok_to_play(&self, _stream_id: u32) -> OkToPlay {
        OkToPlay::Yes
    }

    async fn try_seek(&self, _stream_id: u32, _offset_bytes: u64) -> Option<u32> {
        None
    }

    async fn try_stop(&self, stream_id: u32) -> Option<u32> {
        if self.current_stream_id.load(Ordering::Acquire) != stream_id {
            return None;
        }
        let mut pending = self.pending_stop.lock();
        if let Some((_, flush_id)) = *pending {
            return Some(flush_id);
        }
        let flush_id = self.flush_ids.next();
        *pending = Some((stream_id, flush_id));
        Some(flush_id)
    }

    async fn try_get(&self, _stream_id: u32, _offset: u64, _bytes: u64, _out: &mut Vec<u8>) -> bool {
        false
    }

    fn notify_starving(&self, mode: &str, stream_id: u32) {
        log::debug!("songcast stream {stream_id} starving in mode {mode}");
    }
}

pub struct SongcastSession {
    config: SongcastConfig,
    socket: UdpSocket,
    sender_addr: AsyncMutex<Option<SocketAddr>>,
    factory: Arc<MsgFactory>,
    stream_ids: StreamIdProvider,
    shared: Arc<Shared>,
}

impl SongcastSession {
    pub fn bind(config: SongcastConfig, factory: Arc<MsgFactory>) -> ProtocolResult<Self> {
        let socket = bind_socket(&config)?;
        Ok(Self {
            config,
            socket,
            sender_addr: AsyncMutex::new(None),
            factory,
            stream_ids: StreamIdProvider::new(),
            shared: Arc::new(Shared::new()),
        })
    }

    /// Rebuilds the socket against the current default network interface,
    /// called by the owning discovery layer after it observes an adapter
    /// change (link up/down, Wi-Fi roam). The existing repair/reorder state is
    /// preserved; only the transport is replaced (§4.8).
    pub fn rebind(&mut self) -> ProtocolResult<()> {
        self.socket = bind_socket(&self.config)?;
        Ok(())
    }

    pub async fn run(&self, downstream: EncodedReservoirSender) -> ProtocolResult<()> {
        let stream_id = self.stream_ids.next();
        self.shared.current_stream_id.store(stream_id, Ordering::Release);

        let handler_dyn: Arc<dyn StreamHandler> = Arc::clone(&self.shared);
        let handler_weak = Arc::downgrade(&handler_dyn);
        let stream_msg = self
            .factory
            .create_encoded_stream(EncodedStreamData {
                uri: "ohm://session".into(),
                metatext: None,
                total_bytes: None,
                stream_id,
                seekable: false,
                live: true,
                stream_handler: handler_weak,
            })
            .await;
        downstream.push(stream_msg).await.map_err(|_| ProtocolError::StreamEnded)?;

        let mut repairer = Repairer::new(self.config.repair);
        let mut buf = [0u8; 4096];
        let mut keep_alive = tokio::time::interval(self.config.keep_alive_interval);

        loop {
            if let Some((_, flush_id)) = *self.shared.pending_stop.lock() {
                let flush = self.factory.create_flush_with_id(flush_id).await;
                downstream.push(flush).await.map_err(|_| ProtocolError::StreamEnded)?;
                self.send_join_or_leave(MSG_TYPE_LEAVE).await?;
                return Ok(());
            }

            let resend_timeout = repairer.next_timeout();
            tokio::select! {
                _ = keep_alive.tick() => {
                    self.send_join_or_leave(MSG_TYPE_JOIN).await?;
                }
                result = self.recv_with_repair_timeout(&mut buf, resend_timeout) => {
                    match result? {
                        Some((len, peer)) => {
                            *self.sender_addr.lock().await = Some(peer);
                            self.handle_packet(&buf[..len], &mut repairer, &downstream).await?;
                        }
                        None => {
                            if let Some(resend) = repairer.on_timer() {
                                self.send_resend_request(&resend.frame_ids).await?;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn recv_with_repair_timeout(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> ProtocolResult<Option<(usize, SocketAddr)>> {
        match timeout {
            Some(d) => match tokio::time::timeout(d, self.socket.recv_from(buf)).await {
                Ok(result) => Ok(Some(result?)),
                Err(_elapsed) => Ok(None),
            },
            None => Ok(Some(self.socket.recv_from(buf).await?)),
        }
    }

    async fn handle_packet(
        &self,
        packet: &[u8],
        repairer: &mut Repairer,
        downstream: &EncodedReservoirSender,
    ) -> ProtocolResult<()> {
        let (header, payload) = match wire::parse_header(packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("songcast: dropping malformed packet: {e}");
                return Ok(());
            }
        };

        match header.msg_type {
            MSG_TYPE_AUDIO | MSG_TYPE_RESEND_RESPONSE => {
                let blob = match OhmAudioBlob::parse(payload) {
                    Ok(b) => b,
                    Err(e) => {
                        log::debug!("songcast: dropping malformed audio blob: {e}");
                        return Ok(());
                    }
                };
                match repairer.on_frame(blob.frame)? {
                    RepairOutcome::Ready(_) => {
                        let msg = self.factory.create_audio_encoded(Bytes::copy_from_slice(blob.media)).await;
                        downstream.push(msg).await.map_err(|_| ProtocolError::StreamEnded)?;
                    }
                    RepairOutcome::Buffered | RepairOutcome::TooLate => {}
                }
            }
            MSG_TYPE_TRACK => match OhmTrack::parse(payload) {
                Ok(track) => {
                    let msg = self
                        .factory
                        .create_track(track.uri, track.metadata.map(str::to_string), track.id)
                        .await;
                    downstream.push(msg).await.map_err(|_| ProtocolError::StreamEnded)?;
                }
                Err(e) => log::debug!("songcast: dropping malformed track: {e}"),
            },
            MSG_TYPE_METATEXT => match OhmMetatext::parse(payload) {
                Ok(metatext) => {
                    let msg = self.factory.create_metatext(metatext.text).await;
                    downstream.push(msg).await.map_err(|_| ProtocolError::StreamEnded)?;
                }
                Err(e) => log::debug!("songcast: dropping malformed metatext: {e}"),
            },
            other => log::trace!("songcast: ignoring msg type {other}"),
        }
        Ok(())
    }

    async fn send_resend_request(&self, frame_ids: &[u32]) -> ProtocolResult<()> {
        let Some(peer) = *self.sender_addr.lock().await else {
            return Ok(());
        };
        if frame_ids.is_empty() {
            return Ok(());
        }
        let packet = wire::encode_resend_request(frame_ids);
        self.socket.send_to(&packet, peer).await?;
        Ok(())
    }

    async fn send_join_or_leave(&self, msg_type: u8) -> ProtocolResult<()> {
        let Some(peer) = *self.sender_addr.lock().await else {
            return Ok(());
        };
        let packet = wire::encode_header(msg_type);
        self.socket.send_to(&packet, peer).await?;
        Ok(())
    }
}
