//! RAOP (AirPlay) session: binds audio/control UDP sockets for one accepted
//! connection, decrypts and reorders incoming packets, and drives the encoded
//! reservoir (§4.7). RTSP/SDP negotiation (port assignment, the AES key and
//! IV, compression) happens in the UPnP/discovery boundary layer this crate
//! only declares traits for; a session is constructed once that negotiation
//! has produced a socket pair and key material.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;

use super::rtp::{
    RaopPacketAudio, RaopPacketResendRequest, RaopPacketResendResponse, RaopPacketSync, RtpHeaderRaop,
    PAYLOAD_TYPE_AUDIO, PAYLOAD_TYPE_RESEND_RESPONSE, PAYLOAD_TYPE_SYNC,
};
use crate::config::RepairConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{FlushIdProvider, StreamIdProvider};
use crate::msg::{EncodedStreamData, MsgFactory};
use crate::protocol::repair::{RepairOutcome, Repairer};
use crate::reservoir::EncodedReservoirSender;
use crate::stream_handler::{OkToPlay, StreamHandler};
use crate::time::Jiffies;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Per-connection key material negotiated over RTSP, handed to the session at
/// construction time.
#[derive(Clone)]
pub struct RaopConfig {
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub repair: RepairConfig,
    /// How long to wait for an outstanding resend before giving up on that
    /// frame and releasing the gap anyway, matching the original's bounded
    /// patience for a missing packet rather than stalling forever.
    pub resend_giveup: Duration,
    /// Fixed output latency negotiated over RTSP, announced downstream as a
    /// `Delay` once the session starts (§4.7 step 4, §3).
    pub latency: Jiffies,
}

/// Collapses a sorted, deduplicated list of ids into contiguous `(start,
/// count)` runs, so a disjoint gap set like `[110, 115]` becomes two runs
/// instead of one resend request that silently skips everything after the
/// first break (§4.9, §6).
fn collapse_into_runs(ids: &[u32]) -> Vec<(u16, u16)> {
    let mut runs = Vec::new();
    let mut iter = ids.iter().copied();
    let Some(mut start) = iter.next() else {
        return runs;
    };
    let mut count: u16 = 1;
    let mut prev = start;
    for id in iter {
        if id == prev + 1 && count < u16::MAX {
            count += 1;
            prev = id;
        } else {
            runs.push((start as u16, count));
            start = id;
            prev = id;
            count = 1;
        }
    }
    runs.push((start as u16, count));
    runs
}

/// AES-CBC decrypts `encrypted` in place using the session key, leaving any
/// trailing partial 16-byte block unencrypted (RAOP never encrypts a final
/// sub-block remainder).
fn decrypt_audio(key: &[u8; 16], iv: &[u8; 16], encrypted: &[u8]) -> Vec<u8> {
    let whole_len = (encrypted.len() / 16) * 16;
    let mut buf = encrypted[..whole_len].to_vec();
    if !buf.is_empty() {
        let cipher = Aes128CbcDec::new(key.into(), iv.into());
        cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .expect("whole-block ciphertext length is always valid for no-padding decrypt");
    }
    buf.extend_from_slice(&encrypted[whole_len..]);
    buf
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
        // RAOP streams start playing as soon as the client begins sending audio;
        // there is no "live, wait for verdict" concept like HTTP ICY streams.
        OkToPlay::Yes
    }

    async fn try_seek(&self, _stream_id: u32, _offset_bytes: u64) -> Option<u32> {
        // RAOP has no byte-offset seek; AirPlay clients re-announce instead.
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
        log::debug!("raop stream {stream_id} starving in mode {mode}");
    }
}

/// One accepted AirPlay connection: audio + control UDP sockets, the shared
/// repairer tracking RTP sequence gaps, and the AES key material to decrypt
/// incoming audio packets (§4.7, §4.9).
pub struct RaopSession {
    config: RaopConfig,
    audio_socket: UdpSocket,
    control_socket: UdpSocket,
    control_peer: AsyncMutex<Option<SocketAddr>>,
    factory: Arc<MsgFactory>,
    stream_ids: StreamIdProvider,
    shared: Arc<Shared>,
    /// SSRC latched from the first accepted audio packet of the current
    /// session; `None` until that packet arrives (§4.7 step 2).
    ssrc: parking_lot::Mutex<Option<u32>>,
}

impl RaopSession {
    #[must_use]
    pub fn new(config: RaopConfig, audio_socket: UdpSocket, control_socket: UdpSocket, factory: Arc<MsgFactory>) -> Self {
        Self {
            config,
            audio_socket,
            control_socket,
            control_peer: AsyncMutex::new(None),
            factory,
            stream_ids: StreamIdProvider::new(),
            shared: Arc::new(Shared::new()),
            ssrc: parking_lot::Mutex::new(None),
        }
    }

    /// Runs the session until the client stops it or a socket error occurs,
    /// pushing `EncodedStream` then a run of `AudioEncoded` messages
    /// downstream in repaired (gap-free) order (§4.7).
    pub async fn run(&self, downstream: EncodedReservoirSender) -> ProtocolResult<()> {
        let stream_id = self.stream_ids.next();
        self.shared.current_stream_id.store(stream_id, Ordering::Release);
        *self.ssrc.lock() = None;

        let mut repairer = Repairer::new(self.config.repair);
        let mut buf = [0u8; 2048];

        loop {
            if let Some((_, flush_id)) = *self.shared.pending_stop.lock() {
                let flush = self.factory.create_flush_with_id(flush_id).await;
                downstream.push(flush).await.map_err(|_| ProtocolError::StreamEnded)?;
                return Ok(());
            }

            let timeout = repairer.next_timeout();
            let recv = match timeout {
                Some(d) => tokio::time::timeout(d, self.audio_socket.recv_from(&mut buf)).await,
                None => Ok(self.audio_socket.recv_from(&mut buf).await),
            };

            let (len, peer) = match recv {
                Ok(result) => result?,
                Err(_elapsed) => {
                    if let Some(resend) = repairer.on_timer() {
                        self.send_resend_request(&resend.frame_ids).await?;
                    }
                    continue;
                }
            };

            let header = match RtpHeaderRaop::parse(&buf[..len]) {
                Ok(h) => h,
                Err(e) => {
                    log::debug!("raop: dropping malformed packet from {peer}: {e}");
                    continue;
                }
            };

            match header.payload_type {
                PAYLOAD_TYPE_AUDIO => {
                    if let Err(e) = self
                        .handle_audio_frame(stream_id, header.sequence, &buf[..len], &mut repairer, &downstream)
                        .await
                    {
                        log::debug!("raop: dropping audio packet: {e}");
                    }
                }
                PAYLOAD_TYPE_RESEND_RESPONSE => {
                    if let Err(e) = self.handle_resend_response(&buf[12..len], &mut repairer, &downstream).await {
                        log::debug!("raop: dropping resend response: {e}");
                    }
                }
                other => log::debug!("raop: ignoring audio-socket payload type {other:#x}"),
            }
        }
    }

    /// Drains the control socket for sync (0x54) packets. Intended to be
    /// spawned alongside [`RaopSession::run`]; sync packets only discipline
    /// playback clock correlation, which the driver module consumes (§4.7, §6).
    pub async fn run_control(&self) -> ProtocolResult<()> {
        let mut buf = [0u8; 512];
        loop {
            let (len, peer) = self.control_socket.recv_from(&mut buf).await?;
            *self.control_peer.lock().await = Some(peer);
            let Ok(header) = RtpHeaderRaop::parse(&buf[..len]) else {
                continue;
            };
            if header.payload_type == PAYLOAD_TYPE_SYNC {
                match RaopPacketSync::parse(&buf[12..len]) {
                    Ok(sync) => log::trace!(
                        "raop: sync rtp_ts={} ntp={}.{}",
                        sync.rtp_timestamp,
                        sync.ntp_secs,
                        sync.ntp_fract
                    ),
                    Err(e) => log::debug!("raop: malformed sync packet: {e}"),
                }
            }
        }
    }

    async fn handle_audio_frame(
        &self,
        stream_id: u32,
        sequence: u16,
        packet: &[u8],
        repairer: &mut Repairer,
        downstream: &EncodedReservoirSender,
    ) -> ProtocolResult<()> {
        let audio = RaopPacketAudio::parse(&packet[12..])?;
        if !self.accept_ssrc(stream_id, audio.ssrc, downstream).await? {
            return Ok(());
        }
        self.release_ready(u32::from(sequence), &audio.encrypted.to_vec(), repairer, downstream)
            .await
    }

    /// Latches the SSRC of the first accepted audio packet, emitting `Track`
    /// + `EncodedStream` + `Delay` for it, and rejects any later packet whose
    /// SSRC doesn't match (§4.7 step 2, step 4). A mismatch means the sender
    /// has started a new session without this one being torn down first, so
    /// there is no longer an active session to decode for; stop and drain
    /// rather than decode under the wrong key material (§7).
    async fn accept_ssrc(
        &self,
        stream_id: u32,
        ssrc: u32,
        downstream: &EncodedReservoirSender,
    ) -> ProtocolResult<bool> {
        let already_latched = {
            let mut latched = self.ssrc.lock();
            match *latched {
                Some(current) => Some(current == ssrc),
                None => {
                    *latched = Some(ssrc);
                    None
                }
            }
        };

        match already_latched {
            Some(true) => Ok(true),
            Some(false) => {
                log::debug!("raop: dropping packet with mismatched ssrc {ssrc:#x}, no active session for it");
                self.request_stop_for_superseded_session();
                Ok(false)
            }
            None => {
                self.emit_session_start(stream_id, downstream).await?;
                Ok(true)
            }
        }
    }

    fn request_stop_for_superseded_session(&self) {
        let mut pending = self.shared.pending_stop.lock();
        if pending.is_none() {
            let stream_id = self.shared.current_stream_id.load(Ordering::Acquire);
            let flush_id = self.shared.flush_ids.next();
            *pending = Some((stream_id, flush_id));
        }
    }

    async fn emit_session_start(&self, stream_id: u32, downstream: &EncodedReservoirSender) -> ProtocolResult<()> {
        let track = self.factory.create_track("raop://session", None, stream_id).await;
        downstream.push(track).await.map_err(|_| ProtocolError::StreamEnded)?;

        let handler_dyn: Arc<dyn StreamHandler> = Arc::clone(&self.shared);
        let handler_weak = Arc::downgrade(&handler_dyn);
        let stream_msg = self
            .factory
            .create_encoded_stream(EncodedStreamData {
                uri: "raop://session".into(),
                metatext: None,
                total_bytes: None,
                stream_id,
                seekable: false,
                live: false,
                stream_handler: handler_weak,
            })
            .await;
        downstream.push(stream_msg).await.map_err(|_| ProtocolError::StreamEnded)?;

        let delay = self.factory.create_delay(self.config.latency).await;
        downstream.push(delay).await.map_err(|_| ProtocolError::StreamEnded)?;
        Ok(())
    }

    async fn handle_resend_response(
        &self,
        payload: &[u8],
        repairer: &mut Repairer,
        downstream: &EncodedReservoirSender,
    ) -> ProtocolResult<()> {
        let resend = RaopPacketResendResponse::parse(payload)?;
        let audio = resend.audio()?;
        let sequence = u32::from(resend.inner.header.sequence);
        self.release_ready(sequence, &audio.encrypted.to_vec(), repairer, downstream)
            .await
    }

    async fn release_ready(
        &self,
        sequence: u32,
        encrypted: &[u8],
        repairer: &mut Repairer,
        downstream: &EncodedReservoirSender,
    ) -> ProtocolResult<()> {
        // Decrypt eagerly and stash by sequence so out-of-order frames can be
        // released once the repairer reports the gap ahead of them closed.
        let decrypted = decrypt_audio(&self.config.key, &self.config.iv, encrypted);
        match repairer.on_frame(sequence)? {
            RepairOutcome::Ready(_ids) => {
                let msg = self.factory.create_audio_encoded(Bytes::from(decrypted)).await;
                downstream.push(msg).await.map_err(|_| ProtocolError::StreamEnded)?;
            }
            RepairOutcome::Buffered | RepairOutcome::TooLate => {}
        }
        Ok(())
    }

    async fn send_resend_request(&self, frame_ids: &[u32]) -> ProtocolResult<()> {
        let Some(peer) = *self.control_peer.lock().await else {
            return Ok(());
        };
        // `frame_ids` comes from the repairer's `BTreeSet`, so it is already
        // sorted; a disjoint gap set like [110, 115] must become two
        // requests, not one that silently skips everything past the break.
        for (seq_start, count) in collapse_into_runs(frame_ids) {
            let packet = RaopPacketResendRequest::new(seq_start, count).encode(0)?;
            self.control_socket.send_to(&packet, peer).await?;
        }
        Ok(())
    }
}
