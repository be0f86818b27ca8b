//! RAOP (AirPlay) RTP wire types, ground-truthed against `ProtocolRaop.cpp`'s
//! packet classes (§4.7).
//!
//! Every packet begins with the 12-byte standard RTP header. RAOP layers
//! three payload types on top: audio (0x60, AES-CBC encrypted), sync (0x54),
//! and retransmission response (0x56), plus an outgoing-only resend request
//! (0x55) this renderer constructs itself rather than parses.

use crate::error::{ProtocolError, ProtocolResult};

pub const PAYLOAD_TYPE_AUDIO: u8 = 0x60;
pub const PAYLOAD_TYPE_SYNC: u8 = 0x54;
pub const PAYLOAD_TYPE_RESEND_RESPONSE: u8 = 0x56;
pub const PAYLOAD_TYPE_RESEND_REQUEST: u8 = 0x55;

const RTP_HEADER_BYTES: usize = 12;

/// The 12-byte RTP header common to every RAOP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeaderRaop {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
}

impl RtpHeaderRaop {
    /// Parses the fixed 12-byte header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() < RTP_HEADER_BYTES {
            return Err(ProtocolError::InvalidRaopPacket("packet shorter than RTP header".into()));
        }
        let version = bytes[0] >> 6;
        if version != 2 {
            return Err(ProtocolError::InvalidRaopPacket(format!("unsupported RTP version {version}")));
        }
        let padding = bytes[0] & 0x20 != 0;
        let extension = bytes[0] & 0x10 != 0;
        let csrc_count = bytes[0] & 0x0f;
        if csrc_count > 0xf {
            return Err(ProtocolError::InvalidRaopPacket("csrc count out of range".into()));
        }
        let marker = bytes[1] & 0x80 != 0;
        let payload_type = bytes[1] & 0x7f;
        if payload_type > 0x7f {
            return Err(ProtocolError::InvalidRaopPacket("payload type out of range".into()));
        }
        let sequence = u16::from_be_bytes([bytes[2], bytes[3]]);
        Ok(Self {
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence,
        })
    }

    /// Builds a header from fields, validating the same invariants `parse`
    /// enforces (§4.7).
    pub fn new(marker: bool, payload_type: u8, sequence: u32) -> ProtocolResult<Self> {
        if payload_type > 0x7f {
            return Err(ProtocolError::InvalidRaopPacket("payload type out of range".into()));
        }
        if sequence > u32::from(u16::MAX) {
            return Err(ProtocolError::InvalidRaopPacket("sequence out of range".into()));
        }
        Ok(Self {
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type,
            sequence: sequence as u16,
        })
    }

    pub fn encode(&self) -> [u8; RTP_HEADER_BYTES] {
        let mut out = [0u8; RTP_HEADER_BYTES];
        out[0] = 0x80 | (u8::from(self.padding) << 5) | (u8::from(self.extension) << 4) | self.csrc_count;
        out[1] = (u8::from(self.marker) << 7) | self.payload_type;
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }
}

/// A generic RTP packet: header plus whatever payload bytes follow it.
pub struct RtpPacketRaop<'a> {
    pub header: RtpHeaderRaop,
    pub payload: &'a [u8],
}

impl<'a> RtpPacketRaop<'a> {
    pub fn parse(bytes: &'a [u8]) -> ProtocolResult<Self> {
        let header = RtpHeaderRaop::parse(bytes)?;
        Ok(Self {
            header,
            payload: &bytes[RTP_HEADER_BYTES..],
        })
    }
}

/// Audio payload (payload type 0x60): an 8-byte sub-header (timestamp, ssrc)
/// followed by AES-CBC encrypted media (§4.7).
pub struct RaopPacketAudio<'a> {
    pub timestamp: u32,
    pub ssrc: u32,
    pub encrypted: &'a [u8],
}

impl<'a> RaopPacketAudio<'a> {
    pub fn parse(payload: &'a [u8]) -> ProtocolResult<Self> {
        if payload.len() < 8 {
            return Err(ProtocolError::InvalidRaopPacket("audio payload shorter than sub-header".into()));
        }
        Ok(Self {
            timestamp: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            ssrc: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            encrypted: &payload[8..],
        })
    }
}

/// Sync payload (payload type 0x54): 16 bytes of big-endian NTP/RTP clock
/// correlation data (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaopPacketSync {
    pub rtp_timestamp_minus_latency: u32,
    pub ntp_secs: u32,
    pub ntp_fract: u32,
    pub rtp_timestamp: u32,
}

impl RaopPacketSync {
    pub fn parse(payload: &[u8]) -> ProtocolResult<Self> {
        if payload.len() < 16 {
            return Err(ProtocolError::InvalidRaopPacket("sync payload shorter than 16 bytes".into()));
        }
        Ok(Self {
            rtp_timestamp_minus_latency: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
            ntp_secs: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
            ntp_fract: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
            rtp_timestamp: u32::from_be_bytes(payload[12..16].try_into().unwrap()),
        })
    }
}

/// Retransmission response (payload type 0x56): wraps a full inner RTP
/// packet whose payload is itself a [`RaopPacketAudio`] (§4.7).
pub struct RaopPacketResendResponse<'a> {
    pub inner: RtpPacketRaop<'a>,
}

impl<'a> RaopPacketResendResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> ProtocolResult<Self> {
        RtpPacketRaop::parse(payload).map(|inner| Self { inner })
    }

    pub fn audio(&self) -> ProtocolResult<RaopPacketAudio<'_>> {
        RaopPacketAudio::parse(self.inner.payload)
    }
}

/// Outgoing resend request (payload type 0x55): marker bit set, payload is
/// `seqStart` (BE16) + `count` (BE16) (§4.7, §4.9).
pub struct RaopPacketResendRequest {
    pub seq_start: u16,
    pub count: u16,
}

impl RaopPacketResendRequest {
    #[must_use]
    pub fn new(seq_start: u16, count: u16) -> Self {
        Self { seq_start, count }
    }

    pub fn encode(&self, sequence: u32) -> ProtocolResult<Vec<u8>> {
        let header = RtpHeaderRaop::new(true, PAYLOAD_TYPE_RESEND_REQUEST, sequence)?;
        let mut out = header.encode().to_vec();
        out.extend_from_slice(&self.seq_start.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(version: u8, padding: bool, extension: bool, csrc: u8, marker: bool, pt: u8, seq: u16) -> Vec<u8> {
        let mut b = vec![0u8; 12];
        b[0] = (version << 6) | (u8::from(padding) << 5) | (u8::from(extension) << 4) | csrc;
        b[1] = (u8::from(marker) << 7) | pt;
        b[2..4].copy_from_slice(&seq.to_be_bytes());
        b
    }

    #[test]
    fn parses_valid_header() {
        let bytes = header_bytes(2, false, false, 0, true, PAYLOAD_TYPE_AUDIO, 42);
        let header = RtpHeaderRaop::parse(&bytes).unwrap();
        assert_eq!(header.sequence, 42);
        assert!(header.marker);
        assert_eq!(header.payload_type, PAYLOAD_TYPE_AUDIO);
    }

    #[test]
    fn rejects_wrong_version() {
        let bytes = header_bytes(1, false, false, 0, false, PAYLOAD_TYPE_AUDIO, 1);
        assert!(RtpHeaderRaop::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_short_packet() {
        assert!(RtpHeaderRaop::parse(&[0u8; 4]).is_err());
    }

    #[test]
    fn audio_payload_splits_subheader_and_media() {
        let mut payload = vec![0u8; 8];
        payload[0..4].copy_from_slice(&1000u32.to_be_bytes());
        payload[4..8].copy_from_slice(&9999u32.to_be_bytes());
        payload.extend_from_slice(&[0xAB; 16]);
        let audio = RaopPacketAudio::parse(&payload).unwrap();
        assert_eq!(audio.timestamp, 1000);
        assert_eq!(audio.ssrc, 9999);
        assert_eq!(audio.encrypted, &[0xAB; 16]);
    }

    #[test]
    fn sync_payload_parses_all_four_fields() {
        let mut payload = Vec::new();
        for v in [1u32, 2, 3, 4] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let sync = RaopPacketSync::parse(&payload).unwrap();
        assert_eq!(sync.rtp_timestamp_minus_latency, 1);
        assert_eq!(sync.ntp_secs, 2);
        assert_eq!(sync.ntp_fract, 3);
        assert_eq!(sync.rtp_timestamp, 4);
    }

    #[test]
    fn resend_request_encodes_marker_and_fields() {
        let req = RaopPacketResendRequest::new(10, 3);
        let bytes = req.encode(5).unwrap();
        let header = RtpHeaderRaop::parse(&bytes).unwrap();
        assert!(header.marker);
        assert_eq!(header.payload_type, PAYLOAD_TYPE_RESEND_REQUEST);
        assert_eq!(u16::from_be_bytes([bytes[12], bytes[13]]), 10);
        assert_eq!(u16::from_be_bytes([bytes[14], bytes[15]]), 3);
    }

    #[test]
    fn resend_response_unwraps_inner_audio_packet() {
        let mut inner_payload = vec![0u8; 8];
        inner_payload[0..4].copy_from_slice(&42u32.to_be_bytes());
        inner_payload.extend_from_slice(&[0xCC; 4]);
        let inner_header = header_bytes(2, false, false, 0, false, PAYLOAD_TYPE_AUDIO, 7);
        let mut outer = inner_header;
        outer.extend_from_slice(&inner_payload);

        let resend = RaopPacketResendResponse::parse(&outer).unwrap();
        assert_eq!(resend.inner.header.sequence, 7);
        let audio = resend.audio().unwrap();
        assert_eq!(audio.timestamp, 42);
    }
}
