//! Songcast (OHM/OHU) wire framing (§4.8): every packet begins with the
//! 8-byte `"Songcast"` cookie, a version byte, and a message type byte, ahead
//! of a type-specific payload.

use crate::error::{ProtocolError, ProtocolResult};

const COOKIE: &[u8; 8] = b"Songcast";
const HEADER_BYTES: usize = 10;
const SUPPORTED_VERSION: u8 = 1;

pub const MSG_TYPE_AUDIO: u8 = 0;
pub const MSG_TYPE_TRACK: u8 = 1;
pub const MSG_TYPE_METATEXT: u8 = 2;
pub const MSG_TYPE_RESEND_REQUEST: u8 = 3;
pub const MSG_TYPE_RESEND_RESPONSE: u8 = 4;
pub const MSG_TYPE_JOIN: u8 = 5;
pub const MSG_TYPE_LEAVE: u8 = 6;

pub struct OhmHeader {
    pub msg_type: u8,
}

/// Splits `bytes` into its header and payload, validating the cookie and
/// version (§4.8).
pub fn parse_header(bytes: &[u8]) -> ProtocolResult<(OhmHeader, &[u8])> {
    if bytes.len() < HEADER_BYTES {
        return Err(ProtocolError::InvalidOhmHeader("packet shorter than header".into()));
    }
    if &bytes[0..8] != COOKIE {
        return Err(ProtocolError::InvalidOhmHeader("missing Songcast cookie".into()));
    }
    let version = bytes[8];
    if version != SUPPORTED_VERSION {
        return Err(ProtocolError::InvalidOhmHeader(format!("unsupported version {version}")));
    }
    Ok((OhmHeader { msg_type: bytes[9] }, &bytes[HEADER_BYTES..]))
}

pub fn encode_header(msg_type: u8) -> [u8; HEADER_BYTES] {
    let mut out = [0u8; HEADER_BYTES];
    out[0..8].copy_from_slice(COOKIE);
    out[8] = SUPPORTED_VERSION;
    out[9] = msg_type;
    out
}

/// Audio blob payload: 32-bit frame number followed by raw codec bytes
/// (§4.8).
pub struct OhmAudioBlob<'a> {
    pub frame: u32,
    pub media: &'a [u8],
}

impl<'a> OhmAudioBlob<'a> {
    pub fn parse(payload: &'a [u8]) -> ProtocolResult<Self> {
        if payload.len() < 4 {
            return Err(ProtocolError::InvalidOhmHeader("audio payload shorter than frame number".into()));
        }
        Ok(Self {
            frame: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            media: &payload[4..],
        })
    }
}

/// Track payload: a 32-bit id, a length-prefixed URI, and a length-prefixed
/// metadata string (zero length meaning no metadata) (§4.8).
pub struct OhmTrack<'a> {
    pub id: u32,
    pub uri: &'a str,
    pub metadata: Option<&'a str>,
}

impl<'a> OhmTrack<'a> {
    pub fn parse(payload: &'a [u8]) -> ProtocolResult<Self> {
        if payload.len() < 8 {
            return Err(ProtocolError::InvalidOhmHeader("track payload shorter than id+uri length".into()));
        }
        let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let uri_len = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
        let mut cursor = 8;
        if payload.len() < cursor + uri_len {
            return Err(ProtocolError::InvalidOhmHeader("track payload truncated before uri".into()));
        }
        let uri = std::str::from_utf8(&payload[cursor..cursor + uri_len])
            .map_err(|_| ProtocolError::InvalidOhmHeader("track uri is not valid utf-8".into()))?;
        cursor += uri_len;

        if payload.len() < cursor + 4 {
            return Err(ProtocolError::InvalidOhmHeader(
                "track payload truncated before metadata length".into(),
            ));
        }
        let metadata_len = u32::from_be_bytes([
            payload[cursor],
            payload[cursor + 1],
            payload[cursor + 2],
            payload[cursor + 3],
        ]) as usize;
        cursor += 4;
        if payload.len() < cursor + metadata_len {
            return Err(ProtocolError::InvalidOhmHeader("track payload truncated before metadata".into()));
        }
        let metadata = if metadata_len == 0 {
            None
        } else {
            Some(
                std::str::from_utf8(&payload[cursor..cursor + metadata_len])
                    .map_err(|_| ProtocolError::InvalidOhmHeader("track metadata is not valid utf-8".into()))?,
            )
        };

        Ok(Self { id, uri, metadata })
    }
}

/// Metatext payload: the raw UTF-8 DIDL-Lite text fragment, unframed (§4.8).
pub struct OhmMetatext<'a> {
    pub text: &'a str,
}

impl<'a> OhmMetatext<'a> {
    pub fn parse(payload: &'a [u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::InvalidOhmHeader("metatext is not valid utf-8".into()))?;
        Ok(Self { text })
    }
}

/// Builds the outgoing resend-request wire body: a count followed by that
/// many big-endian frame ids (§4.8, §4.9).
pub fn encode_resend_request(frame_ids: &[u32]) -> Vec<u8> {
    let mut out = encode_header(MSG_TYPE_RESEND_REQUEST).to_vec();
    out.extend_from_slice(&(frame_ids.len() as u32).to_be_bytes());
    for id in frame_ids {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out
}

/// Parses an incoming resend-request body (used by the sender side; this
/// renderer is a receiver, but tests and the unicast fallback path exercise
/// both directions).
pub fn parse_resend_request(payload: &[u8]) -> ProtocolResult<Vec<u32>> {
    if payload.len() < 4 {
        return Err(ProtocolError::InvalidOhmHeader("resend request missing count".into()));
    }
    let count = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let mut ids = Vec::with_capacity(count);
    let mut cursor = 4;
    for _ in 0..count {
        if payload.len() < cursor + 4 {
            return Err(ProtocolError::InvalidOhmHeader("resend request truncated".into()));
        }
        ids.push(u32::from_be_bytes([
            payload[cursor],
            payload[cursor + 1],
            payload[cursor + 2],
            payload[cursor + 3],
        ]));
        cursor += 4;
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let encoded = encode_header(MSG_TYPE_AUDIO);
        let (header, payload) = parse_header(&encoded).unwrap();
        assert_eq!(header.msg_type, MSG_TYPE_AUDIO);
        assert!(payload.is_empty());
    }

    #[test]
    fn rejects_wrong_cookie() {
        let mut bytes = encode_header(MSG_TYPE_AUDIO);
        bytes[0] = b'X';
        assert!(parse_header(&bytes).is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = encode_header(MSG_TYPE_AUDIO);
        bytes[8] = 99;
        assert!(parse_header(&bytes).is_err());
    }

    #[test]
    fn audio_blob_parses_frame_and_media() {
        let mut payload = 7u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3]);
        let blob = OhmAudioBlob::parse(&payload).unwrap();
        assert_eq!(blob.frame, 7);
        assert_eq!(blob.media, &[1, 2, 3]);
    }

    #[test]
    fn resend_request_round_trips() {
        let encoded = encode_resend_request(&[1, 2, 3]);
        let (header, payload) = parse_header(&encoded).unwrap();
        assert_eq!(header.msg_type, MSG_TYPE_RESEND_REQUEST);
        assert_eq!(parse_resend_request(payload).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn track_parses_id_uri_and_metadata() {
        let meta = b"<DIDL-Lite/>";
        let mut payload = 9u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&5u32.to_be_bytes());
        payload.extend_from_slice(b"x://y");
        payload.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        payload.extend_from_slice(meta);

        let track = OhmTrack::parse(&payload).unwrap();
        assert_eq!(track.id, 9);
        assert_eq!(track.uri, "x://y");
        assert_eq!(track.metadata, Some("<DIDL-Lite/>"));
    }

    #[test]
    fn track_with_zero_length_metadata_has_none() {
        let mut payload = 1u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&3u32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        payload.extend_from_slice(&0u32.to_be_bytes());

        let track = OhmTrack::parse(&payload).unwrap();
        assert_eq!(track.uri, "abc");
        assert_eq!(track.metadata, None);
    }

    #[test]
    fn metatext_parses_the_whole_payload_as_utf8() {
        let meta = OhmMetatext::parse(b"hello").unwrap();
        assert_eq!(meta.text, "hello");
    }
}
