//! HTTP/ICY ingest (§4.6): plain internet-radio URIs, fetched with
//! `reqwest`, demultiplexing ICY metadata blocks inline when the server
//! advertises `icy-metaint`, and wrapping `StreamTitle` changes as
//! DIDL-Lite-tagged `MetaText`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tokio::sync::Notify;

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{FlushIdProvider, StreamIdProvider};
use crate::msg::{EncodedStreamData, MsgFactory};
use crate::reservoir::EncodedReservoirSender;
use crate::stream_handler::{OkToPlay, StreamHandler};

const MAX_REDIRECTS: u8 = 5;
/// Extensions whose content is a playlist/container rather than raw audio;
/// ICY metadata never applies to these, so `Icy-MetaData: 1` is omitted.
const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8", "pls", "asx", "xspf"];

fn looks_like_playlist(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    PLAYLIST_EXTENSIONS
        .iter()
        .any(|ext| path.to_ascii_lowercase().ends_with(ext))
}

/// Wraps a bare ICY `StreamTitle` value as a minimal DIDL-Lite `<item>` so it
/// travels as a self-describing `MetaText` fragment (§4.6).
fn wrap_didl_lite(title: &str) -> String {
    let mut writer = Writer::new(Vec::new());
    let mut root = BytesStart::new("DIDL-Lite");
    root.push_attribute(("xmlns:dc", "http://purl.org/dc/elements/1.1/"));
    root.push_attribute(("xmlns:upnp", "urn:schemas-upnp-org:metadata-1-0/upnp/"));
    root.push_attribute(("xmlns", "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"));
    writer.write_event(Event::Start(root)).ok();

    let mut item = BytesStart::new("item");
    item.push_attribute(("id", "0"));
    item.push_attribute(("parentID", "-1"));
    item.push_attribute(("restricted", "true"));
    writer.write_event(Event::Start(item)).ok();

    writer.write_event(Event::Start(BytesStart::new("dc:title"))).ok();
    writer
        .write_event(Event::Text(BytesText::new(&html_escape::encode_text(title))))
        .ok();
    writer.write_event(Event::End(BytesEnd::new("dc:title"))).ok();

    writer
        .write_event(Event::Start(BytesStart::new("upnp:class")))
        .ok();
    writer
        .write_event(Event::Text(BytesText::new("object.item.audioItem.audioBroadcast")))
        .ok();
    writer.write_event(Event::End(BytesEnd::new("upnp:class"))).ok();

    writer.write_event(Event::End(BytesEnd::new("item"))).ok();
    writer.write_event(Event::End(BytesEnd::new("DIDL-Lite"))).ok();

    String::from_utf8(writer.into_inner()).unwrap_or_default()
}

/// Parses `StreamTitle='...';` out of a raw ICY metadata block (the inverse
/// of this codebase's server-side `IcyFormatter::format_metadata`).
fn parse_stream_title(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let key = "StreamTitle='";
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest.find("';")?;
    Some(rest[..end].to_string())
}

/// Demultiplexes an ICY-framed byte stream: every `metaint` bytes of audio is
/// followed by a one-byte length (×16) metadata block (§4.6).
struct IcyDemuxer {
    metaint: usize,
    audio_remaining: usize,
    meta_remaining: usize,
    meta_buf: Vec<u8>,
    reading_len: bool,
}

impl IcyDemuxer {
    fn new(metaint: usize) -> Self {
        Self {
            metaint,
            audio_remaining: metaint,
            meta_remaining: 0,
            meta_buf: Vec::new(),
            reading_len: false,
        }
    }

    /// Splits `data` into audio bytes (appended to `audio_out`) and zero or
    /// more completed metadata blocks.
    fn process(&mut self, data: &[u8], audio_out: &mut Vec<u8>) -> Vec<Vec<u8>> {
        let mut completed = Vec::new();
        let mut i = 0;
        while i < data.len() {
            if self.reading_len {
                let len = usize::from(data[i]) * 16;
                i += 1;
                self.reading_len = false;
                if len == 0 {
                    self.audio_remaining = self.metaint;
                } else {
                    self.meta_remaining = len;
                    self.meta_buf.clear();
                }
                continue;
            }
            if self.meta_remaining > 0 {
                let take = self.meta_remaining.min(data.len() - i);
                self.meta_buf.extend_from_slice(&data[i..i + take]);
                self.meta_remaining -= take;
                i += take;
                if self.meta_remaining == 0 {
                    completed.push(std::mem::take(&mut self.meta_buf));
                    self.audio_remaining = self.metaint;
                }
                continue;
            }
            if self.audio_remaining > 0 {
                let take = self.audio_remaining.min(data.len() - i);
                audio_out.extend_from_slice(&data[i..i + take]);
                self.audio_remaining -= take;
                i += take;
                if self.audio_remaining == 0 {
                    self.reading_len = true;
                }
                continue;
            }
            self.reading_len = true;
        }
        completed
    }
}

/// The upstream control surface for one HTTP stream instance, shared between
/// the ingest loop (which owns it) and every `StreamHandler` weak reference
/// handed out via `EncodedStream` (§4.6, §6).
pub(crate) struct Shared {
    flush_ids: FlushIdProvider,
    current_stream_id: AtomicU32,
    pending_seek: parking_lot::Mutex<Option<(u32, u64, u32)>>,
    pending_stop: parking_lot::Mutex<Option<(u32, u32)>>,
    ok_to_play: parking_lot::Mutex<OkToPlay>,
    ok_to_play_changed: Notify,
}

impl Shared {
    fn new() -> Self {
        Self {
            flush_ids: FlushIdProvider::new(),
            current_stream_id: AtomicU32::new(0),
            pending_seek: parking_lot::Mutex::new(None),
            pending_stop: parking_lot::Mutex::new(None),
            ok_to_play: parking_lot::Mutex::new(OkToPlay::Later),
            ok_to_play_changed: Notify::new(),
        }
    }

    /// Sets the live-play verdict (driven by the UPnP-layer boundary this
    /// core declares in [`crate::upnp`]), waking anyone blocked in
    /// [`HttpIngest::wait_for_play`].
    pub fn set_ok_to_play(&self, verdict: OkToPlay) {
        *self.ok_to_play.lock() = verdict;
        self.ok_to_play_changed.notify_waiters();
    }
}

#[async_trait]
impl StreamHandler for Shared {
    async fn ok_to_play(&self, _stream_id: u32) -> OkToPlay {
        *self.ok_to_play.lock()
    }

    async fn try_seek(&self, stream_id: u32, offset_bytes: u64) -> Option<u32> {
        if self.current_stream_id.load(Ordering::Acquire) != stream_id {
            return None;
        }
        let flush_id = self.flush_ids.next();
        *self.pending_seek.lock() = Some((stream_id, offset_bytes, flush_id));
        Some(flush_id)
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
        // HTTP ingest has no out-of-band random-access path; codecs needing
        // container index reads must use a seekable source directly.
        false
    }

    fn notify_starving(&self, mode: &str, stream_id: u32) {
        log::debug!("http ingest stream {stream_id} starving in mode {mode}");
    }
}

/// Drives one HTTP/ICY stream end to end: connects, classifies the
/// response, and pushes `EncodedStream` + `AudioEncoded` messages downstream
/// until the stream ends, is stopped, or is seeked (§4.6).
pub struct HttpIngest {
    client: reqwest::Client,
    factory: Arc<MsgFactory>,
    stream_ids: StreamIdProvider,
    shared: Arc<Shared>,
}

impl HttpIngest {
    #[must_use]
    pub fn new(factory: Arc<MsgFactory>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("reqwest client builds with default TLS backend"),
            factory,
            stream_ids: StreamIdProvider::new(),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Exposes the shared upstream control surface so the owning source can
    /// hand a [`Weak`] reference to it out via messages, and set the
    /// live-play verdict from outside.
    #[must_use]
    pub(crate) fn handler(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    async fn get(&self, uri: &str, range_from: Option<u64>) -> ProtocolResult<reqwest::Response> {
        let mut url = uri.to_string();
        for _ in 0..MAX_REDIRECTS {
            let mut req = self.client.get(&url);
            if !looks_like_playlist(&url) {
                req = req.header("Icy-MetaData", "1");
            }
            if let Some(offset) = range_from {
                req = req.header("Range", format!("bytes={offset}-"));
            }
            let resp = req.send().await?;
            let status = resp.status();
            if status.is_redirection() {
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| ProtocolError::HttpStatus(status.as_u16(), "redirect missing Location".into()))?
                    .to_string();
                url = location;
                continue;
            }
            if status.is_client_error() || status.is_server_error() {
                return Err(ProtocolError::HttpStatus(status.as_u16(), status.to_string()));
            }
            return Ok(resp);
        }
        Err(ProtocolError::HttpStatus(310, "too many redirects".into()))
    }

    /// Blocks (via the live-play verdict Notify) until the stream may start
    /// playing, for zero-length live streams (§4.6).
    async fn wait_for_play(&self) {
        loop {
            if !matches!(*self.shared.ok_to_play.lock(), OkToPlay::Later) {
                return;
            }
            self.shared.ok_to_play_changed.notified().await;
        }
    }

    /// Runs ingest for `uri` until the stream ends or is stopped, pushing
    /// messages to `downstream`. Returns the [`Weak<dyn StreamHandler>`] used
    /// so callers can verify it before calling again.
    pub async fn run(&self, uri: String, downstream: EncodedReservoirSender) -> ProtocolResult<()> {
        let mut offset = 0u64;
        loop {
            let stream_id = self.stream_ids.next();
            self.shared.current_stream_id.store(stream_id, Ordering::Release);

            let resp = self.get(&uri, if offset > 0 { Some(offset) } else { None }).await?;
            let seekable = resp.status() == reqwest::StatusCode::PARTIAL_CONTENT;
            let content_length = resp.content_length();
            let icy_metaint = resp
                .headers()
                .get("icy-metaint")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let live = content_length.is_none() && !seekable;

            let handler_dyn: Arc<dyn StreamHandler> = Arc::clone(&self.shared);
            let handler_weak = Arc::downgrade(&handler_dyn);
            let stream_msg = self
                .factory
                .create_encoded_stream(EncodedStreamData {
                    uri: uri.clone(),
                    metatext: None,
                    total_bytes: content_length,
                    stream_id,
                    seekable,
                    live,
                    stream_handler: handler_weak,
                })
                .await;
            downstream
                .push(stream_msg)
                .await
                .map_err(|_| ProtocolError::StreamEnded)?;

            if live {
                self.wait_for_play().await;
            }

            let flushed = self.pump_body(resp, stream_id, icy_metaint, &downstream).await?;
            match flushed {
                PumpOutcome::Ended => return Ok(()),
                PumpOutcome::Stopped => return Ok(()),
                PumpOutcome::Seek(new_offset) => {
                    offset = new_offset;
                    continue;
                }
            }
        }
    }

    async fn pump_body(
        &self,
        resp: reqwest::Response,
        stream_id: u32,
        icy_metaint: Option<usize>,
        downstream: &EncodedReservoirSender,
    ) -> ProtocolResult<PumpOutcome> {
        use futures::StreamExt;

        let mut demuxer = icy_metaint.map(IcyDemuxer::new);
        let mut last_title: Option<String> = None;
        let mut body = resp.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk?;

            if let Some((stream_id_req, offset, flush_id)) = self.shared.pending_seek.lock().take() {
                if stream_id_req == stream_id {
                    let flush = self.factory.create_flush_with_id(flush_id).await;
                    downstream.push(flush).await.map_err(|_| ProtocolError::StreamEnded)?;
                    return Ok(PumpOutcome::Seek(offset));
                }
            }
            if let Some((stream_id_req, flush_id)) = *self.shared.pending_stop.lock() {
                if stream_id_req == stream_id {
                    let flush = self.factory.create_flush_with_id(flush_id).await;
                    downstream.push(flush).await.map_err(|_| ProtocolError::StreamEnded)?;
                    return Ok(PumpOutcome::Stopped);
                }
            }

            let audio_bytes = if let Some(d) = demuxer.as_mut() {
                let mut audio = Vec::with_capacity(chunk.len());
                let blocks = d.process(&chunk, &mut audio);
                for block in blocks {
                    if let Some(title) = parse_stream_title(&block) {
                        if last_title.as_deref() != Some(title.as_str()) {
                            let didl = wrap_didl_lite(&title);
                            let msg = self.factory.create_metatext(didl).await;
                            downstream.push(msg).await.map_err(|_| ProtocolError::StreamEnded)?;
                            last_title = Some(title);
                        }
                    }
                }
                Bytes::from(audio)
            } else {
                chunk
            };

            if audio_bytes.is_empty() {
                continue;
            }
            let msg = self.factory.create_audio_encoded(audio_bytes).await;
            downstream.push(msg).await.map_err(|_| ProtocolError::StreamEnded)?;
        }

        Ok(PumpOutcome::Ended)
    }
}

enum PumpOutcome {
    Ended,
    Stopped,
    Seek(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_extensions_are_detected() {
        assert!(looks_like_playlist("http://example.com/stream.m3u"));
        assert!(looks_like_playlist("http://example.com/stream.pls?x=1"));
        assert!(!looks_like_playlist("http://example.com/stream.mp3"));
    }

    #[test]
    fn stream_title_extracted_from_raw_block() {
        let block = b"StreamTitle='Artist - Song';StreamUrl='';";
        assert_eq!(parse_stream_title(block).as_deref(), Some("Artist - Song"));
    }

    #[test]
    fn missing_stream_title_returns_none() {
        assert_eq!(parse_stream_title(b"garbage"), None);
    }

    #[test]
    fn didl_lite_wraps_title_and_escapes_entities() {
        let xml = wrap_didl_lite("Tom & Jerry");
        assert!(xml.contains("Tom &amp; Jerry"));
        assert!(xml.contains("<dc:title>"));
        assert!(xml.contains("DIDL-Lite"));
    }

    #[test]
    fn icy_demuxer_splits_audio_and_metadata_on_boundary() {
        let mut demuxer = IcyDemuxer::new(4);
        let mut audio = Vec::new();
        // 4 audio bytes, then length byte = 1 (16 bytes of metadata)
        let mut data = vec![1, 2, 3, 4, 1u8];
        data.extend_from_slice(&[b's'; 16]);
        let blocks = demuxer.process(&data, &mut audio);
        assert_eq!(audio, vec![1, 2, 3, 4]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], vec![b's'; 16]);
    }

    #[test]
    fn icy_demuxer_zero_length_block_means_no_metadata() {
        let mut demuxer = IcyDemuxer::new(4);
        let mut audio = Vec::new();
        let data = vec![1, 2, 3, 4, 0u8, 5, 6, 7, 8];
        let blocks = demuxer.process(&data, &mut audio);
        assert_eq!(audio, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn try_seek_mints_flush_id_only_for_current_stream() {
        let shared = Shared::new();
        shared.current_stream_id.store(7, Ordering::Release);
        assert!(shared.try_seek(8, 100).await.is_none());
        let id = shared.try_seek(7, 100).await;
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn try_stop_is_idempotent() {
        let shared = Shared::new();
        shared.current_stream_id.store(1, Ordering::Release);
        let first = shared.try_stop(1).await.unwrap();
        let second = shared.try_stop(1).await.unwrap();
        assert_eq!(first, second);
    }
}
