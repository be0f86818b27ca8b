//! Raw audio payloads: `DecodedAudio` (fixed-capacity PCM block) and the
//! `EncodedAudio` chain (§3).

use bytes::{Bytes, BytesMut};

use crate::time::{jiffies_per_sample, Jiffies};

/// Sample endianness, carried alongside every PCM/encoded audio block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Maximum bytes held by a single `DecodedAudio` block, matching the original's
/// `kMaxBytes = 6*1024` (§3).
pub const DECODED_AUDIO_MAX_BYTES: usize = 6 * 1024;

/// A fixed-capacity block of raw PCM samples plus the format needed to convert
/// byte offsets to jiffies.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub data: Bytes,
    pub channels: u8,
    pub sample_rate: u32,
    pub bit_depth: u8,
    pub endianness: Endianness,
}

impl Default for DecodedAudio {
    fn default() -> Self {
        Self {
            data: Bytes::new(),
            channels: 2,
            sample_rate: 44_100,
            bit_depth: 16,
            endianness: Endianness::Big,
        }
    }
}

impl DecodedAudio {
    /// Bytes occupied by one sample across all channels (a "frame").
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bit_depth).div_ceil(8)
    }

    /// Number of whole frames held in `data`.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        let frame = self.bytes_per_frame();
        if frame == 0 {
            0
        } else {
            self.data.len() / frame
        }
    }

    /// Duration of this block in jiffies, derived from its frame count and rate.
    #[must_use]
    pub fn jiffies(&self) -> Jiffies {
        Jiffies::from_samples(self.frame_count() as u64, self.sample_rate).unwrap_or(Jiffies::ZERO)
    }

    /// Converts a byte offset within `data` to a jiffies offset from the block
    /// start, truncating to whole frames.
    #[must_use]
    pub fn byte_offset_to_jiffies(&self, byte_offset: usize) -> Jiffies {
        let frame = self.bytes_per_frame();
        if frame == 0 {
            return Jiffies::ZERO;
        }
        let frames = (byte_offset / frame) as u64;
        Jiffies::from_samples(frames, self.sample_rate).unwrap_or(Jiffies::ZERO)
    }

    /// Splits this block at `frame_index` frames, returning the tail as a new
    /// block and truncating `self` to the head.
    ///
    /// # Panics
    /// Panics if `frame_index` is zero or at/beyond the block's frame count —
    /// both are boundary errors the caller must avoid (§8).
    #[must_use]
    pub fn split(&mut self, frame_index: usize) -> DecodedAudio {
        let frame = self.bytes_per_frame();
        assert!(frame_index > 0, "cannot split a decoded audio block at 0");
        assert!(
            frame_index < self.frame_count(),
            "split index must be strictly inside the block"
        );
        let byte_index = frame_index * frame;
        let tail_bytes = self.data.split_off(byte_index);
        DecodedAudio {
            data: tail_bytes,
            channels: self.channels,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            endianness: self.endianness,
        }
    }
}

/// One link in the `AudioEncoded` chain: a single compressed-audio buffer plus a
/// forward link to the next one (§3).
#[derive(Debug, Clone, Default)]
pub struct EncodedAudio {
    pub bytes: Bytes,
    next: Option<Box<EncodedAudio>>,
}

impl EncodedAudio {
    #[must_use]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes, next: None }
    }

    /// Total bytes across this node and every linked node.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.bytes.len() + self.next.as_ref().map_or(0, |n| n.total_bytes())
    }

    /// Appends `other` at the tail of the chain.
    pub fn add(&mut self, other: EncodedAudio) {
        match &mut self.next {
            Some(next) => next.add(other),
            None => self.next = Some(Box::new(other)),
        }
    }

    /// Copies the full chain's bytes into one contiguous buffer.
    #[must_use]
    pub fn copy_to(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(self.total_bytes());
        self.copy_into(&mut out);
        out
    }

    fn copy_into(&self, out: &mut BytesMut) {
        out.extend_from_slice(&self.bytes);
        if let Some(next) = &self.next {
            next.copy_into(out);
        }
    }

    /// Cuts the chain at absolute byte offset `n`, returning everything from
    /// `n` onward as a new chain and truncating `self` to `[0, n)`.
    ///
    /// # Panics
    /// Panics if `n` is zero or `n >= total_bytes()` (§8: messages split at 0 or
    /// at/beyond their length must fail cleanly, which here means "never be
    /// attempted" — callers check bounds before calling split).
    #[must_use]
    pub fn split(&mut self, n: usize) -> EncodedAudio {
        let total = self.total_bytes();
        assert!(n > 0, "cannot split encoded audio at 0");
        assert!(n < total, "split position must be strictly inside the chain");

        if n < self.bytes.len() {
            let tail_bytes = self.bytes.split_off(n);
            let mut tail = EncodedAudio::new(tail_bytes);
            if let Some(next) = self.next.take() {
                tail.add(*next);
            }
            tail
        } else {
            let remaining = n - self.bytes.len();
            let next = self
                .next
                .as_mut()
                .expect("n < total_bytes implies a next link exists");
            next.split(remaining)
        }
    }

    /// Takes a fresh reference to every link, cloning the chain structure (the
    /// underlying [`Bytes`] buffers are themselves cheap, refcounted clones).
    #[must_use]
    pub fn deep_clone(&self) -> EncodedAudio {
        EncodedAudio {
            bytes: self.bytes.clone(),
            next: self.next.as_ref().map(|n| Box::new(n.deep_clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_16bit_stereo(frames: usize) -> DecodedAudio {
        DecodedAudio {
            data: Bytes::from(vec![0x7Fu8; frames * 4]),
            channels: 2,
            sample_rate: 44_100,
            bit_depth: 16,
            endianness: Endianness::Big,
        }
    }

    #[test]
    fn decoded_audio_jiffies_match_frame_count() {
        let audio = pcm_16bit_stereo(1536);
        assert_eq!(audio.frame_count(), 1536);
        assert_eq!(audio.jiffies().to_samples(44_100), 1536);
    }

    #[test]
    fn decoded_audio_split_preserves_total_frames() {
        let mut audio = pcm_16bit_stereo(100);
        let tail = audio.split(40);
        assert_eq!(audio.frame_count(), 40);
        assert_eq!(tail.frame_count(), 60);
    }

    #[test]
    #[should_panic]
    fn decoded_audio_split_at_zero_panics() {
        let mut audio = pcm_16bit_stereo(10);
        audio.split(0);
    }

    #[test]
    fn encoded_chain_add_and_total_bytes() {
        let mut chain = EncodedAudio::new(Bytes::from_static(b"abc"));
        chain.add(EncodedAudio::new(Bytes::from_static(b"defgh")));
        assert_eq!(chain.total_bytes(), 8);
        assert_eq!(&chain.copy_to()[..], b"abcdefgh");
    }

    #[test]
    fn encoded_chain_split_across_link_boundary() {
        let mut chain = EncodedAudio::new(Bytes::from_static(b"abc"));
        chain.add(EncodedAudio::new(Bytes::from_static(b"defgh")));
        let tail = chain.split(5);
        assert_eq!(&chain.copy_to()[..], b"abcde");
        assert_eq!(&tail.copy_to()[..], b"fgh");
    }

    #[test]
    fn encoded_chain_deep_clone_is_independent() {
        let mut chain = EncodedAudio::new(Bytes::from_static(b"abc"));
        chain.add(EncodedAudio::new(Bytes::from_static(b"def")));
        let clone = chain.deep_clone();
        chain.split(1);
        assert_eq!(clone.total_bytes(), 6);
    }

    #[test]
    #[should_panic]
    fn zero_byte_split_rejected() {
        let mut chain = EncodedAudio::new(Bytes::from_static(b"abc"));
        chain.split(0);
    }
}
