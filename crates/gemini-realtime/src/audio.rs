//! Contracts between the engine and the audio devices it does not own.
//!
//! Capture hands the engine fixed-size 16 kHz PCM16 frames; playback receives
//! 24 kHz PCM16 chunks and must support an immediate, lossy flush when the
//! model is interrupted.

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::warn;

pub const INPUT_SAMPLE_RATE: u32 = 16_000;
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const INPUT_MIME: &str = "audio/pcm;rate=16000";

/// Samples per capture frame (64 ms at 16 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 1024;

/// Thirty seconds of output audio.
pub const DEFAULT_PLAYBACK_CAPACITY: usize = OUTPUT_SAMPLE_RATE as usize * 2 * 30;

/// Little-endian PCM16 bytes to samples. A trailing odd byte is ignored.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Re-slices arbitrary capture buffers into fixed-size frames.
#[derive(Debug)]
pub struct FrameChunker {
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameChunker {
    pub fn new(frame_samples: usize) -> Self {
        let frame_bytes = frame_samples.max(1) * 2;
        Self {
            frame_bytes,
            pending: Vec::with_capacity(frame_bytes),
        }
    }

    /// Appends captured bytes and returns every frame that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() / self.frame_bytes * self.frame_bytes;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete);
        let frames = self
            .pending
            .chunks_exact(self.frame_bytes)
            .map(<[u8]>::to_vec)
            .collect();
        self.pending = rest;
        frames
    }

    /// Returns the partial frame, zero-padded, if any bytes are pending.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(self.frame_bytes, 0);
        Some(frame)
    }
}

impl Default for FrameChunker {
    fn default() -> Self {
        Self::new(CAPTURE_FRAME_SAMPLES)
    }
}

/// Destination for model audio.
pub trait AudioSink: Send + Sync {
    fn push(&self, pcm: &[u8]);

    /// Drops everything queued but not yet played. Returns the number of bytes dropped.
    fn flush(&self) -> usize;
}

/// Lock-light byte queue between the receive loop and a playback callback.
pub struct PlaybackQueue {
    producer: Mutex<HeapProd<u8>>,
    consumer: Mutex<HeapCons<u8>>,
    capacity: usize,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `out` with queued bytes; called from the playback clock.
    pub fn pop_into(&self, out: &mut [u8]) -> usize {
        self.consumer.lock().pop_slice(out)
    }

    /// Fills `out` with samples, padding with silence on underrun.
    ///
    /// Does not allocate. A trailing odd byte stays queued until its pair arrives.
    pub fn pop_samples(&self, out: &mut [i16]) -> usize {
        let mut consumer = self.consumer.lock();
        let available = (consumer.occupied_len() / 2).min(out.len());
        let mut bytes = [0u8; 512];
        for samples in out[..available].chunks_mut(bytes.len() / 2) {
            let chunk = &mut bytes[..samples.len() * 2];
            consumer.pop_slice(chunk);
            for (sample, pair) in samples.iter_mut().zip(chunk.chunks_exact(2)) {
                *sample = i16::from_le_bytes([pair[0], pair[1]]);
            }
        }
        out[available..].fill(0);
        available
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYBACK_CAPACITY)
    }
}

impl AudioSink for PlaybackQueue {
    fn push(&self, pcm: &[u8]) {
        let written = self.producer.lock().push_slice(pcm);
        if written < pcm.len() {
            warn!(
                dropped = pcm.len() - written,
                "Playback queue full; dropping audio."
            );
        }
    }

    fn flush(&self) -> usize {
        self.consumer.lock().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_conversions() {
        let samples = vec![0i16, 256, -256, i16::MAX, i16::MIN];
        assert_eq!(pcm16_from_bytes(&pcm16_to_bytes(&samples)), samples);
        assert_eq!(pcm16_from_bytes(&[1, 0, 9]), vec![1]);
    }

    #[test]
    fn test_frame_chunker_emits_fixed_frames() {
        let mut chunker = FrameChunker::new(2);
        assert!(chunker.push(&[1, 2, 3]).is_empty());
        assert_eq!(chunker.push(&[4, 5, 6, 7, 8, 9]), vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(chunker.finish(), Some(vec![9, 0, 0, 0]));
        assert_eq!(chunker.finish(), None);
    }

    #[test]
    fn test_playback_queue_push_pop() {
        let queue = PlaybackQueue::new(8);
        queue.push(&[1, 2, 3, 4]);
        assert_eq!(queue.len(), 4);

        let mut out = [0u8; 3];
        assert_eq!(queue.pop_into(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_playback_queue_drops_overflow() {
        let queue = PlaybackQueue::new(4);
        queue.push(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_flush_drops_unplayed_audio() {
        let queue = PlaybackQueue::new(16);
        queue.push(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(queue.flush(), 6);
        assert!(queue.is_empty());

        let mut out = [7u8; 2];
        assert_eq!(queue.pop_into(&mut out), 0);
    }

    #[test]
    fn test_pop_samples_pads_with_silence() {
        let queue = PlaybackQueue::new(16);
        queue.push(&pcm16_to_bytes(&[100, -100]));
        let mut out = [1i16; 4];
        assert_eq!(queue.pop_samples(&mut out), 2);
        assert_eq!(out, [100, -100, 0, 0]);
    }

    #[test]
    fn test_pop_samples_spans_scratch_chunks_and_keeps_odd_byte() {
        let samples: Vec<i16> = (0..700).map(|i| i * 3 - 1000).collect();
        let queue = PlaybackQueue::new(4096);
        queue.push(&pcm16_to_bytes(&samples));
        queue.push(&[0x34]);

        let mut out = vec![0i16; 700];
        assert_eq!(queue.pop_samples(&mut out), 700);
        assert_eq!(out, samples);
        assert_eq!(queue.len(), 1);

        queue.push(&[0x12]);
        let mut out = [7i16; 2];
        assert_eq!(queue.pop_samples(&mut out), 1);
        assert_eq!(out, [0x1234, 0]);
        assert!(queue.is_empty());
    }
}
