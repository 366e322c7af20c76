//! WAV file capture and playback for running a session without audio devices.

use crate::audio_utils::{StreamResampler, convert_f32_to_i16, downmix_to_mono};
use anyhow::Context;
use gemini_realtime::audio::{CAPTURE_FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, pcm16_from_bytes, pcm16_to_bytes};
use gemini_realtime::{AudioSink, FrameChunker, LiveClient, MediaChunk};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Reads a WAV file and converts it to 16 kHz mono PCM16 bytes.
pub fn load_input_pcm16(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = downmix_to_mono(&interleaved, usize::from(spec.channels));
    let mut resampler = StreamResampler::new(spec.sample_rate, INPUT_SAMPLE_RATE)?;
    let mut samples = resampler.process(&mono)?;
    samples.extend(resampler.finish()?);

    info!(
        path = %path.display(),
        source_rate = spec.sample_rate,
        channels = spec.channels,
        samples = samples.len(),
        "Loaded input audio."
    );
    Ok(pcm16_to_bytes(&convert_f32_to_i16(&samples)))
}

/// Sends `pcm` as realtime audio in capture-sized frames, paced at real time.
pub async fn stream_input(client: &LiveClient, pcm: &[u8]) {
    let frame = Duration::from_secs_f64(CAPTURE_FRAME_SAMPLES as f64 / f64::from(INPUT_SAMPLE_RATE));
    let mut chunker = FrameChunker::new(CAPTURE_FRAME_SAMPLES);
    let mut interval = tokio::time::interval(frame);

    let frames = chunker.push(pcm).into_iter().chain(chunker.finish());
    for chunk in frames {
        interval.tick().await;
        client.send_realtime_input(&[MediaChunk::audio_pcm16(chunk)]);
    }
    info!("Finished streaming input audio.");
}

/// Writes model audio to a 24 kHz mono WAV file as it arrives.
pub struct WavRecorder {
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl WavRecorder {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: OUTPUT_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Writes the header and closes the file. Later audio is ignored.
    pub fn finish(&self) -> anyhow::Result<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize().context("Failed to finalize output WAV")?;
        }
        Ok(())
    }
}

impl AudioSink for WavRecorder {
    fn push(&self, pcm: &[u8]) {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        for sample in pcm16_from_bytes(pcm) {
            if let Err(e) = writer.write_sample(sample) {
                warn!(error = %e, "Failed to write output audio; recording stopped.");
                *guard = None;
                return;
            }
        }
    }

    /// Everything pushed is already written.
    fn flush(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_input_at_native_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, INPUT_SAMPLE_RATE, 1, &[0, 16384, -16384]);

        let pcm = load_input_pcm16(&path).unwrap();
        let samples = pcm16_from_bytes(&pcm);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0);
        assert!((samples[1] - 16383).abs() <= 1);
        assert!((samples[2] + 16383).abs() <= 1);
    }

    #[test]
    fn test_load_input_downmixes_and_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 48_000, 2, &vec![0i16; 48_000 * 2]);

        let pcm = load_input_pcm16(&path).unwrap();
        let samples = pcm16_from_bytes(&pcm).len();
        assert!(samples.abs_diff(16_000) < 1_000, "got {samples} samples");
    }

    #[test]
    fn test_missing_input_file() {
        assert!(load_input_pcm16(Path::new("/nonexistent/input.wav")).is_err());
    }

    #[test]
    fn test_recorder_writes_pushed_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let recorder = WavRecorder::create(&path).unwrap();

        recorder.push(&pcm16_to_bytes(&[1, 2, 3]));
        assert_eq!(recorder.flush(), 0);
        recorder.push(&pcm16_to_bytes(&[4]));
        recorder.finish().unwrap();
        recorder.push(&pcm16_to_bytes(&[5]));

        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, OUTPUT_SAMPLE_RATE);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }
}
