//! Live microphone capture and speaker playback through `cpal`.

use crate::audio_utils::{StreamResampler, convert_f32_to_i16, downmix_to_mono};
use anyhow::{Context, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream};
use gemini_realtime::audio::{CAPTURE_FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, pcm16_to_bytes};
use gemini_realtime::{FrameChunker, LiveClient, MediaChunk, PlaybackQueue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Raw microphone buffers in the device's native format.
pub struct Microphone {
    pub stream: Stream,
    pub buffers: mpsc::UnboundedReceiver<Vec<f32>>,
    pub sample_rate: u32,
    pub channels: u16,
}

pub fn open_microphone() -> anyhow::Result<Microphone> {
    let device = cpal::default_host()
        .default_input_device()
        .context("No input device available")?;
    let supported = device
        .default_input_config()
        .context("Failed to query input config")?;
    if supported.sample_format() != SampleFormat::F32 {
        bail!("Unsupported input sample format {:?}", supported.sample_format());
    }
    let config = supported.config();
    let (tx, buffers) = mpsc::unbounded_channel();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _| {
            let _ = tx.send(data.to_vec());
        },
        |e| error!(error = %e, "Input stream error."),
        None,
    )?;
    stream.play()?;

    info!(
        device = %device.name().unwrap_or_default(),
        rate = config.sample_rate.0,
        channels = config.channels,
        "Microphone open."
    );
    Ok(Microphone {
        stream,
        buffers,
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    })
}

/// Converts microphone buffers into 16 kHz frames and submits each one.
/// Runs until the microphone stream is dropped.
pub async fn capture_loop(
    client: Arc<LiveClient>,
    mut buffers: mpsc::UnboundedReceiver<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
) -> anyhow::Result<()> {
    let mut resampler = StreamResampler::new(sample_rate, INPUT_SAMPLE_RATE)?;
    let mut chunker = FrameChunker::new(CAPTURE_FRAME_SAMPLES);

    while let Some(buffer) = buffers.recv().await {
        let mono = downmix_to_mono(&buffer, usize::from(channels));
        let resampled = resampler.process(&mono)?;
        for frame in chunker.push(&pcm16_to_bytes(&convert_f32_to_i16(&resampled))) {
            client.send_realtime_input(&[MediaChunk::audio_pcm16(frame)]);
        }
    }
    Ok(())
}

/// Plays the queue on the default output device at 24 kHz.
pub fn open_speaker(queue: Arc<PlaybackQueue>) -> anyhow::Result<Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .context("No output device available")?;
    let supported = device
        .supported_output_configs()
        .context("Failed to query output configs")?
        .find(|range| {
            range.sample_format() == SampleFormat::F32
                && range.min_sample_rate().0 <= OUTPUT_SAMPLE_RATE
                && range.max_sample_rate().0 >= OUTPUT_SAMPLE_RATE
        })
        .context("Output device cannot play 24 kHz float audio")?
        .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE));
    let config = supported.config();
    let channels = usize::from(config.channels);
    let mut scratch: Vec<i16> = Vec::new();

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _| {
            let frames = data.len() / channels;
            scratch.resize(frames, 0);
            queue.pop_samples(&mut scratch);
            for (frame, sample) in data.chunks_exact_mut(channels).zip(&scratch) {
                frame.fill(*sample as f32 / 32768.0);
            }
        },
        |e| warn!(error = %e, "Output stream error."),
        None,
    )?;
    stream.play()?;

    info!(device = %device.name().unwrap_or_default(), channels, "Speaker open.");
    Ok(stream)
}
