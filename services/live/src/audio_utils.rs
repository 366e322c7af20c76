use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Normalized f32 samples to PCM16, clamping out-of-range values.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resamples a mono stream delivered in buffers of any length.
///
/// Input is staged until a full resampler chunk is available; [`StreamResampler::finish`]
/// flushes the remainder. Equal rates pass samples through untouched.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub const CHUNK_SIZE: usize = 1024;

    pub fn new(in_rate: u32, out_rate: u32) -> anyhow::Result<Self> {
        let inner = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(
                f64::from(in_rate),
                f64::from(out_rate),
                Self::CHUNK_SIZE,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let mut frames = resampler.process(std::slice::from_ref(&chunk), None)?;
            out.append(&mut frames[0]);
        }
        Ok(out)
    }

    pub fn finish(&mut self) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let tail = std::mem::take(&mut self.pending);
        let mut frames = resampler.process_partial(Some(std::slice::from_ref(&tail)), None)?;
        Ok(std::mem::take(&mut frames[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(16000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(48000.0, 16000.0, 1024).is_ok());
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let result = convert_f32_to_i16(&[1.0, -1.0, 0.0, 0.5]);
        assert_eq!(result[0], i16::MAX);
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);
        assert_eq!(result[3], (0.5 * i16::MAX as f32) as i16);

        let clamped = convert_f32_to_i16(&[2.0, -2.0]);
        assert_eq!(clamped, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let result = convert_i16_to_f32(&[i16::MIN, 0, 16384]);
        assert_abs_diff_eq!(result[0], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_downmix_to_mono() {
        let mono = downmix_to_mono(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono.len(), 2);
        assert_abs_diff_eq!(mono[0], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 0.0001);
        assert_eq!(downmix_to_mono(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn test_equal_rates_pass_through() {
        let mut resampler = StreamResampler::new(16_000, 16_000).unwrap();
        assert_eq!(resampler.process(&[0.1, 0.2]).unwrap(), vec![0.1, 0.2]);
        assert!(resampler.finish().unwrap().is_empty());
    }

    #[test]
    fn test_stream_resampler_buffers_odd_sized_input() {
        let mut resampler = StreamResampler::new(48_000, 16_000).unwrap();
        let input = vec![0.0f32; 300];

        // Less than one chunk produces nothing until more arrives.
        assert!(resampler.process(&input).unwrap().is_empty());

        let mut total = 0;
        for _ in 0..20 {
            total += resampler.process(&input).unwrap().len();
        }
        total += resampler.finish().unwrap().len();

        // 6300 input samples at a 1/3 ratio.
        let expected = 6300 / 3;
        assert!(total.abs_diff(expected) <= StreamResampler::CHUNK_SIZE / 3 + 64);
    }
}
