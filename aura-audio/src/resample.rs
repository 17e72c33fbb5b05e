use anyhow::Context;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters};

const SINC_LEN: usize = 256;

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    }
}

/// Resample one complete mono buffer. The result holds exactly
/// `round(len * ratio)` samples.
pub fn resample_mono_f32(
    input_samples: &[f32],
    input_sample_rate_hz: u32,
    target_sample_rate_hz: u32,
) -> anyhow::Result<Vec<f32>> {
    if input_sample_rate_hz == target_sample_rate_hz || input_samples.is_empty() {
        return Ok(input_samples.to_vec());
    }

    let ratio = target_sample_rate_hz as f64 / input_sample_rate_hz as f64;
    let expected = (input_samples.len() as f64 * ratio).round() as usize;

    // The filter needs look-ahead past the last sample; pad with silence so the
    // tail is not cut short.
    let mut padded = Vec::with_capacity(input_samples.len() + SINC_LEN);
    padded.extend_from_slice(input_samples);
    padded.resize(input_samples.len() + SINC_LEN, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params(), padded.len(), 1)
        .context("create resampler")?;

    let input = vec![padded];
    let mut out = resampler
        .process(&input, None)
        .context("resample")?
        .into_iter()
        .next()
        .unwrap_or_default();
    out.resize(expected, 0.0);
    Ok(out)
}

/// Streaming mono resampler for input of arbitrary length. Filter state is
/// carried across calls, so consecutive pushes form one continuous signal.
pub struct ChunkResampler {
    inner: Option<SincFixedIn<f32>>,
    chunk_len: usize,
    pending: Vec<f32>,
}

impl ChunkResampler {
    pub fn new(
        input_sample_rate_hz: u32,
        target_sample_rate_hz: u32,
        chunk_len: usize,
    ) -> anyhow::Result<Self> {
        let chunk_len = chunk_len.max(1);
        let inner = if input_sample_rate_hz == target_sample_rate_hz {
            None
        } else {
            Some(
                SincFixedIn::<f32>::new(
                    target_sample_rate_hz as f64 / input_sample_rate_hz as f64,
                    2.0,
                    sinc_params(),
                    chunk_len,
                    1,
                )
                .context("create streaming resampler")?,
            )
        };
        Ok(Self {
            inner,
            chunk_len,
            pending: Vec::with_capacity(chunk_len),
        })
    }

    /// Feed samples; returns whatever full chunks produced.
    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= self.chunk_len {
            let input = vec![self.pending.drain(..self.chunk_len).collect::<Vec<f32>>()];
            let processed = resampler.process(&input, None).context("resample chunk")?;
            if let Some(ch) = processed.into_iter().next() {
                out.extend(ch);
            }
        }
        Ok(out)
    }
}
