use crate::{Result, SolashenError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Mono sample-rate converter.
///
/// Used on both sides of the device boundary: capture audio is brought down
/// to the 16 kHz wire rate and scheduled segments are brought to the output
/// device rate.
pub struct AudioResampler {
    resampler: SincFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    /// Input not yet consumed by a full chunk (streaming mode only)
    pending: Vec<f32>,
}

impl AudioResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(SolashenError::Config(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let resample_ratio = output_rate as f64 / input_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let chunk_size = 1024;

        let resampler = SincFixedIn::<f32>::new(resample_ratio, 2.0, params, chunk_size, 1)
            .map_err(|e| {
                SolashenError::AudioProcessing(format!("Failed to create resampler: {}", e))
            })?;

        debug!("Created resampler: {} Hz -> {} Hz", input_rate, output_rate);

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            pending: Vec::new(),
        })
    }

    /// Resample a complete clip to exactly `round(len * ratio)` samples.
    ///
    /// The filter holds back the last half window of input until more
    /// arrives; that tail is flushed with silence so back-to-back clips fill
    /// their scheduled slots exactly.
    /// Call `reset` first when reusing the resampler for an unrelated clip.
    pub fn resample(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.resampler.input_frames_max();
        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let expected = (input.len() as f64 * ratio).round() as usize;
        let held_back = self.resampler.output_delay();
        let mut output = Vec::with_capacity(expected + held_back + (chunk_size as f64 * ratio) as usize);

        for chunk in input.chunks(chunk_size) {
            // SincFixedIn requires exactly chunk_size frames per call
            let mut planar = vec![vec![0.0f32; chunk_size]];
            planar[0][..chunk.len()].copy_from_slice(chunk);
            output.extend(self.process_chunk(&planar)?);
        }

        let silence = vec![vec![0.0f32; chunk_size]];
        while output.len() < expected {
            output.extend(self.process_chunk(&silence)?);
        }

        output.truncate(expected);
        Ok(output)
    }

    /// Feed a piece of a continuous stream; only whole chunks are converted
    /// and the remainder is kept for the next call
    pub fn process_stream(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);

        let chunk_size = self.resampler.input_frames_max();
        let mut output = Vec::new();

        while self.pending.len() >= chunk_size {
            let planar = vec![self.pending.drain(..chunk_size).collect::<Vec<f32>>()];
            output.extend(self.process_chunk(&planar)?);
        }

        Ok(output)
    }

    fn process_chunk(&mut self, planar: &[Vec<f32>]) -> Result<Vec<f32>> {
        let mut out = self
            .resampler
            .process(planar, None)
            .map_err(|e| SolashenError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        Ok(out.swap_remove(0))
    }

    /// Reset the filter state and drop pending stream input
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending.clear();
    }
}
