//! Short sound effects for assistant attention and price moves

use crate::audio::codec::AudioSegment;
use crate::{Result, SolashenError};
use hound::{SampleFormat, WavReader};
use std::f32::consts::PI;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// The assistant starts talking
    Alert,
    /// Watched price rose past the threshold
    PriceUp,
    /// Watched price fell past the threshold
    PriceDown,
}

/// Decoded cue sounds, one per `Cue`
#[derive(Debug, Clone)]
pub struct CueBank {
    alert: AudioSegment,
    price_up: AudioSegment,
    price_down: AudioSegment,
}

impl CueBank {
    /// Render the built-in tones at `sample_rate`
    pub fn synthesized(sample_rate: u32) -> Self {
        Self {
            alert: render_tones(&[(880.0, 0.07), (1320.0, 0.11)], sample_rate),
            price_up: render_tones(&[(660.0, 0.08), (880.0, 0.08), (990.0, 0.12)], sample_rate),
            price_down: render_tones(&[(990.0, 0.08), (880.0, 0.08), (660.0, 0.12)], sample_rate),
        }
    }

    /// Replace a built-in tone with a WAV file
    pub fn with_override<P: AsRef<Path>>(mut self, cue: Cue, path: P) -> Result<Self> {
        let segment = read_wav_segment(path.as_ref())?;
        info!("Loaded {:?} cue from {:?}", cue, path.as_ref());
        match cue {
            Cue::Alert => self.alert = segment,
            Cue::PriceUp => self.price_up = segment,
            Cue::PriceDown => self.price_down = segment,
        }
        Ok(self)
    }

    pub fn get(&self, cue: Cue) -> &AudioSegment {
        match cue {
            Cue::Alert => &self.alert,
            Cue::PriceUp => &self.price_up,
            Cue::PriceDown => &self.price_down,
        }
    }
}

/// Consecutive sine blips with a short linear fade on both ends
fn render_tones(tones: &[(f32, f32)], sample_rate: u32) -> AudioSegment {
    let rate = sample_rate as f32;
    let fade = (0.005 * rate) as usize;
    let mut samples = Vec::new();

    for &(frequency, seconds) in tones {
        let len = (seconds * rate) as usize;
        for i in 0..len {
            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i + fade > len {
                (len - i) as f32 / fade as f32
            } else {
                1.0
            };
            samples.push((2.0 * PI * frequency * i as f32 / rate).sin() * 0.3 * envelope);
        }
    }

    AudioSegment::mono(samples, sample_rate)
}

/// Read a WAV file into a segment, keeping its own sample rate
fn read_wav_segment(path: &Path) -> Result<AudioSegment> {
    let mut reader = WavReader::open(path)
        .map_err(|e| SolashenError::Io(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    debug!(
        "Reading WAV file: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SolashenError::Io(format!("Failed to read sample: {}", e)))?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SolashenError::Io(format!("Failed to read sample: {}", e)))?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SolashenError::Io(format!("Failed to read sample: {}", e)))?,
        (SampleFormat::Int, bits) => {
            return Err(SolashenError::AudioProcessing(format!(
                "Unsupported bit depth: {}",
                bits
            )));
        }
    };

    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, &sample) in frame.iter().enumerate() {
            planar[channel].push(sample);
        }
    }

    Ok(AudioSegment::new(planar, spec.sample_rate))
}
