//! Conversions between wire audio (base64 PCM16) and normalized samples

use crate::{Result, SolashenError};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

/// Sample rate of outbound microphone audio
pub const WIRE_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound assistant audio
pub const WIRE_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Format descriptor attached to every outbound packet
pub const WIRE_INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Scale between normalized samples and 16-bit PCM
const PCM16_SCALE: f32 = 32768.0;

/// One outbound chunk of microphone audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPacket {
    pub mime_type: String,
    pub data: String,
}

/// Decoded, immutable audio ready to be scheduled
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioSegment {
    /// Build a segment from planar channel data
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Build a single-channel segment
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel_data(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frame_count())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}

/// Encode captured samples into an outbound packet.
///
/// Samples are scaled by 32768 and truncated into `i16` with wrap-around,
/// so values at or beyond full scale (including `1.0`) wrap rather than
/// clip. Keeping the input inside `[-1, 1)` is the caller's job.
pub fn encode_to_wire_format(samples: &[f32]) -> AudioPacket {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM16_SCALE) as i32 as i16;
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(value);
    }

    AudioPacket {
        mime_type: WIRE_INPUT_MIME_TYPE.to_string(),
        data: BASE64_STANDARD.encode(&bytes),
    }
}

/// Decode a base64 payload into raw bytes
pub fn decode_from_wire_format(base64: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(base64)
        .map_err(|e| SolashenError::Decode(format!("Invalid base64 audio payload: {}", e)))
}

/// Reinterpret little-endian PCM16 bytes as a playable segment.
///
/// A trailing partial frame is dropped.
pub fn pcm16_to_audio_buffer(bytes: &[u8], sample_rate: u32, channels: usize) -> Result<AudioSegment> {
    if channels == 0 {
        return Err(SolashenError::Config(
            "Number of channels must be greater than 0".into(),
        ));
    }
    if sample_rate == 0 {
        return Err(SolashenError::Config(
            "Sample rate must be greater than 0".into(),
        ));
    }

    let frame_count = bytes.len() / (2 * channels);
    let mut planar = vec![Vec::with_capacity(frame_count); channels];

    for frame in 0..frame_count {
        for (channel, data) in planar.iter_mut().enumerate() {
            let offset = (frame * channels + channel) * 2;
            let sample = LittleEndian::read_i16(&bytes[offset..offset + 2]);
            data.push(sample as f32 / PCM16_SCALE);
        }
    }

    Ok(AudioSegment::new(planar, sample_rate))
}

/// Decode an inbound assistant payload (24 kHz mono) in one step
pub fn decode_assistant_audio(base64: &str) -> Result<AudioSegment> {
    let bytes = decode_from_wire_format(base64)?;
    pcm16_to_audio_buffer(&bytes, WIRE_OUTPUT_SAMPLE_RATE, 1)
}
