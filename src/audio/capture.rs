//! Microphone seam used by the session driver

use crate::audio::codec::WIRE_INPUT_SAMPLE_RATE;
use crate::audio::resampler::AudioResampler;
use crate::session::events::CommandSender;
use crate::Result;

/// A live microphone capture; dropping or releasing it frees the device
pub trait CaptureHandle: Send {
    /// Stop capturing and free the device and its processing graph.
    /// Safe to call more than once.
    fn release(&mut self);
}

/// Something that can open the microphone
pub trait CaptureSource: Send + Sync {
    /// Open the device and start posting `SessionCommand::CaptureFrame`
    /// tagged with `epoch` to `commands`
    fn acquire(&self, epoch: u64, commands: CommandSender) -> Result<Box<dyn CaptureHandle>>;

    /// Launch-time check that a device exists, without opening it
    fn check_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Samples per outbound frame at 16 kHz
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Turns device-rate mono audio into fixed-size 16 kHz frames
pub struct FrameAssembler {
    resampler: Option<AudioResampler>,
    pending: Vec<f32>,
    frame_size: usize,
}

impl FrameAssembler {
    pub fn new(device_rate: u32, frame_size: usize) -> Result<Self> {
        let resampler = if device_rate == WIRE_INPUT_SAMPLE_RATE {
            None
        } else {
            Some(AudioResampler::new(device_rate, WIRE_INPUT_SAMPLE_RATE)?)
        };

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(frame_size * 2),
            frame_size: frame_size.max(1),
        })
    }

    /// Feed device samples, returning every frame that became complete
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<Vec<f32>>> {
        match self.resampler.as_mut() {
            Some(resampler) => {
                let converted = resampler.process_stream(samples)?;
                self.pending.extend(converted);
            }
            None => self.pending.extend_from_slice(samples),
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            frames.push(self.pending.drain(..self.frame_size).collect());
        }
        Ok(frames)
    }

    /// Samples waiting for the next frame
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Average interleaved channels down to mono
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        assert_eq!(downmix(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_frames_are_fixed_size_at_wire_rate() {
        let mut assembler = FrameAssembler::new(16000, 4).unwrap();
        assert!(assembler.push(&[0.1, 0.2, 0.3]).unwrap().is_empty());

        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]).unwrap();
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_device_rate_is_converted() {
        let mut assembler = FrameAssembler::new(48000, CAPTURE_FRAME_SIZE).unwrap();
        let mut frames = Vec::new();
        // One second at 48 kHz is about 16000 samples at the wire rate
        for _ in 0..48 {
            frames.extend(assembler.push(&vec![0.0; 1000]).unwrap());
        }
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == CAPTURE_FRAME_SIZE));
    }
}
