use crate::audio::codec::AudioSegment;
use crate::audio::resampler::AudioResampler;
use crate::audio::scheduler::{PlaybackSink, SegmentEndedCallback, SegmentId};
use crate::{Result, SolashenError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// One segment placed on the output timeline
struct Voice {
    /// `None` for untracked cues
    id: Option<SegmentId>,
    samples: Vec<f32>,
    start_frame: u64,
    position: usize,
}

/// Shared between the device callback and the scheduler side
#[derive(Default)]
struct Mixer {
    frames_played: u64,
    running: bool,
    voices: Vec<Voice>,
}

impl Mixer {
    /// Fill one device buffer and return the tracked voices that finished
    fn render(&mut self, data: &mut [f32], channels: usize) -> Vec<SegmentId> {
        data.fill(0.0);
        if !self.running {
            // A suspended clock does not advance
            return Vec::new();
        }

        let frames = data.len() / channels;
        for voice in self.voices.iter_mut() {
            for frame in 0..frames {
                if self.frames_played + (frame as u64) < voice.start_frame {
                    continue;
                }
                let Some(&sample) = voice.samples.get(voice.position) else {
                    break;
                };
                voice.position += 1;
                for c in 0..channels {
                    data[frame * channels + c] += sample;
                }
            }
        }
        self.frames_played += frames as u64;

        let mut finished = Vec::new();
        self.voices.retain(|voice| {
            if voice.position < voice.samples.len() {
                return true;
            }
            if let Some(id) = voice.id {
                finished.push(id);
            }
            false
        });
        finished
    }
}

/// Brings segments to the device rate, one cached resampler per source rate
struct RateConverter {
    device_rate: u32,
    resamplers: HashMap<u32, AudioResampler>,
}

impl RateConverter {
    fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            resamplers: HashMap::new(),
        }
    }

    /// Mono samples covering exactly the segment's duration at the device rate
    fn convert(&mut self, segment: &AudioSegment) -> Result<Vec<f32>> {
        let mono = segment.to_mono();
        if segment.sample_rate() == self.device_rate {
            return Ok(mono);
        }

        let resampler = match self.resamplers.entry(segment.sample_rate()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(AudioResampler::new(segment.sample_rate(), self.device_rate)?)
            }
        };
        resampler.reset();
        resampler.resample(&mono)
    }
}

enum Control {
    Play(Sender<Result<()>>),
    Shutdown,
}

/// Persistent output stream with a sample-accurate clock.
///
/// The stream lives on its own thread; it is created suspended and only
/// starts advancing after `resume`.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    control_tx: Sender<Control>,
    sample_rate: u32,
    converter: RateConverter,
    on_ended: SegmentEndedCallback,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device
    pub fn new(on_ended: SegmentEndedCallback) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (control_tx, control_rx) = bounded(8);
        let (ready_tx, ready_rx) = bounded(1);

        let thread_mixer = Arc::clone(&mixer);
        let thread_on_ended = Arc::clone(&on_ended);
        let thread = thread::Builder::new()
            .name("solashen-output".into())
            .spawn(move || run_output_thread(thread_mixer, thread_on_ended, control_rx, ready_tx))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| SolashenError::AudioDevice("Output thread exited during setup".into()))??;

        Ok(Self {
            mixer,
            control_tx,
            sample_rate,
            converter: RateConverter::new(sample_rate),
            on_ended,
            thread: Some(thread),
        })
    }

    /// Get the sample rate of the output device
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl PlaybackSink for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().frames_played as f64 / self.sample_rate as f64
    }

    fn is_running(&self) -> bool {
        self.mixer.lock().running
    }

    fn resume(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.control_tx
            .send(Control::Play(reply_tx))
            .map_err(|e| SolashenError::AudioActivation(format!("Output thread gone: {}", e)))?;
        reply_rx
            .recv()
            .map_err(|e| SolashenError::AudioActivation(format!("Output thread gone: {}", e)))?
    }

    fn start_segment(&mut self, id: SegmentId, segment: &AudioSegment, at: f64) {
        let samples = match self.converter.convert(segment) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Skipping segment {:?}: {}", id, e);
                (self.on_ended)(id);
                return;
            }
        };

        let start_frame = (at * self.sample_rate as f64).round() as u64;
        self.mixer.lock().voices.push(Voice {
            id: Some(id),
            samples,
            start_frame,
            position: 0,
        });
    }

    fn stop_segment(&mut self, id: SegmentId) {
        self.mixer.lock().voices.retain(|voice| voice.id != Some(id));
    }

    fn play_now(&mut self, segment: &AudioSegment) {
        match self.converter.convert(segment) {
            Ok(samples) => {
                let mut mixer = self.mixer.lock();
                let start_frame = mixer.frames_played;
                mixer.voices.push(Voice {
                    id: None,
                    samples,
                    start_frame,
                    position: 0,
                });
            }
            Err(e) => warn!("Skipping cue: {}", e),
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_output_thread(
    mixer: Arc<Mutex<Mixer>>,
    on_ended: SegmentEndedCallback,
    control_rx: Receiver<Control>,
    ready_tx: Sender<Result<u32>>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(SolashenError::AudioDevice(
            "No output device available".into(),
        )));
        return;
    };

    info!("Using output device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

    let config: StreamConfig = match device.default_output_config() {
        Ok(config) => config.into(),
        Err(e) => {
            let _ = ready_tx.send(Err(SolashenError::AudioDevice(format!(
                "Failed to get output config: {}",
                e
            ))));
            return;
        }
    };

    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    let callback_mixer = Arc::clone(&mixer);

    let err_fn = |err| {
        error!("Audio output stream error: {}", err);
    };

    let stream = match device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let finished = callback_mixer.lock().render(data, channels);
            for id in finished {
                on_ended(id);
            }
        },
        err_fn,
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(SolashenError::AudioDevice(format!(
                "Failed to build output stream: {}",
                e
            ))));
            return;
        }
    };

    // Some hosts start streams on creation; the clock must begin suspended
    let _ = stream.pause();
    let _ = ready_tx.send(Ok(sample_rate));
    debug!("Output stream ready: {} Hz, {} channels", sample_rate, channels);

    while let Ok(control) = control_rx.recv() {
        match control {
            Control::Play(reply) => {
                let result = stream.play().map_err(|e| {
                    SolashenError::AudioActivation(format!("Failed to start output stream: {}", e))
                });
                if result.is_ok() {
                    mixer.lock().running = true;
                    info!("Output clock running");
                }
                let _ = reply.send(result);
            }
            Control::Shutdown => break,
        }
    }

    drop(stream);
    info!("Stopped audio output");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: u64, samples: Vec<f32>, start_frame: u64) -> Voice {
        Voice {
            id: Some(SegmentId(id)),
            samples,
            start_frame,
            position: 0,
        }
    }

    #[test]
    fn test_suspended_mixer_outputs_silence_and_holds_clock() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(0, vec![0.5; 4], 0));
        let mut data = vec![1.0; 8];
        assert!(mixer.render(&mut data, 2).is_empty());
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(mixer.frames_played, 0);
    }

    #[test]
    fn test_voices_start_on_their_frame_and_report_end() {
        let mut mixer = Mixer {
            running: true,
            ..Default::default()
        };
        mixer.voices.push(voice(0, vec![0.25, 0.25], 0));
        mixer.voices.push(voice(1, vec![0.5, 0.5], 2));

        let mut data = vec![0.0; 4];
        let finished = mixer.render(&mut data, 1);
        assert_eq!(data, vec![0.25, 0.25, 0.5, 0.5]);
        assert_eq!(finished, vec![SegmentId(0), SegmentId(1)]);
        assert_eq!(mixer.frames_played, 4);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_back_to_back_segments_fill_contiguous_frames() {
        let mut converter = RateConverter::new(48000);
        let segment = AudioSegment::mono(vec![0.5; 2400], 24000);
        let mut mixer = Mixer {
            running: true,
            ..Default::default()
        };

        for (id, at) in [0.0f64, 0.1].into_iter().enumerate() {
            let samples = converter.convert(&segment).unwrap();
            assert_eq!(samples.len(), 4800);
            mixer
                .voices
                .push(voice(id as u64, samples, (at * 48000.0).round() as u64));
        }

        let mut data = vec![0.0; 9600];
        let finished = mixer.render(&mut data, 1);
        assert_eq!(finished, vec![SegmentId(0), SegmentId(1)]);
        assert!(mixer.voices.is_empty());
        assert!((data[2400] - 0.5).abs() < 0.02);
        assert!((data[7200] - 0.5).abs() < 0.02);
        // No silent run where one segment hands over to the next
        assert!(data[4700..4900].iter().all(|&s| s > 0.1));
    }

    #[test]
    fn test_device_rate_segments_pass_through() {
        let mut converter = RateConverter::new(24000);
        let segment = AudioSegment::mono(vec![0.25; 10], 24000);
        assert_eq!(converter.convert(&segment).unwrap(), vec![0.25; 10]);
        assert!(converter.resamplers.is_empty());
    }

    #[test]
    fn test_partial_voice_carries_over() {
        let mut mixer = Mixer {
            running: true,
            ..Default::default()
        };
        mixer.voices.push(voice(3, vec![0.1; 6], 0));

        let mut data = vec![0.0; 8];
        assert!(mixer.render(&mut data, 2).is_empty());
        assert_eq!(mixer.voices[0].position, 4);

        let finished = mixer.render(&mut data, 2);
        assert_eq!(finished, vec![SegmentId(3)]);
        assert_eq!(&data[..4], &[0.1, 0.1, 0.1, 0.1]);
        assert_eq!(&data[4..], &[0.0, 0.0, 0.0, 0.0]);
    }
}
