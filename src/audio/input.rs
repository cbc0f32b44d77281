use crate::audio::capture::{downmix, CaptureHandle, CaptureSource, FrameAssembler, CAPTURE_FRAME_SIZE};
use crate::session::events::{CommandSender, SessionCommand};
use crate::{Result, SolashenError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Default microphone, converted to 16 kHz mono frames
#[derive(Debug, Clone)]
pub struct CpalCapture {
    frame_size: usize,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self {
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }

    pub fn with_frame_size(frame_size: usize) -> Self {
        Self { frame_size }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for CpalCapture {
    fn acquire(&self, epoch: u64, commands: CommandSender) -> Result<Box<dyn CaptureHandle>> {
        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);
        let frame_size = self.frame_size;

        let thread = thread::Builder::new()
            .name("solashen-capture".into())
            .spawn(move || run_capture_thread(epoch, frame_size, commands, ready_tx, stop_rx))?;

        let rate = ready_rx.recv().map_err(|_| {
            SolashenError::UnclassifiedStartup("Capture thread exited during setup".into())
        })??;

        info!("Capturing microphone at {} Hz (epoch {})", rate, epoch);

        Ok(Box::new(CpalCaptureHandle {
            stop_tx,
            thread: Some(thread),
        }))
    }

    fn check_available(&self) -> Result<()> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            SolashenError::DeviceAbsent("No input device available".into())
        })?;

        device.default_input_config().map_err(|e| {
            let missing = matches!(e, cpal::DefaultStreamConfigError::DeviceNotAvailable);
            classify_device_error(format!("Failed to get input config: {}", e), missing)
        })?;
        Ok(())
    }
}

pub struct CpalCaptureHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureHandle {
    fn release(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop_tx.try_send(());
            let _ = thread.join();
        }
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Map device failures onto the startup error taxonomy
fn classify_device_error(message: String, device_missing: bool) -> SolashenError {
    let lower = message.to_lowercase();
    if device_missing {
        SolashenError::DeviceAbsent(message)
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        SolashenError::PermissionDenied(message)
    } else {
        SolashenError::UnclassifiedStartup(message)
    }
}

fn run_capture_thread(
    epoch: u64,
    frame_size: usize,
    commands: CommandSender,
    ready_tx: Sender<Result<u32>>,
    stop_rx: Receiver<()>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(SolashenError::DeviceAbsent(
            "No input device available".into(),
        )));
        return;
    };

    info!("Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let missing = matches!(e, cpal::DefaultStreamConfigError::DeviceNotAvailable);
            let _ = ready_tx.send(Err(classify_device_error(
                format!("Failed to get input config: {}", e),
                missing,
            )));
            return;
        }
    };

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;

    let mut assembler = match FrameAssembler::new(rate, frame_size) {
        Ok(assembler) => assembler,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let (sample_tx, sample_rx) = unbounded::<Vec<f32>>();
    let err_fn = |err| {
        error!("Audio input stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = sample_tx.try_send(downmix(data, channels));
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let _ = sample_tx.try_send(downmix(&converted, channels));
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(SolashenError::UnclassifiedStartup(format!(
                "Unsupported sample format: {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let missing = matches!(e, cpal::BuildStreamError::DeviceNotAvailable);
            let _ = ready_tx.send(Err(classify_device_error(
                format!("Failed to build input stream: {}", e),
                missing,
            )));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let missing = matches!(e, cpal::PlayStreamError::DeviceNotAvailable);
        let _ = ready_tx.send(Err(classify_device_error(
            format!("Failed to start input stream: {}", e),
            missing,
        )));
        return;
    }

    let _ = ready_tx.send(Ok(rate));

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(sample_rx) -> msg => {
                let Ok(samples) = msg else { break };
                let frames = match assembler.push(&samples) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("Dropping capture block: {}", e);
                        continue;
                    }
                };
                for samples in frames {
                    if commands.send(SessionCommand::CaptureFrame { epoch, samples }).is_err() {
                        debug!("Session driver gone, stopping capture");
                        drop(stream);
                        return;
                    }
                }
            }
        }
    }

    drop(stream);
    info!("Released microphone (epoch {})", epoch);
}
