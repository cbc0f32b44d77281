pub mod capture;
pub mod codec;
pub mod cues;
#[cfg(feature = "audio-io")]
pub mod input;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod resampler;
pub mod scheduler;
pub mod silent;

pub use capture::{CaptureHandle, CaptureSource, FrameAssembler};
pub use codec::{
    decode_assistant_audio, decode_from_wire_format, encode_to_wire_format,
    pcm16_to_audio_buffer, AudioPacket, AudioSegment,
};
pub use cues::{Cue, CueBank};
#[cfg(feature = "audio-io")]
pub use input::CpalCapture;
#[cfg(feature = "audio-io")]
pub use output::CpalOutput;
pub use resampler::AudioResampler;
pub use scheduler::{PlaybackScheduler, PlaybackSink, ScheduledSegment, SegmentEndedCallback, SegmentId};
pub use silent::SilentOutput;
