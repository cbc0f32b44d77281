//! Messages flowing into the session driver

use crate::audio::capture::CaptureHandle;
use crate::audio::cues::Cue;
use crate::audio::scheduler::SegmentId;
use crate::transport::RemoteSession;
use crate::Result;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// One inbound remote message reduced to the features the session reacts to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerEvent {
    /// The assistant was cut off by the user
    pub interrupted: bool,
    /// Fragment of the user's speech transcript
    pub input_transcript: Option<String>,
    /// Fragment of the assistant's speech transcript
    pub output_transcript: Option<String>,
    /// The current turn is over
    pub turn_complete: bool,
    /// Base64 PCM16, 24 kHz mono
    pub audio: Option<String>,
}

impl ServerEvent {
    pub fn is_empty(&self) -> bool {
        !self.interrupted
            && self.input_transcript.is_none()
            && self.output_transcript.is_none()
            && !self.turn_complete
            && self.audio.is_none()
    }
}

/// Lifecycle notifications from a remote session
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Message(ServerEvent),
    Closed,
    Error(String),
}

/// Resources produced by a successful start
pub struct StartedSession {
    pub capture: Box<dyn CaptureHandle>,
    pub remote: Box<dyn RemoteSession>,
}

impl std::fmt::Debug for StartedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartedSession").finish_non_exhaustive()
    }
}

/// Issued by the manager when a start needs devices and a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub epoch: u64,
}

/// Everything the session driver reacts to
#[derive(Debug)]
pub enum SessionCommand {
    /// The single start/stop control
    Toggle,

    Start,

    Stop,

    /// Asynchronous start finished
    StartCompleted {
        epoch: u64,
        result: Result<StartedSession>,
    },

    /// One chunk of 16 kHz mono microphone audio
    CaptureFrame { epoch: u64, samples: Vec<f32> },

    /// Something happened on the remote session
    Remote { epoch: u64, event: RemoteEvent },

    /// A scheduled segment finished playing
    SegmentEnded(SegmentId),

    /// Play a sound effect
    PlayCue(Cue),

    /// Stop everything and exit the driver loop
    Shutdown,
}

pub type CommandSender = UnboundedSender<SessionCommand>;
pub type CommandReceiver = UnboundedReceiver<SessionCommand>;

/// Create the driver's command channel
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    unbounded_channel()
}
