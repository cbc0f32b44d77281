//! Single task that owns the session manager
//!
//! Device threads, transport tasks and the market poller never touch the
//! manager directly; they post `SessionCommand`s and the driver applies them
//! one at a time.

use crate::audio::capture::CaptureSource;
use crate::audio::scheduler::{PlaybackSink, SegmentEndedCallback};
use crate::session::events::{
    CommandReceiver, CommandSender, SessionCommand, StartRequest, StartedSession,
};
use crate::session::manager::SessionManager;
use crate::session::state::SessionState;
use crate::transport::RealtimeConnector;
use crate::{Result, SolashenError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default bound on connecting plus the setup handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SessionDriver<S: PlaybackSink> {
    manager: SessionManager<S>,
    capture: Arc<dyn CaptureSource>,
    connector: Arc<dyn RealtimeConnector>,
    commands_tx: CommandSender,
    commands_rx: CommandReceiver,
    state_tx: watch::Sender<SessionState>,
    connect_timeout: Duration,
}

impl<S: PlaybackSink> SessionDriver<S> {
    pub fn new(
        manager: SessionManager<S>,
        capture: Arc<dyn CaptureSource>,
        connector: Arc<dyn RealtimeConnector>,
        channel: (CommandSender, CommandReceiver),
    ) -> Self {
        let (commands_tx, commands_rx) = channel;
        let (state_tx, _) = watch::channel(manager.state().clone());
        Self {
            manager,
            capture,
            connector,
            commands_tx,
            commands_rx,
            state_tx,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sender for posting commands to this driver
    pub fn command_sender(&self) -> CommandSender {
        self.commands_tx.clone()
    }

    /// Watch the session state as it changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Process commands until `Shutdown`, then hand back the manager
    pub async fn run(mut self) -> SessionManager<S> {
        info!("Session driver running");

        self.check_capture().await;
        self.publish_state();

        while let Some(command) = self.commands_rx.recv().await {
            if !self.apply(command) {
                break;
            }
            self.publish_state();
        }

        info!("Session driver stopped");
        self.manager
    }

    /// Look for a microphone once, before the control is first used
    async fn check_capture(&mut self) {
        let capture = Arc::clone(&self.capture);
        match tokio::task::spawn_blocking(move || capture.check_available()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.manager.mark_capture_unavailable(e),
            Err(e) => warn!("Microphone check did not finish: {}", e),
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_if_modified(|state| {
            if state != self.manager.state() {
                *state = self.manager.state().clone();
                true
            } else {
                false
            }
        });
    }

    /// Apply one command; returns false when the loop should end
    fn apply(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Toggle => {
                if let Some(request) = self.manager.toggle() {
                    self.spawn_start(request);
                }
            }
            SessionCommand::Start => {
                if let Some(request) = self.manager.start() {
                    self.spawn_start(request);
                }
            }
            SessionCommand::Stop => self.manager.stop(),
            SessionCommand::StartCompleted { epoch, result } => {
                self.manager.complete_start(epoch, result)
            }
            SessionCommand::CaptureFrame { epoch, samples } => {
                self.manager.handle_capture_frame(epoch, &samples)
            }
            SessionCommand::Remote { epoch, event } => self.manager.handle_remote(epoch, event),
            SessionCommand::SegmentEnded(id) => self.manager.on_segment_ended(id),
            SessionCommand::PlayCue(cue) => self.manager.play_cue(cue),
            SessionCommand::Shutdown => {
                self.manager.stop();
                let _ = self.state_tx.send(self.manager.state().clone());
                return false;
            }
        }
        true
    }

    fn spawn_start(&self, request: StartRequest) {
        let capture = Arc::clone(&self.capture);
        let connector = Arc::clone(&self.connector);
        let commands = self.commands_tx.clone();
        let timeout = self.connect_timeout;

        tokio::spawn(async move {
            let epoch = request.epoch;
            let result = open_session(epoch, capture, connector, commands.clone(), timeout).await;
            if commands
                .send(SessionCommand::StartCompleted { epoch, result })
                .is_err()
            {
                debug!("Driver gone before start completed (epoch {})", epoch);
            }
        });
    }
}

/// Open the microphone, then connect. A failed connect frees the microphone.
async fn open_session(
    epoch: u64,
    capture: Arc<dyn CaptureSource>,
    connector: Arc<dyn RealtimeConnector>,
    commands: CommandSender,
    timeout: Duration,
) -> Result<StartedSession> {
    let frames = commands.clone();
    let mut capture = tokio::task::spawn_blocking(move || capture.acquire(epoch, frames))
        .await
        .map_err(|e| SolashenError::UnclassifiedStartup(format!("Capture task failed: {}", e)))??;

    let remote = match tokio::time::timeout(timeout, connector.connect(epoch, commands)).await {
        Ok(Ok(remote)) => remote,
        Ok(Err(e)) => {
            warn!("Connect failed, releasing microphone: {}", e);
            capture.release();
            return Err(e);
        }
        Err(_) => {
            warn!("Connect timed out after {:?}, releasing microphone", timeout);
            capture.release();
            return Err(SolashenError::RemoteConnection(format!(
                "Timed out connecting after {}s",
                timeout.as_secs()
            )));
        }
    };

    Ok(StartedSession { capture, remote })
}

/// Callback for playback sinks that reports finished segments to the driver
pub fn segment_ended_callback(commands: &CommandSender) -> SegmentEndedCallback {
    let commands = commands.clone();
    Arc::new(move |id| {
        let _ = commands.send(SessionCommand::SegmentEnded(id));
    })
}
