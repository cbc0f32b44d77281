//! Start/stop/error state machine for the voice session
//!
//! The manager is synchronous and owns every piece of mutable session
//! state. Asynchronous work (opening the microphone, connecting) happens
//! outside it; results come back through `complete_start` tagged with the
//! epoch they were issued under, so a completion that outlives a `stop()`
//! cannot bring the session back.

use crate::audio::capture::CaptureHandle;
use crate::audio::codec::{decode_assistant_audio, encode_to_wire_format};
use crate::audio::cues::{Cue, CueBank};
use crate::audio::scheduler::{PlaybackScheduler, PlaybackSink, SegmentId};
use crate::messages::{ChatMessage, Speaker, TranscriptAssembler};
use crate::session::events::{RemoteEvent, ServerEvent, StartRequest, StartedSession};
use crate::session::state::SessionState;
use crate::transport::RemoteSession;
use crate::{Result, SolashenError};
use tracing::{debug, error, info, warn};

pub struct SessionManager<S: PlaybackSink> {
    state: SessionState,
    epoch: u64,
    capture: Option<Box<dyn CaptureHandle>>,
    remote: Option<Box<dyn RemoteSession>>,
    /// Remote traffic that arrived before the start completed
    pending_remote: Vec<RemoteEvent>,
    scheduler: PlaybackScheduler<S>,
    transcript: TranscriptAssembler,
    cues: CueBank,
}

impl<S: PlaybackSink> SessionManager<S> {
    pub fn new(sink: S, cues: CueBank) -> Self {
        Self {
            state: SessionState::Idle,
            epoch: 0,
            capture: None,
            remote: None,
            pending_remote: Vec::new(),
            scheduler: PlaybackScheduler::new(sink),
            transcript: TranscriptAssembler::new(),
            cues,
        }
    }

    /// Begin a session. Returns the work the caller must perform
    /// asynchronously, or `None` when the start is a no-op or failed.
    pub fn start(&mut self) -> Option<StartRequest> {
        if self.state != SessionState::Idle {
            debug!("Ignoring start while {}", self.state);
            return None;
        }

        if let Err(e) = self.scheduler.ensure_running() {
            let e = match e {
                SolashenError::AudioActivation(_) => e,
                other => SolashenError::AudioActivation(other.to_string()),
            };
            error!("Failed to resume output clock: {}", e);
            self.state = SessionState::Error(e);
            return None;
        }

        self.epoch += 1;
        self.state = SessionState::Starting;
        info!("Starting session (epoch {})", self.epoch);
        Some(StartRequest { epoch: self.epoch })
    }

    /// Apply the outcome of an asynchronous start
    pub fn complete_start(&mut self, epoch: u64, result: Result<StartedSession>) {
        if epoch != self.epoch || self.state != SessionState::Starting {
            debug!(
                "Discarding start completion for epoch {} (current {}, {})",
                epoch, self.epoch, self.state
            );
            if let Ok(mut started) = result {
                started.remote.close();
                started.capture.release();
            }
            return;
        }

        match result {
            Ok(started) => {
                self.capture = Some(started.capture);
                self.remote = Some(started.remote);
                self.state = SessionState::Active;
                info!("Session active (epoch {})", epoch);

                for event in std::mem::take(&mut self.pending_remote) {
                    self.handle_remote(epoch, event);
                }
            }
            Err(e) => {
                self.pending_remote.clear();
                let e = e.classify_startup();
                warn!("Session start failed: {}", e);
                self.state = match e {
                    SolashenError::DeviceAbsent(_) => SessionState::NoDeviceFound,
                    SolashenError::PermissionDenied(_) => SessionState::PermissionBlocked,
                    other => SessionState::Error(other),
                };
            }
        }
    }

    /// Forward one microphone frame to the remote session
    pub fn handle_capture_frame(&mut self, epoch: u64, samples: &[f32]) {
        if epoch != self.epoch || self.state != SessionState::Active {
            return;
        }
        let Some(remote) = self.remote.as_mut() else {
            return;
        };
        if let Err(e) = remote.send_audio(encode_to_wire_format(samples)) {
            warn!("Failed to send audio frame: {}", e);
        }
    }

    /// React to one inbound message. The order of the steps matters:
    /// an interruption must flush playback before new audio is queued.
    pub fn handle_server_event(&mut self, event: &ServerEvent) {
        if event.interrupted {
            debug!("Assistant interrupted, flushing playback");
            self.scheduler.interrupt();
        }

        if let Some(text) = &event.input_transcript {
            self.transcript.append_fragment(Speaker::User, text);
        }

        if let Some(text) = &event.output_transcript {
            self.transcript.append_fragment(Speaker::Assistant, text);
        }

        if event.turn_complete {
            self.transcript.finalize_turn();
            for message in self.transcript.messages().iter().rev().take(2) {
                debug!("{:?}: {}", message.speaker, message.text);
            }
        }

        if let Some(data) = &event.audio {
            self.handle_audio_payload(data);
        }
    }

    fn handle_audio_payload(&mut self, data: &str) {
        // Malformed audio counts as absent
        let segment = match decode_assistant_audio(data) {
            Ok(segment) if !segment.is_empty() => segment,
            Ok(_) => return,
            Err(e) => {
                debug!("Ignoring undecodable audio payload: {}", e);
                return;
            }
        };

        if !self.scheduler.is_speaking() {
            self.play_cue(Cue::Alert);
        }

        if let Err(e) = self.scheduler.ensure_running() {
            warn!("Dropping assistant audio, output clock not running: {}", e);
            return;
        }

        self.scheduler.enqueue(&segment);
        self.scheduler.mark_speaking();
    }

    /// Remote traffic for the session opened under `epoch`
    pub fn handle_remote(&mut self, epoch: u64, event: RemoteEvent) {
        if epoch == self.epoch && self.state == SessionState::Starting {
            // The connection is live before its completion is delivered
            debug!("Holding remote event until the session is active");
            self.pending_remote.push(event);
            return;
        }
        if epoch != self.epoch || self.state != SessionState::Active {
            debug!("Ignoring remote event from epoch {}", epoch);
            return;
        }

        match event {
            RemoteEvent::Message(message) => self.handle_server_event(&message),
            RemoteEvent::Closed => {
                info!("Remote session closed");
                self.stop();
            }
            RemoteEvent::Error(detail) => {
                error!("Remote session failed: {}", detail);
                self.release_resources();
                self.epoch += 1;
                self.state = SessionState::Error(SolashenError::RemoteConnection(detail));
            }
        }
    }

    pub fn on_segment_ended(&mut self, id: SegmentId) {
        self.scheduler.on_segment_ended(id);
    }

    /// Play a sound effect right away, outside the speech queue
    pub fn play_cue(&mut self, cue: Cue) {
        debug!("Playing {:?} cue", cue);
        let segment = self.cues.get(cue);
        self.scheduler.play_cue(segment);
    }

    /// Tear the session down. Safe to call in any state, any number of
    /// times; terminal states keep their status.
    pub fn stop(&mut self) {
        let terminal = self.state.is_terminal();
        if !terminal && self.state != SessionState::Idle {
            self.state = SessionState::Stopping;
        }

        self.release_resources();
        self.epoch += 1;

        if !terminal {
            if self.state != SessionState::Idle {
                info!("Session stopped");
            }
            self.state = SessionState::Idle;
        }
    }

    /// The single start/stop control
    pub fn toggle(&mut self) -> Option<StartRequest> {
        if self.state.is_live() {
            self.stop();
            None
        } else {
            self.start()
        }
    }

    fn release_resources(&mut self) {
        self.pending_remote.clear();
        if let Some(mut remote) = self.remote.take() {
            remote.close();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
        self.scheduler.interrupt();
    }

    /// Block the control up front when the microphone is known to be
    /// unusable. Only applies while idle; other failures are left for
    /// `start` to report.
    pub fn mark_capture_unavailable(&mut self, error: SolashenError) {
        if self.state != SessionState::Idle {
            return;
        }
        match error {
            SolashenError::DeviceAbsent(_) => self.state = SessionState::NoDeviceFound,
            SolashenError::PermissionDenied(_) => self.state = SessionState::PermissionBlocked,
            other => {
                debug!("Microphone check inconclusive: {}", other);
                return;
            }
        }
        warn!("Microphone unavailable, session control disabled: {}", self.state);
    }

    /// Whether the start/stop control should be offered
    pub fn control_enabled(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_speaking(&self) -> bool {
        self.scheduler.is_speaking()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.transcript.messages()
    }

    pub fn transcript(&self) -> &TranscriptAssembler {
        &self.transcript
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<S> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut PlaybackScheduler<S> {
        &mut self.scheduler
    }
}

impl<S: PlaybackSink> Drop for SessionManager<S> {
    fn drop(&mut self) {
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::AudioPacket;
    use crate::audio::codec::AudioSegment;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct TestSink {
        running: bool,
        fail_resume: bool,
        cues: usize,
        started: Vec<f64>,
    }

    impl PlaybackSink for TestSink {
        fn current_time(&self) -> f64 {
            0.0
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn resume(&mut self) -> Result<()> {
            if self.fail_resume {
                return Err(SolashenError::AudioActivation("suspended".into()));
            }
            self.running = true;
            Ok(())
        }
        fn start_segment(&mut self, _id: SegmentId, _segment: &AudioSegment, at: f64) {
            self.started.push(at);
        }
        fn stop_segment(&mut self, _id: SegmentId) {}
        fn play_now(&mut self, _segment: &AudioSegment) {
            self.cues += 1;
        }
    }

    #[derive(Clone, Default)]
    struct Counters {
        released: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        sent: Arc<AtomicUsize>,
    }

    struct TestCapture(Counters);
    impl CaptureHandle for TestCapture {
        fn release(&mut self) {
            self.0.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestRemote(Counters);
    impl RemoteSession for TestRemote {
        fn send_audio(&mut self, _packet: AudioPacket) -> Result<()> {
            self.0.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&mut self) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn started(counters: &Counters) -> Result<StartedSession> {
        Ok(StartedSession {
            capture: Box::new(TestCapture(counters.clone())),
            remote: Box::new(TestRemote(counters.clone())),
        })
    }

    fn manager() -> SessionManager<TestSink> {
        SessionManager::new(TestSink::default(), CueBank::synthesized(24000))
    }

    fn audio_payload(samples: usize) -> String {
        STANDARD.encode(vec![0u8; samples * 2])
    }

    #[test]
    fn test_start_and_complete() {
        let mut m = manager();
        let counters = Counters::default();
        let request = m.start().unwrap();
        assert_eq!(m.state(), &SessionState::Starting);
        assert!(m.scheduler().sink().running);

        m.complete_start(request.epoch, started(&counters));
        assert_eq!(m.state(), &SessionState::Active);

        m.handle_capture_frame(request.epoch, &[0.0; 16]);
        assert_eq!(counters.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_is_noop_unless_idle() {
        let mut m = manager();
        let first = m.start().unwrap();
        assert!(m.start().is_none());
        assert_eq!(m.epoch(), first.epoch);
    }

    #[test]
    fn test_resume_failure_is_fatal() {
        let sink = TestSink {
            fail_resume: true,
            ..Default::default()
        };
        let mut m = SessionManager::new(sink, CueBank::synthesized(24000));
        assert!(m.start().is_none());
        assert!(matches!(
            m.state(),
            SessionState::Error(SolashenError::AudioActivation(_))
        ));
        assert!(!m.control_enabled());
    }

    #[test]
    fn test_start_failures_are_classified() {
        let cases = vec![
            (SolashenError::DeviceAbsent("none".into()), SessionState::NoDeviceFound),
            (SolashenError::PermissionDenied("no".into()), SessionState::PermissionBlocked),
            (
                SolashenError::UnclassifiedStartup("API key not valid".into()),
                SessionState::Error(SolashenError::ApiCredential("API key not valid".into())),
            ),
            (
                SolashenError::UnclassifiedStartup("boom".into()),
                SessionState::Error(SolashenError::UnclassifiedStartup("boom".into())),
            ),
        ];

        for (error, expected) in cases {
            let mut m = manager();
            let request = m.start().unwrap();
            m.complete_start(request.epoch, Err(error));
            assert_eq!(m.state(), &expected);
            assert!(!m.control_enabled());
            // Blocked states ignore the control
            assert!(m.toggle().is_none());
            assert_eq!(m.state(), &expected);
        }
    }

    #[test]
    fn test_stale_completion_is_released() {
        let mut m = manager();
        let counters = Counters::default();
        let request = m.start().unwrap();
        m.stop();
        m.complete_start(request.epoch, started(&counters));

        assert_eq!(m.state(), &SessionState::Idle);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_twice_matches_stop_once() {
        let mut m = manager();
        let counters = Counters::default();
        let request = m.start().unwrap();
        m.complete_start(request.epoch, started(&counters));

        m.stop();
        let epoch = m.epoch();
        assert_eq!(m.state(), &SessionState::Idle);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        m.stop();
        assert_eq!(m.state(), &SessionState::Idle);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(m.epoch() > epoch);
        assert!(m.control_enabled());
    }

    #[test]
    fn test_audio_plays_alert_once_and_queues() {
        let mut m = manager();
        let request = m.start().unwrap();
        m.complete_start(request.epoch, started(&Counters::default()));

        let event = ServerEvent {
            audio: Some(audio_payload(2400)),
            ..Default::default()
        };
        m.handle_remote(request.epoch, RemoteEvent::Message(event.clone()));
        m.handle_remote(request.epoch, RemoteEvent::Message(event));

        assert!(m.is_speaking());
        assert_eq!(m.scheduler().sink().cues, 1);
        assert_eq!(m.scheduler().sink().started, vec![0.0, 0.1]);
    }

    #[test]
    fn test_malformed_audio_is_ignored() {
        let mut m = manager();
        let event = ServerEvent {
            audio: Some("***".into()),
            output_transcript: Some("Hi".into()),
            ..Default::default()
        };
        m.handle_server_event(&event);
        assert!(!m.is_speaking());
        assert_eq!(m.scheduler().sink().cues, 0);
        assert_eq!(m.messages().len(), 1);
    }

    #[test]
    fn test_interrupt_runs_before_audio() {
        let mut m = manager();
        m.handle_server_event(&ServerEvent {
            audio: Some(audio_payload(2400)),
            ..Default::default()
        });
        m.handle_server_event(&ServerEvent {
            interrupted: true,
            audio: Some(audio_payload(2400)),
            ..Default::default()
        });

        // The flushed queue restarts at the clock, and the new speech cues again
        assert_eq!(m.scheduler().active_count(), 1);
        assert_eq!(m.scheduler().sink().started, vec![0.0, 0.0]);
        assert_eq!(m.scheduler().sink().cues, 2);
    }

    #[test]
    fn test_turn_complete_after_fragments_in_same_message() {
        let mut m = manager();
        m.handle_server_event(&ServerEvent {
            input_transcript: Some("Hel".into()),
            ..Default::default()
        });
        m.handle_server_event(&ServerEvent {
            input_transcript: Some("lo".into()),
            turn_complete: true,
            ..Default::default()
        });

        let messages = m.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].speaker, Speaker::User);
        assert_eq!(messages[0].text, "Hello");
        assert!(messages[0].is_final);
    }

    #[test]
    fn test_remote_close_and_error() {
        let mut m = manager();
        let counters = Counters::default();
        let request = m.start().unwrap();
        m.complete_start(request.epoch, started(&counters));
        m.handle_remote(request.epoch, RemoteEvent::Closed);
        assert_eq!(m.state(), &SessionState::Idle);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        let request = m.start().unwrap();
        m.complete_start(request.epoch, started(&counters));
        m.handle_remote(request.epoch, RemoteEvent::Error("socket reset".into()));
        assert_eq!(
            m.state(),
            &SessionState::Error(SolashenError::RemoteConnection("socket reset".into()))
        );
        assert_eq!(counters.released.load(Ordering::SeqCst), 2);

        // Stop from a terminal state keeps it
        m.stop();
        assert!(matches!(m.state(), SessionState::Error(_)));
    }

    #[test]
    fn test_stale_remote_events_are_ignored() {
        let mut m = manager();
        let request = m.start().unwrap();
        m.complete_start(request.epoch, started(&Counters::default()));
        m.stop();

        m.handle_remote(
            request.epoch,
            RemoteEvent::Message(ServerEvent {
                output_transcript: Some("late".into()),
                ..Default::default()
            }),
        );
        m.handle_remote(request.epoch, RemoteEvent::Error("late".into()));
        assert!(m.messages().is_empty());
        assert_eq!(m.state(), &SessionState::Idle);
    }

    #[test]
    fn test_remote_traffic_before_completion_is_replayed() {
        let mut m = manager();
        let counters = Counters::default();
        let request = m.start().unwrap();

        m.handle_remote(
            request.epoch,
            RemoteEvent::Message(ServerEvent {
                output_transcript: Some("Hi".into()),
                ..Default::default()
            }),
        );
        m.handle_remote(request.epoch, RemoteEvent::Error("socket reset".into()));
        assert_eq!(m.state(), &SessionState::Starting);

        m.complete_start(request.epoch, started(&counters));
        assert_eq!(
            m.state(),
            &SessionState::Error(SolashenError::RemoteConnection("socket reset".into()))
        );
        assert_eq!(m.messages().len(), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_held_remote_traffic_is_dropped_on_stop() {
        let mut m = manager();
        let request = m.start().unwrap();
        m.handle_remote(request.epoch, RemoteEvent::Closed);
        m.stop();

        let request = m.start().unwrap();
        m.complete_start(request.epoch, started(&Counters::default()));
        assert_eq!(m.state(), &SessionState::Active);
    }

    #[test]
    fn test_missing_microphone_at_launch_disables_control() {
        let mut m = manager();
        m.mark_capture_unavailable(SolashenError::DeviceAbsent("no input".into()));
        assert_eq!(m.state(), &SessionState::NoDeviceFound);
        assert!(!m.control_enabled());
        assert!(m.toggle().is_none());

        let mut m = manager();
        m.mark_capture_unavailable(SolashenError::PermissionDenied("denied".into()));
        assert_eq!(m.state(), &SessionState::PermissionBlocked);

        // Inconclusive checks leave the control alone
        let mut m = manager();
        m.mark_capture_unavailable(SolashenError::UnclassifiedStartup("busy".into()));
        assert_eq!(m.state(), &SessionState::Idle);

        // A running session is not affected
        let mut m = manager();
        m.start().unwrap();
        m.mark_capture_unavailable(SolashenError::DeviceAbsent("no input".into()));
        assert_eq!(m.state(), &SessionState::Starting);
    }

    #[test]
    fn test_toggle_cycles() {
        let mut m = manager();
        let request = m.toggle().unwrap();
        assert_eq!(m.state(), &SessionState::Starting);
        assert!(m.toggle().is_none());
        assert_eq!(m.state(), &SessionState::Idle);
        m.complete_start(request.epoch, started(&Counters::default()));
        assert_eq!(m.state(), &SessionState::Idle);
    }
}
