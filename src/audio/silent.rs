//! Wall-clock playback sink for running without an output device

use crate::audio::codec::AudioSegment;
use crate::audio::scheduler::{PlaybackSink, SegmentEndedCallback, SegmentId};
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

enum Timer {
    Schedule { id: SegmentId, deadline: Instant },
    Cancel(SegmentId),
    Shutdown,
}

/// Discards audio but keeps honest time, reporting each segment as ended
/// when it would have finished playing
pub struct SilentOutput {
    resumed_at: Option<Instant>,
    timer_tx: Sender<Timer>,
    thread: Option<JoinHandle<()>>,
}

impl SilentOutput {
    /// Create a suspended sink
    pub fn new(on_ended: SegmentEndedCallback) -> Self {
        let (timer_tx, timer_rx) = unbounded();
        let thread = thread::Builder::new()
            .name("solashen-silent-clock".into())
            .spawn(move || run_timer_thread(timer_rx, on_ended))
            .map_err(|e| error!("Failed to start silent output clock: {}", e))
            .ok();

        Self {
            resumed_at: None,
            timer_tx,
            thread,
        }
    }
}

/// Single timer for every pending segment. Cancelling a segment that
/// already fired is a no-op.
fn run_timer_thread(timer_rx: Receiver<Timer>, on_ended: SegmentEndedCallback) {
    let mut pending: Vec<(Instant, SegmentId)> = Vec::new();

    loop {
        let next = pending.iter().map(|(deadline, _)| *deadline).min();
        let received = match next {
            Some(deadline) => timer_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => timer_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Timer::Schedule { id, deadline }) => pending.push((deadline, id)),
            Ok(Timer::Cancel(id)) => pending.retain(|(_, pending_id)| *pending_id != id),
            Ok(Timer::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let mut due: Vec<(Instant, SegmentId)> = Vec::new();
        pending.retain(|&(deadline, id)| {
            if deadline <= now {
                due.push((deadline, id));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, id) in due {
            on_ended(id);
        }
    }

    debug!("Silent output clock stopped");
}

impl PlaybackSink for SilentOutput {
    fn current_time(&self) -> f64 {
        self.resumed_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn is_running(&self) -> bool {
        self.resumed_at.is_some()
    }

    fn resume(&mut self) -> Result<()> {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn start_segment(&mut self, id: SegmentId, segment: &AudioSegment, at: f64) {
        let end = at + segment.duration();
        let delay = Duration::from_secs_f64((end - self.current_time()).max(0.0));
        let _ = self.timer_tx.send(Timer::Schedule {
            id,
            deadline: Instant::now() + delay,
        });
    }

    fn stop_segment(&mut self, id: SegmentId) {
        let _ = self.timer_tx.send(Timer::Cancel(id));
    }

    fn play_now(&mut self, segment: &AudioSegment) {
        debug!("Silent output skipping {:.3}s cue", segment.duration());
    }
}

impl Drop for SilentOutput {
    fn drop(&mut self) {
        let _ = self.timer_tx.send(Timer::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
