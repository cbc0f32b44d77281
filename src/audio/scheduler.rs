//! Gap-free sequential playback of decoded segments against one output clock
//!
//! Ordering comes from the `next_start_time` cursor, not from container
//! order: each enqueued segment starts exactly where the previous one ends,
//! or at the current clock time if playback has fallen idle.

use crate::audio::codec::AudioSegment;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifier of a scheduled segment, unique for the scheduler's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

/// Invoked by a sink when a scheduled segment has played to its end
pub type SegmentEndedCallback = Arc<dyn Fn(SegmentId) + Send + Sync>;

/// Output device seam: a single clock plus a destination for segments
pub trait PlaybackSink: Send {
    /// Current output clock time in seconds
    fn current_time(&self) -> f64;

    /// Whether the clock is advancing (not suspended)
    fn is_running(&self) -> bool;

    /// Resume a suspended clock
    fn resume(&mut self) -> Result<()>;

    /// Schedule `segment` to start at clock time `at`
    fn start_segment(&mut self, id: SegmentId, segment: &AudioSegment, at: f64);

    /// Stop a segment immediately, whatever its playback position
    fn stop_segment(&mut self, id: SegmentId);

    /// Play a segment right away without tracking it
    fn play_now(&mut self, segment: &AudioSegment);
}

/// Where a segment landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start_at: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler<S: PlaybackSink> {
    sink: S,
    next_start_time: f64,
    active: HashSet<SegmentId>,
    next_id: u64,
    speaking: bool,
}

impl<S: PlaybackSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start_time: 0.0,
            active: HashSet::new(),
            next_id: 0,
            speaking: false,
        }
    }

    /// Schedule a segment back-to-back with everything already queued
    pub fn enqueue(&mut self, segment: &AudioSegment) -> ScheduledSegment {
        let now = self.sink.current_time();
        self.next_start_time = self.next_start_time.max(now);

        let id = SegmentId(self.next_id);
        self.next_id += 1;

        let start_at = self.next_start_time;
        let duration = segment.duration();
        self.sink.start_segment(id, segment, start_at);
        self.next_start_time += duration;
        self.active.insert(id);

        debug!(
            "Scheduled segment {:?} at {:.3}s for {:.3}s ({} active)",
            id,
            start_at,
            duration,
            self.active.len()
        );

        ScheduledSegment {
            id,
            start_at,
            duration,
        }
    }

    /// Forget a segment that finished playing
    pub fn on_segment_ended(&mut self, id: SegmentId) {
        if self.active.remove(&id) && self.active.is_empty() {
            self.speaking = false;
            debug!("Playback queue drained");
        }
    }

    /// Cut off everything that is playing or queued
    pub fn interrupt(&mut self) {
        for id in self.active.drain() {
            self.sink.stop_segment(id);
        }
        self.next_start_time = 0.0;
        self.speaking = false;
    }

    /// Resume the output clock if it is suspended
    pub fn ensure_running(&mut self) -> Result<()> {
        if !self.sink.is_running() {
            self.sink.resume()?;
        }
        Ok(())
    }

    /// Play a cue immediately, outside the speech queue
    pub fn play_cue(&mut self, segment: &AudioSegment) {
        if let Err(e) = self.ensure_running() {
            warn!("Dropping cue, output clock could not be resumed: {}", e);
            return;
        }
        self.sink.play_now(segment);
    }

    pub fn mark_speaking(&mut self) {
        self.speaking = true;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
