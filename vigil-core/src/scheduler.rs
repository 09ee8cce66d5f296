//! Render scheduling
//!
//! Decides when each decoded frame is displayed. Frames wait in a tiny
//! timestamp-ordered buffer while a virtual playback clock advances; the
//! scheduler renders a frame the moment the clock passes its timestamp,
//! jumping the clock forward when the buffer overfills (shedding latency)
//! and rolling it back when frames arrive late (absorbing jitter).
//!
//! The scheduler is a pure state machine: every entry point returns a
//! `ScheduleDecision` and the pipeline executes it. Delayed-paint timers are
//! armed by the pipeline and identified by a generation counter; a timer is
//! never cancelled, only ignored when its captured generation has been
//! superseded.

use std::sync::Arc;

use crate::clock::MediaClock;
use crate::frame::VideoFrame;

/// What the pipeline should do next with the oldest pending frame.
#[derive(Debug)]
pub enum ScheduleDecision {
    /// Nothing due; no timer wanted.
    Idle,
    /// Paint this frame right now.
    RenderNow(VideoFrame),
    /// Arm a one-shot timer; deliver it back with the captured generation.
    WaitUntilDue { delay_ms: i64, generation: u64 },
}

pub struct RenderScheduler {
    clock: Arc<dyn MediaClock>,
    max_queued_frames: usize,

    /// Pending frames, always sorted ascending by timestamp.
    queue: Vec<VideoFrame>,

    playback_epoch_ms: i64,
    playback_offset_ms: i64,
    frames_accepted: i64,
    last_accepted_ts: i64,
    last_render_duration_ms: i64,
    schedule_generation: u64,
}

impl RenderScheduler {
    pub fn new(clock: Arc<dyn MediaClock>, max_queued_frames: usize) -> Self {
        Self {
            clock,
            max_queued_frames,
            queue: Vec::new(),
            playback_epoch_ms: 0,
            playback_offset_ms: 0,
            frames_accepted: 0,
            last_accepted_ts: 0,
            last_render_duration_ms: 0,
            schedule_generation: 0,
        }
    }

    /// Accept a freshly decoded frame and decide what happens next.
    pub fn add_frame(&mut self, mut frame: VideoFrame) -> ScheduleDecision {
        if self.frames_accepted == 0 {
            self.playback_epoch_ms = self.clock.now_ms();
        }
        self.frames_accepted += 1;

        frame.interframe_gap_ms = frame.timestamp_ms - self.last_accepted_ts;
        self.last_accepted_ts = frame.timestamp_ms;

        // Sorted insert keeps out-of-order decode completions playable in
        // presentation order.
        self.queue.push(frame);
        self.queue.sort_by_key(|f| f.timestamp_ms);

        if self.queue.len() > self.max_queued_frames {
            // Overfull. Jump the playback clock to the oldest queued frame so
            // the maintain step below drains at least one frame immediately.
            let time_remaining = self.time_until_render_oldest();
            tracing::debug!(
                time_remaining,
                queued = self.queue.len(),
                "frame queue overfull, jumping playback clock"
            );
            if time_remaining > 0 {
                self.offset_playback_clock(time_remaining);
            }
        }

        self.maintain_schedule()
    }

    /// A delayed-paint timer fired. Honored only if `generation` is still
    /// live and a frame is waiting; the clock is deliberately not re-read,
    /// the timer was armed for exactly the right moment.
    pub fn delayed_paint(&mut self, generation: u64) -> ScheduleDecision {
        if generation != self.schedule_generation {
            tracing::trace!(
                generation,
                live = self.schedule_generation,
                "ignoring superseded paint timer"
            );
            return ScheduleDecision::Idle;
        }
        if self.queue.is_empty() {
            tracing::warn!("paint timer fired with an empty frame queue");
            return ScheduleDecision::Idle;
        }
        ScheduleDecision::RenderNow(self.dequeue_oldest())
    }

    /// A paint finished; record how long the swap took and line up the next
    /// frame.
    pub fn render_complete(&mut self, render_duration_ms: i64) -> ScheduleDecision {
        self.last_render_duration_ms = render_duration_ms;
        self.maintain_schedule()
    }

    /// Drop all pending frames and restart the playback clock for a new
    /// stream. Returns the drained frames; the caller recycles them as
    /// silent drops.
    pub fn reset(&mut self) -> Vec<VideoFrame> {
        self.schedule_generation += 1;
        self.last_accepted_ts = 0;
        self.frames_accepted = 0;
        self.playback_offset_ms = 0;
        self.playback_epoch_ms = self.clock.now_ms();
        std::mem::take(&mut self.queue)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn maintain_schedule(&mut self) -> ScheduleDecision {
        // Invalidates whatever timer was armed before this decision.
        self.schedule_generation += 1;

        if self.queue.is_empty() {
            return ScheduleDecision::Idle;
        }

        let time_to_wait = self.time_until_render_oldest();
        if time_to_wait <= 0 {
            if time_to_wait < 0 {
                // Late. Roll the clock back so the lateness does not compound
                // across the following frames.
                self.offset_playback_clock(time_to_wait);
            }
            let frame = self.dequeue_oldest();
            tracing::trace!(
                time_to_wait,
                timestamp = frame.timestamp_ms,
                "rendering oldest frame now"
            );
            ScheduleDecision::RenderNow(frame)
        } else {
            tracing::trace!(
                time_to_wait,
                generation = self.schedule_generation,
                "arming paint timer"
            );
            ScheduleDecision::WaitUntilDue {
                delay_ms: time_to_wait,
                generation: self.schedule_generation,
            }
        }
    }

    /// The virtual playback clock: elapsed real time since the stream
    /// anchor, shifted by the accumulated correction offset.
    fn read_playback_clock(&self) -> i64 {
        (self.clock.now_ms() - self.playback_epoch_ms) + self.playback_offset_ms
    }

    fn offset_playback_clock(&mut self, offset_ms: i64) {
        self.playback_offset_ms += offset_ms;
    }

    /// Milliseconds until the oldest queued frame should start painting. The
    /// render-duration term requests frames slightly early because the swap
    /// itself takes time. Do not call with an empty queue.
    fn time_until_render_oldest(&self) -> i64 {
        (self.queue[0].timestamp_ms - self.read_playback_clock()) - self.last_render_duration_ms
    }

    fn dequeue_oldest(&mut self) -> VideoFrame {
        self.queue.remove(0)
    }
}
