//! Player pipeline
//!
//! Single-owner event loop tying the pieces together: host messages in,
//! decoded frames through the scheduler, paints out to the surface, status
//! strings back to the host. All mutable state lives inside the loop; the
//! spawned service calls, paint tasks and timers communicate only by sending
//! events back into the loop's channel. That keeps the whole player free of
//! locks around frame state and makes every interleaving an ordinary
//! sequence of events.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::clock::MediaClock;
use crate::config::PlayerConfig;
use crate::decode::{DecodeService, DecodeServiceError, VideoProfile};
use crate::decoder::{DecoderEvent, StreamDecoder};
use crate::frame::{DecodedPicture, VideoFrame};
use crate::protocol::{HostEvent, InboundMessage};
use crate::scheduler::{RenderScheduler, ScheduleDecision};
use crate::stats::RenderStats;

// ============================================================================
// Paint surface seam
// ============================================================================

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("render surface init failed: {0}")]
    Init(String),
    #[error("render surface lost: {0}")]
    SurfaceLost(String),
    #[error("render device out of memory")]
    OutOfMemory,
}

/// Where finished pictures go. The pipeline keeps at most one `paint` in
/// flight and never overlaps it with `resize`.
#[async_trait]
pub trait PaintSurface: Send + Sync {
    async fn resize(&self, width: u32, height: u32) -> Result<(), SurfaceError>;

    /// Upload and present one picture. Resolves when the swap completes.
    async fn paint(&self, picture: &DecodedPicture) -> Result<(), SurfaceError>;
}

// ============================================================================
// Events and errors
// ============================================================================

/// Everything that can happen to the pipeline, in one place.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A host message arrived.
    Message(InboundMessage),
    /// A decode service call completed.
    Decoder(DecoderEvent),
    /// A scheduled paint delay elapsed. Honored only while `generation`
    /// matches the scheduler's current one.
    PaintDelayElapsed { generation: u64 },
    /// The in-flight paint finished.
    PaintDone {
        frame: VideoFrame,
        result: Result<(), SurfaceError>,
    },
    /// Stop the loop.
    Shutdown,
}

/// Failures that end playback. Per-frame trouble is shed as drops and never
/// shows up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode session failed: {0}")]
    Decode(#[from] DecodeServiceError),
    #[error("render surface failed: {0}")]
    Surface(#[from] SurfaceError),
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct PlayerPipeline {
    config: PlayerConfig,
    service: Arc<dyn DecodeService>,
    surface: Arc<dyn PaintSurface>,
    clock: Arc<dyn MediaClock>,

    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    host: mpsc::UnboundedSender<HostEvent>,

    decoder: StreamDecoder,
    scheduler: RenderScheduler,
    stats: RenderStats,

    /// Frames waiting behind the in-flight swap, oldest first.
    paint_queue: VecDeque<VideoFrame>,
    is_painting: bool,
    /// True only inside `handle_reset`; suppresses drop reports for frames
    /// discarded by the reset itself.
    is_resetting: bool,
    viewport: (u32, u32),
    /// Timestamp from the most recent `f` control message, applied to the
    /// next binary payload.
    next_frame_timestamp: i64,
    paint_started_ms: i64,
}

impl PlayerPipeline {
    /// Builds the pipeline and opens the decode session. Must be called
    /// within a tokio runtime. The returned sender is how transports inject
    /// messages and how the loop is shut down.
    pub fn new(
        config: PlayerConfig,
        service: Arc<dyn DecodeService>,
        surface: Arc<dyn PaintSurface>,
        clock: Arc<dyn MediaClock>,
        host: mpsc::UnboundedSender<HostEvent>,
    ) -> (Self, mpsc::UnboundedSender<PipelineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let decoder = StreamDecoder::new(
            service.clone(),
            clock.clone(),
            events_tx.clone(),
            VideoProfile::H264High,
            config.accel,
        );
        let scheduler = RenderScheduler::new(clock.clone(), config.max_queued_frames);
        let stats = RenderStats::new(config.stats_interval_ms);

        let pipeline = Self {
            service,
            surface,
            clock,
            events_tx: events_tx.clone(),
            events_rx,
            host,
            decoder,
            scheduler,
            stats,
            paint_queue: VecDeque::new(),
            is_painting: false,
            is_resetting: false,
            viewport: (0, 0),
            next_frame_timestamp: 0,
            paint_started_ms: 0,
            config,
        };
        (pipeline, events_tx)
    }

    /// Runs until shutdown or a fatal failure.
    pub async fn run(mut self) -> Result<(), PipelineError> {
        self.post(HostEvent::Initializing);
        self.post(HostEvent::Acceleration(self.config.accel));

        while let Some(event) = self.events_rx.recv().await {
            match event {
                PipelineEvent::Message(message) => self.handle_message(message),
                PipelineEvent::Decoder(ev) => self.handle_decoder_event(ev)?,
                PipelineEvent::PaintDelayElapsed { generation } => {
                    let decision = self.scheduler.delayed_paint(generation);
                    self.execute(decision);
                }
                PipelineEvent::PaintDone { frame, result } => {
                    self.handle_paint_done(frame, result)?;
                }
                PipelineEvent::Shutdown => break,
            }
        }
        tracing::debug!("pipeline stopped");
        Ok(())
    }

    // ========================================================================
    // Host messages
    // ========================================================================

    fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::FrameTimestamp(timestamp_ms) => {
                self.next_frame_timestamp = timestamp_ms;
            }
            InboundMessage::Payload(payload) => {
                self.decoder.receive_frame(payload, self.next_frame_timestamp);
            }
            InboundMessage::Reset => self.handle_reset(),
            InboundMessage::Unrecognized(text) => {
                tracing::warn!(message = %text, "unrecognized host message");
                self.post(HostEvent::UnrecognizedMessage);
            }
        }
    }

    /// Host-driven stream reset. The decoder invalidates everything in
    /// flight; the scheduler hands its queue back for silent recycling. The
    /// paint queue is left alone: whatever is already at the renderer gets
    /// weeded out by the generation check as it comes up.
    fn handle_reset(&mut self) {
        tracing::info!("stream reset");
        self.is_resetting = true;
        self.decoder.reset();
        for frame in self.scheduler.reset() {
            self.drop_frame(frame, false);
        }
        self.is_resetting = false;
    }

    // ========================================================================
    // Decoder completions
    // ========================================================================

    fn handle_decoder_event(&mut self, event: DecoderEvent) -> Result<(), PipelineError> {
        match event {
            DecoderEvent::InitDone { generation, result } => {
                if self.decoder.on_init_done(generation, result)? {
                    self.post(HostEvent::DecoderInitialized);
                }
            }
            DecoderEvent::DecodeDone { generation, result } => {
                self.decoder.on_decode_done(generation, result)?;
            }
            DecoderEvent::PictureReady { generation, result } => {
                if let Some(arrival) = self.decoder.on_picture_ready(generation, result)? {
                    if let Some(latency) = arrival.decode_latency_ms {
                        self.stats.record_decode_latency(latency);
                    }
                    let decision = self.scheduler.add_frame(arrival.frame);
                    self.execute(decision);
                }
            }
            DecoderEvent::ResetDone { generation, result } => {
                self.decoder.on_reset_done(generation, result)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Scheduling and painting
    // ========================================================================

    fn execute(&mut self, decision: ScheduleDecision) {
        match decision {
            ScheduleDecision::Idle => {}
            ScheduleDecision::RenderNow(frame) => self.paint_picture(frame),
            ScheduleDecision::WaitUntilDue {
                delay_ms,
                generation,
            } => {
                let events = self.events_tx.clone();
                let delay = Duration::from_millis(delay_ms.max(0) as u64);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(PipelineEvent::PaintDelayElapsed { generation });
                });
            }
        }
    }

    /// Admit one due frame to the renderer. Frames from a dead generation
    /// are recycled on the spot; a full queue sheds its oldest entry and
    /// reports the drop.
    fn paint_picture(&mut self, frame: VideoFrame) {
        if frame.stream_generation != self.decoder.stream_generation() {
            self.drop_frame(frame, false);
            return;
        }

        if self.paint_queue.len() >= self.config.max_paint_queue {
            if let Some(evicted) = self.paint_queue.pop_front() {
                tracing::debug!(
                    timestamp_ms = evicted.timestamp_ms,
                    "paint queue full, dropping oldest"
                );
                self.drop_frame(evicted, true);
            }
        }
        self.paint_queue.push_back(frame);

        if !self.is_painting {
            self.paint_next_picture();
        }
    }

    fn paint_next_picture(&mut self) {
        let Some(mut frame) = self.paint_queue.pop_front() else {
            return;
        };

        // The frame may have gone stale while it waited behind the swap.
        if frame.recycled || frame.stream_generation != self.decoder.stream_generation() {
            self.drop_frame(frame, false);
            self.paint_next_picture();
            return;
        }

        let (width, height) = (frame.width(), frame.height());
        let resize_to = if self.viewport != (width, height) {
            self.viewport = (width, height);
            self.post(HostEvent::ViewportResized { width, height });
            Some((width, height))
        } else {
            None
        };

        self.is_painting = true;
        frame.rendering = true;
        self.paint_started_ms = self.clock.now_ms();

        let surface = self.surface.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut result = Ok(());
            if let Some((width, height)) = resize_to {
                result = surface.resize(width, height).await;
            }
            if result.is_ok() {
                if let Some(picture) = frame.picture() {
                    result = surface.paint(picture).await;
                }
            }
            let _ = events.send(PipelineEvent::PaintDone { frame, result });
        });
    }

    fn handle_paint_done(
        &mut self,
        mut frame: VideoFrame,
        result: Result<(), SurfaceError>,
    ) -> Result<(), PipelineError> {
        let render_duration_ms = self.clock.now_ms() - self.paint_started_ms;
        self.is_painting = false;
        frame.rendering = false;

        if let Err(err) = result {
            frame.recycle(self.service.as_ref());
            return Err(err.into());
        }

        if !self.is_resetting {
            self.post(HostEvent::FrameRendered {
                width: frame.width(),
                height: frame.height(),
                timestamp_ms: frame.timestamp_ms,
                interframe_gap_ms: frame.interframe_gap_ms,
            });
            let now_ms = self.clock.now_ms();
            self.stats.record_render(now_ms, render_duration_ms);
            if let Some(snapshot) = self.stats.maybe_snapshot(now_ms) {
                self.post(HostEvent::RenderStats(snapshot));
            }
        }
        frame.recycle(self.service.as_ref());

        let decision = self.scheduler.render_complete(render_duration_ms);
        self.execute(decision);

        if !self.is_painting {
            self.paint_next_picture();
        }
        Ok(())
    }

    fn drop_frame(&mut self, mut frame: VideoFrame, report_to_client: bool) {
        if report_to_client && !self.is_resetting {
            self.post(HostEvent::FrameDropped {
                width: frame.width(),
                height: frame.height(),
                timestamp_ms: frame.timestamp_ms,
                interframe_gap_ms: frame.interframe_gap_ms,
            });
        }
        frame.recycle(self.service.as_ref());
    }

    fn post(&self, event: HostEvent) {
        tracing::trace!(wire = %event.to_wire(), "host event");
        // A missing host listener is fine; headless runs have none.
        let _ = self.host.send(event);
    }
}
