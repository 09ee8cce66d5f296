//! Decoder driver
//!
//! Drives an asynchronous decode session: accepts encoded frames from the
//! host channel, pumps them through a decode loop, harvests decoded pictures
//! through a parallel picture loop, and tags every picture with its original
//! timestamp and the stream generation it belongs to.
//!
//! Both loops are completion-driven. Each spawned service call captures the
//! stream generation current at spawn time; its completion event carries that
//! tag and is discarded on arrival if a reset has moved the generation on.
//! That makes the delivery order of completions around a reset irrelevant.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::clock::MediaClock;
use crate::decode::{
    AccelPreference, DecodeOutcome, DecodeService, DecodeServiceError, PictureOutcome,
    VideoProfile,
};
use crate::frame::{EncodedFrame, VideoFrame};
use crate::pipeline::PipelineEvent;

/// Completion events the driver's spawned service calls feed back into the
/// pipeline channel. `generation` is the stream generation captured when the
/// request was issued.
#[derive(Debug)]
pub enum DecoderEvent {
    InitDone {
        generation: u64,
        result: Result<(), DecodeServiceError>,
    },
    DecodeDone {
        generation: u64,
        result: Result<DecodeOutcome, DecodeServiceError>,
    },
    PictureReady {
        generation: u64,
        result: Result<PictureOutcome, DecodeServiceError>,
    },
    ResetDone {
        generation: u64,
        result: Result<(), DecodeServiceError>,
    },
}

/// A decoded picture leaving the driver, ready for scheduling.
#[derive(Debug)]
pub struct PictureArrival {
    pub frame: VideoFrame,
    /// Decode submission to picture arrival, when the submission time is
    /// still known.
    pub decode_latency_ms: Option<i64>,
}

pub struct StreamDecoder {
    service: Arc<dyn DecodeService>,
    clock: Arc<dyn MediaClock>,
    events: mpsc::UnboundedSender<PipelineEvent>,

    stream_generation: u64,
    encoded_queue: VecDeque<EncodedFrame>,
    /// Timestamp for every sequence id queued or in flight. Cleared in bulk
    /// on reset, never entry by entry, so completions may arrive in any
    /// order relative to their submissions.
    timestamps: HashMap<i32, i64>,
    /// Submission times for decode-latency samples.
    decode_started: HashMap<i32, i64>,
    next_sequence_id: i32,

    flushing: bool,
    resetting: bool,
    initializing: bool,
    decode_looping: bool,
    /// A reset arrived while a decode submission was in flight; the service
    /// reset is held back until that submission's completion comes in.
    reset_deferred: bool,
}

impl StreamDecoder {
    /// Opens the session. Must be called within a tokio runtime; the
    /// initialization request is spawned immediately.
    pub fn new(
        service: Arc<dyn DecodeService>,
        clock: Arc<dyn MediaClock>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        profile: VideoProfile,
        accel: AccelPreference,
    ) -> Self {
        let decoder = Self {
            service,
            clock,
            events,
            stream_generation: 0,
            encoded_queue: VecDeque::new(),
            timestamps: HashMap::new(),
            decode_started: HashMap::new(),
            next_sequence_id: 0,
            flushing: false,
            resetting: false,
            initializing: true,
            decode_looping: false,
            reset_deferred: false,
        };

        let service = decoder.service.clone();
        let events = decoder.events.clone();
        let generation = decoder.stream_generation;
        tokio::spawn(async move {
            let result = service.initialize(profile, accel).await;
            let _ = events.send(PipelineEvent::Decoder(DecoderEvent::InitDone {
                generation,
                result,
            }));
        });

        decoder
    }

    pub fn stream_generation(&self) -> u64 {
        self.stream_generation
    }

    /// Accept one encoded access unit from the host channel.
    ///
    /// No backpressure is applied here; pacing is the sender's job and
    /// latency shedding is the scheduler's.
    pub fn receive_frame(&mut self, payload: Bytes, timestamp_ms: i64) {
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);

        self.timestamps.insert(sequence_id, timestamp_ms);
        self.encoded_queue.push_back(EncodedFrame {
            payload,
            timestamp_ms,
            sequence_id,
        });
        tracing::trace!(
            sequence_id,
            timestamp_ms,
            queued = self.encoded_queue.len(),
            "accepted encoded frame"
        );

        if !self.resetting && !self.flushing && !self.initializing && !self.decode_looping {
            self.decode_next_frame();
        }
    }

    /// Throw away the current stream: every queued and in-flight frame is
    /// invalidated and the session restarts under a new generation.
    ///
    /// No-op while a reset is already running or the session is still
    /// initializing. Returns immediately; the service reset itself is issued
    /// only once any in-flight decode submission has completed, and frames
    /// received before the reset completes queue normally and decode under
    /// the new generation.
    pub fn reset(&mut self) {
        if self.resetting || self.initializing {
            return;
        }
        self.resetting = true;
        self.stream_generation += 1;
        self.encoded_queue.clear();
        self.timestamps.clear();
        self.decode_started.clear();
        self.next_sequence_id = 0;
        tracing::debug!(
            generation = self.stream_generation,
            "resetting decode session"
        );

        if self.decode_looping {
            // A submission is still on its way through the service. Hold the
            // session reset until its completion arrives so the submission
            // cannot land inside the new session.
            self.reset_deferred = true;
            return;
        }
        self.spawn_reset();
    }

    fn spawn_reset(&self) {
        let service = self.service.clone();
        let events = self.events.clone();
        let generation = self.stream_generation;
        tokio::spawn(async move {
            let result = service.reset().await;
            let _ = events.send(PipelineEvent::Decoder(DecoderEvent::ResetDone {
                generation,
                result,
            }));
        });
    }

    /// Initialization completed. Returns true when this was the first
    /// initialization, in which case the caller announces it to the host.
    pub fn on_init_done(
        &mut self,
        generation: u64,
        result: Result<(), DecodeServiceError>,
    ) -> Result<bool, DecodeServiceError> {
        if generation != self.stream_generation {
            return Ok(false);
        }
        result?;
        let first = self.initializing;
        self.initializing = false;
        tracing::info!("decode session ready");
        self.start();
        Ok(first)
    }

    pub fn on_decode_done(
        &mut self,
        generation: u64,
        result: Result<DecodeOutcome, DecodeServiceError>,
    ) -> Result<(), DecodeServiceError> {
        if generation != self.stream_generation {
            tracing::trace!(
                generation,
                live = self.stream_generation,
                "dropping stale decode completion"
            );
            self.decode_looping = false;
            if std::mem::take(&mut self.reset_deferred) {
                self.spawn_reset();
            }
            return Ok(());
        }
        match result? {
            DecodeOutcome::Done => {
                if !self.flushing && !self.resetting {
                    self.decode_next_frame();
                }
            }
            DecodeOutcome::Aborted => {
                // The service may shed a submission during its own reset.
                // Not an error; the loop simply stops.
                self.decode_looping = false;
            }
        }
        Ok(())
    }

    /// A next-picture request completed. On success the request is re-armed
    /// before the picture is handed on, so the loop never goes idle while
    /// the session is live.
    pub fn on_picture_ready(
        &mut self,
        generation: u64,
        result: Result<PictureOutcome, DecodeServiceError>,
    ) -> Result<Option<PictureArrival>, DecodeServiceError> {
        if generation != self.stream_generation {
            tracing::trace!(
                generation,
                live = self.stream_generation,
                "dropping stale picture completion"
            );
            if let Ok(PictureOutcome::Picture(picture, _)) = result {
                // Superseded, but the buffer still goes back to the pool.
                self.service.recycle_picture(picture);
            }
            return Ok(None);
        }
        match result? {
            PictureOutcome::Aborted => {
                // Picture loop exits; the reset completion restarts it.
                Ok(None)
            }
            PictureOutcome::Picture(picture, sequence_id) => {
                self.spawn_next_picture();

                let Some(timestamp_ms) = self.timestamps.get(&sequence_id).copied() else {
                    // No timestamp means the submission predates the last
                    // reset. Give the buffer back rather than presenting it
                    // against a clock it never belonged to.
                    tracing::warn!(sequence_id, "dropping picture with unknown sequence id");
                    self.service.recycle_picture(picture);
                    return Ok(None);
                };
                let decode_latency_ms = self
                    .decode_started
                    .remove(&sequence_id)
                    .map(|started| self.clock.now_ms() - started);

                tracing::trace!(sequence_id, timestamp_ms, "picture ready");
                Ok(Some(PictureArrival {
                    frame: VideoFrame::new(picture, self.stream_generation, timestamp_ms),
                    decode_latency_ms,
                }))
            }
        }
    }

    pub fn on_reset_done(
        &mut self,
        generation: u64,
        result: Result<(), DecodeServiceError>,
    ) -> Result<(), DecodeServiceError> {
        if generation != self.stream_generation {
            return Ok(());
        }
        result?;
        self.resetting = false;
        tracing::debug!(
            generation = self.stream_generation,
            "decode session reset complete"
        );
        self.start();
        Ok(())
    }

    /// Enter the running state: arm the picture loop and, if frames are
    /// already waiting, the decode loop. Used after initialization and after
    /// every reset.
    fn start(&mut self) {
        self.spawn_next_picture();
        self.decode_next_frame();
    }

    fn decode_next_frame(&mut self) {
        let Some(frame) = self.encoded_queue.pop_front() else {
            self.decode_looping = false;
            return;
        };
        self.decode_looping = true;
        self.decode_started
            .insert(frame.sequence_id, self.clock.now_ms());

        let service = self.service.clone();
        let events = self.events.clone();
        let generation = self.stream_generation;
        tokio::spawn(async move {
            let result = service.decode(frame.sequence_id, frame.payload).await;
            let _ = events.send(PipelineEvent::Decoder(DecoderEvent::DecodeDone {
                generation,
                result,
            }));
        });
    }

    fn spawn_next_picture(&self) {
        let service = self.service.clone();
        let events = self.events.clone();
        let generation = self.stream_generation;
        tokio::spawn(async move {
            let result = service.next_picture().await;
            let _ = events.send(PipelineEvent::Decoder(DecoderEvent::PictureReady {
                generation,
                result,
            }));
        });
    }
}
