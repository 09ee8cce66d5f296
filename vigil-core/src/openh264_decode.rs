//! Software H.264 decoding via openh264
//!
//! Fallback decode session used when no hardware session is available.
//! Decoding happens inline on the calling task; pictures queue inside the
//! service until the driver's next-picture request collects them. Output is
//! NV12 built into pooled buffers so steady-state playback allocates
//! nothing.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use openh264::formats::YUVSource;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::decode::{
    AccelPreference, DecodeOutcome, DecodeService, DecodeServiceError, PictureOutcome,
    VideoProfile,
};
use crate::frame::DecodedPicture;
use crate::h264;

const MAX_POOLED_BUFFERS: usize = 8;

struct SessionState {
    decoder: Option<openh264::decoder::Decoder>,
    /// Sequence ids submitted but not yet matched to an output picture.
    /// Every access unit carries a slice, so pictures come out one per
    /// submission and in submission order.
    submitted: VecDeque<i32>,
    pending: VecDeque<(DecodedPicture, i32)>,
    pool: Vec<Vec<u8>>,
    /// Bumped by every reset; waiting pickups from an older epoch abort.
    session_epoch: u64,
    next_buffer_id: u32,
}

impl SessionState {
    fn pool_buffer(&mut self, data: Vec<u8>) {
        if self.pool.len() < MAX_POOLED_BUFFERS {
            self.pool.push(data);
        }
    }
}

pub struct SoftwareDecodeService {
    state: Mutex<SessionState>,
    picture_ready: Notify,
}

impl SoftwareDecodeService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                decoder: None,
                submitted: VecDeque::new(),
                pending: VecDeque::new(),
                pool: Vec::new(),
                session_epoch: 0,
                next_buffer_id: 0,
            }),
            picture_ready: Notify::new(),
        }
    }

    #[cfg(test)]
    fn pooled_buffer_count(&self) -> usize {
        self.state.lock().pool.len()
    }

    /// Repack one decoded I420 picture as NV12 into a pooled buffer. Rows the
    /// source planes cannot cover are skipped rather than read out of bounds.
    fn repack_nv12<S: YUVSource>(
        pool: &mut Vec<Vec<u8>>,
        next_buffer_id: &mut u32,
        yuv: &S,
    ) -> DecodedPicture {
        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let y_plane = yuv.y();
        let u_plane = yuv.u();
        let v_plane = yuv.v();

        let y_size = width * height;
        let total = y_size + y_size / 2;
        let mut data = pool.pop().unwrap_or_default();
        data.clear();
        data.resize(total, 0);

        // Y rows, stride padding removed.
        for row in 0..height {
            let src = row * y_stride;
            let end = src + width;
            if end <= y_plane.len() {
                let dst = row * width;
                data[dst..dst + width].copy_from_slice(&y_plane[src..end]);
            }
        }

        // Interleave U and V into the NV12 chroma plane.
        let half_width = width / 2;
        for row in 0..height / 2 {
            let u_src = row * u_stride;
            let v_src = row * v_stride;
            if u_src + half_width <= u_plane.len() && v_src + half_width <= v_plane.len() {
                let dst = y_size + row * width;
                for col in 0..half_width {
                    data[dst + 2 * col] = u_plane[u_src + col];
                    data[dst + 2 * col + 1] = v_plane[v_src + col];
                }
            }
        }

        let buffer_id = *next_buffer_id;
        *next_buffer_id = next_buffer_id.wrapping_add(1);
        DecodedPicture {
            buffer_id,
            width: width as u32,
            height: height as u32,
            stride: width as u32,
            data,
        }
    }
}

impl Default for SoftwareDecodeService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecodeService for SoftwareDecodeService {
    async fn initialize(
        &self,
        _profile: VideoProfile,
        accel: AccelPreference,
    ) -> Result<(), DecodeServiceError> {
        if accel == AccelPreference::Only {
            return Err(DecodeServiceError::HardwareUnavailable);
        }
        if accel == AccelPreference::WithFallback {
            tracing::info!("no hardware session available, falling back to software decode");
        }

        let decoder = openh264::decoder::Decoder::new()
            .map_err(|e| DecodeServiceError::InitFailed(format!("openh264: {e}")))?;
        self.state.lock().decoder = Some(decoder);
        tracing::info!("software decode session opened");
        Ok(())
    }

    async fn decode(
        &self,
        sequence_id: i32,
        payload: Bytes,
    ) -> Result<DecodeOutcome, DecodeServiceError> {
        // One continuous lock hold. The driver issues a session reset only
        // between decode completions, so the session seen here is always the
        // one this submission was issued against.
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(decoder) = state.decoder.as_mut() else {
            return Err(DecodeServiceError::SessionBroken(
                "decode before initialization".to_string(),
            ));
        };

        let annexb = h264::ensure_annexb(&payload);
        if h264::contains_keyframe(&annexb) {
            tracing::trace!(sequence_id, "keyframe submitted");
        }
        state.submitted.push_back(sequence_id);
        let mut picture_queued = false;
        match decoder.decode(&annexb) {
            Ok(Some(yuv)) => {
                let picture =
                    Self::repack_nv12(&mut state.pool, &mut state.next_buffer_id, &yuv);
                let produced = state.submitted.pop_front().unwrap_or(sequence_id);
                state.pending.push_back((picture, produced));
                picture_queued = true;
            }
            Ok(None) => {
                // Decoder is still buffering this access unit.
                tracing::trace!(sequence_id, "no picture for submission yet");
            }
            Err(e) => {
                // Malformed input is shed, not fatal. It will never produce
                // a picture, so drop its association too.
                state.submitted.pop_back();
                tracing::warn!(sequence_id, error = %e, "skipping undecodable payload");
            }
        }
        drop(guard);
        if picture_queued {
            self.picture_ready.notify_waiters();
        }
        Ok(DecodeOutcome::Done)
    }

    async fn next_picture(&self) -> Result<PictureOutcome, DecodeServiceError> {
        let epoch = self.state.lock().session_epoch;
        loop {
            let notified = self.picture_ready.notified();
            {
                let mut state = self.state.lock();
                if state.session_epoch != epoch {
                    return Ok(PictureOutcome::Aborted);
                }
                if let Some((picture, sequence_id)) = state.pending.pop_front() {
                    return Ok(PictureOutcome::Picture(picture, sequence_id));
                }
            }
            notified.await;
        }
    }

    fn recycle_picture(&self, picture: DecodedPicture) {
        self.state.lock().pool_buffer(picture.data);
    }

    async fn reset(&self) -> Result<(), DecodeServiceError> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.session_epoch += 1;
            state.submitted.clear();
            while let Some((picture, _)) = state.pending.pop_front() {
                state.pool_buffer(picture.data);
            }
            // A fresh decoder instance drops all reference state.
            if state.decoder.is_some() {
                state.decoder = Some(
                    openh264::decoder::Decoder::new()
                        .map_err(|e| DecodeServiceError::InitFailed(format!("openh264: {e}")))?,
                );
            }
        }
        self.picture_ready.notify_waiters();
        tracing::debug!("software decode session reset");
        Ok(())
    }
}
