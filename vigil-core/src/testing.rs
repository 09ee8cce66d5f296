//! Test doubles shared across the crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};

use crate::decode::{
    AccelPreference, DecodeOutcome, DecodeService, DecodeServiceError, PictureOutcome,
    VideoProfile,
};
use crate::frame::DecodedPicture;
use crate::pipeline::{PaintSurface, SurfaceError};

pub fn test_picture(width: u32, height: u32) -> DecodedPicture {
    DecodedPicture {
        buffer_id: 0,
        width,
        height,
        stride: width,
        data: vec![0; (width * height * 3 / 2) as usize],
    }
}

#[derive(Default)]
struct FakeState {
    pending_init: VecDeque<oneshot::Sender<Result<(), DecodeServiceError>>>,
    pending_decodes: VecDeque<oneshot::Sender<Result<DecodeOutcome, DecodeServiceError>>>,
    pending_pictures: VecDeque<oneshot::Sender<Result<PictureOutcome, DecodeServiceError>>>,
    pending_resets: VecDeque<oneshot::Sender<Result<(), DecodeServiceError>>>,
    decoded: Vec<(i32, Bytes)>,
}

/// A decode service that completes nothing on its own. Every request parks a
/// oneshot; the test decides when and how each one resolves, which makes the
/// completion interleavings around resets reproducible.
#[derive(Default)]
pub struct FakeDecodeService {
    state: Mutex<FakeState>,
    recycled: AtomicUsize,
}

impl FakeDecodeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_init_count(&self) -> usize {
        self.state.lock().pending_init.len()
    }

    pub fn pending_decode_count(&self) -> usize {
        self.state.lock().pending_decodes.len()
    }

    pub fn pending_picture_count(&self) -> usize {
        self.state.lock().pending_pictures.len()
    }

    pub fn pending_reset_count(&self) -> usize {
        self.state.lock().pending_resets.len()
    }

    pub fn recycled_count(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    /// Sequence ids submitted for decoding, in submission order.
    pub fn decoded_sequence_ids(&self) -> Vec<i32> {
        self.state.lock().decoded.iter().map(|(id, _)| *id).collect()
    }

    pub fn complete_init(&self, result: Result<(), DecodeServiceError>) {
        let tx = self
            .state
            .lock()
            .pending_init
            .pop_front()
            .expect("no pending initialization");
        let _ = tx.send(result);
    }

    pub fn complete_decode(&self, outcome: DecodeOutcome) {
        let tx = self
            .state
            .lock()
            .pending_decodes
            .pop_front()
            .expect("no pending decode");
        let _ = tx.send(Ok(outcome));
    }

    pub fn deliver_picture(&self, picture: DecodedPicture, sequence_id: i32) {
        let tx = self
            .state
            .lock()
            .pending_pictures
            .pop_front()
            .expect("no pending picture request");
        let _ = tx.send(Ok(PictureOutcome::Picture(picture, sequence_id)));
    }

    /// Finish an in-flight reset the way the contract requires: outstanding
    /// decode and picture requests resolve as aborted, then the reset
    /// completes.
    pub fn complete_reset(&self) {
        let mut state = self.state.lock();
        for tx in state.pending_decodes.drain(..) {
            let _ = tx.send(Ok(DecodeOutcome::Aborted));
        }
        for tx in state.pending_pictures.drain(..) {
            let _ = tx.send(Ok(PictureOutcome::Aborted));
        }
        let tx = state
            .pending_resets
            .pop_front()
            .expect("no pending reset");
        let _ = tx.send(Ok(()));
    }
}

#[async_trait]
impl DecodeService for FakeDecodeService {
    async fn initialize(
        &self,
        _profile: VideoProfile,
        _accel: AccelPreference,
    ) -> Result<(), DecodeServiceError> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().pending_init.push_back(tx);
        rx.await.expect("initialization never completed")
    }

    async fn decode(&self, sequence_id: i32, payload: Bytes) -> Result<DecodeOutcome, DecodeServiceError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.decoded.push((sequence_id, payload));
            state.pending_decodes.push_back(tx);
        }
        rx.await.expect("decode never completed")
    }

    async fn next_picture(&self) -> Result<PictureOutcome, DecodeServiceError> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().pending_pictures.push_back(tx);
        rx.await.expect("picture request never completed")
    }

    fn recycle_picture(&self, _picture: DecodedPicture) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }

    async fn reset(&self) -> Result<(), DecodeServiceError> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().pending_resets.push_back(tx);
        rx.await.expect("reset never completed")
    }
}

/// A paint surface that blocks each paint until the test releases it, so
/// tests can hold the renderer busy and pile frames up behind it.
pub struct GatedPaintSurface {
    gate: Semaphore,
    painted: AtomicUsize,
    resized: Mutex<Vec<(u32, u32)>>,
}

impl GatedPaintSurface {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            painted: AtomicUsize::new(0),
            resized: Mutex::new(Vec::new()),
        }
    }

    pub fn release_one(&self) {
        self.gate.add_permits(1);
    }

    pub fn painted_count(&self) -> usize {
        self.painted.load(Ordering::SeqCst)
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        self.resized.lock().clone()
    }
}

#[async_trait]
impl PaintSurface for GatedPaintSurface {
    async fn resize(&self, width: u32, height: u32) -> Result<(), SurfaceError> {
        self.resized.lock().push((width, height));
        Ok(())
    }

    async fn paint(&self, _picture: &DecodedPicture) -> Result<(), SurfaceError> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.painted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
