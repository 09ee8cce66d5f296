//! Frame value types
//!
//! `EncodedFrame` enters the decoder driver, `DecodedPicture` comes back from
//! the decode service, and `VideoFrame` carries a picture through scheduling
//! and painting together with its lifecycle state.

use bytes::Bytes;

use crate::decode::DecodeService;

/// Encoded H.264 access unit queued for decode.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub payload: Bytes,
    /// Presentation timestamp in sender milliseconds.
    pub timestamp_ms: i64,
    /// Assigned when the driver accepts the frame; correlates the decoded
    /// picture back to this timestamp.
    pub sequence_id: i32,
}

/// Decoded NV12 picture, backed by a buffer from the decode service's pool.
#[derive(Debug)]
pub struct DecodedPicture {
    pub buffer_id: u32,
    pub width: u32,
    pub height: u32,
    /// Row stride of the luma plane in bytes.
    pub stride: u32,
    /// NV12 layout: stride*height luma bytes, then stride*height/2 bytes of
    /// interleaved chroma.
    pub data: Vec<u8>,
}

/// A decoded picture travelling from the decoder to the screen.
///
/// Exactly one component holds a `VideoFrame` at a time: the decoder creates
/// it, the scheduler queues it, the pipeline paints it. Whatever path the
/// frame takes, it ends in `recycle()` exactly once so the picture buffer
/// returns to the decode service.
#[derive(Debug)]
pub struct VideoFrame {
    picture: Option<DecodedPicture>,
    /// Decoder generation at decode time. A mismatch against the live
    /// generation means the stream was reset and this frame must not display.
    pub stream_generation: u64,
    pub timestamp_ms: i64,
    /// Gap to the previously accepted frame; diagnostic only, filled in by
    /// the scheduler.
    pub interframe_gap_ms: i64,
    /// True only during the GPU draw window.
    pub rendering: bool,
    pub recycled: bool,
}

impl VideoFrame {
    pub fn new(picture: DecodedPicture, stream_generation: u64, timestamp_ms: i64) -> Self {
        Self {
            picture: Some(picture),
            stream_generation,
            timestamp_ms,
            interframe_gap_ms: 0,
            rendering: false,
            recycled: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.picture.as_ref().map(|p| p.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.picture.as_ref().map(|p| p.height).unwrap_or(0)
    }

    /// The picture, unless already recycled. Painting borrows it through here.
    pub fn picture(&self) -> Option<&DecodedPicture> {
        self.picture.as_ref()
    }

    /// Return the picture buffer to the decode service.
    ///
    /// No-op while the frame is mid-render or already recycled, so a second
    /// call can never release the buffer twice.
    pub fn recycle(&mut self, service: &dyn DecodeService) {
        if self.recycled || self.rendering {
            return;
        }
        self.recycled = true;
        if let Some(picture) = self.picture.take() {
            service.recycle_picture(picture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{
        AccelPreference, DecodeOutcome, DecodeServiceError, PictureOutcome, VideoProfile,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecycleCounter {
        count: AtomicUsize,
    }

    impl RecycleCounter {
        fn new() -> Self {
            Self {
                count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DecodeService for RecycleCounter {
        async fn initialize(
            &self,
            _profile: VideoProfile,
            _accel: AccelPreference,
        ) -> Result<(), DecodeServiceError> {
            Ok(())
        }

        async fn decode(
            &self,
            _sequence_id: i32,
            _payload: Bytes,
        ) -> Result<DecodeOutcome, DecodeServiceError> {
            Ok(DecodeOutcome::Done)
        }

        async fn next_picture(&self) -> Result<PictureOutcome, DecodeServiceError> {
            Ok(PictureOutcome::Aborted)
        }

        fn recycle_picture(&self, _picture: DecodedPicture) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }

        async fn reset(&self) -> Result<(), DecodeServiceError> {
            Ok(())
        }
    }

    fn test_picture() -> DecodedPicture {
        DecodedPicture {
            buffer_id: 0,
            width: 16,
            height: 16,
            stride: 16,
            data: vec![0; 16 * 16 * 3 / 2],
        }
    }

    #[test]
    fn test_recycle_exactly_once() {
        let svc = RecycleCounter::new();
        let mut frame = VideoFrame::new(test_picture(), 0, 100);

        frame.recycle(&svc);
        assert!(frame.recycled);
        assert!(frame.picture().is_none());
        assert_eq!(svc.count.load(Ordering::SeqCst), 1);

        frame.recycle(&svc);
        assert_eq!(svc.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recycle_blocked_while_rendering() {
        let svc = RecycleCounter::new();
        let mut frame = VideoFrame::new(test_picture(), 0, 100);

        frame.rendering = true;
        frame.recycle(&svc);
        assert!(!frame.recycled);
        assert_eq!(svc.count.load(Ordering::SeqCst), 0);

        frame.rendering = false;
        frame.recycle(&svc);
        assert!(frame.recycled);
        assert_eq!(svc.count.load(Ordering::SeqCst), 1);
    }
}
