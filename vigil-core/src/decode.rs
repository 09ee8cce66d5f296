//! Decode service contract
//!
//! The decoder driver sees hardware and software decoders through this seam.
//! Every asynchronous request resolves exactly once: with its result, or with
//! `Aborted` when a concurrent `reset()` cancelled it. `Aborted` belongs to
//! normal reset flow and is not a failure.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::DecodedPicture;

/// Bitstream profile a session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoProfile {
    H264High,
}

/// Hardware acceleration preference, mirroring the player's `--hwaccel` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccelPreference {
    None,
    #[default]
    WithFallback,
    Only,
}

impl AccelPreference {
    /// Maps the numeric `--hwaccel` flag: 0 none, 1 with fallback, 2 only.
    pub fn from_flag(value: u8) -> Self {
        match value {
            1 => Self::WithFallback,
            2 => Self::Only,
            _ => Self::None,
        }
    }

    /// Announcement posted to the host before the session initializes.
    pub fn announcement(&self) -> &'static str {
        match self {
            Self::None => "acceleration none",
            Self::WithFallback => "acceleration withfallback",
            Self::Only => "acceleration only",
        }
    }
}

/// Completion of a decode submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The service consumed the payload and can take the next one.
    Done,
    /// A reset cancelled this submission.
    Aborted,
}

/// Completion of a next-picture request.
#[derive(Debug)]
pub enum PictureOutcome {
    /// A decoded picture and the sequence id of the submission that produced it.
    Picture(DecodedPicture, i32),
    /// A reset cancelled this request.
    Aborted,
}

/// Hard session failures. Anything surfacing here violates the session
/// contract and is fatal to the pipeline; per-frame trouble never appears
/// through this type.
#[derive(Debug, Error)]
pub enum DecodeServiceError {
    #[error("decode session initialization failed: {0}")]
    InitFailed(String),

    #[error("decode session rejected input: {0}")]
    SessionBroken(String),

    #[error("hardware-only acceleration requested but no hardware session is available")]
    HardwareUnavailable,
}

/// Asynchronous decode session.
///
/// Contract: exactly one completion per request. When `reset` is invoked, all
/// outstanding `decode` and `next_picture` requests resolve `Aborted` no later
/// than the reset completion itself. Delivery order of those completions is
/// otherwise unspecified; callers tie each completion back to the stream
/// generation it was issued under rather than relying on arrival order.
#[async_trait]
pub trait DecodeService: Send + Sync {
    async fn initialize(
        &self,
        profile: VideoProfile,
        accel: AccelPreference,
    ) -> Result<(), DecodeServiceError>;

    /// Submit one encoded access unit. Resolves when the service is ready for
    /// the next submission, not necessarily when a picture is available.
    async fn decode(
        &self,
        sequence_id: i32,
        payload: Bytes,
    ) -> Result<DecodeOutcome, DecodeServiceError>;

    /// Wait for the next decoded picture. The driver keeps exactly one of
    /// these outstanding at all times while the session is live.
    async fn next_picture(&self) -> Result<PictureOutcome, DecodeServiceError>;

    /// Return a picture buffer for reuse. Called exactly once per picture.
    fn recycle_picture(&self, picture: DecodedPicture);

    /// Cancel outstanding work and restart the session state.
    async fn reset(&self) -> Result<(), DecodeServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accel_flag_mapping() {
        assert_eq!(AccelPreference::from_flag(0), AccelPreference::None);
        assert_eq!(AccelPreference::from_flag(1), AccelPreference::WithFallback);
        assert_eq!(AccelPreference::from_flag(2), AccelPreference::Only);
        assert_eq!(AccelPreference::from_flag(7), AccelPreference::None);
    }

    #[test]
    fn test_accel_announcements() {
        assert_eq!(AccelPreference::None.announcement(), "acceleration none");
        assert_eq!(
            AccelPreference::WithFallback.announcement(),
            "acceleration withfallback"
        );
        assert_eq!(AccelPreference::Only.announcement(), "acceleration only");
    }
}
