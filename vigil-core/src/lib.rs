//! # Vigil Core
//!
//! Streaming H.264 playback pipeline: decode session management,
//! arrival-time frame scheduling, and host-facing playback reports.

// ============================================================================
// Time / Frames
// ============================================================================
pub mod clock;
pub mod frame;
pub mod h264;

// ============================================================================
// Decoding
// ============================================================================
pub mod decode;
pub mod decoder;
#[cfg(feature = "software-decode")]
pub mod openh264_decode;

// ============================================================================
// Presentation
// ============================================================================
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod stats;

// ============================================================================
// Host Protocol / Configuration
// ============================================================================
pub mod config;
pub mod protocol;

// ============================================================================
// Test Support
// ============================================================================
#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
