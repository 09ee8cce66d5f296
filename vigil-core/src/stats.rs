//! Render statistics
//!
//! Windowed aggregates reported to the host: cumulative frame count, fps over
//! the current window, average swap duration, average decode latency. A
//! snapshot is produced at most once per reporting interval; taking one
//! restarts the window.

use serde::Serialize;

pub struct RenderStats {
    interval_ms: i64,

    total_frames: u64,
    window_started_ms: Option<i64>,
    window_frames: u64,
    swap_total_ms: i64,
    decode_latency_total_ms: i64,
    decode_latency_samples: u64,
}

/// One reporting-window summary, serialized into the `rs` host event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderStatsSnapshot {
    pub frames: u64,
    pub fps: f64,
    pub avg_swap_ms: f64,
    pub avg_decode_ms: f64,
}

impl RenderStats {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            total_frames: 0,
            window_started_ms: None,
            window_frames: 0,
            swap_total_ms: 0,
            decode_latency_total_ms: 0,
            decode_latency_samples: 0,
        }
    }

    /// A frame finished its swap.
    pub fn record_render(&mut self, now_ms: i64, swap_ms: i64) {
        if self.window_started_ms.is_none() {
            self.window_started_ms = Some(now_ms);
        }
        self.total_frames += 1;
        self.window_frames += 1;
        self.swap_total_ms += swap_ms.max(0);
    }

    /// A picture arrived; `latency_ms` spans decode submission to arrival.
    pub fn record_decode_latency(&mut self, latency_ms: i64) {
        self.decode_latency_total_ms += latency_ms.max(0);
        self.decode_latency_samples += 1;
    }

    /// Produce a snapshot if a full interval has elapsed since the window
    /// started. Taking a snapshot restarts the window.
    pub fn maybe_snapshot(&mut self, now_ms: i64) -> Option<RenderStatsSnapshot> {
        let started = self.window_started_ms?;
        let elapsed = now_ms - started;
        if elapsed < self.interval_ms || self.window_frames == 0 {
            return None;
        }

        let fps = if elapsed > 0 {
            self.window_frames as f64 * 1000.0 / elapsed as f64
        } else {
            0.0
        };
        let avg_swap_ms = self.swap_total_ms as f64 / self.window_frames as f64;
        let avg_decode_ms = if self.decode_latency_samples > 0 {
            self.decode_latency_total_ms as f64 / self.decode_latency_samples as f64
        } else {
            0.0
        };

        let snapshot = RenderStatsSnapshot {
            frames: self.total_frames,
            fps,
            avg_swap_ms,
            avg_decode_ms,
        };

        self.window_started_ms = Some(now_ms);
        self.window_frames = 0;
        self.swap_total_ms = 0;
        self.decode_latency_total_ms = 0;
        self.decode_latency_samples = 0;

        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_snapshot_before_interval() {
        let mut stats = RenderStats::new(5_000);
        stats.record_render(0, 4);
        stats.record_render(1_000, 6);
        assert!(stats.maybe_snapshot(4_999).is_none());
    }

    #[test]
    fn test_snapshot_averages_over_window() {
        let mut stats = RenderStats::new(5_000);
        stats.record_render(0, 4);
        stats.record_render(2_500, 6);
        stats.record_decode_latency(10);
        stats.record_decode_latency(30);

        let snap = stats.maybe_snapshot(5_000).expect("interval elapsed");
        assert_eq!(snap.frames, 2);
        assert!((snap.fps - 0.4).abs() < 1e-9); // 2 frames over 5 seconds
        assert!((snap.avg_swap_ms - 5.0).abs() < 1e-9);
        assert!((snap.avg_decode_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_restarts_after_snapshot() {
        let mut stats = RenderStats::new(1_000);
        stats.record_render(0, 10);
        assert!(stats.maybe_snapshot(1_000).is_some());

        // Fresh window: nothing recorded yet, so nothing to report even
        // after another interval.
        assert!(stats.maybe_snapshot(2_500).is_none());

        stats.record_render(2_600, 2);
        let snap = stats.maybe_snapshot(3_600).expect("second window");
        assert_eq!(snap.frames, 2); // cumulative
        assert!((snap.avg_swap_ms - 2.0).abs() < 1e-9); // window average
    }
}
