//! Render callback timing and underrun counters
//!
//! Every method called from the render callback is atomic-only: no logging,
//! no locks, no allocation. The refill task reads the counters and does the
//! logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Callback statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackStats {
    /// Total callback invocations
    pub callback_count: u64,

    /// Callbacks that had to silence-pad
    pub underrun_count: u64,

    /// Frames of silence inserted by underruns
    pub underrun_frames: u64,

    /// Intervals deviating from the expected period by more than the tolerance
    pub irregular_intervals: u64,

    /// Frames rendered (audio plus padding)
    pub frames_rendered: u64,
}

/// Lock-free render callback monitor
pub struct CallbackMonitor {
    /// Monotonic origin for interval measurement
    start_time: Instant,

    /// Elapsed nanoseconds at the previous callback (0 = none yet)
    last_callback_ns: AtomicU64,

    callback_count: AtomicU64,
    underrun_count: AtomicU64,
    underrun_frames: AtomicU64,
    irregular_intervals: AtomicU64,
    frames_rendered: AtomicU64,

    /// Expected interval between callbacks (0 = unknown, no jitter check)
    expected_interval_ns: AtomicU64,
}

impl CallbackMonitor {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_callback_ns: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            irregular_intervals: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            expected_interval_ns: AtomicU64::new(0),
        }
    }

    /// Set the nominal callback period from the device buffer size
    pub fn set_expected_period(&self, buffer_frames: u32, sample_rate: u32) {
        let interval_ns = if sample_rate == 0 {
            0
        } else {
            (buffer_frames as f64 / sample_rate as f64 * 1_000_000_000.0) as u64
        };
        self.expected_interval_ns
            .store(interval_ns, Ordering::Relaxed);
    }

    /// Record a callback invocation of `frames` frames.
    ///
    /// Real-time safe.
    pub fn record_callback(&self, frames: usize) {
        // +1 keeps a callback at the exact origin distinguishable from "none yet"
        let now_ns = self.start_time.elapsed().as_nanos() as u64 + 1;
        let last_ns = self.last_callback_ns.swap(now_ns, Ordering::Relaxed);
        self.callback_count.fetch_add(1, Ordering::Relaxed);
        self.frames_rendered
            .fetch_add(frames as u64, Ordering::Relaxed);

        let expected_ns = self.expected_interval_ns.load(Ordering::Relaxed);
        if last_ns == 0 || expected_ns == 0 {
            return;
        }

        // 20% tolerance absorbs normal driver jitter
        let deviation_ns = now_ns.saturating_sub(last_ns).abs_diff(expected_ns);
        if deviation_ns > expected_ns / 5 {
            self.irregular_intervals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a silence-padded callback. Real-time safe.
    pub fn record_underrun(&self, missing_frames: usize) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames
            .fetch_add(missing_frames as u64, Ordering::Relaxed);
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CallbackStats {
        CallbackStats {
            callback_count: self.callback_count.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            irregular_intervals: self.irregular_intervals.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter (between sessions, never during a callback)
    pub fn reset(&self) {
        self.last_callback_ns.store(0, Ordering::Relaxed);
        self.callback_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
        self.irregular_intervals.store(0, Ordering::Relaxed);
        self.frames_rendered.store(0, Ordering::Relaxed);
    }
}

impl Default for CallbackMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_counters_accumulate() {
        let monitor = CallbackMonitor::new();
        monitor.record_callback(512);
        monitor.record_callback(512);
        monitor.record_underrun(100);

        let stats = monitor.stats();
        assert_eq!(stats.callback_count, 2);
        assert_eq!(stats.frames_rendered, 1024);
        assert_eq!(stats.underrun_count, 1);
        assert_eq!(stats.underrun_frames, 100);
        assert_eq!(stats.irregular_intervals, 0);
    }

    #[test]
    fn test_late_callback_is_irregular() {
        let monitor = CallbackMonitor::new();
        // 1 frame at 1 kHz: 1ms expected
        monitor.set_expected_period(1, 1000);
        monitor.record_callback(1);
        thread::sleep(Duration::from_millis(20));
        monitor.record_callback(1);
        assert_eq!(monitor.stats().irregular_intervals, 1);
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let monitor = CallbackMonitor::new();
        monitor.record_callback(64);
        monitor.record_underrun(64);
        monitor.reset();
        assert_eq!(monitor.stats(), CallbackStats::default());
    }
}
