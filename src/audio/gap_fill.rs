//! Stutter compensation: pad silence over capture gaps
//!
//! Some devices drop callbacks under load. Without compensation the encoded
//! clip ends up shorter than the time the user actually spent recording.
//! Only active at unity gain; custom gain disables it.

use std::time::Duration;

/// Gaps shorter than this are treated as callback jitter.
const MIN_GAP: Duration = Duration::from_millis(60);

/// Never insert more than this much silence for a single gap.
const MAX_FILL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct GapFiller {
    sample_rate: u32,
    /// Capture offset (since stream start) where the last chunk ended
    expected_next: Option<Duration>,
}

impl GapFiller {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            expected_next: None,
        }
    }

    /// Number of silent samples to insert before a chunk of `frames` frames
    /// captured at `capture_offset`.
    pub fn silence_before(&mut self, capture_offset: Duration, frames: usize) -> usize {
        let chunk_len = Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);

        let fill = match self.expected_next {
            Some(expected) if capture_offset > expected + MIN_GAP => {
                let gap = (capture_offset - expected).min(MAX_FILL);
                (gap.as_secs_f64() * self.sample_rate as f64).round() as usize
            }
            _ => 0,
        };

        self.expected_next = Some(capture_offset + chunk_len);
        fill
    }
}
