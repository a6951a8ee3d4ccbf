use tracing::{debug, trace};

use crate::media::TimeWindow;

/// What to do with a decoded video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    Render,
    /// Before the window start; decode but do not render
    Drop,
    /// At or past the window end; end both streams
    Terminate,
}

/// What to do with a sample read for pass-through copying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision {
    Write,
    Stop,
}

/// Per-sample trim policy shared by the transform and pass-through paths
///
/// Seeking only reaches sync points, so the first frame actually kept can lie
/// after the requested start. That timestamp is recorded once and later used
/// to align the audio window.
#[derive(Debug, Clone)]
pub struct TrimController {
    window: TimeWindow,
    effective_start_us: Option<i64>,
}

impl TrimController {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            effective_start_us: None,
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// First retained timestamp; only recorded when the window has a start
    pub fn effective_start_us(&self) -> Option<i64> {
        self.effective_start_us
    }

    pub fn on_video_frame(&mut self, timestamp_us: i64) -> FrameDecision {
        if self.window.is_past_end(timestamp_us) {
            debug!("Frame at {}us reached window end, terminating", timestamp_us);
            return FrameDecision::Terminate;
        }

        if self.window.start_us.is_some() && self.effective_start_us.is_none() {
            if self.window.is_before_start(timestamp_us) {
                trace!("Dropping frame at {}us before window start", timestamp_us);
                return FrameDecision::Drop;
            }
            debug!("First retained video frame at {}us", timestamp_us);
            self.effective_start_us = Some(timestamp_us);
        }

        // nothing earlier than the first retained frame may follow it
        if self.effective_start_us.is_some_and(|start| timestamp_us < start) {
            trace!("Dropping frame at {}us before the retained start", timestamp_us);
            return FrameDecision::Drop;
        }

        FrameDecision::Render
    }

    /// Pass-through samples are kept from the seek point on, so the first one
    /// written is the first one retained
    pub fn on_copied_sample(&mut self, timestamp_us: i64) -> CopyDecision {
        if self.window.is_past_end(timestamp_us) {
            return CopyDecision::Stop;
        }
        if self.window.start_us.is_some() && self.effective_start_us.is_none() {
            self.effective_start_us = Some(timestamp_us);
        }
        CopyDecision::Write
    }

    /// Audio never starts before the first retained video frame
    pub fn audio_window(requested: TimeWindow, effective_video_start_us: Option<i64>) -> TimeWindow {
        let start = requested
            .start_us
            .map(|start| effective_video_start_us.map_or(start, |video| start.max(video)));
        requested.with_start(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_window_renders_everything() {
        let mut trim = TrimController::new(TimeWindow::unbounded());
        for ts in [0, 33_333, 10_000_000] {
            assert_eq!(trim.on_video_frame(ts), FrameDecision::Render);
        }
        assert_eq!(trim.effective_start_us(), None);
    }

    #[test]
    fn test_frames_before_retained_start_are_dropped() {
        let mut trim = TrimController::new(TimeWindow::from_micros(2_000_000, -1));
        assert_eq!(trim.on_video_frame(1_900_000), FrameDecision::Drop);
        assert_eq!(trim.on_video_frame(2_033_333), FrameDecision::Render);
        assert_eq!(trim.effective_start_us(), Some(2_033_333));

        assert_eq!(trim.on_video_frame(2_000_000), FrameDecision::Drop);
        assert_eq!(trim.on_video_frame(2_066_666), FrameDecision::Render);
        assert_eq!(trim.effective_start_us(), Some(2_033_333));
    }

    #[test]
    fn test_end_terminates() {
        let mut trim = TrimController::new(TimeWindow::from_micros(-1, 8_000_000));
        assert_eq!(trim.on_video_frame(7_999_999), FrameDecision::Render);
        assert_eq!(trim.on_video_frame(8_000_000), FrameDecision::Terminate);
    }

    #[test]
    fn test_end_checked_before_start() {
        let mut trim = TrimController::new(TimeWindow::from_micros(100, 200));
        assert_eq!(trim.on_video_frame(250), FrameDecision::Terminate);
        assert_eq!(trim.effective_start_us(), None);
    }

    #[test]
    fn test_copied_samples_record_first_written() {
        let mut trim = TrimController::new(TimeWindow::from_micros(2_000_000, 3_000_000));
        assert_eq!(trim.on_copied_sample(1_500_000), CopyDecision::Write);
        assert_eq!(trim.on_copied_sample(2_500_000), CopyDecision::Write);
        assert_eq!(trim.on_copied_sample(3_000_000), CopyDecision::Stop);
        assert_eq!(trim.effective_start_us(), Some(1_500_000));
    }

    #[test]
    fn test_audio_window_alignment() {
        let requested = TimeWindow::from_micros(2_000_000, 8_000_000);
        let aligned = TrimController::audio_window(requested, Some(2_100_000));
        assert_eq!(aligned, TimeWindow::from_micros(2_100_000, 8_000_000));

        let aligned = TrimController::audio_window(requested, Some(1_500_000));
        assert_eq!(aligned.start_us, Some(2_000_000));

        let aligned = TrimController::audio_window(requested, None);
        assert_eq!(aligned, requested);

        let open = TimeWindow::from_micros(-1, 8_000_000);
        assert_eq!(TrimController::audio_window(open, Some(0)), open);
    }
}
