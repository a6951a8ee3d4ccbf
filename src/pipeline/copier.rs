use tracing::{debug, info, warn};

use crate::{
    error::Result,
    media::{Demuxer, MediaKind, Muxer, TimeWindow, TrackHandle},
    pipeline::{
        selector::select_track,
        trim::{CopyDecision, TrimController},
    },
};

/// What a pass-through copy produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub track_index: usize,
    pub samples_written: usize,
    pub samples_refused: usize,
    /// Timestamp of the first sample written when the window has a start
    pub first_accepted_us: Option<i64>,
}

/// Copies one track's encoded samples unchanged into the muxer
///
/// Reading starts at the sync point at or before the window start and stops at
/// the first sample reaching the window end. Returns `None` when the source
/// has no track of the requested kind.
pub fn copy_track(
    source: &mut dyn Demuxer,
    muxer: &mut dyn Muxer,
    window: TimeWindow,
    kind: MediaKind,
) -> Result<Option<CopySummary>> {
    let Some(track_index) = select_track(source, kind) else {
        debug!("No {} track to copy", kind);
        return Ok(None);
    };

    source.select_track(track_index)?;
    let format = source.track_format(track_index)?;
    let output_track = muxer.add_track(&format)?;
    source.seek_to(window.seek_target())?;

    info!("Copying {} track {} ({}) within {}", kind, track_index, format.mime, window);

    let mut summary = CopySummary {
        track_index,
        samples_written: 0,
        samples_refused: 0,
        first_accepted_us: None,
    };
    let copied = copy_samples(source, muxer, output_track, window, kind, &mut summary);

    if let Err(e) = source.unselect_track(track_index) {
        warn!("Failed to unselect {} track: {}", kind, e);
    }
    copied?;

    info!("Copied {} {} samples", summary.samples_written, kind);
    Ok(Some(summary))
}

fn copy_samples(
    source: &mut dyn Demuxer,
    muxer: &mut dyn Muxer,
    output_track: TrackHandle,
    window: TimeWindow,
    kind: MediaKind,
    summary: &mut CopySummary,
) -> Result<()> {
    let mut trim = TrimController::new(window);

    loop {
        match source.sample_track_index() {
            Some(index) if index == summary.track_index => {
                let Some(sample) = source.read_sample()? else {
                    break;
                };
                if trim.on_copied_sample(sample.presentation_time_us) == CopyDecision::Stop {
                    debug!("Stopping {} copy at {}us", kind, sample.presentation_time_us);
                    break;
                }
                if muxer.write_sample(output_track, &sample)? {
                    summary.samples_written += 1;
                } else {
                    warn!("Muxer refused {} sample at {}us", kind, sample.presentation_time_us);
                    summary.samples_refused += 1;
                }
                if !source.advance() {
                    break;
                }
            }
            Some(other) => {
                debug!("Skipping sample of unselected track {}", other);
                if !source.advance() {
                    break;
                }
            }
            None => break,
        }
    }

    summary.first_accepted_us = trim.effective_start_us();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxerError;
    use crate::media::{SampleFlags, SampleUnit, TrackFormat};
    use crate::reference::{MemoryDemuxer, MemoryMuxer, Movie};

    /// Accepts the track but fails every write
    struct BrokenMuxer;

    impl Muxer for BrokenMuxer {
        fn add_track(&mut self, _format: &TrackFormat) -> Result<TrackHandle> {
            Ok(TrackHandle(0))
        }

        fn write_sample(&mut self, _track: TrackHandle, _sample: &SampleUnit) -> Result<bool> {
            Err(MuxerError::WriteFailed { reason: "disk full".to_string() }.into())
        }

        fn finalize(&mut self, _truncate: bool) -> Result<()> {
            Ok(())
        }
    }

    /// Ten samples 100us apart, a sync point every fourth
    fn source_movie() -> Movie {
        let samples = (0..10)
            .map(|i| {
                let flags = if i % 4 == 0 { SampleFlags::SYNC } else { SampleFlags::empty() };
                SampleUnit::new(vec![i as u8; 3 + i], i as i64 * 100, flags)
            })
            .collect();
        let mut movie = Movie::default();
        movie.add_track(TrackFormat::video("video/avc", 64, 36), samples);
        movie
    }

    fn run(window: TimeWindow) -> (Option<CopySummary>, Movie) {
        let movie = source_movie();
        let mut source = MemoryDemuxer::new(movie);
        let (mut muxer, output) = MemoryMuxer::detached();
        let summary = copy_track(&mut source, &mut muxer, window, MediaKind::Video).unwrap();
        let written = output.borrow().clone();
        (summary, written)
    }

    #[test]
    fn test_full_copy_is_byte_identical() {
        let (summary, written) = run(TimeWindow::unbounded());
        let summary = summary.unwrap();
        assert_eq!(summary.samples_written, 10);
        assert_eq!(summary.first_accepted_us, None);
        assert_eq!(written.tracks[0].samples, source_movie().tracks[0].samples);
    }

    #[test]
    fn test_copy_starts_at_previous_sync_point() {
        let (summary, written) = run(TimeWindow::from_micros(550, -1));
        let summary = summary.unwrap();
        // Sync points sit at 0, 400 and 800
        assert_eq!(summary.first_accepted_us, Some(400));
        let timestamps: Vec<i64> = written.tracks[0]
            .samples
            .iter()
            .map(|s| s.presentation_time_us)
            .collect();
        assert_eq!(timestamps, vec![400, 500, 600, 700, 800, 900]);
    }

    #[test]
    fn test_copy_stops_at_window_end() {
        let (summary, written) = run(TimeWindow::from_micros(-1, 300));
        assert_eq!(summary.unwrap().samples_written, 3);
        assert!(written.tracks[0].samples.iter().all(|s| s.presentation_time_us < 300));
    }

    #[test]
    fn test_missing_track_is_not_found() {
        let mut source = MemoryDemuxer::new(source_movie());
        let (mut muxer, output) = MemoryMuxer::detached();
        let summary =
            copy_track(&mut source, &mut muxer, TimeWindow::unbounded(), MediaKind::Audio).unwrap();
        assert!(summary.is_none());
        assert!(output.borrow().tracks.is_empty());
    }

    #[test]
    fn test_failed_write_unselects_track() {
        let mut source = MemoryDemuxer::new(source_movie());
        let result = copy_track(&mut source, &mut BrokenMuxer, TimeWindow::unbounded(), MediaKind::Video);
        assert!(result.is_err());
        assert_eq!(source.sample_track_index(), None);
    }
}
