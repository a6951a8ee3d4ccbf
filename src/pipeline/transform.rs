//! Decode, render and re-encode the video track
//!
//! Two independent codecs are driven from one thread. Each loop iteration
//! steps the decoder state machine and then the encoder state machine; every
//! codec call uses the short poll timeout, so neither side can block the other.
//! The loop ends once both machines reached [`DecoderState::Done`] and
//! [`EncoderState::Done`].

use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::{
    error::{CodecError, Result},
    media::{
        CodecConfig, CodecEvent, DecodedBuffer, Demuxer, EncodedBuffer, EncoderSettings,
        MediaBackend, MediaKind, Muxer, RenderSettings, SampleFlags, SampleUnit, TimeWindow,
        TrackFormat, TrackHandle,
    },
    pipeline::{
        selector::select_track,
        session::CodecSession,
        trim::{FrameDecision, TrimController},
    },
};

/// Format and buffer-set announcements handled per encoder step
const MAX_CONTROL_EVENTS_PER_STEP: usize = 8;

/// Polling behaviour of the decode/encode loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub poll_timeout: Duration,
    /// Consecutive iterations without progress before giving up
    pub max_idle_polls: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_micros(2_500),
            max_idle_polls: 20_000,
        }
    }
}

/// Everything the video transform needs besides its collaborators
#[derive(Debug, Clone)]
pub struct VideoTransform {
    pub window: TimeWindow,
    pub encoder: EncoderSettings,
    pub render: RenderSettings,
    pub settings: PipelineSettings,
}

/// Counters reported once the transform finished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformSummary {
    pub samples_queued: usize,
    pub frames_rendered: usize,
    pub frames_dropped: usize,
    pub render_failures: usize,
    pub samples_written: usize,
    pub samples_discarded: usize,
    pub parameter_sets_found: bool,
    /// First rendered timestamp when the window has a start
    pub effective_start_us: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Source samples are still being queued
    Feeding,
    /// End of input queued, remaining frames still coming out
    Draining,
    /// Last frame handled and the encoder told no more input follows
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    /// No output track yet; waiting for the configuration buffer
    AwaitingConfig,
    Writing(TrackHandle),
    Done,
}

/// Outcome of offering one input buffer to the decoder
enum Feed {
    Queued,
    EndQueued,
    Busy,
}

/// Transform the source's video track into the muxer
///
/// Returns `None` when the source has no video track.
pub fn transcode_video(
    source: &mut dyn Demuxer,
    muxer: &mut dyn Muxer,
    backend: &dyn MediaBackend,
    transform: &VideoTransform,
) -> Result<Option<TransformSummary>> {
    let Some(track_index) = select_track(source, MediaKind::Video) else {
        warn!("Source has no video track, skipping transform");
        return Ok(None);
    };

    source.select_track(track_index)?;
    source.seek_to(transform.window.seek_target())?;
    let input_format = source.track_format(track_index)?;
    debug!("Video input format: {:?}", input_format);

    let session = match CodecSession::open(backend, &input_format, &transform.encoder, transform.render) {
        Ok(session) => session,
        Err(e) => {
            if let Err(unselect) = source.unselect_track(track_index) {
                warn!("Failed to unselect video track: {}", unselect);
            }
            return Err(e);
        }
    };

    let pipeline = TransformPipeline {
        source,
        muxer,
        session,
        track_index,
        output_format: transform.encoder.track_format(),
        trim: TrimController::new(transform.window),
        settings: transform.settings,
        summary: TransformSummary::default(),
    };
    pipeline.run().map(Some)
}

struct TransformPipeline<'a> {
    source: &'a mut dyn Demuxer,
    muxer: &'a mut dyn Muxer,
    session: CodecSession,
    track_index: usize,
    output_format: TrackFormat,
    trim: TrimController,
    settings: PipelineSettings,
    summary: TransformSummary,
}

impl TransformPipeline<'_> {
    fn run(mut self) -> Result<TransformSummary> {
        let result = self.drive();

        if let Err(e) = self.source.unselect_track(self.track_index) {
            warn!("Failed to unselect video track: {}", e);
        }

        match result {
            Ok(()) => {
                self.summary.effective_start_us = self.trim.effective_start_us();
                info!(
                    "Video transform finished: {} rendered, {} dropped, {} written",
                    self.summary.frames_rendered,
                    self.summary.frames_dropped,
                    self.summary.samples_written
                );
                Ok(self.summary.clone())
            }
            Err(e) => {
                error!("Video transform failed: {}", e);
                Err(e)
            }
        }
        // session dropped here, releasing codecs and surfaces
    }

    fn drive(&mut self) -> Result<()> {
        let mut decoder = DecoderState::Feeding;
        let mut encoder = EncoderState::AwaitingConfig;
        let mut idle_polls = 0u32;

        while !(decoder == DecoderState::Done && encoder == EncoderState::Done) {
            let (next_decoder, decoder_progress) = self.step_decoder(decoder)?;
            let (next_encoder, encoder_progress) = self.step_encoder(encoder)?;

            if next_decoder != decoder {
                debug!("Decoder {:?} -> {:?}", decoder, next_decoder);
            }
            if next_encoder != encoder {
                debug!("Encoder {:?} -> {:?}", encoder, next_encoder);
            }

            decoder = next_decoder;
            encoder = next_encoder;

            // Encoder end of stream ends the whole loop
            if encoder == EncoderState::Done && decoder != DecoderState::Done {
                warn!("Encoder finished before the decoder; stopping");
                decoder = DecoderState::Done;
            }

            if decoder_progress || encoder_progress {
                idle_polls = 0;
            } else {
                idle_polls += 1;
                if idle_polls >= self.settings.max_idle_polls {
                    return Err(CodecError::Stalled { polls: idle_polls }.into());
                }
            }
        }
        Ok(())
    }

    fn step_decoder(&mut self, state: DecoderState) -> Result<(DecoderState, bool)> {
        let mut next = state;
        let mut progressed = false;

        match state {
            DecoderState::Done => return Ok((state, false)),
            DecoderState::Feeding => match self.feed_decoder()? {
                Feed::Queued => progressed = true,
                Feed::EndQueued => {
                    progressed = true;
                    next = DecoderState::Draining;
                }
                Feed::Busy => {}
            },
            DecoderState::Draining => {}
        }

        let (drained, finished) = self.drain_decoder()?;
        if finished {
            next = DecoderState::Done;
        }
        Ok((next, progressed || drained))
    }

    /// Offer the next source sample, or the end-of-stream marker, to the decoder
    fn feed_decoder(&mut self) -> Result<Feed> {
        let timeout = self.settings.poll_timeout;
        let Some(slot) = self.session.decoder.dequeue_input(timeout)? else {
            return Ok(Feed::Busy);
        };

        let sample = match self.source.sample_track_index() {
            Some(index) if index == self.track_index => self.source.read_sample()?,
            _ => None,
        };

        match sample {
            Some(mut sample) => {
                // end of stream is decided here, never by the source
                sample.flags.remove(SampleFlags::END_OF_STREAM);
                trace!("Queueing sample at {}us ({} bytes)", sample.presentation_time_us, sample.len());
                self.session.decoder.queue_input(slot, sample)?;
                self.summary.samples_queued += 1;
                self.source.advance();
                Ok(Feed::Queued)
            }
            None => {
                debug!("Source exhausted after {} samples", self.summary.samples_queued);
                self.session.decoder.queue_input(slot, SampleUnit::end_of_stream())?;
                Ok(Feed::EndQueued)
            }
        }
    }

    /// Handle one decoder output event; returns (progressed, finished)
    fn drain_decoder(&mut self) -> Result<(bool, bool)> {
        let timeout = self.settings.poll_timeout;
        match self.session.decoder.dequeue_output(timeout)? {
            // announcements alone do not count as progress
            CodecEvent::TryAgain | CodecEvent::BuffersChanged => Ok((false, false)),
            CodecEvent::FormatChanged(format) => {
                debug!("Decoder output format changed: {:?}", format);
                Ok((false, false))
            }
            CodecEvent::Buffer(buffer) => {
                let finished = self.handle_decoded(buffer)?;
                Ok((true, finished))
            }
        }
    }

    fn handle_decoded(&mut self, buffer: DecodedBuffer) -> Result<bool> {
        let mut end_of_stream = buffer.is_end_of_stream();
        let mut render = buffer.size != 0;

        if buffer.size != 0 {
            match self.trim.on_video_frame(buffer.presentation_time_us) {
                FrameDecision::Render => {}
                FrameDecision::Drop => {
                    render = false;
                    self.summary.frames_dropped += 1;
                }
                FrameDecision::Terminate => {
                    render = false;
                    end_of_stream = true;
                }
            }
        }

        self.session.decoder.release_output(buffer.index, render)?;

        if render {
            match self.session.present(buffer.presentation_time_us) {
                Ok(()) => self.summary.frames_rendered += 1,
                Err(e) => {
                    warn!("Skipping frame at {}us: {}", buffer.presentation_time_us, e);
                    self.summary.render_failures += 1;
                }
            }
        }

        if end_of_stream {
            debug!("Decoder stream end, signalling encoder");
            self.session.encoder.signal_end_of_input()?;
        }
        Ok(end_of_stream)
    }

    /// Drain every encoder buffer that is ready
    ///
    /// Only buffers count as progress, and at most
    /// [`MAX_CONTROL_EVENTS_PER_STEP`] announcements are handled per call, so
    /// an encoder that never stops announcing ends up in the stall guard.
    fn step_encoder(&mut self, state: EncoderState) -> Result<(EncoderState, bool)> {
        let timeout = self.settings.poll_timeout;
        let mut state = state;
        let mut progressed = false;
        let mut control_events = 0;

        while state != EncoderState::Done && control_events < MAX_CONTROL_EVENTS_PER_STEP {
            match self.session.encoder.dequeue_output(timeout)? {
                CodecEvent::TryAgain => break,
                CodecEvent::BuffersChanged => control_events += 1,
                CodecEvent::FormatChanged(format) => {
                    // Registration waits for the configuration bytes themselves
                    debug!("Encoder output format changed: {}", format.mime);
                    control_events += 1;
                }
                CodecEvent::Buffer(buffer) => {
                    progressed = true;
                    state = self.handle_encoded(state, buffer)?;
                }
            }
        }
        Ok((state, progressed))
    }

    fn handle_encoded(&mut self, state: EncoderState, buffer: EncodedBuffer) -> Result<EncoderState> {
        let next = match state {
            EncoderState::AwaitingConfig if buffer.is_codec_config() && !buffer.data.is_empty() => {
                EncoderState::Writing(self.register_output_track(&buffer)?)
            }
            EncoderState::AwaitingConfig if !buffer.data.is_empty() => {
                warn!(
                    "Discarding encoded sample at {}us: no output track yet",
                    buffer.presentation_time_us
                );
                self.summary.samples_discarded += 1;
                state
            }
            EncoderState::Writing(_) if buffer.is_codec_config() => {
                debug!("Ignoring repeated codec configuration");
                state
            }
            EncoderState::Writing(track) if !buffer.data.is_empty() => {
                if self.muxer.write_sample(track, &buffer.to_sample())? {
                    self.summary.samples_written += 1;
                } else {
                    warn!("Muxer refused video sample at {}us", buffer.presentation_time_us);
                    self.summary.samples_discarded += 1;
                }
                state
            }
            _ => state,
        };

        self.session.encoder.release_output(buffer.index)?;

        if buffer.is_end_of_stream() {
            Ok(EncoderState::Done)
        } else {
            Ok(next)
        }
    }

    /// Register the output video track once, carrying the parsed parameter sets
    fn register_output_track(&mut self, buffer: &EncodedBuffer) -> Result<TrackHandle> {
        let config = CodecConfig::parse(&buffer.data);
        if config.is_complete() {
            debug!(
                "Found {} sequence and {} picture parameter sets",
                config.sequence_sets.len(),
                config.picture_sets.len()
            );
            self.summary.parameter_sets_found = true;
        } else {
            warn!("Codec configuration lacks parameter sets; output may not decode");
        }

        let format = self
            .output_format
            .clone()
            .with_codec_specific_data(config.codec_specific_data());
        let track = self.muxer.add_track(&format)?;
        info!("Registered output video track {:?}", track);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Dimensions, Rotation};
    use crate::reference::{MemoryDemuxer, MemoryMuxer, Movie, ReferenceBackend, SyntheticClip};

    fn transform(window: TimeWindow, target: Dimensions) -> VideoTransform {
        VideoTransform {
            window,
            encoder: EncoderSettings {
                mime: "video/avc".to_string(),
                size: target,
                bitrate: 500_000,
                frame_rate: 10,
                keyframe_interval_secs: 1,
            },
            render: RenderSettings {
                target,
                rotation: Rotation::None,
            },
            settings: PipelineSettings {
                poll_timeout: Duration::ZERO,
                max_idle_polls: 1_000,
            },
        }
    }

    fn clip() -> Movie {
        SyntheticClip {
            size: Dimensions::new(32, 18),
            duration_us: 2_000_000,
            frame_rate: 10,
            keyframe_interval_secs: 1,
            with_audio: false,
            ..SyntheticClip::default()
        }
        .generate()
    }

    fn run(window: TimeWindow, backend: &ReferenceBackend) -> (Result<Option<TransformSummary>>, Movie) {
        let mut source = MemoryDemuxer::new(clip());
        let (mut muxer, output) = MemoryMuxer::detached();
        let result = transcode_video(
            &mut source,
            &mut muxer,
            backend,
            &transform(window, Dimensions::new(16, 8)),
        );
        let written = output.borrow().clone();
        (result, written)
    }

    #[test]
    fn test_full_transform() {
        let (result, written) = run(TimeWindow::unbounded(), &ReferenceBackend::default());
        let summary = result.unwrap().unwrap();
        assert_eq!(summary.samples_queued, 20);
        assert_eq!(summary.frames_rendered, 20);
        assert_eq!(summary.samples_written, 20);
        assert!(summary.parameter_sets_found);

        let track = &written.tracks[0];
        assert_eq!(track.format.dimensions(), Some(Dimensions::new(16, 8)));
        assert_eq!(track.format.codec_specific_data.len(), 2);
        assert_eq!(track.samples.len(), 20);
    }

    #[test]
    fn test_trimmed_transform_respects_window() {
        let window = TimeWindow::from_micros(550_000, 1_500_000);
        let (result, written) = run(window, &ReferenceBackend::default());
        let summary = result.unwrap().unwrap();

        assert_eq!(summary.effective_start_us, Some(600_000));
        let timestamps: Vec<i64> = written.tracks[0]
            .samples
            .iter()
            .map(|s| s.presentation_time_us)
            .collect();
        assert_eq!(timestamps.first(), Some(&600_000));
        assert!(timestamps.iter().all(|&ts| ts >= 600_000 && ts < 1_500_000));
        // the seek landed on the sync point at 0, frames 0..=500ms were dropped
        assert_eq!(summary.frames_dropped, 6);
    }

    #[test]
    fn test_render_failures_skip_frames() {
        let backend = ReferenceBackend::default().with_render_failures(vec![300_000, 400_000]);
        let (result, written) = run(TimeWindow::unbounded(), &backend);
        let summary = result.unwrap().unwrap();
        assert_eq!(summary.render_failures, 2);
        assert_eq!(summary.frames_rendered, 18);
        assert_eq!(written.tracks[0].samples.len(), 18);
    }

    #[test]
    fn test_missing_parameter_sets_still_registers_track() {
        let backend = ReferenceBackend::default().without_parameter_sets();
        let (result, written) = run(TimeWindow::unbounded(), &backend);
        let summary = result.unwrap().unwrap();
        assert!(!summary.parameter_sets_found);
        assert!(written.tracks[0].format.codec_specific_data.is_empty());
        assert_eq!(written.tracks[0].samples.len(), 20);
    }

    #[test]
    fn test_stalled_encoder_is_reported() {
        let backend = ReferenceBackend::default().with_silent_encoder();
        let (result, _) = run(TimeWindow::unbounded(), &backend);
        assert!(matches!(
            result,
            Err(crate::error::TranscodeError::Codec(CodecError::Stalled { .. }))
        ));
    }

    #[test]
    fn test_no_video_track() {
        let mut movie = Movie::default();
        movie.add_track(TrackFormat::audio("audio/mp4a-latm", 44_100, 2), Vec::new());
        let mut source = MemoryDemuxer::new(movie);
        let (mut muxer, _) = MemoryMuxer::detached();
        let result = transcode_video(
            &mut source,
            &mut muxer,
            &ReferenceBackend::default(),
            &transform(TimeWindow::unbounded(), Dimensions::new(16, 8)),
        );
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_data_before_config_is_discarded() {
        let backend = ReferenceBackend::default().with_data_before_config();
        let (result, written) = run(TimeWindow::unbounded(), &backend);
        let summary = result.unwrap().unwrap();

        assert_eq!(summary.samples_discarded, 1);
        assert_eq!(summary.samples_written, 19);
        assert!(summary.parameter_sets_found);

        let track = &written.tracks[0];
        assert_eq!(track.format.codec_specific_data.len(), 2);
        assert_eq!(track.samples.len(), 19);
        assert!(track.samples.iter().all(|s| s.presentation_time_us != 0));
        assert!(track.samples[0].is_sync());
    }

    #[test]
    fn test_endless_format_changes_stall() {
        let backend = ReferenceBackend::default().with_restless_encoder();
        let (result, written) = run(TimeWindow::unbounded(), &backend);
        assert!(matches!(
            result,
            Err(crate::error::TranscodeError::Codec(CodecError::Stalled { .. }))
        ));
        assert!(written.tracks.is_empty());
    }
}
