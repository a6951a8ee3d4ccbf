use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{RequestError, Result, SourceError, TranscodeError},
    media::{
        Demuxer, EncoderSettings, MediaBackend, MediaKind, Muxer, OutputLayout, RenderSettings,
        Rotation, SourceMetadata, TargetGeometry, TimeWindow,
    },
    pipeline::{copy_track, transcode_video, TrimController, VideoTransform},
    transcode::{
        naming::output_file_name,
        request::{TranscodeOutcome, TranscodeRequest, VideoRoute},
    },
};

/// Orchestrates one transcode from source file to finalized output
///
/// The engine follows a fixed sequence:
/// 1. Planning - validate the request, probe the source, resolve geometry
/// 2. Opening - one demultiplexer and one muxer for the whole call
/// 3. Video - transform or pass-through copy of the video track
/// 4. Audio - pass-through copy aligned to the first retained video frame
/// 5. Cleanup - release the source and finalize the output, always
///
/// Only planning and opening failures are returned as errors; anything later
/// is reported through [`TranscodeOutcome`].
pub struct Transcoder<B: MediaBackend> {
    config: Config,
    backend: B,
}

/// Everything decided before any output exists
#[derive(Debug, Clone)]
struct TranscodePlan {
    output_path: PathBuf,
    layout: OutputLayout,
    route: VideoRoute,
    window: TimeWindow,
    transform: VideoTransform,
}

/// What the video and audio stages produced
#[derive(Debug)]
struct StageReport {
    route: VideoRoute,
    effective_video_start_us: Option<i64>,
    video_samples: usize,
    audio_samples: usize,
    error: Option<TranscodeError>,
}

impl<B: MediaBackend> Transcoder<B> {
    pub fn new(config: Config, backend: B) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run a transcode, naming the output after the current local time
    pub fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutcome> {
        self.transcode_at(request, Local::now())
    }

    /// Run a transcode with an explicit clock reading for output naming
    pub fn transcode_at(&self, request: &TranscodeRequest, now: DateTime<Local>) -> Result<TranscodeOutcome> {
        let started = Instant::now();
        info!("🎬 Transcoding {:?} with the {} backend", request.source, self.backend.name());

        // Step 1: planning
        let plan = self.plan(request, now)?;

        // Step 2: opening
        let mut source = self.backend.open_source(&request.source)?;
        let mut muxer = match self.backend.create_muxer(&plan.output_path, plan.layout) {
            Ok(muxer) => muxer,
            Err(e) => {
                release_source(source.as_mut());
                return Err(e);
            }
        };

        // Steps 3 and 4: video, then audio
        let report = self.run_stages(source.as_mut(), muxer.as_mut(), &plan);

        // Step 5: cleanup
        release_source(source.as_mut());
        let finalize_error = match muxer.finalize(false) {
            Ok(()) => None,
            Err(e) => {
                error!("Finalizing {:?} failed: {}", plan.output_path, e);
                Some(e.to_string())
            }
        };

        let elapsed = started.elapsed();
        let pipeline_error = report.error.map(|e| e.to_string());
        let success = pipeline_error.is_none() && finalize_error.is_none();

        if success {
            info!("🎉 Transcode complete in {:.2?}: {:?}", elapsed, plan.output_path);
        } else {
            warn!("Transcode finished with errors in {:.2?}: {:?}", elapsed, plan.output_path);
        }

        Ok(TranscodeOutcome {
            success,
            output_path: plan.output_path,
            effective_video_start_us: report.effective_video_start_us,
            video_route: report.route,
            video_samples: report.video_samples,
            audio_samples: report.audio_samples,
            pipeline_error,
            finalize_error,
            elapsed,
        })
    }

    // ==========================================
    // STEP 1: PLANNING
    // ==========================================

    fn plan(&self, request: &TranscodeRequest, now: DateTime<Local>) -> Result<TranscodePlan> {
        request.window.validate()?;

        fs::File::open(&request.source).map_err(|_| SourceError::Unreadable {
            path: request.source.display().to_string(),
        })?;
        let metadata = self.backend.probe(&request.source)?;
        info!(
            "   Source: {}x{}, rotation {}, bitrate {:?}",
            metadata.width, metadata.height, metadata.rotation_degrees, metadata.bitrate
        );

        let geometry = self.resolve_geometry(request, &metadata)?;
        let route = if geometry.size != metadata.dimensions() || geometry.render_rotation != Rotation::None {
            VideoRoute::Transform
        } else {
            VideoRoute::PassThrough
        };

        let encoder = &self.config.encoder;
        let bitrate = if request.bitrate > 0 { request.bitrate } else { encoder.default_bitrate };
        let transform = VideoTransform {
            window: request.window,
            encoder: EncoderSettings {
                mime: encoder.mime.clone(),
                size: geometry.size,
                bitrate,
                frame_rate: encoder.frame_rate,
                keyframe_interval_secs: encoder.keyframe_interval_secs,
            },
            render: RenderSettings {
                target: geometry.size,
                rotation: geometry.render_rotation,
            },
            settings: self.config.pipeline.settings(),
        };

        let output_path = output_path(request, &self.config, now)?;
        info!("   Target: {} at {} bps via {}", geometry.size, bitrate, route);
        info!("   Window: {}", request.window);
        info!("   Output: {:?}", output_path);

        Ok(TranscodePlan {
            output_path,
            layout: OutputLayout {
                size: geometry.size,
                rotation: geometry.stored_rotation,
            },
            route,
            window: request.window,
            transform,
        })
    }

    fn resolve_geometry(&self, request: &TranscodeRequest, metadata: &SourceMetadata) -> Result<TargetGeometry> {
        let rotation = Rotation::from_degrees(metadata.rotation_degrees).unwrap_or_else(|| {
            warn!("Ignoring unsupported rotation of {} degrees", metadata.rotation_degrees);
            Rotation::None
        });

        let requested = request.size.or_defaults(self.config.encoder.default_size());
        if requested.is_empty() {
            return Err(RequestError::ZeroDimensions {
                width: requested.width,
                height: requested.height,
            }
            .into());
        }

        let geometry = TargetGeometry::resolve(requested, rotation);
        debug!("Resolved {} with rotation {} to {:?}", requested, rotation.degrees(), geometry);
        Ok(geometry)
    }

    // ==========================================
    // STEPS 3 & 4: VIDEO AND AUDIO
    // ==========================================

    fn run_stages(&self, source: &mut dyn Demuxer, muxer: &mut dyn Muxer, plan: &TranscodePlan) -> StageReport {
        let mut report = StageReport {
            route: plan.route,
            effective_video_start_us: None,
            video_samples: 0,
            audio_samples: 0,
            error: None,
        };

        info!("📹 Video via {}", plan.route);
        let video = match plan.route {
            VideoRoute::Transform => transcode_video(source, muxer, &self.backend, &plan.transform)
                .map(|summary| summary.map(|s| (s.samples_written, s.effective_start_us))),
            _ => copy_track(source, muxer, plan.window, MediaKind::Video)
                .map(|summary| summary.map(|s| (s.samples_written, s.first_accepted_us))),
        };

        match video {
            Ok(Some((samples, effective_start_us))) => {
                report.video_samples = samples;
                report.effective_video_start_us = effective_start_us;
            }
            Ok(None) => {
                warn!("Source has no video track");
                report.route = VideoRoute::Absent;
            }
            Err(e) => {
                error!("Video stage failed, skipping audio: {}", e);
                report.error = Some(e);
                return report;
            }
        }

        let audio_window = TrimController::audio_window(plan.window, report.effective_video_start_us);
        info!("🎵 Audio within {}", audio_window);
        match copy_track(source, muxer, audio_window, MediaKind::Audio) {
            Ok(Some(summary)) => report.audio_samples = summary.samples_written,
            Ok(None) => debug!("Source has no audio track"),
            Err(e) => {
                error!("Audio stage failed: {}", e);
                report.error = Some(e);
            }
        }

        report
    }
}

/// Absolute path of the new output file
fn output_path(request: &TranscodeRequest, config: &Config, now: DateTime<Local>) -> Result<PathBuf> {
    let name = output_file_name(&config.output, &request.source, now);
    let dir: &Path = &request.destination_dir;
    if dir.is_absolute() {
        Ok(dir.join(name))
    } else {
        Ok(std::env::current_dir()?.join(dir).join(name))
    }
}

fn release_source(source: &mut dyn Demuxer) {
    if let Err(e) = source.release() {
        warn!("Failed to release source: {}", e);
    }
}
