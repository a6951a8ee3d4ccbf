use tracing::{debug, warn};

use crate::{
    error::{RenderError, Result, TranscodeError},
    media::{
        DestinationSurface, EncoderSettings, MediaBackend, RenderSettings, SourceSurface,
        TrackFormat, VideoDecoder, VideoEncoder,
    },
};

/// Decoder, encoder and the two surfaces between them, owned by one transcode
///
/// Acquired as encoder, destination surface, decoder, source surface and
/// released in exactly the reverse order when dropped, on every exit path.
/// Release failures are logged and otherwise ignored.
pub struct CodecSession {
    pub(crate) source_surface: Box<dyn SourceSurface>,
    pub(crate) destination_surface: Box<dyn DestinationSurface>,
    pub(crate) decoder: Box<dyn VideoDecoder>,
    pub(crate) encoder: Box<dyn VideoEncoder>,
}

impl CodecSession {
    pub fn open(
        backend: &dyn MediaBackend,
        input: &TrackFormat,
        encoder_settings: &EncoderSettings,
        render: RenderSettings,
    ) -> Result<Self> {
        debug!(
            "Opening codec session: {} -> {} {} at {} bps",
            input.mime, encoder_settings.mime, encoder_settings.size, encoder_settings.bitrate
        );

        let (mut encoder, mut destination_surface) = backend.create_encoder(encoder_settings)?;
        let started = destination_surface
            .make_current()
            .map_err(TranscodeError::from)
            .and_then(|()| encoder.start());
        if let Err(e) = started {
            release_logged("destination surface", destination_surface.release());
            release_logged("encoder", encoder.release());
            return Err(e);
        }

        let (mut decoder, mut source_surface) = match backend.create_decoder(input, render) {
            Ok(pair) => pair,
            Err(e) => {
                release_logged("destination surface", destination_surface.release());
                release_logged("encoder", encoder.release());
                return Err(e);
            }
        };
        if let Err(e) = decoder.start() {
            release_logged("source surface", source_surface.release());
            release_logged("decoder", decoder.release());
            release_logged("destination surface", destination_surface.release());
            release_logged("encoder", encoder.release());
            return Err(e);
        }

        Ok(Self {
            source_surface,
            destination_surface,
            decoder,
            encoder,
        })
    }

    /// Draw the decoder's latest image onto the encoder surface and present it
    pub fn present(&mut self, presentation_time_us: i64) -> std::result::Result<(), RenderError> {
        self.source_surface.await_new_image()?;
        self.source_surface
            .draw_image(self.destination_surface.as_mut())?;
        self.destination_surface
            .set_presentation_time(presentation_time_us.saturating_mul(1_000))?;
        self.destination_surface.swap_buffers()
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        release_logged("source surface", self.source_surface.release());
        release_logged("decoder", self.decoder.release());
        release_logged("destination surface", self.destination_surface.release());
        release_logged("encoder", self.encoder.release());
        debug!("Codec session released");
    }
}

fn release_logged(what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Failed to release {}: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::media::{
        BufferIndex, Canvas, CodecEvent, DecodedBuffer, Demuxer, Dimensions, EncodedBuffer, Muxer,
        OutputLayout, Rotation, SampleUnit, SourceMetadata,
    };
    use crate::reference::ReferenceBackend;

    type ReleaseLog = Rc<RefCell<Vec<&'static str>>>;

    /// Reference components that note when they are released
    struct Logged<T> {
        inner: T,
        name: &'static str,
        log: ReleaseLog,
    }

    impl<T> Logged<T> {
        fn record(&self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    impl VideoEncoder for Logged<Box<dyn VideoEncoder>> {
        fn start(&mut self) -> Result<()> {
            self.inner.start()
        }
        fn signal_end_of_input(&mut self) -> Result<()> {
            self.inner.signal_end_of_input()
        }
        fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecEvent<EncodedBuffer>> {
            self.inner.dequeue_output(timeout)
        }
        fn release_output(&mut self, index: BufferIndex) -> Result<()> {
            self.inner.release_output(index)
        }
        fn release(&mut self) -> Result<()> {
            self.record();
            self.inner.release()
        }
    }

    impl VideoDecoder for Logged<Box<dyn VideoDecoder>> {
        fn start(&mut self) -> Result<()> {
            self.inner.start()
        }
        fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<BufferIndex>> {
            self.inner.dequeue_input(timeout)
        }
        fn queue_input(&mut self, index: BufferIndex, sample: SampleUnit) -> Result<()> {
            self.inner.queue_input(index, sample)
        }
        fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecEvent<DecodedBuffer>> {
            self.inner.dequeue_output(timeout)
        }
        fn release_output(&mut self, index: BufferIndex, render: bool) -> Result<()> {
            self.inner.release_output(index, render)
        }
        fn release(&mut self) -> Result<()> {
            self.record();
            self.inner.release()
        }
    }

    impl SourceSurface for Logged<Box<dyn SourceSurface>> {
        fn await_new_image(&mut self) -> std::result::Result<(), RenderError> {
            self.inner.await_new_image()
        }
        fn draw_image(&mut self, target: &mut dyn DestinationSurface) -> std::result::Result<(), RenderError> {
            self.inner.draw_image(target)
        }
        fn release(&mut self) -> Result<()> {
            self.record();
            self.inner.release()
        }
    }

    impl DestinationSurface for Logged<Box<dyn DestinationSurface>> {
        fn make_current(&mut self) -> std::result::Result<(), RenderError> {
            self.inner.make_current()
        }
        fn canvas(&mut self) -> std::result::Result<&mut Canvas, RenderError> {
            self.inner.canvas()
        }
        fn set_presentation_time(&mut self, time_ns: i64) -> std::result::Result<(), RenderError> {
            self.inner.set_presentation_time(time_ns)
        }
        fn swap_buffers(&mut self) -> std::result::Result<(), RenderError> {
            self.inner.swap_buffers()
        }
        fn release(&mut self) -> Result<()> {
            self.record();
            self.inner.release()
        }
    }

    struct LoggingBackend {
        inner: ReferenceBackend,
        log: ReleaseLog,
    }

    impl LoggingBackend {
        fn wrap<T>(&self, inner: T, name: &'static str) -> Logged<T> {
            Logged {
                inner,
                name,
                log: Rc::clone(&self.log),
            }
        }
    }

    impl MediaBackend for LoggingBackend {
        fn name(&self) -> &str {
            "logging"
        }
        fn probe(&self, path: &Path) -> Result<SourceMetadata> {
            self.inner.probe(path)
        }
        fn open_source(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
            self.inner.open_source(path)
        }
        fn create_muxer(&self, path: &Path, layout: OutputLayout) -> Result<Box<dyn Muxer>> {
            self.inner.create_muxer(path, layout)
        }
        fn create_encoder(
            &self,
            settings: &EncoderSettings,
        ) -> Result<(Box<dyn VideoEncoder>, Box<dyn DestinationSurface>)> {
            let (encoder, surface) = self.inner.create_encoder(settings)?;
            Ok((
                Box::new(self.wrap(encoder, "encoder")),
                Box::new(self.wrap(surface, "destination surface")),
            ))
        }
        fn create_decoder(
            &self,
            format: &TrackFormat,
            render: RenderSettings,
        ) -> Result<(Box<dyn VideoDecoder>, Box<dyn SourceSurface>)> {
            let (decoder, surface) = self.inner.create_decoder(format, render)?;
            Ok((
                Box::new(self.wrap(decoder, "decoder")),
                Box::new(self.wrap(surface, "source surface")),
            ))
        }
    }

    #[test]
    fn test_release_reverses_acquisition() {
        let log = ReleaseLog::default();
        let backend = LoggingBackend {
            inner: ReferenceBackend::default(),
            log: Rc::clone(&log),
        };
        let settings = EncoderSettings {
            mime: "video/avc".to_string(),
            size: Dimensions::new(16, 8),
            bitrate: 100_000,
            frame_rate: 10,
            keyframe_interval_secs: 1,
        };
        let render = RenderSettings {
            target: Dimensions::new(16, 8),
            rotation: Rotation::None,
        };

        let session = CodecSession::open(&backend, &TrackFormat::video("video/avc", 32, 16), &settings, render)
            .unwrap();
        assert!(log.borrow().is_empty());
        drop(session);

        assert_eq!(
            *log.borrow(),
            vec!["source surface", "decoder", "destination surface", "encoder"]
        );
    }
}
