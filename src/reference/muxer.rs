use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::{
    error::{MuxerError, Result},
    media::{Muxer, OutputLayout, SampleUnit, TrackFormat, TrackHandle},
    reference::movie::Movie,
};

/// Muxer collecting samples into a [`Movie`]
///
/// The output file is created up front and only holds a movie once
/// [`Muxer::finalize`] succeeded.
pub struct MemoryMuxer {
    movie: Rc<RefCell<Movie>>,
    path: Option<PathBuf>,
    finalized: bool,
}

impl MemoryMuxer {
    pub fn create<P: AsRef<Path>>(path: P, layout: OutputLayout) -> Result<Self> {
        let path = path.as_ref();
        fs::File::create(path).map_err(|e| MuxerError::CreateFailed {
            path: format!("{}: {}", path.display(), e),
        })?;
        debug!("Created output {} ({}, rotation {})", path.display(), layout.size, layout.rotation.degrees());

        Ok(Self {
            movie: Rc::new(RefCell::new(Self::empty_movie(layout))),
            path: Some(path.to_path_buf()),
            finalized: false,
        })
    }

    /// Muxer without a file; the returned handle sees every write as it happens
    pub fn detached() -> (Self, Rc<RefCell<Movie>>) {
        let movie = Rc::new(RefCell::new(Movie::default()));
        let muxer = Self {
            movie: Rc::clone(&movie),
            path: None,
            finalized: false,
        };
        (muxer, movie)
    }

    fn empty_movie(layout: OutputLayout) -> Movie {
        Movie {
            rotation_degrees: layout.rotation.degrees() as i32,
            tracks: Vec::new(),
        }
    }
}

impl Muxer for MemoryMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackHandle> {
        if self.finalized {
            return Err(MuxerError::AddTrackFailed { reason: "output already finalized".to_string() }.into());
        }
        let index = self.movie.borrow_mut().add_track(format.clone(), Vec::new());
        info!("Added output track {} ({})", index, format.mime);
        Ok(TrackHandle(index))
    }

    fn write_sample(&mut self, track: TrackHandle, sample: &SampleUnit) -> Result<bool> {
        if self.finalized {
            return Err(MuxerError::WriteFailed { reason: "output already finalized".to_string() }.into());
        }
        let mut movie = self.movie.borrow_mut();
        let target = movie
            .tracks
            .get_mut(track.0)
            .ok_or(MuxerError::UnknownTrack { handle: track.0 })?;

        if sample.is_empty() {
            return Ok(false);
        }
        target.samples.push(sample.clone());
        Ok(true)
    }

    fn finalize(&mut self, truncate: bool) -> Result<()> {
        if self.finalized {
            return Err(MuxerError::FinalizeFailed { reason: "output already finalized".to_string() }.into());
        }
        self.finalized = true;

        let movie = self.movie.borrow();
        if movie.tracks.is_empty() {
            return Err(MuxerError::FinalizeFailed { reason: "no tracks were added".to_string() }.into());
        }

        let Some(path) = &self.path else {
            return Ok(());
        };
        if truncate {
            warn!("Discarding output {}", path.display());
            fs::remove_file(path)?;
            return Ok(());
        }

        movie.save(path).map_err(|e| MuxerError::FinalizeFailed { reason: e.to_string() })?;
        info!(
            "Finalized {} with {} tracks, {} samples",
            path.display(),
            movie.tracks.len(),
            movie.tracks.iter().map(|t| t.samples.len()).sum::<usize>()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Dimensions, Rotation, SampleFlags};
    use tempfile::tempdir;

    fn layout() -> OutputLayout {
        OutputLayout {
            size: Dimensions::new(8, 8),
            rotation: Rotation::None,
        }
    }

    #[test]
    fn test_finalized_output_can_be_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut muxer = MemoryMuxer::create(&path, layout()).unwrap();
        assert!(path.exists());

        let track = muxer.add_track(&TrackFormat::video("video/avc", 8, 8)).unwrap();
        let sample = SampleUnit::new(vec![1, 2, 3], 0, SampleFlags::SYNC);
        assert!(muxer.write_sample(track, &sample).unwrap());
        assert!(!muxer.write_sample(track, &SampleUnit::new(Vec::new(), 1, SampleFlags::empty())).unwrap());
        muxer.finalize(false).unwrap();

        let movie = Movie::load(&path).unwrap();
        assert_eq!(movie.tracks[0].samples, vec![sample]);
        assert!(muxer.finalize(false).is_err());
    }

    #[test]
    fn test_unknown_track_is_an_error() {
        let (mut muxer, _) = MemoryMuxer::detached();
        let sample = SampleUnit::new(vec![1], 0, SampleFlags::SYNC);
        assert!(muxer.write_sample(TrackHandle(3), &sample).is_err());
    }

    #[test]
    fn test_finalize_without_tracks_fails() {
        let (mut muxer, _) = MemoryMuxer::detached();
        assert!(matches!(
            muxer.finalize(false),
            Err(crate::error::TranscodeError::Muxer(MuxerError::FinalizeFailed { .. }))
        ));
    }

    #[test]
    fn test_truncate_discards_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut muxer = MemoryMuxer::create(&path, layout()).unwrap();
        muxer.add_track(&TrackFormat::audio("audio/mp4a-latm", 44_100, 2)).unwrap();
        muxer.finalize(true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let result = MemoryMuxer::create(dir.path().join("nope").join("out.mp4"), layout());
        assert!(result.is_err());
    }
}
