use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, trace};

use crate::{
    error::{Result, SourceError},
    media::{Demuxer, SampleUnit, TrackFormat},
    reference::movie::Movie,
};

/// Demultiplexer over an in-memory [`Movie`]
///
/// Samples of all selected tracks are returned interleaved by presentation
/// time, lower track index first on ties.
#[derive(Debug, Clone)]
pub struct MemoryDemuxer {
    movie: Movie,
    selected: BTreeSet<usize>,
    /// Next sample per track
    positions: Vec<usize>,
}

impl MemoryDemuxer {
    pub fn new(movie: Movie) -> Self {
        let positions = vec![0; movie.tracks.len()];
        Self {
            movie,
            selected: BTreeSet::new(),
            positions,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Movie::load(path).map(Self::new)
    }

    pub fn movie(&self) -> &Movie {
        &self.movie
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.movie.tracks.len() {
            Ok(())
        } else {
            Err(SourceError::NoSuchTrack { index }.into())
        }
    }

    /// Selected track whose next sample comes first
    fn current(&self) -> Option<(usize, &SampleUnit)> {
        self.selected
            .iter()
            .filter_map(|&track| {
                self.movie.tracks[track]
                    .samples
                    .get(self.positions[track])
                    .map(|sample| (track, sample))
            })
            .min_by_key(|(track, sample)| (sample.presentation_time_us, *track))
    }
}

impl Demuxer for MemoryDemuxer {
    fn track_count(&self) -> usize {
        self.movie.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        self.check_index(index)?;
        Ok(self.movie.tracks[index].format.clone())
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        debug!("Selecting track {}", index);
        self.selected.insert(index);
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        debug!("Unselecting track {}", index);
        self.selected.remove(&index);
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        for &track in &self.selected {
            let samples = &self.movie.tracks[track].samples;
            let position = samples
                .iter()
                .rposition(|s| s.is_sync() && s.presentation_time_us <= time_us)
                .unwrap_or(0);
            trace!("Track {} seek to {}us lands on sample {}", track, time_us, position);
            self.positions[track] = position;
        }
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(track, _)| track)
    }

    fn read_sample(&mut self) -> Result<Option<SampleUnit>> {
        Ok(self.current().map(|(_, sample)| sample.clone()))
    }

    fn advance(&mut self) -> bool {
        let Some(track) = self.sample_track_index() else {
            return false;
        };
        self.positions[track] += 1;
        self.current().is_some()
    }

    fn release(&mut self) -> Result<()> {
        self.selected.clear();
        Ok(())
    }
}
