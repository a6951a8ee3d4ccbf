use tracing::debug;

use crate::media::{Demuxer, MediaKind};

/// Index of the first track of the requested kind, scanning in index order
///
/// Tracks whose format cannot be read are skipped. Only the first match is
/// ever used, so additional tracks of the same kind are ignored.
pub fn select_track(source: &dyn Demuxer, kind: MediaKind) -> Option<usize> {
    let found = (0..source.track_count()).find(|&index| {
        source
            .track_format(index)
            .map(|format| kind.matches(&format.mime))
            .unwrap_or(false)
    });
    debug!("Selected {} track: {:?}", kind, found);
    found
}
