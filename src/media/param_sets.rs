//! Codec configuration parsing
//!
//! The encoder's first configuration output is an Annex B byte stream holding
//! the parameter sets a decoder needs before the first frame. The stream is
//! split on start codes and each unit is classified by its own header, so
//! several sets of one kind and units in any order are handled.

use bytes::{BufMut, Bytes, BytesMut};

/// Four-byte Annex B start code
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_TYPE_MASK: u8 = 0x1F;
const NAL_TYPE_SEQUENCE_PARAMETER_SET: u8 = 7;
const NAL_TYPE_PICTURE_PARAMETER_SET: u8 = 8;

/// What a configuration unit carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    SequenceParameterSet,
    PictureParameterSet,
    Other(u8),
}

impl From<u8> for UnitKind {
    fn from(header: u8) -> Self {
        match header & NAL_TYPE_MASK {
            NAL_TYPE_SEQUENCE_PARAMETER_SET => UnitKind::SequenceParameterSet,
            NAL_TYPE_PICTURE_PARAMETER_SET => UnitKind::PictureParameterSet,
            other => UnitKind::Other(other),
        }
    }
}

/// Parameter sets found in a configuration blob, without start codes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecConfig {
    pub sequence_sets: Vec<Bytes>,
    pub picture_sets: Vec<Bytes>,
    pub other_units: Vec<Bytes>,
}

impl CodecConfig {
    /// Split a blob on its start codes and sort the units by kind
    pub fn parse(blob: &[u8]) -> Self {
        let mut config = Self::default();
        for unit in split_annex_b(blob) {
            let payload = Bytes::copy_from_slice(unit);
            match UnitKind::from(unit[0]) {
                UnitKind::SequenceParameterSet => config.sequence_sets.push(payload),
                UnitKind::PictureParameterSet => config.picture_sets.push(payload),
                UnitKind::Other(_) => config.other_units.push(payload),
            }
        }
        config
    }

    /// Both a sequence and a picture parameter set are present
    pub fn is_complete(&self) -> bool {
        !self.sequence_sets.is_empty() && !self.picture_sets.is_empty()
    }

    /// Sequence parameter sets, start-code prefixed
    pub fn csd0(&self) -> Option<Bytes> {
        join_with_start_codes(&self.sequence_sets)
    }

    /// Picture parameter sets, start-code prefixed
    pub fn csd1(&self) -> Option<Bytes> {
        join_with_start_codes(&self.picture_sets)
    }

    /// Blobs to attach to the output track, empty unless the config is complete
    pub fn codec_specific_data(&self) -> Vec<Bytes> {
        match (self.is_complete(), self.csd0(), self.csd1()) {
            (true, Some(sequence), Some(picture)) => vec![sequence, picture],
            _ => Vec::new(),
        }
    }
}

/// Units between 3- or 4-byte start codes, trailing zero bytes removed
fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    // (start code offset, payload offset)
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(n, &(_, payload))| {
            let mut end = starts.get(n + 1).map_or(data.len(), |&(code, _)| code);
            while end > payload && data[end - 1] == 0 {
                end -= 1;
            }
            (end > payload).then(|| &data[payload..end])
        })
        .collect()
}

fn join_with_start_codes(units: &[Bytes]) -> Option<Bytes> {
    if units.is_empty() {
        return None;
    }
    let capacity = units.iter().map(|u| u.len() + START_CODE.len()).sum();
    let mut out = BytesMut::with_capacity(capacity);
    for unit in units {
        out.put_slice(&START_CODE);
        out.put_slice(unit);
    }
    Some(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 6] = [0x67, 0x42, 0x00, 0x1f, 0xe9, 0x01];
    const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    fn blob(units: &[&[u8]], start_code: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(start_code);
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn test_splits_sequence_and_picture_sets() {
        let config = CodecConfig::parse(&blob(&[&SPS, &PPS], &START_CODE));
        assert!(config.is_complete());
        assert_eq!(config.sequence_sets, vec![Bytes::from_static(&SPS)]);
        assert_eq!(config.picture_sets, vec![Bytes::from_static(&PPS)]);

        let csd = config.codec_specific_data();
        assert_eq!(csd.len(), 2);
        assert_eq!(&csd[0][..4], &START_CODE);
        assert_eq!(&csd[0][4..], &SPS);
        assert_eq!(&csd[1][4..], &PPS);
    }

    #[test]
    fn test_three_byte_start_codes() {
        let config = CodecConfig::parse(&blob(&[&SPS, &PPS], &[0, 0, 1]));
        assert!(config.is_complete());
        assert_eq!(config.picture_sets[0].as_ref(), &PPS);
    }

    #[test]
    fn test_keeps_every_set_of_a_kind() {
        let second_pps = [0x68, 0xee, 0x01];
        let config = CodecConfig::parse(&blob(&[&SPS, &PPS, &second_pps], &START_CODE));
        assert_eq!(config.picture_sets.len(), 2);

        let csd1 = config.csd1().unwrap();
        assert_eq!(csd1.len(), 2 * START_CODE.len() + PPS.len() + second_pps.len());
    }

    #[test]
    fn test_order_does_not_matter() {
        let config = CodecConfig::parse(&blob(&[&PPS, &SPS], &START_CODE));
        assert!(config.is_complete());
        assert_eq!(config.sequence_sets[0].as_ref(), &SPS);
    }

    #[test]
    fn test_missing_start_code_yields_nothing() {
        let mut raw = SPS.to_vec();
        raw.extend_from_slice(&PPS);
        let config = CodecConfig::parse(&raw);
        assert!(!config.is_complete());
        assert!(config.codec_specific_data().is_empty());
    }

    #[test]
    fn test_only_sequence_set_is_incomplete() {
        let config = CodecConfig::parse(&blob(&[&SPS], &START_CODE));
        assert!(!config.is_complete());
        assert!(config.csd0().is_some());
        assert!(config.codec_specific_data().is_empty());
    }

    #[test]
    fn test_other_units_are_kept_aside() {
        let sei = [0x06, 0x05, 0x01];
        let config = CodecConfig::parse(&blob(&[&SPS, &sei, &PPS], &START_CODE));
        assert_eq!(config.other_units, vec![Bytes::copy_from_slice(&sei)]);
        assert!(config.is_complete());
    }
}
