//! Software decoder and encoder
//!
//! The reference bitstream is an Annex B stream in which every access unit
//! carries one uncompressed RGB picture:
//!
//! ```text
//! 00 00 00 01 | nal header | width (u32 BE) | height (u32 BE) | RGB bytes
//! ```
//!
//! Sync pictures use the IDR header, all others a plain slice header. The
//! configuration blob holds a sequence and a picture parameter set, both with
//! emulation prevention applied so they never contain a start code.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::{
    error::{CodecError, Result},
    media::{
        param_sets::START_CODE, BufferIndex, Canvas, CodecEvent, DecodedBuffer, Dimensions,
        EncodedBuffer, EncoderSettings, SampleFlags, SampleUnit, TrackFormat, VideoDecoder,
        VideoEncoder,
    },
    reference::surface::{EncoderQueue, FrameSlot},
};

const NAL_SLICE: u8 = 0x41;
const NAL_IDR: u8 = 0x65;
const NAL_SEI: u8 = 0x06;
const NAL_SPS: u8 = 0x67;
const NAL_PPS: u8 = 0x68;

/// Start code, header byte and the two dimension words
const PICTURE_HEADER_LEN: usize = START_CODE.len() + 1 + 8;

/// MIME type of decoded pictures
pub const RAW_VIDEO_MIME: &str = "video/raw";

/// Encode one picture as a reference access unit
pub fn encode_picture(picture: &Canvas, sync: bool) -> Bytes {
    let raw = picture.as_raw();
    let mut out = BytesMut::with_capacity(PICTURE_HEADER_LEN + raw.len());
    out.put_slice(&START_CODE);
    out.put_u8(if sync { NAL_IDR } else { NAL_SLICE });
    out.put_u32(picture.width());
    out.put_u32(picture.height());
    out.put_slice(raw);
    out.freeze()
}

/// Decode a reference access unit back into a picture
pub fn decode_picture(data: &[u8]) -> std::result::Result<Canvas, CodecError> {
    let malformed = |reason: &str| CodecError::QueueFailed {
        reason: format!("malformed access unit: {}", reason),
    };

    if data.len() < PICTURE_HEADER_LEN || data[..START_CODE.len()] != START_CODE {
        return Err(malformed("missing picture header"));
    }
    let header = data[START_CODE.len()];
    if header != NAL_IDR && header != NAL_SLICE {
        return Err(malformed("not a picture unit"));
    }

    let word = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    let width = word(START_CODE.len() + 1);
    let height = word(START_CODE.len() + 5);
    let pixels = data[PICTURE_HEADER_LEN..].to_vec();

    Canvas::from_raw(width, height, pixels).ok_or_else(|| malformed("pixel data does not match dimensions"))
}

/// Configuration blob announcing the stream parameters
///
/// Without parameter sets only a supplemental unit is emitted, which leaves
/// the receiver with nothing to register.
pub fn codec_config(size: Dimensions, frame_rate: u32, with_parameter_sets: bool) -> Bytes {
    let mut out = BytesMut::new();
    if with_parameter_sets {
        let mut sps = vec![NAL_SPS, 0x42, 0x00, 0x1F];
        sps.extend_from_slice(&size.width.to_be_bytes());
        sps.extend_from_slice(&size.height.to_be_bytes());
        sps.extend_from_slice(&frame_rate.to_be_bytes());
        put_unit(&mut out, &sps);
        put_unit(&mut out, &[NAL_PPS, 0xCE, 0x3C, 0x80]);
    } else {
        put_unit(&mut out, &[NAL_SEI, 0x05, 0x01, 0x80]);
    }
    out.freeze()
}

fn put_unit(out: &mut BytesMut, unit: &[u8]) {
    out.put_slice(&START_CODE);
    out.put_slice(&escape_emulation(unit));
}

/// Insert 0x03 after every two zero bytes followed by a byte <= 3
fn escape_emulation(unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(unit.len() + unit.len() / 2);
    let mut zeros = 0;
    for &byte in unit {
        if zeros >= 2 && byte <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

struct DecodedPicture {
    picture: Option<Canvas>,
    presentation_time_us: i64,
    flags: SampleFlags,
}

impl DecodedPicture {
    fn size(&self) -> usize {
        self.picture.as_ref().map_or(0, |p| p.as_raw().len())
    }
}

/// Decoder for the reference bitstream
///
/// Holds back `latency` pictures before releasing output, like a hardware
/// decoder with reordering delay, until the end of input flushes them.
pub struct SoftwareDecoder {
    input_slots: usize,
    latency: usize,
    started: bool,
    input_ended: bool,
    format_announced: bool,
    next_index: usize,
    claimed: HashSet<usize>,
    pending: VecDeque<DecodedPicture>,
    held: HashMap<usize, DecodedPicture>,
    surface: Rc<RefCell<FrameSlot>>,
}

impl SoftwareDecoder {
    pub(crate) fn new(input_slots: usize, latency: usize, surface: Rc<RefCell<FrameSlot>>) -> Self {
        Self {
            input_slots: input_slots.max(1),
            latency,
            started: false,
            input_ended: false,
            format_announced: false,
            next_index: 0,
            claimed: HashSet::new(),
            pending: VecDeque::new(),
            held: HashMap::new(),
            surface,
        }
    }

    fn in_flight(&self) -> usize {
        self.claimed.len() + self.pending.len() + self.held.len()
    }

    fn next_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        index
    }
}

impl VideoDecoder for SoftwareDecoder {
    fn start(&mut self) -> Result<()> {
        debug!("Software decoder started ({} slots, latency {})", self.input_slots, self.latency);
        self.started = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<BufferIndex>> {
        if !self.started {
            return Err(CodecError::DequeueFailed { reason: "decoder not started".to_string() }.into());
        }
        if self.input_ended || self.in_flight() >= self.input_slots {
            return Ok(None);
        }
        let index = self.next_index();
        self.claimed.insert(index);
        Ok(Some(BufferIndex(index)))
    }

    fn queue_input(&mut self, index: BufferIndex, sample: SampleUnit) -> Result<()> {
        if !self.claimed.remove(&index.0) {
            return Err(CodecError::UnknownBuffer { index: index.0 }.into());
        }

        if sample.is_end_of_stream() {
            debug!("Software decoder received end of input");
            self.input_ended = true;
            self.pending.push_back(DecodedPicture {
                picture: None,
                presentation_time_us: sample.presentation_time_us,
                flags: SampleFlags::END_OF_STREAM,
            });
            return Ok(());
        }

        let picture = decode_picture(&sample.data)?;
        trace!("Decoded {}x{} picture at {}us", picture.width(), picture.height(), sample.presentation_time_us);
        self.pending.push_back(DecodedPicture {
            picture: Some(picture),
            presentation_time_us: sample.presentation_time_us,
            flags: sample.flags & SampleFlags::SYNC,
        });
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecEvent<DecodedBuffer>> {
        if !self.started {
            return Err(CodecError::DequeueFailed { reason: "decoder not started".to_string() }.into());
        }

        if !self.format_announced {
            if let Some(picture) = self.pending.iter().find_map(|p| p.picture.as_ref()) {
                self.format_announced = true;
                let format = TrackFormat::video(RAW_VIDEO_MIME, picture.width(), picture.height());
                return Ok(CodecEvent::FormatChanged(format));
            }
        }

        if self.pending.len() <= self.latency && !self.input_ended {
            return Ok(CodecEvent::TryAgain);
        }
        let Some(picture) = self.pending.pop_front() else {
            return Ok(CodecEvent::TryAgain);
        };

        let index = self.next_index();
        let buffer = DecodedBuffer {
            index: BufferIndex(index),
            size: picture.size(),
            presentation_time_us: picture.presentation_time_us,
            flags: picture.flags,
        };
        self.held.insert(index, picture);
        Ok(CodecEvent::Buffer(buffer))
    }

    fn release_output(&mut self, index: BufferIndex, render: bool) -> Result<()> {
        let picture = self
            .held
            .remove(&index.0)
            .ok_or(CodecError::UnknownBuffer { index: index.0 })?;

        if render {
            if let Some(image) = picture.picture {
                self.surface.borrow_mut().post(image, picture.presentation_time_us);
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.started = false;
        self.claimed.clear();
        self.pending.clear();
        self.held.clear();
        Ok(())
    }
}

/// Encoder for the reference bitstream, fed through an [`EncoderQueue`]
pub struct SoftwareEncoder {
    settings: EncoderSettings,
    queue: Rc<RefCell<EncoderQueue>>,
    with_parameter_sets: bool,
    silent: bool,
    restless: bool,
    data_before_config: bool,
    started: bool,
    format_announced: bool,
    config_sent: bool,
    end_requested: bool,
    end_sent: bool,
    frames_encoded: u64,
    last_time_us: i64,
    next_index: usize,
    held: HashSet<usize>,
}

impl SoftwareEncoder {
    pub(crate) fn new(settings: EncoderSettings, queue: Rc<RefCell<EncoderQueue>>) -> Self {
        Self {
            settings,
            queue,
            with_parameter_sets: true,
            silent: false,
            restless: false,
            data_before_config: false,
            started: false,
            format_announced: false,
            config_sent: false,
            end_requested: false,
            end_sent: false,
            frames_encoded: 0,
            last_time_us: 0,
            next_index: 0,
            held: HashSet::new(),
        }
    }

    pub(crate) fn without_parameter_sets(mut self) -> Self {
        self.with_parameter_sets = false;
        self
    }

    /// Never produce output, to simulate a hung codec
    pub(crate) fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Announce a new output format on every poll instead of producing output
    pub(crate) fn restless(mut self) -> Self {
        self.restless = true;
        self
    }

    /// Hand out the first frame before the configuration buffer
    pub(crate) fn data_before_config(mut self) -> Self {
        self.data_before_config = true;
        self
    }

    fn frames_per_keyframe(&self) -> u64 {
        u64::from(self.settings.frame_rate) * u64::from(self.settings.keyframe_interval_secs)
    }

    fn hand_out(&mut self, data: Bytes, presentation_time_us: i64, flags: SampleFlags) -> CodecEvent<EncodedBuffer> {
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        self.held.insert(index);
        CodecEvent::Buffer(EncodedBuffer {
            index: BufferIndex(index),
            data,
            presentation_time_us,
            flags,
        })
    }
}

impl VideoEncoder for SoftwareEncoder {
    fn start(&mut self) -> Result<()> {
        debug!(
            "Software encoder started: {} at {} fps, keyframe every {}s",
            self.settings.size, self.settings.frame_rate, self.settings.keyframe_interval_secs
        );
        self.started = true;
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        if !self.started {
            return Err(CodecError::QueueFailed { reason: "encoder not started".to_string() }.into());
        }
        self.end_requested = true;
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecEvent<EncodedBuffer>> {
        if !self.started {
            return Err(CodecError::DequeueFailed { reason: "encoder not started".to_string() }.into());
        }
        if self.silent || self.end_sent {
            return Ok(CodecEvent::TryAgain);
        }

        if self.restless || !self.format_announced {
            self.format_announced = true;
            return Ok(CodecEvent::FormatChanged(self.settings.track_format()));
        }

        if self.data_before_config && !self.config_sent {
            let next = self.queue.borrow_mut().frames.pop_front();
            let Some((picture, presentation_time_us)) = next else {
                return Ok(CodecEvent::TryAgain);
            };
            self.data_before_config = false;
            let data = encode_picture(&picture, true);
            return Ok(self.hand_out(data, presentation_time_us, SampleFlags::SYNC));
        }

        if !self.config_sent {
            self.config_sent = true;
            let config = codec_config(self.settings.size, self.settings.frame_rate, self.with_parameter_sets);
            return Ok(self.hand_out(config, 0, SampleFlags::CODEC_CONFIG));
        }

        let next = self.queue.borrow_mut().frames.pop_front();
        if let Some((picture, presentation_time_us)) = next {
            let interval = self.frames_per_keyframe();
            let sync = interval == 0 || self.frames_encoded % interval == 0;
            self.frames_encoded += 1;
            self.last_time_us = presentation_time_us;

            let flags = if sync { SampleFlags::SYNC } else { SampleFlags::empty() };
            let data = encode_picture(&picture, sync);
            return Ok(self.hand_out(data, presentation_time_us, flags));
        }

        if self.end_requested {
            debug!("Software encoder drained after {} frames", self.frames_encoded);
            self.end_sent = true;
            let last = self.last_time_us;
            return Ok(self.hand_out(Bytes::new(), last, SampleFlags::END_OF_STREAM));
        }

        Ok(CodecEvent::TryAgain)
    }

    fn release_output(&mut self, index: BufferIndex) -> Result<()> {
        if self.held.remove(&index.0) {
            Ok(())
        } else {
            Err(CodecError::UnknownBuffer { index: index.0 }.into())
        }
    }

    fn release(&mut self) -> Result<()> {
        self.started = false;
        self.held.clear();
        self.queue.borrow_mut().frames.clear();
        Ok(())
    }
}
