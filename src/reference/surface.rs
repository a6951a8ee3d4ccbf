//! Render surfaces backed by in-memory images

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use image::imageops;
use tracing::trace;

use crate::{
    error::{RenderError, Result},
    media::{Canvas, Dimensions, DestinationSurface, Rotation, SourceSurface},
    reference::ScaleFilter,
};

/// Latest picture the decoder rendered
#[derive(Debug, Default)]
pub(crate) struct FrameSlot {
    picture: Option<Canvas>,
    presentation_time_us: i64,
    fresh: bool,
}

impl FrameSlot {
    pub(crate) fn post(&mut self, picture: Canvas, presentation_time_us: i64) {
        self.picture = Some(picture);
        self.presentation_time_us = presentation_time_us;
        self.fresh = true;
    }

    pub(crate) fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Pictures presented to the encoder with their timestamps in microseconds
#[derive(Debug, Default)]
pub(crate) struct EncoderQueue {
    pub(crate) frames: VecDeque<(Canvas, i64)>,
}

/// Surface the software decoder renders onto
///
/// Drawing rotates the picture upright and scales it to the destination's
/// canvas.
pub struct DecoderSurface {
    slot: Rc<RefCell<FrameSlot>>,
    rotation: Rotation,
    filter: ScaleFilter,
    /// Timestamps whose pictures are reported unavailable
    failing: Vec<i64>,
    released: bool,
}

impl DecoderSurface {
    pub(crate) fn new(slot: Rc<RefCell<FrameSlot>>, rotation: Rotation, filter: ScaleFilter) -> Self {
        Self {
            slot,
            rotation,
            filter,
            failing: Vec::new(),
            released: false,
        }
    }

    pub(crate) fn with_failures(mut self, failing: Vec<i64>) -> Self {
        self.failing = failing;
        self
    }
}

/// Rotate a picture clockwise so it displays upright
pub fn upright(picture: &Canvas, rotation: Rotation) -> Canvas {
    match rotation {
        Rotation::None => picture.clone(),
        Rotation::Clockwise90 => imageops::rotate90(picture),
        Rotation::Clockwise180 => imageops::rotate180(picture),
        Rotation::Clockwise270 => imageops::rotate270(picture),
    }
}

impl SourceSurface for DecoderSurface {
    fn await_new_image(&mut self) -> std::result::Result<(), RenderError> {
        if self.released {
            return Err(RenderError::SurfaceUnavailable { reason: "surface released".to_string() });
        }

        let mut slot = self.slot.borrow_mut();
        if !slot.fresh {
            return Err(RenderError::FrameTimeout);
        }
        if self.failing.contains(&slot.presentation_time_us) {
            slot.fresh = false;
            return Err(RenderError::SurfaceUnavailable {
                reason: format!("picture at {}us lost", slot.presentation_time_us),
            });
        }
        Ok(())
    }

    fn draw_image(&mut self, target: &mut dyn DestinationSurface) -> std::result::Result<(), RenderError> {
        let mut slot = self.slot.borrow_mut();
        let picture = slot.picture.as_ref().ok_or(RenderError::FrameTimeout)?;
        let canvas = target.canvas()?;

        let oriented = upright(picture, self.rotation);
        let (width, height) = canvas.dimensions();
        if oriented.dimensions() == (width, height) {
            *canvas = oriented;
        } else {
            trace!("Scaling {:?} picture to {}x{}", oriented.dimensions(), width, height);
            *canvas = imageops::resize(&oriented, width, height, self.filter.filter_type());
        }

        slot.fresh = false;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        self.slot.borrow_mut().picture = None;
        Ok(())
    }
}

/// Input surface of the software encoder
pub struct EncoderSurface {
    canvas: Canvas,
    queue: Rc<RefCell<EncoderQueue>>,
    presentation_time_ns: Option<i64>,
    current: bool,
    released: bool,
}

impl EncoderSurface {
    pub(crate) fn new(size: Dimensions, queue: Rc<RefCell<EncoderQueue>>) -> Self {
        Self {
            canvas: Canvas::new(size.width, size.height),
            queue,
            presentation_time_ns: None,
            current: false,
            released: false,
        }
    }

    fn ensure_usable(&self) -> std::result::Result<(), RenderError> {
        if self.released {
            Err(RenderError::SurfaceUnavailable { reason: "surface released".to_string() })
        } else if !self.current {
            Err(RenderError::SurfaceUnavailable { reason: "surface not current".to_string() })
        } else {
            Ok(())
        }
    }
}

impl DestinationSurface for EncoderSurface {
    fn make_current(&mut self) -> std::result::Result<(), RenderError> {
        if self.released {
            return Err(RenderError::SurfaceUnavailable { reason: "surface released".to_string() });
        }
        self.current = true;
        Ok(())
    }

    fn canvas(&mut self) -> std::result::Result<&mut Canvas, RenderError> {
        self.ensure_usable()?;
        Ok(&mut self.canvas)
    }

    fn set_presentation_time(&mut self, time_ns: i64) -> std::result::Result<(), RenderError> {
        self.ensure_usable()?;
        self.presentation_time_ns = Some(time_ns);
        Ok(())
    }

    fn swap_buffers(&mut self) -> std::result::Result<(), RenderError> {
        self.ensure_usable()?;
        let time_ns = self.presentation_time_ns.take().ok_or_else(|| RenderError::SurfaceUnavailable {
            reason: "no presentation time set".to_string(),
        })?;
        self.queue
            .borrow_mut()
            .frames
            .push_back((self.canvas.clone(), time_ns / 1_000));
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        self.current = false;
        Ok(())
    }
}
