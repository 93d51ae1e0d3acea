//! LED output pipeline: gamma correction, wire-order packing, and
//! double-buffered transmission.
//!
//! Accepts a fully populated per-global-index frame buffer in any of the
//! supported pixel formats and drives it onto the hardware through a
//! [`StripDriver`]. Two wire-order buffers per segment alternate so CPU
//! packing of frame N+1 overlaps the hardware transmit of frame N.

use heapless::Vec as BoundedVec;
use ledgrid_hal::{SegmentChannel, StripDriver};

use crate::layout::{Layout, LayoutError, MAX_SEGMENTS};

/// Gamma exponent times 100 used when the build does not override it.
pub const DEFAULT_GAMMA_X100: u16 = 280;

/// Byte order of one pixel in a frame buffer handed to the pipeline.
///
/// For the W-bearing formats the white channel is folded into R, G, and B
/// with saturation before gamma correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb = 0,
    Rgbw = 1,
    Grb = 2,
    Grbw = 3,
    Bgr = 4,
}

impl PixelFormat {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Rgb),
            1 => Some(Self::Rgbw),
            2 => Some(Self::Grb),
            3 => Some(Self::Grbw),
            4 => Some(Self::Bgr),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb | Self::Grb | Self::Bgr => 3,
            Self::Rgbw | Self::Grbw => 4,
        }
    }

    /// Split one pixel into `(r, g, b, w)`; `w` is 0 for 3-byte formats.
    fn unpack(self, pixel: &[u8]) -> (u8, u8, u8, u8) {
        match self {
            Self::Rgb => (pixel[0], pixel[1], pixel[2], 0),
            Self::Rgbw => (pixel[0], pixel[1], pixel[2], pixel[3]),
            Self::Grb => (pixel[1], pixel[0], pixel[2], 0),
            Self::Grbw => (pixel[1], pixel[0], pixel[2], pixel[3]),
            Self::Bgr => (pixel[2], pixel[1], pixel[0], 0),
        }
    }
}

/// Output pipeline failure, generic over the driver's error type.
#[derive(Debug)]
pub enum OutputError<E> {
    InvalidArg,
    /// Pipeline not initialized or a slot was not in the expected state.
    InvalidState,
    /// Frame buffer too small for the configured layout.
    InvalidSize,
    Driver(E),
}

impl<E: core::fmt::Debug> From<E> for OutputError<E> {
    fn from(e: E) -> Self {
        OutputError::Driver(e)
    }
}

impl<E> OutputError<E> {
    fn from_layout(e: LayoutError) -> Self {
        match e {
            LayoutError::InvalidArg => OutputError::InvalidArg,
            LayoutError::InvalidSize => OutputError::InvalidSize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Packing,
    InFlight,
}

/// One double-buffer slot: a wire-order buffer per segment.
struct FrameSlot {
    state: SlotState,
    wire: Vec<Vec<u8>>,
}

/// Double-buffered gamma-correcting LED output, generic over the transmit
/// hardware.
pub struct LedOutput<D: StripDriver> {
    driver: D,
    layout: Layout,
    gamma_x100: u16,
    gamma_lut: [u8; 256],
    slots: [FrameSlot; 2],
    active_slot: usize,
}

impl<D: StripDriver> LedOutput<D> {
    /// Validate the layout, build the gamma table, allocate both wire
    /// buffer sets, and claim the hardware channels.
    pub fn new(
        mut driver: D,
        layout: &Layout,
        gamma_x100: u16,
    ) -> Result<Self, OutputError<D::Error>> {
        layout.validate().map_err(OutputError::from_layout)?;
        if gamma_x100 == 0 {
            return Err(OutputError::InvalidArg);
        }

        let channels: BoundedVec<SegmentChannel, MAX_SEGMENTS> = layout
            .segments
            .iter()
            .map(|segment| SegmentChannel {
                gpio: segment.gpio,
                led_count: segment.led_count,
            })
            .collect();
        driver.configure(&channels)?;

        let make_slot = || FrameSlot {
            state: SlotState::Idle,
            wire: layout
                .segments
                .iter()
                .map(|segment| vec![0u8; usize::from(segment.led_count) * 3])
                .collect(),
        };

        Ok(Self {
            driver,
            layout: layout.clone(),
            gamma_x100,
            gamma_lut: build_gamma_lut(gamma_x100),
            slots: [make_slot(), make_slot()],
            active_slot: 0,
        })
    }

    pub fn gamma_x100(&self) -> u16 {
        self.gamma_x100
    }

    /// Gamma-corrected output byte for one input channel byte.
    pub fn gamma_correct(&self, value: u8) -> u8 {
        self.gamma_lut[usize::from(value)]
    }

    /// Pack and transmit one full frame.
    ///
    /// `frame` holds `total_leds * bytes_per_pixel` bytes indexed by global
    /// LED index; `bytes_per_pixel` must match `format`. Packing goes into
    /// the inactive slot, then the pipeline waits out any in-flight
    /// transmit, swaps slots, and starts a synchronized transmit on all
    /// segments.
    pub fn push_frame(
        &mut self,
        frame: &[u8],
        format: PixelFormat,
        bytes_per_pixel: usize,
    ) -> Result<(), OutputError<D::Error>> {
        if bytes_per_pixel != format.bytes_per_pixel() {
            return Err(OutputError::InvalidArg);
        }
        let total = self.layout.total_leds() as usize;
        let expected = total
            .checked_mul(bytes_per_pixel)
            .ok_or(OutputError::InvalidSize)?;
        if frame.len() < expected {
            return Err(OutputError::InvalidSize);
        }

        let slot = self.active_slot ^ 1;
        if self.slots[slot].state == SlotState::InFlight {
            return Err(OutputError::InvalidState);
        }
        self.slots[slot].state = SlotState::Packing;

        let mut global = 0usize;
        for (segment, wire) in self.slots[slot].wire.iter_mut().enumerate() {
            let led_count = usize::from(self.layout.segments[segment].led_count);
            for led in 0..led_count {
                let src = (global + led) * bytes_per_pixel;
                let (r, g, b, w) = format.unpack(&frame[src..src + bytes_per_pixel]);
                let (r, g, b) = fold_white(r, g, b, w);
                // WS2812-family wire order is GRB.
                wire[led * 3] = self.gamma_lut[usize::from(g)];
                wire[led * 3 + 1] = self.gamma_lut[usize::from(r)];
                wire[led * 3 + 2] = self.gamma_lut[usize::from(b)];
            }
            global += led_count;
        }

        self.transmit_slot(slot)
    }

    /// Fill every pixel with one gamma-corrected color. Cheap path for
    /// frames that do not vary across the panel.
    pub fn push_uniform_rgb(
        &mut self,
        r: u8,
        g: u8,
        b: u8,
    ) -> Result<(), OutputError<D::Error>> {
        let slot = self.active_slot ^ 1;
        if self.slots[slot].state == SlotState::InFlight {
            return Err(OutputError::InvalidState);
        }
        self.slots[slot].state = SlotState::Packing;

        let grb = [
            self.gamma_lut[usize::from(g)],
            self.gamma_lut[usize::from(r)],
            self.gamma_lut[usize::from(b)],
        ];
        for wire in self.slots[slot].wire.iter_mut() {
            for pixel in wire.chunks_exact_mut(3) {
                pixel.copy_from_slice(&grb);
            }
        }

        self.transmit_slot(slot)
    }

    /// Wait out any in-flight transmit, release the hardware channels, and
    /// return the driver.
    pub fn shutdown(mut self) -> D {
        let _ = self.driver.wait_complete();
        self.driver.shutdown();
        self.driver
    }

    fn transmit_slot(&mut self, slot: usize) -> Result<(), OutputError<D::Error>> {
        self.driver.wait_complete()?;
        self.slots[self.active_slot].state = SlotState::Idle;

        let buffers: BoundedVec<&[u8], MAX_SEGMENTS> = self.slots[slot]
            .wire
            .iter()
            .map(|wire| wire.as_slice())
            .collect();
        self.driver.begin_transmit(&buffers)?;

        self.slots[slot].state = SlotState::InFlight;
        self.active_slot = slot;
        Ok(())
    }
}

fn fold_white(r: u8, g: u8, b: u8, w: u8) -> (u8, u8, u8) {
    if w == 0 {
        return (r, g, b);
    }
    (
        r.saturating_add(w),
        g.saturating_add(w),
        b.saturating_add(w),
    )
}

/// `lut[i] = round(255 * (i / 255) ^ gamma)`, identity at gamma 1.00.
fn build_gamma_lut(gamma_x100: u16) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if gamma_x100 == 100 {
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = i as u8;
        }
        return lut;
    }

    let gamma = f32::from(gamma_x100) / 100.0;
    for (i, entry) in lut.iter_mut().enumerate() {
        let normalized = i as f32 / 255.0;
        let corrected = libm::powf(normalized, gamma) * 255.0;
        *entry = libm::roundf(corrected).clamp(0.0, 255.0) as u8;
    }
    lut
}
