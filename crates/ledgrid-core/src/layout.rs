//! Panel layout and logical-to-physical pixel mapping.
//!
//! A panel is a logical `width x height` grid wired column-major across up
//! to [`MAX_SEGMENTS`] LED chains. Mapping is pure and allocation-free so
//! the render loop can call it per pixel.

use heapless::Vec;

/// Maximum number of LED segments (driver channels) per panel.
pub const MAX_SEGMENTS: usize = 8;
/// Built-in default panel width (columns).
pub const DEFAULT_WIDTH: u16 = 30;
/// Built-in default panel height (rows).
pub const DEFAULT_HEIGHT: u16 = 40;

/// One contiguous LED chain driven by a single GPIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub gpio: u8,
    pub led_count: u16,
}

/// Panel geometry. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub width: u16,
    pub height: u16,
    /// Odd columns are wired bottom-to-top.
    pub serpentine_columns: bool,
    pub segments: Vec<Segment, MAX_SEGMENTS>,
}

/// Resolved position of one logical pixel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalIndex {
    pub segment: u8,
    /// LED index within the segment.
    pub offset: u16,
    /// LED index across all segments in wiring order.
    pub global: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// Dimension, segment count, GPIO, or coordinate out of range.
    InvalidArg,
    /// Segment LED counts do not cover `width * height`.
    InvalidSize,
}

impl Default for Layout {
    /// The reference build: 30x40 serpentine grid split over three chains
    /// of 400 LEDs on GPIOs 13, 32, and 33.
    fn default() -> Self {
        let mut segments = Vec::new();
        for gpio in [13u8, 32, 33] {
            let _ = segments.push(Segment {
                gpio,
                led_count: 400,
            });
        }
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            serpentine_columns: true,
            segments,
        }
    }
}

impl Layout {
    /// Sum of all segment LED counts.
    pub fn total_leds(&self) -> u32 {
        self.segments
            .iter()
            .map(|segment| u32::from(segment.led_count))
            .sum()
    }

    /// Check dimensions, segment table, and that the chains exactly cover
    /// the logical grid.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.width == 0 || self.height == 0 {
            return Err(LayoutError::InvalidArg);
        }
        if self.segments.is_empty() {
            return Err(LayoutError::InvalidArg);
        }
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.led_count == 0 {
                return Err(LayoutError::InvalidArg);
            }
            // Two chains cannot share an output pin.
            if self.segments[..index]
                .iter()
                .any(|other| other.gpio == segment.gpio)
            {
                return Err(LayoutError::InvalidArg);
            }
        }

        let expected = u32::from(self.width) * u32::from(self.height);
        if self.total_leds() != expected {
            return Err(LayoutError::InvalidSize);
        }
        Ok(())
    }

    /// Map a logical `(x, y)` pixel to its wire position, reversing y in
    /// odd columns when the panel is serpentine.
    pub fn map_logical_xy(&self, x: u16, y: u16) -> Result<PhysicalIndex, LayoutError> {
        if x >= self.width || y >= self.height {
            return Err(LayoutError::InvalidArg);
        }

        let mut mapped_y = y;
        if self.serpentine_columns && (x & 1) != 0 {
            mapped_y = self.height - 1 - y;
        }

        let global = u32::from(x) * u32::from(self.height) + u32::from(mapped_y);
        self.resolve_global(global)
    }

    /// Map a row-major logical index (`x = idx % width`, `y = idx / width`).
    pub fn map_logical_linear(&self, logical_index: u32) -> Result<PhysicalIndex, LayoutError> {
        let logical_len = u32::from(self.width) * u32::from(self.height);
        if logical_index >= logical_len {
            return Err(LayoutError::InvalidArg);
        }

        let x = (logical_index % u32::from(self.width)) as u16;
        let y = (logical_index / u32::from(self.width)) as u16;
        self.map_logical_xy(x, y)
    }

    /// Walk segment prefix sums to split a global LED index into
    /// `(segment, offset)`.
    fn resolve_global(&self, global: u32) -> Result<PhysicalIndex, LayoutError> {
        let mut offset = 0u32;
        for (segment, config) in self.segments.iter().enumerate() {
            let segment_len = u32::from(config.led_count);
            if global < offset + segment_len {
                return Ok(PhysicalIndex {
                    segment: segment as u8,
                    offset: (global - offset) as u16,
                    global,
                });
            }
            offset += segment_len;
        }
        Err(LayoutError::InvalidSize)
    }
}
