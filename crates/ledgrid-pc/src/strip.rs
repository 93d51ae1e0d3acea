//! Simulated LED strip driver.
//!
//! Stands in for the RMT/DMA transmit hardware: accepts synchronized
//! frame transmissions, tracks in-flight state, and logs a heartbeat so a
//! headless run shows signs of life.

use ledgrid_hal::{SegmentChannel, StripDriver};

/// Log one heartbeat line every this many frames (about 10 s at 40 fps).
const HEARTBEAT_FRAMES: u64 = 400;

#[derive(Debug)]
pub enum SimStripError {
    NotConfigured,
    SegmentMismatch,
}

pub struct SimStripDriver {
    segments: Vec<SegmentChannel>,
    frames: u64,
    in_flight: bool,
}

impl SimStripDriver {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            frames: 0,
            in_flight: false,
        }
    }
}

impl Default for SimStripDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StripDriver for SimStripDriver {
    type Error = SimStripError;

    fn configure(&mut self, segments: &[SegmentChannel]) -> Result<(), Self::Error> {
        self.segments = segments.to_vec();
        log::info!("sim strip: {} segments configured", segments.len());
        Ok(())
    }

    fn begin_transmit(&mut self, buffers: &[&[u8]]) -> Result<(), Self::Error> {
        if self.segments.is_empty() {
            return Err(SimStripError::NotConfigured);
        }
        if buffers.len() != self.segments.len() {
            return Err(SimStripError::SegmentMismatch);
        }

        self.in_flight = true;
        self.frames += 1;
        if self.frames % HEARTBEAT_FRAMES == 0 {
            let first = buffers[0].get(..3).unwrap_or(&[]);
            log::debug!(
                "sim strip: {} frames transmitted, segment 0 starts {:?}",
                self.frames,
                first
            );
        }
        Ok(())
    }

    fn wait_complete(&mut self) -> Result<(), Self::Error> {
        self.in_flight = false;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.segments.clear();
        self.in_flight = false;
    }
}
