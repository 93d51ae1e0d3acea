//! Output pipeline tests with a mock strip driver.
//!
//! The mock records configure/transmit/wait calls through shared cells so
//! tests can assert on wire bytes, call ordering, and double buffering.

use std::cell::RefCell;
use std::rc::Rc;

use ledgrid_core::{Layout, LedOutput, OutputError, PixelFormat, Segment};
use ledgrid_hal::{SegmentChannel, StripDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverCall {
    Configure(usize),
    Transmit,
    WaitComplete,
}

#[derive(Clone, Default)]
struct MockStrip {
    calls: Rc<RefCell<Vec<DriverCall>>>,
    configured: Rc<RefCell<Vec<SegmentChannel>>>,
    transmits: Rc<RefCell<Vec<Vec<Vec<u8>>>>>,
}

impl MockStrip {
    fn new() -> Self {
        Self::default()
    }

    fn last_transmit(&self) -> Vec<Vec<u8>> {
        self.transmits.borrow().last().cloned().expect("a transmit")
    }

    fn transmit_count(&self) -> usize {
        self.transmits.borrow().len()
    }
}

#[derive(Debug)]
struct MockStripError;

impl StripDriver for MockStrip {
    type Error = MockStripError;

    fn configure(&mut self, segments: &[SegmentChannel]) -> Result<(), Self::Error> {
        self.calls
            .borrow_mut()
            .push(DriverCall::Configure(segments.len()));
        *self.configured.borrow_mut() = segments.to_vec();
        Ok(())
    }

    fn begin_transmit(&mut self, buffers: &[&[u8]]) -> Result<(), Self::Error> {
        self.calls.borrow_mut().push(DriverCall::Transmit);
        self.transmits
            .borrow_mut()
            .push(buffers.iter().map(|buffer| buffer.to_vec()).collect());
        Ok(())
    }

    fn wait_complete(&mut self) -> Result<(), Self::Error> {
        self.calls.borrow_mut().push(DriverCall::WaitComplete);
        Ok(())
    }

    fn shutdown(&mut self) {}
}

/// 2x2 panel split over two chains of two LEDs.
fn small_layout() -> Layout {
    let mut segments = heapless::Vec::new();
    segments.push(Segment { gpio: 4, led_count: 2 }).unwrap();
    segments.push(Segment { gpio: 5, led_count: 2 }).unwrap();
    Layout {
        width: 2,
        height: 2,
        serpentine_columns: false,
        segments,
    }
}

/// Pipeline with identity gamma so wire bytes can be compared exactly.
fn identity_output() -> (LedOutput<MockStrip>, MockStrip) {
    let driver = MockStrip::new();
    let probe = driver.clone();
    let output = LedOutput::new(driver, &small_layout(), 100).expect("init should succeed");
    (output, probe)
}

mod gamma_tests {
    use super::*;

    #[test]
    fn default_curve_is_monotonic_with_fixed_endpoints() {
        let driver = MockStrip::new();
        let output = LedOutput::new(driver, &small_layout(), 280).unwrap();

        assert_eq!(output.gamma_correct(0), 0);
        assert_eq!(output.gamma_correct(255), 255);
        let mut previous = 0u8;
        for value in 0..=255u16 {
            let corrected = output.gamma_correct(value as u8);
            assert!(
                corrected >= previous,
                "lut must not decrease at {value}: {corrected} < {previous}"
            );
            previous = corrected;
        }
        // 2.80 darkens the midtones hard.
        assert!(output.gamma_correct(128) < 40);
    }

    #[test]
    fn gamma_100_is_identity() {
        let (output, _probe) = identity_output();
        for value in [0u8, 1, 17, 127, 200, 255] {
            assert_eq!(output.gamma_correct(value), value);
        }
    }

    #[test]
    fn zero_gamma_rejected() {
        let driver = MockStrip::new();
        assert!(matches!(
            LedOutput::new(driver, &small_layout(), 0),
            Err(OutputError::InvalidArg)
        ));
    }
}

mod push_frame_tests {
    use super::*;

    #[test]
    fn init_configures_every_segment() {
        let (_output, probe) = identity_output();
        assert_eq!(probe.calls.borrow()[0], DriverCall::Configure(2));
        let configured = probe.configured.borrow();
        assert_eq!(configured.len(), 2);
        assert_eq!(configured[0].led_count, 2);
        assert_eq!(configured[1].gpio, 5);
    }

    #[test]
    fn rgb_frame_packs_grb_wire_order() {
        let (mut output, probe) = identity_output();
        let frame = [
            10, 20, 30, // led 0
            40, 50, 60, // led 1
            70, 80, 90, // led 2
            1, 2, 3, // led 3
        ];
        output.push_frame(&frame, PixelFormat::Rgb, 3).unwrap();

        let wire = probe.last_transmit();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0], vec![20, 10, 30, 50, 40, 60]);
        assert_eq!(wire[1], vec![80, 70, 90, 2, 1, 3]);
    }

    #[test]
    fn bgr_frame_swaps_channels() {
        let (mut output, probe) = identity_output();
        let mut frame = [0u8; 12];
        frame[..3].copy_from_slice(&[30, 20, 10]); // b, g, r
        output.push_frame(&frame, PixelFormat::Bgr, 3).unwrap();

        let wire = probe.last_transmit();
        assert_eq!(&wire[0][..3], &[20, 10, 30]);
    }

    #[test]
    fn white_channel_folds_with_saturation() {
        let (mut output, probe) = identity_output();
        let mut frame = [0u8; 16];
        frame[..4].copy_from_slice(&[10, 20, 30, 5]); // r g b w
        frame[4..8].copy_from_slice(&[250, 0, 0, 10]); // saturates red
        output.push_frame(&frame, PixelFormat::Rgbw, 4).unwrap();

        let wire = probe.last_transmit();
        assert_eq!(&wire[0][..3], &[25, 15, 35]);
        assert_eq!(&wire[0][3..6], &[10, 255, 10]);
    }

    #[test]
    fn grbw_frame_unpacks_and_folds() {
        let (mut output, probe) = identity_output();
        let mut frame = [0u8; 16];
        frame[..4].copy_from_slice(&[20, 10, 30, 1]); // g r b w
        output.push_frame(&frame, PixelFormat::Grbw, 4).unwrap();

        let wire = probe.last_transmit();
        assert_eq!(&wire[0][..3], &[21, 11, 31]);
    }

    #[test]
    fn gamma_applies_after_white_fold() {
        let driver = MockStrip::new();
        let probe = driver.clone();
        let mut output = LedOutput::new(driver, &small_layout(), 280).unwrap();

        let mut frame = [0u8; 16];
        frame[..4].copy_from_slice(&[250, 0, 0, 10]);
        output.push_frame(&frame, PixelFormat::Rgbw, 4).unwrap();

        let wire = probe.last_transmit();
        // Saturated 255 stays 255 through any gamma curve.
        assert_eq!(wire[0][1], 255);
        assert_eq!(wire[0][0], output.gamma_correct(10));
    }

    #[test]
    fn mismatched_bytes_per_pixel_rejected() {
        let (mut output, _probe) = identity_output();
        let frame = [0u8; 16];
        assert!(matches!(
            output.push_frame(&frame, PixelFormat::Rgb, 4),
            Err(OutputError::InvalidArg)
        ));
        assert!(matches!(
            output.push_frame(&frame, PixelFormat::Rgbw, 3),
            Err(OutputError::InvalidArg)
        ));
    }

    #[test]
    fn short_frame_rejected() {
        let (mut output, _probe) = identity_output();
        let frame = [0u8; 11];
        assert!(matches!(
            output.push_frame(&frame, PixelFormat::Rgb, 3),
            Err(OutputError::InvalidSize)
        ));
    }

    #[test]
    fn wait_precedes_every_transmit() {
        let (mut output, probe) = identity_output();
        let frame = [0u8; 12];
        output.push_frame(&frame, PixelFormat::Rgb, 3).unwrap();
        output.push_frame(&frame, PixelFormat::Rgb, 3).unwrap();

        let calls = probe.calls.borrow();
        let sequence: Vec<_> = calls
            .iter()
            .filter(|call| **call != DriverCall::Configure(2))
            .copied()
            .collect();
        assert_eq!(
            sequence,
            vec![
                DriverCall::WaitComplete,
                DriverCall::Transmit,
                DriverCall::WaitComplete,
                DriverCall::Transmit,
            ]
        );
    }

    #[test]
    fn consecutive_frames_alternate_slots() {
        let (mut output, probe) = identity_output();
        let mut first = [0u8; 12];
        first[0] = 11;
        let mut second = [0u8; 12];
        second[0] = 22;

        output.push_frame(&first, PixelFormat::Rgb, 3).unwrap();
        output.push_frame(&second, PixelFormat::Rgb, 3).unwrap();
        output.push_frame(&first, PixelFormat::Rgb, 3).unwrap();

        assert_eq!(probe.transmit_count(), 3);
        let transmits = probe.transmits.borrow();
        assert_eq!(transmits[0][0][1], 11);
        assert_eq!(transmits[1][0][1], 22);
        assert_eq!(transmits[2][0][1], 11);
    }
}

mod uniform_tests {
    use super::*;

    #[test]
    fn uniform_push_fills_every_pixel() {
        let (mut output, probe) = identity_output();
        output.push_uniform_rgb(10, 20, 30).unwrap();

        let wire = probe.last_transmit();
        for segment in wire {
            for pixel in segment.chunks_exact(3) {
                assert_eq!(pixel, &[20, 10, 30]);
            }
        }
    }

    #[test]
    fn uniform_push_applies_gamma() {
        let driver = MockStrip::new();
        let probe = driver.clone();
        let mut output = LedOutput::new(driver, &small_layout(), 280).unwrap();
        output.push_uniform_rgb(128, 128, 128).unwrap();

        let expected = output.gamma_correct(128);
        let wire = probe.last_transmit();
        assert_eq!(wire[0][0], expected);
        assert_eq!(wire[1][5], expected);
    }
}
