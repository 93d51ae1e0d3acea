//! Layout validation and logical-to-physical mapping tests.

use std::collections::HashSet;

use ledgrid_core::{Layout, LayoutError, Segment};

/// Build a layout from explicit parts.
fn layout(width: u16, height: u16, serpentine: bool, segments: &[(u8, u16)]) -> Layout {
    let mut built = Layout {
        width,
        height,
        serpentine_columns: serpentine,
        segments: heapless::Vec::new(),
    };
    for (gpio, led_count) in segments {
        built
            .segments
            .push(Segment {
                gpio: *gpio,
                led_count: *led_count,
            })
            .expect("segment count within MAX_SEGMENTS");
    }
    built
}

mod validate_tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        let layout = Layout::default();
        assert_eq!(layout.validate(), Ok(()));
        assert_eq!(layout.total_leds(), 1200);
        assert_eq!(layout.width, 30);
        assert_eq!(layout.height, 40);
        assert!(layout.serpentine_columns);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let bad = layout(0, 40, true, &[(13, 400)]);
        assert_eq!(bad.validate(), Err(LayoutError::InvalidArg));
        let bad = layout(30, 0, true, &[(13, 400)]);
        assert_eq!(bad.validate(), Err(LayoutError::InvalidArg));
    }

    #[test]
    fn empty_segment_table_rejected() {
        let bad = layout(3, 2, false, &[]);
        assert_eq!(bad.validate(), Err(LayoutError::InvalidArg));
    }

    #[test]
    fn zero_length_segment_rejected() {
        let bad = layout(3, 2, false, &[(13, 6), (14, 0)]);
        assert_eq!(bad.validate(), Err(LayoutError::InvalidArg));
    }

    #[test]
    fn duplicate_gpio_rejected() {
        let bad = layout(3, 2, false, &[(13, 3), (13, 3)]);
        assert_eq!(bad.validate(), Err(LayoutError::InvalidArg));
    }

    #[test]
    fn led_sum_must_match_grid() {
        let bad = layout(3, 2, false, &[(13, 5)]);
        assert_eq!(bad.validate(), Err(LayoutError::InvalidSize));
        let good = layout(3, 2, false, &[(13, 6)]);
        assert_eq!(good.validate(), Ok(()));
    }
}

mod mapping_tests {
    use super::*;

    #[test]
    fn serpentine_3x2_known_positions() {
        let layout = layout(3, 2, true, &[(13, 6)]);
        assert_eq!(layout.validate(), Ok(()));

        assert_eq!(layout.map_logical_xy(0, 0).unwrap().global, 0);
        assert_eq!(layout.map_logical_xy(1, 0).unwrap().global, 3);
        assert_eq!(layout.map_logical_xy(2, 0).unwrap().global, 4);
        assert_eq!(layout.map_logical_xy(1, 1).unwrap().global, 2);
    }

    #[test]
    fn non_serpentine_is_column_major() {
        let layout = layout(3, 2, false, &[(13, 6)]);
        assert_eq!(layout.map_logical_xy(0, 0).unwrap().global, 0);
        assert_eq!(layout.map_logical_xy(0, 1).unwrap().global, 1);
        assert_eq!(layout.map_logical_xy(1, 0).unwrap().global, 2);
        assert_eq!(layout.map_logical_xy(2, 1).unwrap().global, 5);
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let layout = layout(3, 2, true, &[(13, 6)]);
        assert_eq!(
            layout.map_logical_xy(3, 0).unwrap_err(),
            LayoutError::InvalidArg
        );
        assert_eq!(
            layout.map_logical_xy(0, 2).unwrap_err(),
            LayoutError::InvalidArg
        );
        assert_eq!(
            layout.map_logical_linear(6).unwrap_err(),
            LayoutError::InvalidArg
        );
    }

    #[test]
    fn mapping_is_a_bijection_over_the_grid() {
        let layout = Layout::default();
        let total = layout.total_leds();
        let mut seen = HashSet::new();

        for y in 0..layout.height {
            for x in 0..layout.width {
                let mapped = layout.map_logical_xy(x, y).unwrap();
                assert!(mapped.global < total, "global {} out of range", mapped.global);
                assert!(
                    seen.insert(mapped.global),
                    "global {} hit twice",
                    mapped.global
                );
            }
        }
        assert_eq!(seen.len() as u32, total);
    }

    #[test]
    fn segment_offsets_follow_prefix_sums() {
        let layout = layout(2, 3, false, &[(13, 2), (14, 4)]);
        assert_eq!(layout.validate(), Ok(()));

        let first = layout.map_logical_xy(0, 1).unwrap();
        assert_eq!((first.segment, first.offset, first.global), (0, 1, 1));

        let second = layout.map_logical_xy(1, 0).unwrap();
        assert_eq!((second.segment, second.offset, second.global), (1, 1, 3));

        let last = layout.map_logical_xy(1, 2).unwrap();
        assert_eq!((last.segment, last.offset, last.global), (1, 3, 5));
    }

    #[test]
    fn linear_mapping_matches_xy() {
        let layout = Layout::default();
        for logical in [0u32, 1, 29, 30, 599, 1199] {
            let x = (logical % 30) as u16;
            let y = (logical / 30) as u16;
            assert_eq!(
                layout.map_logical_linear(logical).unwrap(),
                layout.map_logical_xy(x, y).unwrap()
            );
        }
    }
}
