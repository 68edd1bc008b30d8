#[allow(dead_code)]
mod common;

use approx::assert_abs_diff_eq;

use fabry_core::rings::{find_rings, RingCenter, RingCenterFinder};
use fabry_core::FabryError;

const PERCENTILE: u8 = 50;

// ---------------------------------------------------------------------------
// RingCenter
// ---------------------------------------------------------------------------

#[test]
fn test_center_pixel_rounds_to_row_col() {
    let c = RingCenter::new(2.4, 3.6);
    assert_eq!(c.pixel(10, 10), Some((4, 2)));
}

#[test]
fn test_center_pixel_outside_image() {
    assert_eq!(RingCenter::new(-1.0, 3.0).pixel(10, 10), None);
    assert_eq!(RingCenter::new(3.0, 9.6).pixel(10, 10), None);
    assert_eq!(RingCenter::new(f64::NAN, 0.0).pixel(10, 10), None);
}

#[test]
fn test_center_distance_and_display() {
    let a = RingCenter::new(1.0, 1.0);
    let b = RingCenter::new(4.0, 5.0);
    assert_abs_diff_eq!(a.distance_to(&b), 5.0, epsilon = 1e-12);
    assert_eq!(format!("{}", b), "(x=4.00, y=5.00)");
}

// ---------------------------------------------------------------------------
// Ring finder
// ---------------------------------------------------------------------------

#[test]
fn test_centered_rings_are_found() {
    let builder = common::airy_builder(80, 16);
    let cube = builder.build().unwrap();
    let rings = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();

    assert!(!rings.center_fallback);
    assert!(rings.center.distance_to(&RingCenter::new(39.5, 39.5)) < 0.5, "center {}", rings.center);
    assert!(rings.ring_count() >= 2, "radii {:?}", rings.radii);
    assert_eq!(rings.masks.len(), rings.ring_count());
    assert!(rings.radii.windows(2).all(|w| w[0] < w[1]));

    let expected = builder.ring_radii(0)[0];
    assert!((rings.radii[0] - expected).abs() < 1.5, "ring 0 at {} vs {expected}", rings.radii[0]);
    assert!(rings.mean_intensity > 0.0);
}

#[test]
fn test_off_center_rings_are_located() {
    let cube = common::airy_builder(100, 12).center(52.0, 47.0).build().unwrap();
    let rings = find_rings(&cube, RingCenterFinder::default(), 0, PERCENTILE).unwrap();
    assert!(!rings.center_fallback);
    assert!(rings.center.distance_to(&RingCenter::new(52.0, 47.0)) < 0.5, "center {}", rings.center);
    assert!(rings.ring_count() >= 2);
}

#[test]
fn test_blank_top_rows_keep_outer_rings() {
    let builder = common::airy_builder(80, 16);
    let truth = builder.ring_radii(0);
    for blank in [2, 4, 8] {
        let cube = builder.clone().blank(0..blank, 0..80).build().unwrap();
        let rings = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();

        assert!(!rings.center_fallback, "{blank} blank rows");
        assert!(
            rings.center.distance_to(&RingCenter::new(39.5, 39.5)) < 0.5,
            "{blank} blank rows: center {}",
            rings.center
        );
        assert!(rings.ring_count() >= 3, "{blank} blank rows: radii {:?}", rings.radii);
        for radius in &rings.radii {
            let nearest = truth.iter().map(|t| (t - radius).abs()).fold(f64::INFINITY, f64::min);
            assert!(nearest < 1.0, "{blank} blank rows: radius {radius} matches no ring of {truth:?}");
        }
        assert!((rings.radii[1] - truth[1]).abs() < 1.0, "{blank} blank rows: radii {:?}", rings.radii);
    }
}

#[test]
fn test_ring_masks_avoid_pixels_without_signal() {
    let cube = common::airy_builder(80, 16).blank(0..8, 0..80).build().unwrap();
    let rings = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();
    for mask in &rings.masks {
        for row in 0..8 {
            for col in 0..80 {
                assert!(!mask.is_noise(row, col), "ring pixel at blank ({row}, {col})");
            }
        }
    }
}

#[test]
fn test_ring_masks_cover_pixels_near_their_radius() {
    let cube = common::airy_cube(80, 16);
    let rings = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();
    for (radius, mask) in rings.radii.iter().zip(&rings.masks) {
        assert!(mask.noise_count() > 0);
        for ((row, col), &v) in mask.array().indexed_iter() {
            if v == 0 {
                continue;
            }
            let d = ((row as f64 - rings.center.y).powi(2) + (col as f64 - rings.center.x).powi(2)).sqrt();
            assert!((d - radius).abs() < 0.5 * radius, "pixel ({row}, {col}) far from ring {radius}");
        }
    }
}

#[test]
fn test_flat_image_falls_back_to_image_center() {
    let cube = common::cube_from_fn(2, 20, 30, |_, _, _| 5.0);
    let rings = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();
    assert!(rings.center_fallback);
    assert_eq!(rings.center, RingCenter::new(14.5, 9.5));
    assert_eq!(rings.ring_count(), 0);
}

#[test]
fn test_same_input_same_geometry() {
    let cube = common::airy_cube(60, 8);
    let a = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();
    let b = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, PERCENTILE).unwrap();
    assert_eq!(a.hash(), b.hash());
    assert_eq!(a.radii, b.radii);
}

#[test]
fn test_plane_out_of_range() {
    let cube = common::airy_cube(20, 4);
    let err = find_rings(&cube, RingCenterFinder::EdgeRegions, 4, PERCENTILE).unwrap_err();
    assert!(matches!(err, FabryError::InvalidConfig(_)));
}

#[test]
fn test_percentile_out_of_range() {
    let cube = common::airy_cube(20, 4);
    let err = find_rings(&cube, RingCenterFinder::EdgeRegions, 0, 100).unwrap_err();
    assert!(matches!(err, FabryError::InvalidConfig(_)));
}
