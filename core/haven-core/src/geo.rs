//! Geodesy utilities: great-circle distance and point-to-polyline distance.
//!
//! Both functions are pure and deterministic. The point-to-segment distance
//! uses a locally-flat approximation (lat/lon deltas treated as planar
//! coordinates, longitude scaled by the cosine of the mean latitude) before
//! measuring the final distance with the haversine formula. That is accurate
//! for the segment lengths safe routes are made of (tens of meters to a few
//! kilometers) and degrades for very long or near-polar segments; it is a
//! documented approximation, not geodesic projection.

/// Mean Earth radius in meters. The single canonical constant for every
/// distance computation in the crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters, via the
/// haversine formula.
pub fn haversine_distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Distance in meters from point `p` to the segment `a`-`b`, all given as
/// `(latitude, longitude)` pairs.
///
/// Projects `p` onto the line through `a` and `b` in the flattened plane,
/// clamps the projection parameter to the segment, then measures haversine
/// distance from `p` to the clamped point. A degenerate segment (`a == b`)
/// falls back to plain point distance.
pub fn point_to_segment_distance_meters(
    p: (f64, f64),
    a: (f64, f64),
    b: (f64, f64),
) -> f64 {
    let mean_lat = ((a.0 + b.0) / 2.0).to_radians();
    let lon_scale = mean_lat.cos();

    // Planar coordinates: x = scaled longitude, y = latitude.
    let px = (p.1 - a.1) * lon_scale;
    let py = p.0 - a.0;
    let bx = (b.1 - a.1) * lon_scale;
    let by = b.0 - a.0;

    let seg_len_sq = bx * bx + by * by;
    let t = if seg_len_sq == 0.0 {
        0.0
    } else {
        ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0)
    };

    let nearest_lat = a.0 + t * (b.0 - a.0);
    let nearest_lon = a.1 + t * (b.1 - a.1);

    haversine_distance_meters(p.0, p.1, nearest_lat, nearest_lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE_METERS: f64 = 1.0;

    #[test]
    fn test_haversine_zero_for_identical_points() {
        assert_eq!(haversine_distance_meters(48.85, 2.35, 48.85, 2.35), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude along a meridian is ~111.19 km.
        let d = haversine_distance_meters(0.0, 0.0, 1.0, 0.0);
        let expected = EARTH_RADIUS_METERS * 1.0_f64.to_radians();
        assert!((d - expected).abs() < TOLERANCE_METERS);
    }

    #[test]
    fn test_haversine_symmetric() {
        let d1 = haversine_distance_meters(12.97, 77.59, 13.08, 80.27);
        let d2 = haversine_distance_meters(13.08, 80.27, 12.97, 77.59);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn test_segment_projection_onto_interior() {
        // Segment along the equator from lon 0 to lon 1; a point slightly
        // north at lon 0.5 projects to (0, 0.5).
        let d = point_to_segment_distance_meters((0.0005, 0.5), (0.0, 0.0), (0.0, 1.0));
        let expected = haversine_distance_meters(0.0005, 0.5, 0.0, 0.5);
        assert!((d - expected).abs() < TOLERANCE_METERS);
    }

    #[test]
    fn test_segment_clamps_past_endpoint() {
        // A query beyond the segment end measures to the endpoint, not a
        // linear extrapolation of the segment.
        let d = point_to_segment_distance_meters((0.0, 1.5), (0.0, 0.0), (0.0, 1.0));
        let expected = haversine_distance_meters(0.0, 1.5, 0.0, 1.0);
        assert!((d - expected).abs() < TOLERANCE_METERS);
    }

    #[test]
    fn test_segment_clamps_before_start() {
        let d = point_to_segment_distance_meters((-0.5, -0.5), (0.0, 0.0), (0.0, 1.0));
        let expected = haversine_distance_meters(-0.5, -0.5, 0.0, 0.0);
        assert!((d - expected).abs() < TOLERANCE_METERS);
    }

    #[test]
    fn test_degenerate_segment_is_point_distance() {
        let d = point_to_segment_distance_meters((1.0, 1.0), (0.0, 0.0), (0.0, 0.0));
        let expected = haversine_distance_meters(1.0, 1.0, 0.0, 0.0);
        assert!((d - expected).abs() < TOLERANCE_METERS);
    }

    #[test]
    fn test_point_on_segment_is_zero() {
        let d = point_to_segment_distance_meters((0.0, 0.25), (0.0, 0.0), (0.0, 1.0));
        assert!(d < TOLERANCE_METERS);
    }
}
