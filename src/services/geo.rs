//! Geographic calculations

use crate::types::Location;

/// Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate Haversine distance between two points in meters
pub fn haversine_distance_m(from: &Location, to: &Location) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lon - from.lon).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from one point to another, degrees [0, 360)
pub fn bearing_deg(from: &Location, to: &Location) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = (to.lon - from.lon).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Smallest angular difference between two headings, degrees [0, 180]
pub fn heading_delta_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

/// Projection of a point onto a polyline segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Perpendicular distance from the point to the segment, meters
    pub distance_m: f64,
    /// Distance along the segment to the projected point, clamped to
    /// [0, segment length], meters
    pub along_m: f64,
}

/// Project `point` onto the segment `start -> end`.
///
/// Uses an equirectangular approximation around the segment start, which
/// is accurate to well under a meter at stop-path scale (hundreds of
/// meters). A degenerate zero-length segment projects to its start point.
pub fn project_onto_segment(point: &Location, start: &Location, end: &Location) -> SegmentProjection {
    let cos_lat = start.lat.to_radians().cos();

    // Local east/north coordinates in meters, origin at segment start.
    let to_xy = |loc: &Location| {
        let x = (loc.lon - start.lon).to_radians() * cos_lat * EARTH_RADIUS_M;
        let y = (loc.lat - start.lat).to_radians() * EARTH_RADIUS_M;
        (x, y)
    };

    let (px, py) = to_xy(point);
    let (ex, ey) = to_xy(end);

    let seg_len_sq = ex * ex + ey * ey;
    if seg_len_sq <= f64::EPSILON {
        return SegmentProjection {
            distance_m: (px * px + py * py).sqrt(),
            along_m: 0.0,
        };
    }

    let seg_len = seg_len_sq.sqrt();
    let t = ((px * ex + py * ey) / seg_len_sq).clamp(0.0, 1.0);

    let qx = t * ex;
    let qy = t * ey;
    let dx = px - qx;
    let dy = py - qy;

    SegmentProjection {
        distance_m: (dx * dx + dy * dy).sqrt(),
        along_m: t * seg_len,
    }
}
