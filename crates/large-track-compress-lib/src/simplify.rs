//! Point reduction strategies
//!
//! Every function works on one segment's ordered point sequence and returns the
//! retained points in their original order. All of them are linear except
//! Ramer-Douglas-Peucker.

use crate::PointRecord;
use crate::distance;
use rand::Rng;

/// Ramer-Douglas-Peucker simplification with a tolerance in meters
///
/// Sequences of two points or fewer are returned unchanged. Distances are compared
/// squared against `tolerance²`. The range split uses an explicit work stack, so
/// very long and badly balanced inputs cannot exhaust the thread stack.
pub fn ramer_douglas_peucker(points: &[PointRecord], tolerance: f64) -> Vec<PointRecord> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let tolerance_squared = tolerance * tolerance;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut ranges = vec![(0usize, points.len() - 1)];
    while let Some((start, end)) = ranges.pop() {
        let (index, max_distance) = farthest_point(points, start, end);
        if max_distance > tolerance_squared {
            keep[index] = true;
            ranges.push((index, end));
            ranges.push((start, index));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then(|| point.clone()))
        .collect()
}

/// Interior point of `start..=end` farthest from the chord, with its squared distance
///
/// Returns `(start, 0.0)` when the range has no interior point.
#[inline]
fn farthest_point(points: &[PointRecord], start: usize, end: usize) -> (usize, f64) {
    let first = &points[start];
    let last = &points[end];
    let mut index = start;
    let mut max_distance = 0.0;

    for (i, point) in points.iter().enumerate().take(end).skip(start + 1) {
        let distance = perpendicular_distance_squared(point, first, last);
        if distance > max_distance {
            index = i;
            max_distance = distance;
        }
    }

    (index, max_distance)
}

/// Squared distance from `point` to the chord `line_start → line_end`
///
/// The foot of the perpendicular is the clamped projection in (lat, lon) space. The
/// result adds the haversine² between the point and its projection to the planar
/// degree² delta between the same two coordinates.
pub fn perpendicular_distance_squared(
    point: &PointRecord,
    line_start: &PointRecord,
    line_end: &PointRecord,
) -> f64 {
    if line_start.same_position(line_end) {
        return point.distance_squared(line_start);
    }

    let p = point.coord();
    let a = line_start.coord();
    let line = line_end.coord() - a;
    let line_length_squared = line.x * line.x + line.y * line.y;
    if line_length_squared == 0.0 {
        return point.distance_squared(line_start);
    }

    let offset = p - a;
    let t = ((offset.x * line.x + offset.y * line.y) / line_length_squared).clamp(0.0, 1.0);
    let projection = a + line * t;

    let approx_distance = distance::squared_distance(p.y, p.x, projection.y, projection.x);
    let delta = projection - p;
    approx_distance + delta.x * delta.x + delta.y * delta.y
}

/// Keep a point only if it lies at least `radius` meters from the last kept point
///
/// The first point is always kept and the final point is always appended, even
/// when it falls inside the radius of the point kept before it.
pub fn strip_nearby(points: &[PointRecord], radius: f64) -> Vec<PointRecord> {
    if points.len() <= 1 {
        return points.to_vec();
    }

    let mut filtered: Vec<PointRecord> = Vec::with_capacity(points.len());
    for point in points {
        match filtered.last() {
            Some(last_kept) if last_kept.distance_to(point) < radius => {}
            _ => filtered.push(point.clone()),
        }
    }

    if filtered.last() != points.last() {
        if let Some(last) = points.last() {
            filtered.push(last.clone());
        }
    }
    filtered
}

/// Drop a point when its coordinates exactly equal the last kept point's
pub fn strip_duplicates(points: &[PointRecord]) -> Vec<PointRecord> {
    if points.len() <= 1 {
        return points.to_vec();
    }

    let mut filtered: Vec<PointRecord> = Vec::with_capacity(points.len());
    for point in points {
        if filtered.last().is_some_and(|kept| kept.same_position(point)) {
            continue;
        }
        filtered.push(point.clone());
    }
    filtered
}

/// Keep each point independently with probability `1 - percent`
///
/// A `percent` outside the open interval `(0, 1)` leaves the input unchanged.
pub fn random_thinning<R: Rng + ?Sized>(
    points: &[PointRecord],
    percent: f64,
    rng: &mut R,
) -> Vec<PointRecord> {
    if !(percent > 0.0 && percent < 1.0) {
        return points.to_vec();
    }

    let keep_probability = (1.0 - percent).clamp(0.0, 1.0);
    points
        .iter()
        .filter(|_| rng.random_range(0.0..=1.0) <= keep_probability)
        .cloned()
        .collect()
}
