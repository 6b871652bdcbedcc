//! Geodesic distance helpers used by the simplification strategies

/// Mean Earth radius in meters used for all haversine computations
pub const EARTH_RADIUS_M: f64 = 6_367_444.7;

/// Great-circle distance in meters between two (lat, lon) pairs given in degrees
///
/// The intermediate term is clamped to 1.0 so identical and antipodal points never
/// leave the domain of `asin`.
#[inline(always)]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = lat2_rad - lat1_rad;
    let delta_lon = (lon2 - lon1).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lon = (delta_lon / 2.0).sin();
    let a = sin_lat * sin_lat + lat1_rad.cos() * lat2_rad.cos() * sin_lon * sin_lon;
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Squared haversine distance in square meters
#[inline(always)]
pub fn squared_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let distance = haversine_distance(lat1, lon1, lat2, lon2);
    distance * distance
}
