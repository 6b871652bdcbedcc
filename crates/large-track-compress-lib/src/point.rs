//! Track point storage
//!
//! This module provides the `PointRecord` struct, the unit every simplification
//! strategy works on. Besides coordinates it carries whatever the source document
//! attached to the point so nothing is lost when the point is written back.

use crate::XmlNode;
use crate::distance;
use geo::Coord;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// A single GPX track point
#[derive(Clone, Debug, PartialEq)]
pub struct PointRecord {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Elevation in meters, lifted from `<ele>`
    pub elevation: Option<f64>,
    /// UTC timestamp, lifted from `<time>`
    pub timestamp: Option<OffsetDateTime>,
    /// Attributes other than `lat` and `lon`
    pub attributes: BTreeMap<String, String>,
    /// Unrecognized children, in document order
    pub child_nodes: Vec<XmlNode>,
}

impl PointRecord {
    /// Create a bare point with only coordinates
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            timestamp: None,
            attributes: BTreeMap::new(),
            child_nodes: Vec::new(),
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Planar coordinate with `x = longitude`, `y = latitude`
    #[inline]
    pub fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }

    /// Whether both points share exactly the same latitude and longitude
    #[inline]
    pub fn same_position(&self, other: &PointRecord) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }

    /// Haversine distance to another point in meters
    #[inline]
    pub fn distance_to(&self, other: &PointRecord) -> f64 {
        distance::haversine_distance(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }

    /// Squared haversine distance to another point in square meters
    #[inline]
    pub fn distance_squared(&self, other: &PointRecord) -> f64 {
        distance::squared_distance(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}
