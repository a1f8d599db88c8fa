//! crates/lemontree_core/src/geo.rs
//!
//! Geohash encoding, radius query bounds and great-circle distance.
//!
//! The bounds computation produces the same ranges as the geofire family of
//! libraries, so items whose geohash was written by the mobile client line up
//! with the ranges queried here.

use serde::{Deserialize, Serialize};

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const BITS_PER_CHAR: u32 = 5;
const MAXIMUM_BITS_PRECISION: f64 = 22.0 * BITS_PER_CHAR as f64;
const EARTH_MERIDIONAL_CIRCUMFERENCE_M: f64 = 40_007_860.0;
const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;
const EARTH_EQUATORIAL_RADIUS_M: f64 = 6_378_137.0;
const EARTH_ECCENTRICITY_SQUARED: f64 = 0.006_694_478_197_99;
const EPSILON: f64 = 1e-12;

/// Mean Earth radius used for distance rechecks.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Precision of the geohash stored on items and users.
pub const DEFAULT_GEOHASH_PRECISION: usize = 10;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both coordinates are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// An inclusive geohash string range, `start <= geohash <= end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeohashRange {
    pub start: String,
    pub end: String,
}

impl GeohashRange {
    pub fn contains(&self, geohash: &str) -> bool {
        geohash >= self.start.as_str() && geohash <= self.end.as_str()
    }
}

/// Encodes a point as a base32 geohash of the given length.
pub fn encode_geohash(point: GeoPoint, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut value: usize = 0;
    let mut bits = 0;
    let mut even = true;

    while hash.len() < precision {
        let (coordinate, range) = if even {
            (point.longitude, &mut lon_range)
        } else {
            (point.latitude, &mut lat_range)
        };
        let mid = (range.0 + range.1) / 2.0;
        if coordinate > mid {
            value = (value << 1) + 1;
            range.0 = mid;
        } else {
            value <<= 1;
            range.1 = mid;
        }
        even = !even;

        if bits < 4 {
            bits += 1;
        } else {
            bits = 0;
            hash.push(BASE32[value] as char);
            value = 0;
        }
    }

    hash
}

/// Great-circle (haversine) distance between two points, in kilometres.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_delta = (b.latitude - a.latitude).to_radians();
    let lon_delta = (b.longitude - a.longitude).to_radians();
    let h = (lat_delta / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (lon_delta / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Computes the set of geohash ranges that together cover a circle of
/// `radius_m` metres around `center`.
///
/// The ranges cover a bounding box, so callers must recheck the exact
/// distance of every hit with [`distance_km`].
pub fn query_bounds(center: GeoPoint, radius_m: f64) -> Vec<GeohashRange> {
    let query_bits = bounding_box_bits(center, radius_m).max(1);
    let precision = query_bits.div_ceil(BITS_PER_CHAR) as usize;

    let mut ranges: Vec<GeohashRange> = Vec::new();
    for coordinate in bounding_box_coordinates(center, radius_m) {
        let range = range_for_geohash(&encode_geohash(coordinate, precision), query_bits);
        if !ranges.contains(&range) {
            ranges.push(range);
        }
    }
    ranges
}

fn meters_to_longitude_degrees(distance_m: f64, latitude: f64) -> f64 {
    let radians = latitude.to_radians();
    let num = radians.cos() * EARTH_EQUATORIAL_RADIUS_M * std::f64::consts::PI / 180.0;
    let denom = 1.0 / (1.0 - EARTH_ECCENTRICITY_SQUARED * radians.sin() * radians.sin()).sqrt();
    let delta_deg = num * denom;
    if delta_deg < EPSILON {
        if distance_m > 0.0 {
            360.0
        } else {
            0.0
        }
    } else {
        (distance_m / delta_deg).min(360.0)
    }
}

fn longitude_bits_for_resolution(resolution_m: f64, latitude: f64) -> f64 {
    let degrees = meters_to_longitude_degrees(resolution_m, latitude);
    if degrees.abs() > 0.000_001 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        1.0
    }
}

fn latitude_bits_for_resolution(resolution_m: f64) -> f64 {
    (EARTH_MERIDIONAL_CIRCUMFERENCE_M / 2.0 / resolution_m)
        .log2()
        .min(MAXIMUM_BITS_PRECISION)
}

fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

fn bounding_box_bits(center: GeoPoint, size_m: f64) -> u32 {
    let lat_delta = size_m / METERS_PER_DEGREE_LATITUDE;
    let north = (center.latitude + lat_delta).min(90.0);
    let south = (center.latitude - lat_delta).max(-90.0);
    let bits_lat = latitude_bits_for_resolution(size_m).floor() * 2.0;
    let bits_lon_north = longitude_bits_for_resolution(size_m, north).floor() * 2.0 - 1.0;
    let bits_lon_south = longitude_bits_for_resolution(size_m, south).floor() * 2.0 - 1.0;
    let bits = bits_lat
        .min(bits_lon_north)
        .min(bits_lon_south)
        .min(MAXIMUM_BITS_PRECISION);
    if bits <= 0.0 {
        0
    } else {
        bits as u32
    }
}

fn bounding_box_coordinates(center: GeoPoint, radius_m: f64) -> [GeoPoint; 9] {
    let lat_degrees = radius_m / METERS_PER_DEGREE_LATITUDE;
    let north = (center.latitude + lat_degrees).min(90.0);
    let south = (center.latitude - lat_degrees).max(-90.0);
    let lon_degrees = meters_to_longitude_degrees(radius_m, north)
        .max(meters_to_longitude_degrees(radius_m, south));
    let west = wrap_longitude(center.longitude - lon_degrees);
    let east = wrap_longitude(center.longitude + lon_degrees);

    [
        GeoPoint::new(center.latitude, center.longitude),
        GeoPoint::new(center.latitude, west),
        GeoPoint::new(center.latitude, east),
        GeoPoint::new(north, center.longitude),
        GeoPoint::new(north, west),
        GeoPoint::new(north, east),
        GeoPoint::new(south, center.longitude),
        GeoPoint::new(south, west),
        GeoPoint::new(south, east),
    ]
}

fn range_for_geohash(geohash: &str, bits: u32) -> GeohashRange {
    let precision = bits.div_ceil(BITS_PER_CHAR) as usize;
    if geohash.len() < precision {
        return GeohashRange {
            start: geohash.to_string(),
            end: format!("{}~", geohash),
        };
    }

    let hash = &geohash[..precision];
    let base = &hash[..hash.len() - 1];
    let last_char = hash.as_bytes()[hash.len() - 1];
    let last_value = BASE32.iter().position(|c| *c == last_char).unwrap_or(0);
    let significant_bits = bits - (base.len() as u32 * BITS_PER_CHAR);
    let unused_bits = BITS_PER_CHAR - significant_bits;

    let start_value = (last_value >> unused_bits) << unused_bits;
    let end_value = start_value + (1 << unused_bits);
    let start = format!("{}{}", base, BASE32[start_value] as char);
    let end = if end_value > 31 {
        format!("{}~", base)
    } else {
        format!("{}{}", base, BASE32[end_value] as char)
    };
    GeohashRange { start, end }
}
